use crate::{error::Result, models::GenerationOutput};
use async_trait::async_trait;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    InQueue { position: Option<u64> },
    InProgress,
}

/// One status update observed while a job is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub request_id: String,
    pub state: QueueState,
    pub logs: Vec<String>,
}

/// Receives progress while a job is pending. Observers cannot influence the
/// job.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Logs backend log lines of in-progress jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        match &event.state {
            QueueState::InQueue { position } => log::debug!(
                "Job {} queued at position {}",
                event.request_id,
                position.map_or_else(|| "?".to_string(), |p| p.to_string())
            ),
            QueueState::InProgress => {
                for line in &event.logs {
                    log::info!("[{}] {}", event.request_id, line);
                }
            }
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Runs one generation job to completion. The job draws its own
    /// credential.
    async fn subscribe(
        &self,
        model: &str,
        input: Map<String, Value>,
        observer: &dyn ProgressObserver,
    ) -> Result<GenerationOutput>;

    /// Uploads a source file and returns the URL the backend can read it
    /// from. The upload draws its own credential.
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}
