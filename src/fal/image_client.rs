use super::{
    credentials::{Credential, CredentialPool},
    traits::{GenerationBackend, ProgressEvent, ProgressObserver, QueueState},
};
use crate::{
    config::FalConfig,
    error::{FluxError, Result},
    models::{
        FalResultResponse, GenerationOutput, ImageDescriptor, QueueStatusResponse,
        QueueSubmitResponse, UploadInitiateResponse,
    },
};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One submission to the fal queue. The credential drawn at submission is
/// used for every status poll and the result fetch of the same job.
#[derive(Debug)]
pub struct GenerationJob {
    pub model: String,
    pub request_id: String,
    pub credential: Credential,
    pub status_url: String,
    pub response_url: String,
    state: JobState,
}

impl GenerationJob {
    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        if self.state.is_terminal() || self.state == next {
            return;
        }
        log::debug!("Job {}: {:?} -> {:?}", self.request_id, self.state, next);
        self.state = next;
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.credential.secret())
    }
}

/// `owner/app` part of a model id; the queue addresses requests per app.
fn app_id(model: &str) -> &str {
    let mut parts = model.splitn(3, '/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(app)) => &model[..owner.len() + 1 + app.len()],
        _ => model,
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

fn transport_error(context: &str, error: reqwest::Error) -> FluxError {
    FluxError::backend(format!("{} request failed: {}", context, error))
}

/// Turns a non-success response into a backend error, keeping the
/// backend's `detail` payload when it sent one.
async fn backend_failure(context: &str, response: reqwest::Response) -> FluxError {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            log::debug!("{} error body unreadable: {}", context, e);
            String::new()
        }
    };
    let details = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("detail").cloned());

    let message = match &details {
        Some(Value::String(text)) => format!("{} failed ({}): {}", context, status, text),
        Some(detail) => {
            log::error!(
                "Validation errors: {}",
                serde_json::to_string_pretty(detail).unwrap_or_default()
            );
            format!("{} failed ({}): validation error", context, status)
        }
        None if body.trim().is_empty() => format!("{} failed ({})", context, status),
        None => format!("{} failed ({}): {}", context, status, body.trim()),
    };
    FluxError::BackendError { message, details }
}

async fn read_json<T: DeserializeOwned>(context: &str, response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(backend_failure(context, response).await);
    }
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(context, e))?;
    serde_json::from_str(&body)
        .map_err(|e| FluxError::backend(format!("Malformed {} response: {}", context, e)))
}

#[derive(Clone)]
pub struct ImageClient {
    http: reqwest::Client,
    credentials: Arc<CredentialPool>,
    queue_url: String,
    storage_url: String,
    poll_interval: Duration,
}

impl ImageClient {
    pub fn new(config: &FalConfig, credentials: Arc<CredentialPool>, http: reqwest::Client) -> Self {
        Self {
            http,
            credentials,
            queue_url: config.queue_url(),
            storage_url: config.storage_url(),
            poll_interval: config.poll_interval(),
        }
    }

    pub async fn submit(&self, model: &str, input: &Map<String, Value>) -> Result<GenerationJob> {
        let credential = self.credentials.next_credential()?;
        let endpoint = format!("{}/{}", self.queue_url, model);
        log::info!(
            "Submitting job to model: {} (FAL_KEY index {})",
            model,
            credential.index
        );

        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Key {}", credential.secret()))
            .json(input)
            .send()
            .await
            .map_err(|e| transport_error("fal submit", e))?;
        let submitted: QueueSubmitResponse = read_json("fal submit", response).await?;

        let base = format!(
            "{}/{}/requests/{}",
            self.queue_url,
            app_id(model),
            submitted.request_id
        );
        Ok(GenerationJob {
            model: model.to_string(),
            status_url: submitted
                .status_url
                .unwrap_or_else(|| format!("{}/status", base)),
            response_url: submitted.response_url.unwrap_or(base),
            request_id: submitted.request_id,
            credential,
            state: JobState::Submitted,
        })
    }

    async fn wait_for_completion(
        &self,
        job: &mut GenerationJob,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        loop {
            let response = self
                .http
                .get(&job.status_url)
                .query(&[("logs", "1")])
                .header(AUTHORIZATION, job.auth_header())
                .send()
                .await
                .map_err(|e| transport_error("fal status", e))?;
            let status: QueueStatusResponse = read_json("fal status", response).await?;

            if let Some(error) = status.error.filter(|error| !error.is_null()) {
                let text = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(FluxError::BackendError {
                    message: format!("Job {} failed: {}", job.request_id, text),
                    details: Some(error),
                });
            }

            let logs: Vec<String> = status
                .logs
                .unwrap_or_default()
                .into_iter()
                .map(|entry| entry.message)
                .collect();
            let state = match status.status.as_str() {
                "COMPLETED" => return Ok(()),
                "IN_QUEUE" => QueueState::InQueue {
                    position: status.queue_position,
                },
                "IN_PROGRESS" => {
                    job.transition(JobState::InProgress);
                    QueueState::InProgress
                }
                other => {
                    return Err(FluxError::backend(format!(
                        "Job {} reported unknown status {:?}",
                        job.request_id, other
                    )))
                }
            };

            observer.on_progress(&ProgressEvent {
                request_id: job.request_id.clone(),
                state,
                logs,
            });
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_result(&self, job: &GenerationJob) -> Result<GenerationOutput> {
        let response = self
            .http
            .get(&job.response_url)
            .header(AUTHORIZATION, job.auth_header())
            .send()
            .await
            .map_err(|e| transport_error("fal result", e))?;
        let result: FalResultResponse = read_json("fal result", response).await?;

        if result.images.is_empty() {
            log::warn!("Job {} completed without images", job.request_id);
        }

        Ok(GenerationOutput {
            images: result
                .images
                .into_iter()
                .map(|image| ImageDescriptor {
                    url: image.url,
                    seed: result.seed,
                })
                .collect(),
            seed: result.seed,
        })
    }

    /// Submits a job, waits for it and returns its images. Nothing is
    /// retried.
    pub async fn run(
        &self,
        model: &str,
        input: Map<String, Value>,
        observer: &dyn ProgressObserver,
    ) -> Result<GenerationOutput> {
        let mut job = self.submit(model, &input).await?;

        let outcome = match self.wait_for_completion(&mut job, observer).await {
            Ok(()) => self.fetch_result(&job).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(output) => {
                job.transition(JobState::Completed);
                log::info!(
                    "Job {} completed with {} images (seed {})",
                    job.request_id,
                    output.images.len(),
                    output.seed
                );
            }
            Err(e) => {
                job.transition(JobState::Failed);
                log::error!("Job {} failed: {}", job.request_id, e);
            }
        }
        outcome
    }

    pub async fn upload_file(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let credential = self.credentials.next_credential()?;
        log::info!(
            "Uploading {} bytes (FAL_KEY index {})",
            bytes.len(),
            credential.index
        );

        let response = self
            .http
            .post(format!("{}/storage/upload/initiate", self.storage_url))
            .query(&[("storage_type", "fal-cdn-v3")])
            .header(AUTHORIZATION, format!("Key {}", credential.secret()))
            .json(&json!({
                "content_type": content_type,
                "file_name": format!("{}.{}", Uuid::new_v4(), extension_for(content_type)),
            }))
            .send()
            .await
            .map_err(|e| transport_error("fal upload initiate", e))?;
        let initiated: UploadInitiateResponse = read_json("fal upload initiate", response).await?;

        let response = self
            .http
            .put(&initiated.upload_url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error("fal upload", e))?;
        if !response.status().is_success() {
            return Err(backend_failure("fal upload", response).await);
        }

        log::debug!("Uploaded source image to {}", initiated.file_url);
        Ok(initiated.file_url)
    }
}

#[async_trait]
impl GenerationBackend for ImageClient {
    async fn subscribe(
        &self,
        model: &str,
        input: Map<String, Value>,
        observer: &dyn ProgressObserver,
    ) -> Result<GenerationOutput> {
        self.run(model, input, observer).await
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.upload_file(bytes, content_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_app_id_strips_model_path() {
        assert_eq!(app_id("fal-ai/flux/dev"), "fal-ai/flux");
        assert_eq!(app_id("fal-ai/flux/dev/image-to-image"), "fal-ai/flux");
        assert_eq!(app_id("fal-ai/flux-pro"), "fal-ai/flux-pro");
        assert_eq!(app_id("standalone"), "standalone");
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("IMAGE/JPEG"), "jpg");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }

    #[tokio::test]
    async fn test_unreadable_error_body_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        let _submit = server
            .mock("POST", "/fal-ai/flux/dev")
            .with_status(503)
            .with_chunked_body(|writer| {
                writer.write_all(b"partial")?;
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection dropped",
                ))
            })
            .create_async()
            .await;

        let client = ImageClient::new(
            &FalConfig::new().with_queue_url(server.url()),
            Arc::new(CredentialPool::new(["k"])),
            reqwest::Client::new(),
        );
        match client.submit("fal-ai/flux/dev", &Map::new()).await.unwrap_err() {
            FluxError::BackendError { message, details } => {
                assert!(message.starts_with("fal submit failed (503)"), "{message}");
                assert!(details.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let pool = CredentialPool::new(["k"]);
        let mut job = GenerationJob {
            model: "fal-ai/flux/dev".into(),
            request_id: "r".into(),
            credential: pool.next_credential().unwrap(),
            status_url: String::new(),
            response_url: String::new(),
            state: JobState::Submitted,
        };
        job.transition(JobState::InProgress);
        job.transition(JobState::Failed);
        job.transition(JobState::Completed);
        assert_eq!(job.state(), JobState::Failed);
    }
}
