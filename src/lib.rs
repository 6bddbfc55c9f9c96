pub mod config;
pub mod error;
pub mod fal;
pub mod logger;
pub mod models;
pub mod shaper;
pub mod storage;

pub use config::{CompletionConfig, Config, FalConfig, StorageConfig};
pub use error::{FluxError, Result};
pub use fal::{
    CredentialPool, FluxClient, GenerationBackend, ImageClient, LogProgress, ProgressEvent,
    ProgressObserver, QueueState, TextClient,
};
pub use models::*;
pub use storage::ImageStore;
