pub mod credentials;
pub mod image_client;
pub mod text_client;
pub mod traits;

use crate::{
    config::Config,
    error::{FluxError, Result},
    models::{
        GalleryEntry, ImageReference, ProvenanceMetadata, RawGenerationRequest,
        RawImageToImageRequest,
    },
    shaper,
    storage::ImageStore,
};
use std::sync::Arc;

pub use credentials::{Credential, CredentialPool};
pub use image_client::{GenerationJob, ImageClient, JobState};
pub use text_client::TextClient;
pub use traits::{GenerationBackend, LogProgress, ProgressEvent, ProgressObserver, QueueState};

/// Entry point for every generation, gallery and prompt operation.
#[derive(Clone)]
pub struct FluxClient {
    backend: Arc<dyn GenerationBackend>,
    text_client: TextClient,
    store: ImageStore,
}

impl FluxClient {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fluxgen/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FluxError::ConfigError(format!("HTTP client setup failed: {}", e)))?;
        let credentials = Arc::new(CredentialPool::new(config.fal.keys.clone()));
        if credentials.is_empty() {
            log::warn!("No FAL_KEY configured, image generation will fail");
        } else {
            log::info!("Loaded {} fal credentials", credentials.len());
        }

        let image_client = ImageClient::new(&config.fal, credentials, http.clone());
        Ok(Self::with_backend(config, Arc::new(image_client), http))
    }

    /// Builds a client on top of a custom generation backend.
    pub fn with_backend(
        config: Config,
        backend: Arc<dyn GenerationBackend>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            backend,
            text_client: TextClient::new(config.completion, http.clone()),
            store: ImageStore::new(&config.storage, http),
        }
    }

    pub fn text(&self) -> &TextClient {
        &self.text_client
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub async fn generate_image(&self, raw: RawGenerationRequest) -> Result<Vec<ImageReference>> {
        self.generate_image_with_observer(raw, &LogProgress).await
    }

    pub async fn generate_image_with_observer(
        &self,
        raw: RawGenerationRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<ImageReference>> {
        let request = shaper::shape(raw)?;
        let _timer = crate::logger::timer("generate-image");

        let output = self
            .backend
            .subscribe(&request.model, request.to_input(), observer)
            .await?;

        self.store
            .materialize(&output.images, |seed, timestamp| {
                ProvenanceMetadata::from_request(&request, seed, timestamp)
            })
            .await
    }

    pub async fn generate_image_to_image(
        &self,
        source: Vec<u8>,
        content_type: &str,
        raw: RawImageToImageRequest,
    ) -> Result<Vec<ImageReference>> {
        self.generate_image_to_image_with_observer(source, content_type, raw, &LogProgress)
            .await
    }

    /// Uploads the source and generation each draw their own credential.
    pub async fn generate_image_to_image_with_observer(
        &self,
        source: Vec<u8>,
        content_type: &str,
        raw: RawImageToImageRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<ImageReference>> {
        let request = shaper::shape_image_to_image(raw)?;
        let _timer = crate::logger::timer("generate-image-to-image");

        let image_url = self.backend.upload(source, content_type).await?;
        let output = self
            .backend
            .subscribe(
                &request.generation.model,
                request.to_input(&image_url),
                observer,
            )
            .await?;

        self.store
            .materialize(&output.images, |seed, timestamp| {
                ProvenanceMetadata::from_image_to_image(&request, seed, timestamp)
            })
            .await
    }

    pub async fn get_provenance(&self, filename: &str) -> Result<ProvenanceMetadata> {
        self.store.get_provenance(filename).await
    }

    pub async fn list_gallery(&self) -> Result<Vec<GalleryEntry>> {
        self.store.list_gallery().await
    }

    pub async fn optimize_prompt(&self, text: &str, regenerate: bool) -> Result<String> {
        self.text_client.optimize(text, regenerate).await
    }
}
