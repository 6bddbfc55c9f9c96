pub mod gallery;
pub mod metadata;

use crate::{
    config::StorageConfig,
    error::{FluxError, Result},
    models::{GalleryEntry, ImageDescriptor, ImageReference, ProvenanceMetadata},
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use gallery::IMAGE_EXTENSION;

/// Flat directory of generated images, each carrying its provenance.
#[derive(Clone)]
pub struct ImageStore {
    dir: PathBuf,
    url_prefix: String,
    http: reqwest::Client,
}

impl ImageStore {
    pub fn new(config: &StorageConfig, http: reqwest::Client) -> Self {
        Self {
            dir: config.images_dir(),
            url_prefix: config.url_prefix(),
            http,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reference(&self, filename: String) -> ImageReference {
        ImageReference {
            url: format!("{}/{}", self.url_prefix, filename),
            filename,
        }
    }

    /// Downloads, stamps and stores every image of a finished job.
    ///
    /// Downloads run concurrently but the references come back in
    /// descriptor order. The first failure fails the whole batch; files
    /// already written for other images are left in place.
    pub async fn materialize<F>(
        &self,
        images: &[ImageDescriptor],
        provenance_for: F,
    ) -> Result<Vec<ImageReference>>
    where
        F: Fn(u64, DateTime<Utc>) -> ProvenanceMetadata + Sync,
    {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            FluxError::StorageError(format!("Cannot create {}: {}", self.dir.display(), e))
        })?;

        let provenance_for = &provenance_for;
        try_join_all(images.iter().map(|image| async move {
            let bytes = self.download(&image.url).await?;
            self.store(&bytes, &provenance_for(image.seed, Utc::now()))
                .await
        }))
        .await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await.map_err(|e| FluxError::BackendError {
            message: format!("Image download failed: {}", e),
            details: Some(json!({ "url": url })),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FluxError::BackendError {
                message: format!("Image download failed ({})", status.as_u16()),
                details: Some(json!({ "url": url, "status": status.as_u16() })),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FluxError::BackendError {
            message: format!("Image download interrupted: {}", e),
            details: Some(json!({ "url": url })),
        })?;
        Ok(bytes.to_vec())
    }

    /// Embeds the provenance and writes the image under a fresh name.
    pub async fn store(
        &self,
        bytes: &[u8],
        provenance: &ProvenanceMetadata,
    ) -> Result<ImageReference> {
        let encoded = metadata::embed(bytes, provenance)?;
        let filename = format!("{}.{}", Uuid::new_v4(), IMAGE_EXTENSION);
        let path = self.dir.join(&filename);

        log::debug!(
            "Saving metadata: {}",
            serde_json::to_string(provenance).unwrap_or_default()
        );
        tokio::fs::write(&path, encoded).await.map_err(|e| {
            FluxError::StorageError(format!("Cannot write {}: {}", path.display(), e))
        })?;
        log::info!("Image saved with metadata: {}", path.display());

        Ok(self.reference(filename))
    }

    pub async fn get_provenance(&self, filename: &str) -> Result<ProvenanceMetadata> {
        validate_filename(filename)?;
        let path = self.dir.join(filename);
        log::debug!("Reading metadata from: {}", path.display());

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FluxError::NotFoundError(format!("Image not found: {}", filename)))
            }
            Err(e) => {
                return Err(FluxError::StorageError(format!(
                    "Cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        metadata::extract(&bytes)
    }

    pub async fn list_gallery(&self) -> Result<Vec<GalleryEntry>> {
        gallery::list(&self.dir, &self.url_prefix).await
    }
}

/// Only bare file names inside the images directory are addressable.
fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if invalid {
        return Err(FluxError::ValidationError(format!(
            "Invalid image filename: {:?}",
            filename
        )));
    }
    Ok(())
}
