use crate::{
    error::{FluxError, Result},
    models::GalleryEntry,
};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;

pub const IMAGE_EXTENSION: &str = "jpg";

pub fn is_stored_image(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION))
}

/// Lists stored images, newest first. Birth time is used where the
/// filesystem records it, modification time otherwise.
pub async fn list(dir: &Path, url_prefix: &str) -> Result<Vec<GalleryEntry>> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(FluxError::StorageError(format!(
                "Error reading gallery {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| FluxError::StorageError(format!("Error reading gallery: {}", e)))?
    {
        let filename = entry.file_name().to_string_lossy().to_string();
        if !is_stored_image(&filename) {
            continue;
        }
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| FluxError::StorageError(format!("Error reading {}: {}", filename, e)))?;
        if !metadata.is_file() {
            continue;
        }
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|e| FluxError::StorageError(format!("No timestamp for {}: {}", filename, e)))?;

        entries.push(GalleryEntry {
            url: format!("{}/{}", url_prefix, filename),
            filename,
            created_at: DateTime::<Utc>::from(created),
        });
    }

    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    log::debug!("Gallery lists {} images", entries.len());
    Ok(entries)
}
