//! On-disk image storage.

use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio::fs;
use uuid::Uuid;

use super::UploadError;

const MAX_FILENAME_LEN: usize = 200;

/// An image written to the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub id: String,
    /// Name the client sent; used as the OCR result key.
    pub original_name: String,
    pub path: PathBuf,
}

/// Writes validated images under one directory as `{id}-{name}`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, original_name: &str, data: &[u8]) -> Result<StoredImage, UploadError> {
        let file_name = sanitize_filename(original_name)
            .ok_or_else(|| UploadError::InvalidFileName(original_name.to_string()))?;

        let format = image::guess_format(data).map_err(|e| UploadError::NotAnImage {
            name: original_name.to_string(),
            reason: e.to_string(),
        })?;
        image::load_from_memory_with_format(data, format).map_err(|e| {
            UploadError::NotAnImage {
                name: original_name.to_string(),
                reason: e.to_string(),
            }
        })?;

        fs::create_dir_all(&self.dir).await?;

        let id = Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{}-{}", id, file_name));
        fs::write(&path, data).await?;
        info!(
            "Stored image {:?} ({:?}, {} bytes) at {}",
            original_name,
            format,
            data.len(),
            path.display()
        );

        Ok(StoredImage {
            id,
            original_name: original_name.to_string(),
            path,
        })
    }

    pub async fn remove(&self, image: &StoredImage) {
        if let Err(e) = fs::remove_file(&image.path).await {
            debug!("Failed to remove {}: {}", image.path.display(), e);
        }
    }
}

/// Reduce a client-supplied name to a single safe path component.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    let sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if sanitized.is_empty() {
        return None;
    }

    let mut end = sanitized.len().min(MAX_FILENAME_LEN);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    Some(sanitized[..end].to_string())
}
