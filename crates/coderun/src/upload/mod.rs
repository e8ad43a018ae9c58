//! Image upload: validation, storage and optional text extraction.

mod ocr;
mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

pub use ocr::{CommandOcr, DisabledOcr, OcrEngine, OcrError, from_config};
pub use store::{ImageStore, StoredImage, sanitize_filename};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No image files provided")]
    NoFiles,

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("{name} is not a supported image: {reason}")]
    NotAnImage { name: String, reason: String },

    #[error("failed to store image: {0}")]
    Io(#[from] std::io::Error),
}

/// One file received from the client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub name: String,
    pub data: Bytes,
}

/// Response body of a successful upload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadOutcome {
    pub message: String,
    /// Client-side names of the stored files, in upload order.
    pub files: Vec<String>,
    /// Extracted text keyed by client-side name. Images whose extraction
    /// failed are absent.
    pub ocr_texts: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct UploadService {
    store: ImageStore,
    ocr: Arc<dyn OcrEngine>,
}

impl UploadService {
    pub fn new(store: ImageStore, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { store, ocr }
    }

    /// Store every image, then extract text from each.
    ///
    /// Nothing is kept if any image is rejected.
    pub async fn process(&self, images: Vec<ImageUpload>) -> Result<UploadOutcome, UploadError> {
        if images.is_empty() {
            return Err(UploadError::NoFiles);
        }

        let mut stored = Vec::with_capacity(images.len());
        for upload in &images {
            match self.store.save(&upload.name, &upload.data).await {
                Ok(image) => stored.push(image),
                Err(e) => {
                    for image in &stored {
                        self.store.remove(image).await;
                    }
                    return Err(e);
                }
            }
        }

        let mut ocr_texts = BTreeMap::new();
        if self.ocr.enabled() {
            for image in &stored {
                match self.ocr.extract(&image.path).await {
                    Ok(text) => {
                        ocr_texts.insert(image.original_name.clone(), text);
                    }
                    Err(e) => warn!("OCR failed for {}: {}", image.original_name, e),
                }
            }
        }

        info!("{} images uploaded to {}", stored.len(), self.store.dir().display());
        Ok(UploadOutcome {
            message: format!("{} images uploaded successfully", stored.len()),
            files: stored.into_iter().map(|image| image.original_name).collect(),
            ocr_texts,
        })
    }
}

impl std::fmt::Debug for UploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadService")
            .field("store", &self.store)
            .field("ocr_enabled", &self.ocr.enabled())
            .finish()
    }
}
