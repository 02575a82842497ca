//! Image embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for turning images into query vectors:
//! - Lazy model loading with configurable cache directory
//! - Model download on first use
//! - Batch encoding for ingestion
//!
//! fastembed's image models read from file paths, so in-memory images are
//! materialized as temporary JPEGs before encoding.

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::images;

/// Wrapper around fastembed's ImageEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct ImageEncoder {
    session: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl std::fmt::Debug for ImageEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageEncoder")
            .field("model_name", &self.model_name)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

/// Error type for encoding operations
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// SHA256 hash of a model name, used to stamp the vectors sidecar.
///
/// Derived from the configured name alone so the vector store can validate
/// its sidecar without ever loading the model.
pub fn model_id(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

impl ImageEncoder {
    /// Create a new encoder for the given model name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EncoderError> {
        let model_enum = Self::parse_model_name(model_name)?;

        // Ensure cache directory exists
        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EncoderError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut session = ImageEmbedding::try_new(options)
            .map_err(|e| EncoderError::InitFailed(e.to_string()))?;

        // Determine dimensions by encoding a probe image
        let dimensions = Self::probe_dimensions(&mut session)?;

        Ok(Self {
            session: Mutex::new(session),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Get the embedding dimensions for this model
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Encode a single in-memory image.
    ///
    /// The image is downscaled if oversized, written to a temporary JPEG,
    /// and fed to the model.
    pub fn encode(&self, image: DynamicImage) -> Result<Vec<f32>, EncoderError> {
        let prepared = images::prepare_for_encoding(image);
        let temp = images::write_temp_jpeg(&prepared)
            .map_err(|e| EncoderError::EncodeFailed(e.to_string()))?;

        let mut vectors = self.encode_files(&[temp.path().to_path_buf()])?;
        vectors
            .pop()
            .ok_or_else(|| EncoderError::EncodeFailed("No embedding returned".to_string()))
    }

    /// Encode a batch of image files.
    pub fn encode_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EncoderError> {
        if paths.is_empty() {
            return Ok(vec![]);
        }

        let mut session = self.session.lock().map_err(|e| {
            EncoderError::EncodeFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let refs: Vec<&Path> = paths.iter().map(|p| p.as_path()).collect();
        let vectors = session
            .embed(refs, None)
            .map_err(|e| EncoderError::EncodeFailed(e.to_string()))?;

        if vectors.len() != paths.len() {
            return Err(EncoderError::EncodeFailed(format!(
                "model returned {} embeddings for {} images",
                vectors.len(),
                paths.len()
            )));
        }

        Ok(vectors)
    }

    /// SHA256 hash of this encoder's model name.
    pub fn model_id_hash(&self) -> [u8; 32] {
        model_id(&self.model_name)
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<ImageEmbeddingModel, EncoderError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok(ImageEmbeddingModel::ClipVitB32),
            "resnet-50" | "resnet50" => Ok(ImageEmbeddingModel::Resnet50),
            "unicom-vit-b-16" | "unicomvitb16" => Ok(ImageEmbeddingModel::UnicomVitB16),
            "unicom-vit-b-32" | "unicomvitb32" => Ok(ImageEmbeddingModel::UnicomVitB32),
            "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
                Ok(ImageEmbeddingModel::NomicEmbedVisionV15)
            }
            _ => Err(EncoderError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32, resnet-50, unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5",
                name
            ))),
        }
    }

    /// Encode a small generated image to learn the output dimensionality.
    fn probe_dimensions(session: &mut ImageEmbedding) -> Result<usize, EncoderError> {
        let probe = DynamicImage::ImageRgb8(image::ImageBuffer::from_fn(8, 8, |x, y| {
            image::Rgb([(x * 32) as u8, (y * 32) as u8, 128])
        }));
        let temp = images::write_temp_jpeg(&probe)
            .map_err(|e| EncoderError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        let vectors = session
            .embed(vec![temp.path()], None)
            .map_err(|e| EncoderError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        vectors
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EncoderError::InitFailed("Model returned no embedding".to_string()))
    }
}
