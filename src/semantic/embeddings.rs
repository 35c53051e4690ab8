//! Query encoders.
//!
//! [`TextEncoder`] and [`ImageEncoder`] map raw query input to a vector with
//! the currently active model. The fastembed-backed implementations run
//! inference on tokio's blocking pool so callers can simply `.await`.
//!
//! - Lazy model download with configurable cache directory
//! - One `Mutex` per model since fastembed's embed() requires &mut self

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{ImageEmbedding, ImageInitOptions, InitOptions, TextEmbedding};

/// Error type for encoder operations
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model load timed out after {0} seconds")]
    LoadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Input cannot be embedded: {0}")]
    UnusableInput(String),
}

#[async_trait]
pub trait TextEncoder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError>;

    /// Model identifier, for logs.
    fn name(&self) -> &str;
}

#[async_trait]
pub trait ImageEncoder: Send + Sync {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EncodingError>;

    /// Model identifier, for logs.
    fn name(&self) -> &str;
}

/// Text encoder backed by fastembed's `TextEmbedding`.
pub struct FastEmbedTextEncoder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
}

impl FastEmbedTextEncoder {
    /// Load (downloading on first use) the named model into `cache_dir`.
    ///
    /// Blocking; call from a blocking context.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EncodingError> {
        let model_enum = parse_text_model(model_name)?;

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            EncodingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EncodingError::InitFailed(e.to_string()))?;

        // warm-up embedding, also reports the output dimension
        let dimensions = model
            .embed(vec!["test"], None)
            .map_err(|e| EncodingError::InitFailed(format!("Warm-up embedding failed: {}", e)))?
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EncodingError::InitFailed("Model returned no embedding".to_string()))?;

        log::info!("loaded text model '{model_name}' ({dimensions} dims)");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl TextEncoder for FastEmbedTextEncoder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EncodingError::UnusableInput("empty text".to_string()));
        }

        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                EncodingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            model
                .embed(vec![text], None)
                .map_err(|e| EncodingError::EmbeddingFailed(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EncodingError::EmbeddingFailed("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| EncodingError::EmbeddingFailed(format!("inference task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Image encoder backed by fastembed's `ImageEmbedding`.
pub struct FastEmbedImageEncoder {
    model: Arc<Mutex<ImageEmbedding>>,
    model_name: String,
}

impl FastEmbedImageEncoder {
    /// Load (downloading on first use) the named model into `cache_dir`.
    ///
    /// Blocking; call from a blocking context.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EncodingError> {
        let model_enum = parse_image_model(model_name)?;

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            EncodingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);

        let model = ImageEmbedding::try_new(options)
            .map_err(|e| EncodingError::InitFailed(e.to_string()))?;

        log::info!("loaded image model '{model_name}'");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl ImageEncoder for FastEmbedImageEncoder {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EncodingError> {
        if image.is_empty() {
            return Err(EncodingError::UnusableInput("empty image".to_string()));
        }

        let model = self.model.clone();
        let image = image.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                EncodingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            model
                .embed_bytes(&[image.as_slice()], None)
                .map_err(|e| EncodingError::UnusableInput(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EncodingError::EmbeddingFailed("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| EncodingError::EmbeddingFailed(format!("inference task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Parse text model name string to fastembed enum.
fn parse_text_model(name: &str) -> Result<fastembed::EmbeddingModel, EncodingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "paraphrase-multilingual-minilm-l12-v2-q" | "paraphrasemlminilml12v2q" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2Q)
        }
        "multilingual-e5-small" | "multilinguale5small" => {
            Ok(fastembed::EmbeddingModel::MultilingualE5Small)
        }
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
        "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
        "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "bge-large-en-v1.5-q" | "bgelargeenv15q" => Ok(fastembed::EmbeddingModel::BGELargeENV15Q),
        _ => Err(EncodingError::InvalidModel(format!(
            "Unknown text model: {}. Supported models: all-MiniLM-L6-v2, paraphrase-multilingual-minilm-l12-v2, multilingual-e5-small, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
            name
        ))),
    }
}

/// Parse image model name string to fastembed enum.
fn parse_image_model(name: &str) -> Result<fastembed::ImageEmbeddingModel, EncodingError> {
    match name.to_lowercase().as_str() {
        "resnet50" | "resnet-50" => Ok(fastembed::ImageEmbeddingModel::Resnet50),
        "clip-vit-b-32" | "clipvitb32" => Ok(fastembed::ImageEmbeddingModel::ClipVitB32),
        "unicom-vit-b-16" | "unicomvitb16" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB16),
        "unicom-vit-b-32" | "unicomvitb32" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB32),
        "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
            Ok(fastembed::ImageEmbeddingModel::NomicEmbedVisionV15)
        }
        _ => Err(EncodingError::InvalidModel(format!(
            "Unknown image model: {}. Supported models: resnet50, clip-vit-b-32, unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_model_names() {
        assert!(matches!(
            parse_text_model("Paraphrase-Multilingual-MiniLM-L12-v2"),
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        ));
        assert!(matches!(
            parse_text_model("bge-base-en-v1.5-q"),
            Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
        ));
        assert!(matches!(
            parse_text_model("distilbert-base-multilingual-cased"),
            Err(EncodingError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_image_model_names() {
        assert!(matches!(
            parse_image_model("ResNet50"),
            Ok(fastembed::ImageEmbeddingModel::Resnet50)
        ));
        assert!(matches!(
            parse_image_model("resnet18"),
            Err(EncodingError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_invalid_model_fails_before_download() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = FastEmbedTextEncoder::new("nonexistent-model", temp_dir.path().to_path_buf());
        assert!(matches!(result, Err(EncodingError::InvalidModel(_))));
    }

    // Integration tests require model download - run with --ignored
    #[tokio::test]
    #[ignore = "requires model download"]
    async fn test_text_embedding_generation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let encoder =
            FastEmbedTextEncoder::new("all-MiniLM-L6-v2", temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(encoder.name(), "all-MiniLM-L6-v2");

        let embedding = encoder.embed("Hello, world!").await.unwrap();
        assert_eq!(embedding.len(), 384);

        let empty = encoder.embed("   ").await;
        assert!(matches!(empty, Err(EncodingError::UnusableInput(_))));
    }

    #[tokio::test]
    #[ignore = "requires model download"]
    async fn test_image_embedding_rejects_garbage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let encoder =
            FastEmbedImageEncoder::new("resnet50", temp_dir.path().to_path_buf()).unwrap();

        let result = encoder.embed(b"definitely not an image").await;
        assert!(result.is_err());
    }
}
