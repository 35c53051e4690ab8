//! Active encoder references.
//!
//! Exactly one encoder per modality is active at a time. Activation loads the
//! new models first and then replaces both references under a short write
//! lock; callers that already cloned the old `Arc` finish with it.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::embeddings::{
    EncodingError, FastEmbedImageEncoder, FastEmbedTextEncoder, ImageEncoder, TextEncoder,
};
use crate::config::ModelsConfig;

/// Builds encoders from model identifiers.
#[async_trait]
pub trait EncoderLoader: Send + Sync {
    async fn load_text(&self, model: &str) -> Result<Arc<dyn TextEncoder>, EncodingError>;

    async fn load_image(&self, model: &str) -> Result<Arc<dyn ImageEncoder>, EncodingError>;
}

/// Loads fastembed models into `models_dir`, downloading them on first use.
pub struct FastEmbedLoader {
    models_dir: PathBuf,
    download_timeout: Duration,
}

impl FastEmbedLoader {
    pub fn new(models_dir: PathBuf, config: &ModelsConfig) -> Self {
        Self {
            models_dir,
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    async fn load_blocking<T, F>(&self, load: F) -> Result<T, EncodingError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, EncodingError> + Send + 'static,
    {
        let models_dir = self.models_dir.clone();
        let task = tokio::task::spawn_blocking(move || load(models_dir));

        match tokio::time::timeout(self.download_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EncodingError::InitFailed(format!(
                "model load task failed: {join_err}"
            ))),
            Err(_) => Err(EncodingError::LoadTimeout(self.download_timeout.as_secs())),
        }
    }
}

#[async_trait]
impl EncoderLoader for FastEmbedLoader {
    async fn load_text(&self, model: &str) -> Result<Arc<dyn TextEncoder>, EncodingError> {
        let model = model.to_string();
        let encoder = self
            .load_blocking(move |dir| FastEmbedTextEncoder::new(&model, dir))
            .await?;
        Ok(Arc::new(encoder))
    }

    async fn load_image(&self, model: &str) -> Result<Arc<dyn ImageEncoder>, EncodingError> {
        let model = model.to_string();
        let encoder = self
            .load_blocking(move |dir| FastEmbedImageEncoder::new(&model, dir))
            .await?;
        Ok(Arc::new(encoder))
    }
}

/// Model names that ended up active after [`EncoderRegistry::activate`],
/// plus the load error of any modality that could not be switched.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ActiveModels {
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_error: Option<String>,
}

#[derive(Default)]
pub struct EncoderRegistry {
    text: RwLock<Option<Arc<dyn TextEncoder>>>,
    image: RwLock<Option<Arc<dyn ImageEncoder>>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoders(
        text: Option<Arc<dyn TextEncoder>>,
        image: Option<Arc<dyn ImageEncoder>>,
    ) -> Self {
        Self {
            text: RwLock::new(text),
            image: RwLock::new(image),
        }
    }

    pub fn text(&self) -> Option<Arc<dyn TextEncoder>> {
        match self.text.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn image(&self) -> Option<Arc<dyn ImageEncoder>> {
        match self.image.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn active(&self) -> ActiveModels {
        ActiveModels {
            text_model: self.text().map(|e| e.name().to_string()),
            image_model: self.image().map(|e| e.name().to_string()),
            ..Default::default()
        }
    }

    /// Load the named models and swap each one in. `None` deactivates a
    /// modality.
    ///
    /// Modalities are independent: a model that fails to load leaves that
    /// modality's current encoder in place and is reported in the returned
    /// [`ActiveModels`], while the other modality is still switched.
    pub async fn activate(
        &self,
        loader: &dyn EncoderLoader,
        text_model: Option<&str>,
        image_model: Option<&str>,
    ) -> ActiveModels {
        let text_error = match text_model {
            Some(name) => match loader.load_text(name).await {
                Ok(encoder) => {
                    replace(&self.text, Some(encoder));
                    None
                }
                Err(err) => {
                    log::error!("modality=text model={name} outcome=load_failed err={err}");
                    Some(err)
                }
            },
            None => {
                log::warn!("no text model configured, text queries will be ignored");
                replace(&self.text, None);
                None
            }
        };

        let image_error = match image_model {
            Some(name) => match loader.load_image(name).await {
                Ok(encoder) => {
                    replace(&self.image, Some(encoder));
                    None
                }
                Err(err) => {
                    log::error!("modality=image model={name} outcome=load_failed err={err}");
                    Some(err)
                }
            },
            None => {
                log::warn!("no image model configured, image queries will be ignored");
                replace(&self.image, None);
                None
            }
        };

        let active = ActiveModels {
            text_error: text_error.as_ref().map(EncodingError::to_string),
            image_error: image_error.as_ref().map(EncodingError::to_string),
            ..self.active()
        };
        log::info!(
            "activated models text={:?} image={:?}",
            active.text_model,
            active.image_model
        );
        active
    }
}

fn replace<T: ?Sized>(slot: &RwLock<Option<Arc<T>>>, value: Option<Arc<T>>) {
    match slot.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}
