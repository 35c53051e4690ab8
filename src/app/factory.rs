use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use super::service::RecommendService;
use crate::cache::{CacheManager, SystemClock};
use crate::config::Config;
use crate::corpus::HttpCorpusSource;
use crate::interactions::{HttpInteractionSink, InteractionSink};
use crate::semantic::{EncoderRegistry, FastEmbedLoader, Recommender};

/// Builds the application from its configuration
pub struct AppFactory;

impl AppFactory {
    pub fn load_config() -> Result<Config> {
        let base_path = Self::get_base_path()?;
        let config = Config::load_with(&base_path)
            .with_context(|| format!("Failed to load config from {}", base_path.display()))?;
        log::debug!("loaded config from {}", config.base_path().display());
        Ok(config)
    }

    /// Wire the service against the HTTP corpus source and fastembed models.
    ///
    /// No model is loaded here; call `activate_models` once the runtime is up.
    pub fn create_service(config: &Config) -> Result<RecommendService> {
        let source = HttpCorpusSource::new(&config.source)
            .context("Failed to create corpus source")?;

        let cache = Arc::new(CacheManager::new(
            Arc::new(source),
            Arc::new(SystemClock),
            Duration::from_secs(config.cache.ttl_secs),
            Duration::from_secs(config.source.request_timeout_secs),
        ));

        let recommender = Recommender::new(
            Arc::new(EncoderRegistry::new()),
            Duration::from_secs(config.recommend.encode_timeout_secs),
        );

        let loader = Arc::new(FastEmbedLoader::new(config.models_dir(), &config.models));

        let sink = match HttpInteractionSink::new(&config.source) {
            Ok(sink) => Some(Arc::new(sink) as Arc<dyn InteractionSink>),
            Err(err) => {
                log::warn!("interaction recording disabled: {err}");
                None
            }
        };

        Ok(RecommendService::new(
            cache,
            recommender,
            loader,
            sink,
            config.recommend.clone(),
        ))
    }

    /// `$MEMEREC_BASE_PATH`, or `~/.local/share/memerec`
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("MEMEREC_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;

        Ok(home.join(".local/share/memerec"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_starts_without_models() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        let service = AppFactory::create_service(&config).unwrap();
        let active = service.active_models();
        assert!(active.text_model.is_none());
        assert!(active.image_model.is_none());
    }
}
