use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_MEMES_PATH: &str = "/api/memes/";
const DEFAULT_INTERACTIONS_PATH: &str = "/api/interactions/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Snapshot time-to-live in seconds
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
/// Interval of the background refresher, independent of ttl
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

const DEFAULT_TOP_K: usize = 1;
const DEFAULT_MAX_RESULTS: usize = 5;
const DEFAULT_TEXT_WEIGHT: f32 = crate::semantic::hybrid::DEFAULT_TEXT_WEIGHT;
const DEFAULT_ENCODE_TIMEOUT_SECS: u64 = 30;

/// Multilingual, since keywords are not necessarily English
const DEFAULT_TEXT_MODEL: &str = "paraphrase-multilingual-minilm-l12-v2";
const DEFAULT_IMAGE_MODEL: &str = "resnet50";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where the corpus lives and where interactions go.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    #[serde(default = "default_memes_path")]
    pub memes_path: String,

    #[serde(default = "default_interactions_path")]
    pub interactions_path: String,

    /// Upper bound for every request to the API
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            memes_path: default_memes_path(),
            interactions_path: default_interactions_path(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecommendConfig {
    /// How many ids a recommendation returns unless the caller asks otherwise
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Hard cap on requested top_k
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Weight of the text modality when both are queried [0.0, 1.0]
    #[serde(default = "default_text_weight")]
    pub text_weight: f32,

    #[serde(default = "default_encode_timeout_secs")]
    pub encode_timeout_secs: u64,

    /// Pick a random item when neither text nor image is supplied
    #[serde(default = "default_true")]
    pub random_fallback: bool,

    /// Bypass the cache ttl on every recommendation
    #[serde(default)]
    pub force_refresh_on_query: bool,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_results: DEFAULT_MAX_RESULTS,
            text_weight: DEFAULT_TEXT_WEIGHT,
            encode_timeout_secs: DEFAULT_ENCODE_TIMEOUT_SECS,
            random_fallback: true,
            force_refresh_on_query: false,
        }
    }
}

/// Active model configuration. `None` disables the modality.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_text_model")]
    pub text_model: Option<String>,

    #[serde(default = "default_image_model")]
    pub image_model: Option<String>,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            text_model: default_text_model(),
            image_model: default_image_model(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_memes_path() -> String {
    DEFAULT_MEMES_PATH.to_string()
}

fn default_interactions_path() -> String {
    DEFAULT_INTERACTIONS_PATH.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_text_weight() -> f32 {
    DEFAULT_TEXT_WEIGHT
}

fn default_encode_timeout_secs() -> u64 {
    DEFAULT_ENCODE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_text_model() -> Option<String> {
    Some(DEFAULT_TEXT_MODEL.to_string())
}

fn default_image_model() -> Option<String> {
    Some(DEFAULT_IMAGE_MODEL.to_string())
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub recommend: RecommendConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.source.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "source.base_url is not a valid url: {:?}",
                self.source.base_url
            )));
        }

        if self.source.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "source.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.cache.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }

        let rec = &self.recommend;
        if !(0.0..=1.0).contains(&rec.text_weight) {
            return Err(ConfigError::Invalid(format!(
                "recommend.text_weight must be between 0.0 and 1.0, got {}",
                rec.text_weight
            )));
        }

        if rec.max_results == 0 || rec.top_k == 0 {
            return Err(ConfigError::Invalid(
                "recommend.top_k and recommend.max_results must be greater than 0".to_string(),
            ));
        }

        if rec.encode_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "recommend.encode_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.models.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "models.download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Environment variables take precedence over the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("MEMEREC_API_BASE_URL") {
            self.source.base_url = base_url;
        }

        if let Some(weight) = env_parse::<f32>("MEMEREC_TEXT_WEIGHT") {
            self.recommend.text_weight = weight;
        }

        if let Some(max_results) = env_parse::<usize>("MEMEREC_MAX_RESULTS") {
            self.recommend.max_results = max_results;
        }

        if let Some(ttl) = env_parse::<u64>("MEMEREC_CACHE_DURATION") {
            self.cache.ttl_secs = ttl;
        }
    }

    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_path)?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            write_atomic(&config_path, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding downloaded model files.
    pub fn models_dir(&self) -> PathBuf {
        self.base_path.join("models")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: cannot parse");
            None
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!("tmp-{}", std::process::id()));
    std::fs::write(&temp_path, data)?;
    std::fs::rename(&temp_path, path)
}
