use crate::config::ConfigError;
use crate::corpus::FetchError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("no matching meme found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("corpus unavailable: {0}")]
    Fetch(#[from] FetchError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
