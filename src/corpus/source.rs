//! Corpus-source collaborator: where snapshots come from.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{CorpusItem, ItemId};
use crate::config::SourceConfig;

/// Errors that can occur while fetching the corpus.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("corpus source returned HTTP {0}")]
    Status(u16),

    #[error("corpus source unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("corpus response malformed: {0}")]
    Decode(String),

    #[error("corpus fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid corpus source url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Supplies corpus items, optionally filtered by category.
///
/// Implementations must be idempotent and side-effect free from the
/// caller's perspective.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn fetch(&self, category: Option<&str>) -> Result<Vec<CorpusItem>, FetchError>;

    /// Name for diagnostics.
    fn name(&self) -> &str;
}

/// Wire shape of `GET /api/memes/`.
#[derive(Debug, Deserialize)]
struct MemesResponse {
    #[serde(default)]
    memes: Vec<RawMeme>,
}

#[derive(Debug, Deserialize)]
struct RawMeme {
    id: ItemId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    keywords: Option<String>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    image_features: Option<Vec<f32>>,
}

/// Corpus source backed by the media-management HTTP API.
pub struct HttpCorpusSource {
    client: reqwest::Client,
    base_url: Url,
    endpoint: Url,
}

impl HttpCorpusSource {
    pub fn new(config: &SourceConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)?;
        let endpoint = base_url.join(&config.memes_path)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            endpoint,
        })
    }

    fn convert(&self, raw: RawMeme) -> CorpusItem {
        CorpusItem {
            id: raw.id,
            title: raw.title,
            category: raw.category.filter(|c| !c.trim().is_empty()),
            keywords: raw.keywords.unwrap_or_default(),
            text_embedding: raw.embedding.filter(|v| !v.is_empty()),
            image_embedding: raw.image_features.filter(|v| !v.is_empty()),
            media_ref: raw
                .image_url
                .filter(|u| !u.is_empty())
                .map(|u| resolve_media_ref(&self.base_url, &u)),
        }
    }
}

/// Relative media locators are resolved against the API base url.
pub fn resolve_media_ref(base_url: &Url, media_ref: &str) -> String {
    if media_ref.starts_with("http://") || media_ref.starts_with("https://") {
        return media_ref.to_string();
    }

    match base_url.join(media_ref) {
        Ok(url) => url.to_string(),
        Err(err) => {
            log::debug!("cannot resolve media ref {media_ref:?}: {err}");
            media_ref.to_string()
        }
    }
}

#[async_trait]
impl CorpusSource for HttpCorpusSource {
    async fn fetch(&self, category: Option<&str>) -> Result<Vec<CorpusItem>, FetchError> {
        let mut url = self.endpoint.clone();
        if let Some(category) = category {
            url.query_pairs_mut().append_pair("category", category);
        }

        log::info!("fetching corpus: {url}");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        let body: MemesResponse = serde_json::from_str(&text).map_err(|err| {
            log::error!("{err}. tried to parse: {:?}", truncate(&text, 200));
            FetchError::Decode(err.to_string())
        })?;

        let items: Vec<CorpusItem> = body.memes.into_iter().map(|m| self.convert(m)).collect();
        log::info!("source=http fetched={} items", items.len());

        Ok(items)
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
