//! Interaction sink: where "user X asked Y and got item Z" records go.
//!
//! Delivery is fire-and-forget. Failures are logged and dropped, never
//! retried, and never affect the recommendation that produced the record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SourceConfig;
use crate::corpus::ItemId;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("interaction endpoint returned HTTP {0}")]
    Status(u16),

    #[error("interaction rejected: {0}")]
    Rejected(String),

    #[error("interaction endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid interaction endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: String,
    pub input_text: String,
    #[serde(rename = "input_image")]
    pub had_image_input: bool,
    #[serde(rename = "recommended_meme_id")]
    pub recommended_id: ItemId,
}

#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn record(&self, record: &InteractionRecord) -> Result<(), SinkError>;
}

/// Deliver `record` on a detached task. Returns immediately.
pub fn record_detached(
    sink: Arc<dyn InteractionSink>,
    record: InteractionRecord,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match sink.record(&record).await {
            Ok(()) => log::debug!(
                "interaction user={} item={} outcome=ok",
                record.user_id,
                record.recommended_id
            ),
            Err(err) => log::warn!(
                "interaction user={} item={} outcome=dropped err={err}",
                record.user_id,
                record.recommended_id
            ),
        }
    })
}

#[derive(Debug, Deserialize)]
struct SinkResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpInteractionSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpInteractionSink {
    pub fn new(config: &SourceConfig) -> Result<Self, SinkError> {
        let endpoint = Url::parse(&config.base_url)?.join(&config.interactions_path)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl InteractionSink for HttpInteractionSink {
    async fn record(&self, record: &InteractionRecord) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        // the endpoint answers 200 with {"status": "error"} on rejection
        let text = response.text().await?;
        if let Ok(body) = serde_json::from_str::<SinkResponse>(&text) {
            if body.status.as_deref() == Some("error") {
                return Err(SinkError::Rejected(
                    body.message.unwrap_or_else(|| "unknown reason".to_string()),
                ));
            }
        }

        Ok(())
    }
}
