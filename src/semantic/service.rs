//! Recommendation orchestrator.
//!
//! Glues the active encoders, the per-modality ranker and the fusion
//! combiner into a single `recommend` call. Nothing here fails on missing
//! data: absent queries, unusable inputs, encoder errors and empty corpora
//! all come out as an empty id list.

use std::sync::Arc;
use std::time::Duration;

use super::embeddings::EncodingError;
use super::hybrid::combine;
use super::ranker::{Candidate, LinearScan, RankedResult, Ranker};
use super::registry::EncoderRegistry;
use crate::corpus::{CorpusItem, ItemId};

/// Raw query input. Empty text and empty image bytes count as not supplied.
#[derive(Clone, Default)]
pub struct Query {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Query {{ text: {:?}, image: {} }}",
            self.text,
            match &self.image {
                Some(bytes) => format!("[{} bytes]", bytes.len()),
                None => "None".to_string(),
            }
        )
    }
}

#[cfg(test)]
impl Query {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            image: None,
        }
    }

    pub fn image(image: Vec<u8>) -> Self {
        Self {
            text: None,
            image: Some(image),
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }
}

impl Query {
    pub fn text_input(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn image_input(&self) -> Option<&[u8]> {
        self.image.as_deref().filter(|bytes| !bytes.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.text_input().is_none() && self.image_input().is_none()
    }
}

pub struct Recommender {
    encoders: Arc<EncoderRegistry>,
    ranker: Box<dyn Ranker>,
    encode_timeout: Duration,
}

impl Recommender {
    pub fn new(encoders: Arc<EncoderRegistry>, encode_timeout: Duration) -> Self {
        Self {
            encoders,
            ranker: Box::new(LinearScan),
            encode_timeout,
        }
    }

    pub fn encoders(&self) -> &Arc<EncoderRegistry> {
        &self.encoders
    }

    /// Ids of the best matches for `query`, best first, at most `top_k`.
    ///
    /// With both modalities present the per-modality lists are fused with
    /// `weight_text`; with one present its list is returned as is.
    pub async fn recommend<'a, I>(
        &self,
        query: &Query,
        corpus: I,
        top_k: usize,
        weight_text: f32,
    ) -> Vec<ItemId>
    where
        I: IntoIterator<Item = &'a CorpusItem>,
    {
        self.recommend_scored(query, corpus, top_k, weight_text)
            .await
            .into_iter()
            .map(|scored| scored.id)
            .collect()
    }

    pub(crate) async fn recommend_scored<'a, I>(
        &self,
        query: &Query,
        corpus: I,
        top_k: usize,
        weight_text: f32,
    ) -> RankedResult
    where
        I: IntoIterator<Item = &'a CorpusItem>,
    {
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }

        // the snapshot is pinned for the whole call, encoders may await
        let items: Vec<&CorpusItem> = corpus.into_iter().collect();

        let (text_vector, image_vector) = tokio::join!(
            self.encode_text(query.text_input()),
            self.encode_image(query.image_input()),
        );

        let text_results = text_vector.as_deref().map(|vector| {
            let candidates: Vec<Candidate<'_>> = items
                .iter()
                .map(|item| (item.id, item.text_embedding.as_deref()))
                .collect();
            self.ranker.rank(Some(vector), &candidates, top_k)
        });

        let image_results = image_vector.as_deref().map(|vector| {
            let candidates: Vec<Candidate<'_>> = items
                .iter()
                .map(|item| (item.id, item.image_embedding.as_deref()))
                .collect();
            self.ranker.rank(Some(vector), &candidates, top_k)
        });

        let results = match (text_results, image_results) {
            (Some(text), Some(image)) => combine(&text, &image, weight_text, top_k),
            (Some(single), None) | (None, Some(single)) => single,
            (None, None) => Vec::new(),
        };

        log::debug!(
            "query={query:?} corpus={} results={}",
            items.len(),
            results.len()
        );
        results
    }

    async fn encode_text(&self, text: Option<&str>) -> Option<Vec<f32>> {
        let text = text?;
        // missing model is reported once at activation
        let encoder = self.encoders.text()?;

        let result = tokio::time::timeout(self.encode_timeout, encoder.embed(text)).await;
        absorb("text", encoder.name(), self.encode_timeout, result)
    }

    async fn encode_image(&self, image: Option<&[u8]>) -> Option<Vec<f32>> {
        let image = image?;
        let encoder = self.encoders.image()?;

        let result = tokio::time::timeout(self.encode_timeout, encoder.embed(image)).await;
        absorb("image", encoder.name(), self.encode_timeout, result)
    }
}

fn absorb(
    modality: &str,
    model: &str,
    timeout: Duration,
    result: Result<Result<Vec<f32>, EncodingError>, tokio::time::error::Elapsed>,
) -> Option<Vec<f32>> {
    match result {
        Ok(Ok(vector)) if !vector.is_empty() => Some(vector),
        Ok(Ok(_)) => {
            log::warn!("modality={modality} model={model} outcome=empty_vector");
            None
        }
        Ok(Err(EncodingError::UnusableInput(reason))) => {
            log::debug!("modality={modality} model={model} outcome=skipped reason={reason}");
            None
        }
        Ok(Err(err)) => {
            log::warn!("modality={modality} model={model} outcome=error err={err}");
            None
        }
        Err(_) => {
            log::warn!("modality={modality} model={model} outcome=timeout after={timeout:?}");
            None
        }
    }
}
