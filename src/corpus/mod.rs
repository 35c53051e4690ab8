//! Corpus data model and the corpus-source collaborator.
//!
//! A [`CorpusSnapshot`] is an immutable point-in-time copy of every
//! recommendable item. Snapshots are shared behind `Arc` and replaced
//! wholesale, never mutated in place.

pub mod source;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use source::{CorpusSource, FetchError, HttpCorpusSource};

/// Stable identifier of a corpus item.
pub type ItemId = u64;

/// A single recommendable media item with its precomputed embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusItem {
    pub id: ItemId,
    pub title: String,
    pub category: Option<String>,
    pub keywords: String,
    pub text_embedding: Option<Vec<f32>>,
    pub image_embedding: Option<Vec<f32>>,
    /// Opaque locator of the media file, usually an absolute URL.
    pub media_ref: Option<String>,
}

impl CorpusItem {
    /// Whether the item belongs to `category`. Comparison is exact, matching
    /// how the corpus source filters.
    pub fn in_category(&self, category: &str) -> bool {
        self.category.as_deref() == Some(category)
    }
}

#[cfg(test)]
impl CorpusItem {
    pub fn new(id: ItemId, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            category: None,
            keywords: String::new(),
            text_embedding: None,
            image_embedding: None,
            media_ref: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_text_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.text_embedding = Some(embedding);
        self
    }

    pub fn with_image_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.image_embedding = Some(embedding);
        self
    }
}

/// Client-facing view of an item, without embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub keywords: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

impl From<&CorpusItem> for ItemSummary {
    fn from(item: &CorpusItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            category: item.category.clone(),
            keywords: item.keywords.clone(),
            media_ref: item.media_ref.clone(),
        }
    }
}

/// Immutable ordered sequence of items plus the time it was fetched.
#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    items: Vec<CorpusItem>,
    fetched_at: DateTime<Utc>,
    generation: u64,
}

impl CorpusSnapshot {
    pub fn new(items: Vec<CorpusItem>, fetched_at: DateTime<Utc>, generation: u64) -> Self {
        warn_on_mixed_dimensions("text", items.iter().map(|i| i.text_embedding.as_deref()));
        warn_on_mixed_dimensions("image", items.iter().map(|i| i.image_embedding.as_deref()));

        Self {
            items,
            fetched_at,
            generation,
        }
    }

    /// The snapshot served before the first successful fetch.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            fetched_at: DateTime::<Utc>::MIN_UTC,
            generation: 0,
        }
    }

    pub fn items(&self) -> &[CorpusItem] {
        &self.items
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Counter identifying which fetch produced this snapshot. Grows in commit order.
    /// `0` is reserved for [`CorpusSnapshot::empty`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// Mixed dimensions are tolerated; the ranker skips vectors that don't match
// the query. This only surfaces a misconfigured backend.
fn warn_on_mixed_dimensions<'a>(modality: &str, vectors: impl Iterator<Item = Option<&'a [f32]>>) {
    let dims: BTreeSet<usize> = vectors.flatten().map(|v| v.len()).collect();
    if dims.len() > 1 {
        log::warn!("snapshot contains mixed {modality} embedding dimensions: {dims:?}");
    }
}

/// Sorted set of distinct non-empty categories of one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryIndex {
    categories: Vec<String>,
    #[serde(skip)]
    generation: u64,
}

impl CategoryIndex {
    pub fn from_snapshot(snapshot: &CorpusSnapshot) -> Self {
        let categories: BTreeSet<&str> = snapshot
            .items()
            .iter()
            .filter_map(|item| item.category.as_deref())
            .filter(|c| !c.trim().is_empty())
            .collect();

        Self {
            categories: categories.into_iter().map(str::to_string).collect(),
            generation: snapshot.generation(),
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Generation of the snapshot this index was derived from.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
