//! Application service: cache, encoders, orchestrator and interaction sink
//! wired together behind the operations the daemon and CLI expose.

use std::sync::{Arc, Mutex};

use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::errors::AppError;
use crate::cache::{CacheManager, CorpusView};
use crate::config::RecommendConfig;
use crate::corpus::{CategoryIndex, ItemSummary};
use crate::interactions::{record_detached, InteractionRecord, InteractionSink};
use crate::semantic::{ActiveModels, EncoderLoader, Query, Recommender};

const ANONYMOUS_USER: &str = "anonymous";

#[derive(Clone, Default, Deserialize)]
pub struct RecommendRequest {
    pub text: Option<String>,
    /// Raw image bytes, already validated and downscaled
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
    pub top_k: Option<usize>,
    pub weight_text: Option<f32>,
    pub category: Option<String>,
    pub user_id: Option<String>,
}

impl std::fmt::Debug for RecommendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecommendRequest {{ text: {:?}, image: {}, top_k: {:?}, weight_text: {:?}, category: {:?}, user_id: {:?} }}",
            self.text,
            if self.image.is_some() { "[REDUCTED]" } else { "None" },
            self.top_k, self.weight_text, self.category, self.user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendation {
    pub items: Vec<ItemSummary>,
    /// Picked at random because no query was supplied
    pub random: bool,
}

pub struct RecommendService {
    cache: Arc<CacheManager>,
    recommender: Recommender,
    loader: Arc<dyn EncoderLoader>,
    sink: Option<Arc<dyn InteractionSink>>,
    config: RecommendConfig,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl RecommendService {
    pub fn new(
        cache: Arc<CacheManager>,
        recommender: Recommender,
        loader: Arc<dyn EncoderLoader>,
        sink: Option<Arc<dyn InteractionSink>>,
        config: RecommendConfig,
    ) -> Self {
        Self {
            cache,
            recommender,
            loader,
            sink,
            config,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub async fn recommend(&self, request: RecommendRequest) -> Result<Recommendation, AppError> {
        log::debug!("request: {request:?}");

        let top_k = request
            .top_k
            .unwrap_or(self.config.top_k)
            .clamp(1, self.config.max_results);

        let weight_text = request.weight_text.unwrap_or(self.config.text_weight);
        if !(0.0..=1.0).contains(&weight_text) {
            return Err(AppError::InvalidRequest(format!(
                "weight_text must be between 0.0 and 1.0, got {weight_text}"
            )));
        }

        let view = self
            .cache
            .get_snapshot(self.config.force_refresh_on_query, request.category.as_deref())
            .await;
        if view.is_empty() {
            log::debug!("no candidates category={:?}", view.category());
        }

        let query = Query {
            text: request.text,
            image: request.image,
        };

        if query.is_empty() {
            if !self.config.random_fallback {
                return Ok(Recommendation::default());
            }

            return Ok(Recommendation {
                items: pick_random(&view).into_iter().collect(),
                random: true,
            });
        }

        let ids = self
            .recommender
            .recommend(&query, &view, top_k, weight_text)
            .await;

        // resolved against the same snapshot that was ranked
        let items: Vec<ItemSummary> = ids
            .iter()
            .filter_map(|id| view.get(*id))
            .map(ItemSummary::from)
            .collect();

        if let (Some(sink), Some(best)) = (&self.sink, items.first()) {
            let record = InteractionRecord {
                user_id: request
                    .user_id
                    .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
                input_text: query.text_input().unwrap_or_default().to_string(),
                had_image_input: query.image_input().is_some(),
                recommended_id: best.id,
            };
            let handle = record_detached(sink.clone(), record);
            if let Ok(mut deliveries) = self.deliveries.lock() {
                deliveries.retain(|h| !h.is_finished());
                deliveries.push(handle);
            }
        }

        log::info!(
            "recommend text={:?} image={} category={:?} candidates={} top_k={top_k} results={}",
            query.text_input(),
            query.image_input().is_some(),
            view.category(),
            view.len(),
            items.len()
        );

        Ok(Recommendation {
            items,
            random: false,
        })
    }

    /// A random item of `category`.
    pub async fn browse(&self, category: &str) -> Result<ItemSummary, AppError> {
        let view = self.cache.get_snapshot(false, Some(category)).await;
        pick_random(&view).ok_or(AppError::NotFound)
    }

    pub async fn categories(&self, force_refresh: bool) -> Arc<CategoryIndex> {
        self.cache.get_category_index(force_refresh).await
    }

    /// Forced refresh. Returns the number of items now cached.
    pub async fn refresh(&self) -> Result<usize, AppError> {
        Ok(self.cache.refresh().await?)
    }

    /// Switch encoders per modality. Load failures are reported in the
    /// result and leave that modality's current encoder active.
    pub async fn activate_models(
        &self,
        text_model: Option<&str>,
        image_model: Option<&str>,
    ) -> ActiveModels {
        self.recommender
            .encoders()
            .activate(self.loader.as_ref(), text_model, image_model)
            .await
    }

    pub fn active_models(&self) -> ActiveModels {
        self.recommender.encoders().active()
    }

    /// Wait for interaction deliveries still in flight. Used by one-shot
    /// commands before the runtime goes away.
    pub async fn flush_interactions(&self) {
        let pending = match self.deliveries.lock() {
            Ok(mut deliveries) => std::mem::take(&mut *deliveries),
            Err(_) => return,
        };

        for handle in pending {
            if let Err(err) = handle.await {
                log::warn!("interaction delivery task failed: {err}");
            }
        }
    }
}

fn pick_random(view: &CorpusView) -> Option<ItemSummary> {
    view.iter()
        .choose(&mut rand::rng())
        .map(ItemSummary::from)
}
