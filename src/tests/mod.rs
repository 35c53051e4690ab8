
mod web;

use std::sync::Arc;
use std::time::Duration;

use crate::app::RecommendService;
use crate::cache::CacheManager;
use crate::config::RecommendConfig;
use crate::corpus::CorpusItem;
use crate::semantic::{EncoderRegistry, Recommender};
use fakes::{ManualClock, RecordingSink, ScriptedSource, StaticLoader};

/// Three items with orthonormal text embeddings and two-dimensional image
/// embeddings on the first two.
pub fn orthonormal_corpus() -> Vec<CorpusItem> {
    vec![
        CorpusItem::new(1, "monday again")
            .with_category("work")
            .with_text_embedding(vec![1.0, 0.0, 0.0])
            .with_image_embedding(vec![1.0, 0.0]),
        CorpusItem::new(2, "it compiles")
            .with_category("programming")
            .with_text_embedding(vec![0.0, 1.0, 0.0])
            .with_image_embedding(vec![0.0, 1.0]),
        CorpusItem::new(3, "coffee")
            .with_category("work")
            .with_text_embedding(vec![0.0, 0.0, 1.0]),
    ]
}

pub fn cache_with(source: Arc<ScriptedSource>) -> Arc<CacheManager> {
    Arc::new(CacheManager::new(
        source,
        Arc::new(ManualClock::default()),
        Duration::from_secs(3600),
        Duration::from_secs(5),
    ))
}

/// Service over a scripted source and fixed encoders.
pub fn service_with(
    source: Arc<ScriptedSource>,
    registry: EncoderRegistry,
    sink: Option<Arc<RecordingSink>>,
    config: RecommendConfig,
) -> RecommendService {
    let loader = StaticLoader {
        text_vector: vec![0.0, 1.0, 0.0],
        image_vector: vec![1.0, 0.0],
        ..Default::default()
    };
    service_with_loader(source, registry, loader, sink, config)
}

pub fn service_with_loader(
    source: Arc<ScriptedSource>,
    registry: EncoderRegistry,
    loader: StaticLoader,
    sink: Option<Arc<RecordingSink>>,
    config: RecommendConfig,
) -> RecommendService {
    let recommender = Recommender::new(Arc::new(registry), Duration::from_secs(1));

    RecommendService::new(
        cache_with(source),
        recommender,
        Arc::new(loader),
        sink.map(|s| s as Arc<dyn crate::interactions::InteractionSink>),
        config,
    )
}
