use crate::{
    app::{AppError, AppFactory, RecommendRequest, RecommendService, Recommendation},
    config::Config,
    corpus::ItemSummary,
    images,
    semantic::ActiveModels,
};
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tokio::signal;

pub struct SharedState {
    pub service: Arc<RecommendService>,
    pub http: reqwest::Client,
    pub image_timeout: Duration,
}

impl SharedState {
    pub fn new(service: Arc<RecommendService>, image_timeout: Duration) -> Self {
        Self {
            service,
            http: reqwest::Client::new(),
            image_timeout,
        }
    }
}

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/recommend", post(recommend))
        .route("/api/browse", post(browse))
        .route("/api/categories", get(categories))
        .route("/api/cache/refresh", post(refresh_cache))
        .route("/api/models", get(active_models))
        .route("/api/models/activate", post(activate_models))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

/// Run the daemon until Ctrl-C or SIGTERM.
pub async fn start_daemon(config: Config, addr: String) -> anyhow::Result<()> {
    let service = Arc::new(AppFactory::create_service(&config)?);

    // warm the cache before the first request, a failure only means an
    // empty corpus until the next refresh
    if let Ok(count) = service.refresh().await {
        log::info!("cache warmed with {count} items");
    }

    let models = &config.models;
    let active = service
        .activate_models(models.text_model.as_deref(), models.image_model.as_deref())
        .await;
    if active.text_error.is_some() || active.image_error.is_some() {
        log::warn!("continuing with partial models: {active:?}");
    }

    let refresher = service
        .cache()
        .spawn_periodic_refresh(Duration::from_secs(config.cache.refresh_interval_secs));

    let state = Arc::new(SharedState::new(
        service,
        Duration::from_secs(config.source.request_timeout_secs),
    ));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.abort();
    log::info!("periodic refresher stopped");
    Ok(())
}

#[derive(Debug)]
pub struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            AppError::NotFound => axum::http::StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) | AppError::Base64(_) => {
                log::debug!("{self:?}");
                axum::http::StatusCode::BAD_REQUEST
            }
            _ => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Default, Deserialize, Serialize)]
pub struct RecommendPayload {
    pub text: Option<String>,
    pub image_b64: Option<String>,
    /// Fetched by the daemon, local paths are not accepted here
    pub image_url: Option<String>,
    pub top_k: Option<usize>,
    pub weight_text: Option<f32>,
    pub category: Option<String>,
    pub user_id: Option<String>,
}

impl Debug for RecommendPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecommendPayload {{ text: {:?}, image_b64: [REDUCTED], image_url: {:?}, top_k: {:?}, weight_text: {:?}, category: {:?}, user_id: {:?} }}", self.text, self.image_url, self.top_k, self.weight_text, self.category, self.user_id)
    }
}

async fn recommend(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RecommendPayload>,
) -> Result<Json<Recommendation>, HttpError> {
    log::debug!("payload: {payload:?}");

    let image = match (payload.image_b64, payload.image_url) {
        (Some(b64), _) if !b64.is_empty() => {
            let data = STANDARD.decode(b64)?;
            match images::prepare_blocking(data).await {
                Ok(data) => Some(data),
                Err(err) => {
                    log::warn!("uploaded query image skipped: {err}");
                    None
                }
            }
        }
        (_, Some(url)) if url.starts_with("http://") || url.starts_with("https://") => {
            images::load_query_image(&state.http, &url, state.image_timeout).await
        }
        (_, Some(url)) if !url.is_empty() => {
            return Err(AppError::InvalidRequest(format!(
                "image_url must be an http(s) url: {url:?}"
            ))
            .into())
        }
        _ => None,
    };

    let request = RecommendRequest {
        text: payload.text,
        image,
        top_k: payload.top_k,
        weight_text: payload.weight_text,
        category: payload.category,
        user_id: payload.user_id,
    };

    let recommendation = state.service.recommend(request).await?;
    if recommendation.items.is_empty() {
        return Err(AppError::NotFound.into());
    }

    Ok(Json(recommendation))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BrowsePayload {
    pub category: String,
}

async fn browse(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<BrowsePayload>,
) -> Result<Json<ItemSummary>, HttpError> {
    log::debug!("payload: {payload:?}");

    Ok(Json(state.service.browse(&payload.category).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoriesParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
}

async fn categories(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<CategoriesParams>,
) -> Result<Json<CategoriesResponse>, HttpError> {
    let index = state.service.categories(params.force).await;

    Ok(Json(CategoriesResponse {
        categories: index.categories().to_vec(),
    }))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub items: usize,
}

async fn refresh_cache(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<RefreshResponse>, HttpError> {
    let items = state.service.refresh().await?;
    Ok(Json(RefreshResponse { items }))
}

async fn active_models(State(state): State<Arc<SharedState>>) -> Json<ActiveModels> {
    Json(state.service.active_models())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ActivatePayload {
    pub text_model: Option<String>,
    pub image_model: Option<String>,
}

async fn activate_models(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ActivatePayload>,
) -> Json<ActiveModels> {
    log::info!("payload: {payload:?}");

    let active = state
        .service
        .activate_models(payload.text_model.as_deref(), payload.image_model.as_deref())
        .await;

    Json(active)
}
