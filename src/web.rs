use crate::{
    catalog::CatalogItem,
    error::SearchError,
    ingest::{self, IngestReport},
    search::{ImageSource, SearchOptions, SearchOutcome, Searcher},
    services::{RegistryStatus, ServiceRegistry},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::signal;

/// Page size for /api/products when the caller does not pass one.
const DEFAULT_PRODUCTS_LIMIT: usize = 50;
/// Hard cap on a single /api/products page.
const MAX_PRODUCTS_LIMIT: usize = 500;

#[derive(Clone)]
struct SharedState {
    registry: Arc<ServiceRegistry>,
}

/// Build the API router. Separate from [`start_app`] so contract tests can
/// drive it without binding a socket.
pub fn api_router(registry: Arc<ServiceRegistry>) -> Router {
    let max_body = registry.config().server.max_upload_bytes;
    let images_dir = registry.config().images_dir();
    let shared_state = Arc::new(SharedState { registry });

    Router::new()
        .nest_service(
            "/images",
            tower_http::services::ServeDir::new(images_dir),
        )
        .route("/api/search", post(search))
        .route("/api/search/upload", post(search_upload))
        .route("/api/products", get(products))
        .route("/api/categories", get(categories))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .route("/api/admin/ingest", post(admin_ingest))
        .route("/api/admin/reset", post(admin_reset))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(registry: Arc<ServiceRegistry>) {
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {
                log::info!("shutting down");
            },
            _ = terminate => {},
        }
    }

    let bind_addr = registry.config().server.bind_addr.clone();
    let app = api_router(registry);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    log::info!("listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

pub fn start_daemon(registry: Arc<ServiceRegistry>) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(registry).await });
}

// Wraps SearchError so axum can turn it into a response.
#[derive(Debug)]
struct HttpError(SearchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({"error": self.0.to_string(), "kind": self.0.kind()}).to_string();
        match &self.0 {
            SearchError::InvalidInput(_) => (axum::http::StatusCode::BAD_REQUEST, body),
            SearchError::ImageAcquisition(_) => {
                (axum::http::StatusCode::UNPROCESSABLE_ENTITY, body)
            }
            SearchError::Initialization { .. } => {
                log::error!("{:?}", self.0);
                (axum::http::StatusCode::SERVICE_UNAVAILABLE, body)
            }
            SearchError::Embedding(_) | SearchError::SearchBackend(_) | SearchError::Internal(_) => {
                log::error!("{:?}", self.0);
                (axum::http::StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        }
        .into_response()
    }
}

// This enables using `?` on functions returning `Result<_, SearchError>`
// inside handlers without mapping manually.
impl<E> From<E> for HttpError
where
    E: Into<SearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn from_anyhow(err: anyhow::Error) -> HttpError {
    match err.downcast::<SearchError>() {
        Ok(known) => HttpError(known),
        Err(other) => HttpError(SearchError::Internal(format!("{other:#}"))),
    }
}

#[derive(Deserialize)]
pub struct SearchRequest {
    /// Base64-encoded image bytes. Mutually exclusive with `image_url`.
    pub image_b64: Option<String>,
    /// Remote image to fetch. Mutually exclusive with `image_b64`.
    pub image_url: Option<String>,
    pub min_score: Option<f32>,
    pub top_k: Option<usize>,
    pub category: Option<String>,
}

impl Debug for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SearchRequest {{ image_b64: {}, image_url: {:?}, min_score: {:?}, top_k: {:?}, category: {:?} }}",
            if self.image_b64.is_some() { "[REDACTED]" } else { "None" },
            self.image_url,
            self.min_score,
            self.top_k,
            self.category
        )
    }
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<axum::Json<SearchOutcome>, HttpError> {
    log::debug!("payload: {payload:?}");

    let registry = state.registry.clone();

    tokio::task::block_in_place(move || {
        let source = match (payload.image_b64, payload.image_url) {
            (Some(b64), None) => {
                let bytes = STANDARD.decode(b64).map_err(|err| {
                    SearchError::InvalidInput(format!("image_b64 is not valid base64: {err}"))
                })?;
                ImageSource::Bytes(bytes)
            }
            (None, Some(url)) => ImageSource::Url(url),
            (Some(_), Some(_)) => {
                return Err(SearchError::InvalidInput(
                    "provide either image_b64 or image_url, not both".to_string(),
                )
                .into())
            }
            (None, None) => {
                return Err(SearchError::InvalidInput(
                    "one of image_b64 or image_url is required".to_string(),
                )
                .into())
            }
        };

        let opts = SearchOptions {
            min_score: payload.min_score,
            top_k: payload.top_k,
            category: payload.category,
        };

        Searcher::new(registry)
            .search(source, &opts)
            .map(Json)
            .map_err(Into::into)
    })
}

async fn search_upload(
    State(state): State<Arc<SharedState>>,
    mut multipart: Multipart,
) -> Result<axum::Json<SearchOutcome>, HttpError> {
    let mut file: Option<Vec<u8>> = None;
    let mut opts = SearchOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        HttpError(SearchError::InvalidInput(format!(
            "malformed multipart request: {err}"
        )))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field.bytes().await.map_err(|err| {
                    HttpError(SearchError::InvalidInput(format!(
                        "failed to read file part: {err}"
                    )))
                })?;
                file = Some(bytes.to_vec());
            }
            "min_score" => {
                let text = read_text_field(field).await?;
                let value = text.trim().parse().map_err(|_| {
                    HttpError(SearchError::InvalidInput(
                        "min_score must be a number".to_string(),
                    ))
                })?;
                opts.min_score = Some(value);
            }
            "top_k" => {
                let text = read_text_field(field).await?;
                let value = text.trim().parse().map_err(|_| {
                    HttpError(SearchError::InvalidInput(
                        "top_k must be a non-negative integer".to_string(),
                    ))
                })?;
                opts.top_k = Some(value);
            }
            "category" => {
                opts.category = Some(read_text_field(field).await?);
            }
            other => {
                log::debug!("ignoring unknown multipart field {other:?}");
            }
        }
    }

    let bytes = file.ok_or_else(|| {
        HttpError(SearchError::InvalidInput(
            "multipart request is missing the file part".to_string(),
        ))
    })?;

    let registry = state.registry.clone();
    tokio::task::block_in_place(move || {
        Searcher::new(registry)
            .search(ImageSource::Bytes(bytes), &opts)
            .map(Json)
            .map_err(Into::into)
    })
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, HttpError> {
    let name = field.name().unwrap_or_default().to_string();
    field.text().await.map_err(|err| {
        HttpError(SearchError::InvalidInput(format!(
            "failed to read {name} part: {err}"
        )))
    })
}

#[derive(Debug, Deserialize)]
pub struct ProductsQuery {
    pub category: Option<String>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    pub products: Vec<CatalogItem>,
    pub total: usize,
}

async fn products(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<ProductsQuery>,
) -> Result<axum::Json<ProductsResponse>, HttpError> {
    log::debug!("params: {params:?}");

    let registry = state.registry.clone();

    tokio::task::block_in_place(move || {
        let store = registry.store()?;

        let limit = params
            .limit
            .unwrap_or(DEFAULT_PRODUCTS_LIMIT)
            .min(MAX_PRODUCTS_LIMIT);

        let (products, total) = store
            .browse(params.category.as_deref(), params.offset, limit)
            .map_err(|err| SearchError::SearchBackend(err.to_string()))?;

        Ok(Json(ProductsResponse { products, total }))
    })
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
}

async fn categories(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<CategoriesResponse>, HttpError> {
    let registry = state.registry.clone();

    tokio::task::block_in_place(move || {
        let store = registry.store()?;
        let categories = store
            .categories()
            .map_err(|err| SearchError::SearchBackend(err.to_string()))?;
        Ok(Json(CategoriesResponse { categories }))
    })
}

async fn status(State(state): State<Arc<SharedState>>) -> axum::Json<RegistryStatus> {
    Json(state.registry.status())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Present only when the store is already constructed; health must not
    /// force initialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_items: Option<usize>,
}

async fn health(State(state): State<Arc<SharedState>>) -> axum::Json<HealthResponse> {
    let indexed_items = state
        .registry
        .store_if_ready()
        .and_then(|store| store.len().ok());

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        indexed_items,
    })
}

async fn admin_ingest(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<IngestReport>, HttpError> {
    let registry = state.registry.clone();

    tokio::task::block_in_place(move || {
        ingest::ingest_catalog(&registry, false)
            .map(Json)
            .map_err(from_anyhow)
    })
}

async fn admin_reset(State(state): State<Arc<SharedState>>) -> axum::Json<RegistryStatus> {
    state.registry.reset();
    Json(state.registry.status())
}
