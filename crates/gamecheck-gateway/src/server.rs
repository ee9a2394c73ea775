//! Gateway server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, Path, Query, State},
    http::{HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use gamecheck_catalog::{CatalogError, CatalogProvider, SearchCache, SearchResult, SteamCatalog};
use gamecheck_core::config::{Config, ServerConfig};
use gamecheck_core::history::{HistoryError, HistoryStore, HistoryTrimmer, SledHistoryStore};
use gamecheck_core::types::{ActivityKind, GameStatus, HistoryRecord, UserId};

use crate::GatewayError;
use crate::auth::{AuthState, RequireAuth};
use crate::middleware::{RateLimitLayerState, rate_limit};
use crate::ratelimit::{RateLimiterRegistry, RouteClass};

/// Default and maximum page size for activity listings.
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// Default and maximum number of search results returned.
const DEFAULT_SEARCH_LIMIT: usize = 6;
const MAX_SEARCH_LIMIT: usize = 10;

/// Gateway server state shared across handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Bearer token validation.
    pub auth: Arc<AuthState>,
    /// Rate limiters by route class.
    pub limiters: Arc<RateLimiterRegistry>,
    /// Catalog search cache.
    pub search: Arc<SearchCache>,
    /// Activity history with trimming.
    pub history: HistoryTrimmer,
}

impl FromRef<GatewayState> for Arc<AuthState> {
    fn from_ref(state: &GatewayState) -> Self {
        Arc::clone(&state.auth)
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("auth", &self.auth)
            .field("limiters", &self.limiters)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a Gateway with its dependencies.
#[derive(Default)]
pub struct GatewayBuilder {
    config: Config,
    history_store: Option<Arc<dyn HistoryStore>>,
    provider: Option<Arc<dyn CatalogProvider>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use an existing history store instead of opening one on disk.
    #[must_use]
    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    /// Use a catalog provider instead of the Steam client.
    #[must_use]
    pub fn with_catalog_provider(mut self, provider: Arc<dyn CatalogProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the gateway.
    ///
    /// Starts the rate limiter sweeps, so it must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if auth, storage or the catalog client fail to initialize.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let config = self.config;

        let auth = AuthState::initialize(config.auth.clone())
            .map_err(|e| GatewayError::Config(format!("Auth init failed: {e}")))?;

        let history_store: Arc<dyn HistoryStore> = match self.history_store {
            Some(store) => store,
            None => {
                let dir = Config::history_dir();
                std::fs::create_dir_all(&dir)?;
                Arc::new(SledHistoryStore::open(&dir)?)
            }
        };

        let provider: Arc<dyn CatalogProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(
                SteamCatalog::new(&config.catalog)
                    .map_err(|e| GatewayError::Config(format!("Catalog init failed: {e}")))?,
            ),
        };

        let state = GatewayState {
            auth: Arc::new(auth),
            limiters: Arc::new(RateLimiterRegistry::from_config(&config.rate_limits)),
            search: Arc::new(SearchCache::new(provider, &config.search_cache)),
            history: HistoryTrimmer::new(history_store, config.history.max_per_owner),
            config: Arc::new(config),
        };

        Ok(Gateway { state })
    }
}

/// Gateway server.
#[derive(Debug)]
pub struct Gateway {
    state: GatewayState,
}

impl Gateway {
    /// Create a gateway with on-disk history and the Steam catalog.
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails.
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        GatewayBuilder::new().with_config(config).build()
    }

    /// Shared state.
    #[must_use]
    pub const fn state(&self) -> &GatewayState {
        &self.state
    }

    /// HTTP router over this gateway's state.
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then stop the rate limiter sweeps.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the server fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let server = &self.state.config.server;
        let addr: SocketAddr = format!("{}:{}", server.bind_address, server.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Gateway API listening on http://{}", addr);

        let app = self.router();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        tracing::info!("Gateway stopped accepting connections, shutting down");
        self.shutdown().await;

        result.map_err(|e| GatewayError::Server(e.to_string()))
    }

    /// Stop the rate limiter sweeps and flush activity history.
    pub async fn shutdown(&self) {
        self.state.limiters.shutdown().await;

        let store = Arc::clone(self.state.history.store());
        match tokio::task::spawn_blocking(move || store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to flush activity history"),
            Err(e) => tracing::error!(error = %e, "History flush task failed"),
        }
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails.
    pub async fn run(self) -> Result<(), GatewayError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// Build the HTTP router.
pub fn router(state: GatewayState) -> Router {
    let limited = |class: RouteClass| {
        from_fn_with_state(
            RateLimitLayerState {
                limiters: Arc::clone(&state.limiters),
                auth: Arc::clone(&state.auth),
                class,
            },
            rate_limit,
        )
    };

    let read = Router::new()
        .route("/api/games/search", get(search_handler))
        .route("/api/activity/{user_id}", get(list_activity_handler))
        .route_layer(limited(RouteClass::Read));

    let write = Router::new()
        .route("/api/activity", post(create_activity_handler))
        .route_layer(limited(RouteClass::Write));

    let auth = Router::new()
        .route("/api/auth/me", get(me_handler))
        .route_layer(limited(RouteClass::Auth));

    Router::new()
        .route("/health", get(health_handler))
        .merge(read)
        .merge(write)
        .merge(auth)
        .layer(TimeoutLayer::new(state.config.server.request_timeout()))
        .layer(cors_layer(&state.config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.cors_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Handler errors.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("game not found")]
    NotFound,
    #[error("catalog unavailable")]
    Upstream(#[source] CatalogError),
    #[error("internal error")]
    Internal(String),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::EmptyQuery => Self::BadRequest("search query is required".to_string()),
            other => Self::Upstream(other),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::InvalidRecord(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    items: Vec<SearchResult>,
}

async fn search_handler(
    State(state): State<GatewayState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = params
        .limit
        .filter(|&limit| limit > 0)
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(MAX_SEARCH_LIMIT);

    let items = state.search.search(&params.q, limit).await?;
    if items.is_empty() {
        return Err(ApiError::NotFound);
    }

    Ok(Json(SearchResponse { items }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateActivity {
    kind: ActivityKind,
    game_name: Option<String>,
    status: Option<GameStatus>,
    target_user_id: Option<String>,
}

impl CreateActivity {
    fn into_record(self, owner: UserId) -> Result<HistoryRecord, ApiError> {
        let game_name = self
            .game_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let mut record = HistoryRecord::new(owner, self.kind);

        match self.kind {
            ActivityKind::AddGame | ActivityKind::UpdateStatus => {
                let name = game_name.ok_or_else(|| {
                    ApiError::BadRequest(format!("gameName is required for {}", self.kind))
                })?;
                record = record.with_game(name);
                if let Some(status) = self.status {
                    record = record.with_status(status);
                } else if self.kind == ActivityKind::UpdateStatus {
                    return Err(ApiError::BadRequest(
                        "status is required for update_status".to_string(),
                    ));
                }
            }
            ActivityKind::Follow => {
                let target = self
                    .target_user_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest("targetUserId is required for follow".to_string())
                    })?;
                record = record.with_target(UserId::new(target));
            }
        }

        Ok(record)
    }
}

async fn create_activity_handler(
    State(state): State<GatewayState>,
    auth: RequireAuth,
    Json(body): Json<CreateActivity>,
) -> Result<(StatusCode, Json<HistoryRecord>), ApiError> {
    let record = body.into_record(UserId::new(auth.user_id()))?;
    let history = state.history.clone();

    let record = tokio::task::spawn_blocking(move || history.record(record))
        .await
        .map_err(|e| ApiError::Internal(format!("History task failed: {e}")))??;

    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_activity_handler(
    State(state): State<GatewayState>,
    Path(user_id): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let limit = page
        .limit
        .filter(|&limit| limit > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0);
    let store = Arc::clone(state.history.store());
    let owner = UserId::new(user_id);

    let records = tokio::task::spawn_blocking(move || store.list(&owner, limit, offset))
        .await
        .map_err(|e| ApiError::Internal(format!("History task failed: {e}")))??;

    Ok(Json(records))
}

async fn me_handler(auth: RequireAuth) -> Json<serde_json::Value> {
    Json(json!({ "userId": auth.user_id() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: ActivityKind) -> CreateActivity {
        CreateActivity {
            kind,
            game_name: None,
            status: None,
            target_user_id: None,
        }
    }

    #[test]
    fn test_add_game_requires_name() {
        let owner = UserId::new("1");
        assert!(request(ActivityKind::AddGame).into_record(owner.clone()).is_err());

        let record = CreateActivity {
            game_name: Some("  Hades ".to_string()),
            ..request(ActivityKind::AddGame)
        }
        .into_record(owner)
        .unwrap();
        assert_eq!(record.game_name.as_deref(), Some("Hades"));
        assert_eq!(record.status, None);
    }

    #[test]
    fn test_update_status_requires_status() {
        let owner = UserId::new("1");
        let missing = CreateActivity {
            game_name: Some("Hades".to_string()),
            ..request(ActivityKind::UpdateStatus)
        };
        assert!(missing.into_record(owner.clone()).is_err());

        let record = CreateActivity {
            game_name: Some("Hades".to_string()),
            status: Some(GameStatus::Completed),
            ..request(ActivityKind::UpdateStatus)
        }
        .into_record(owner)
        .unwrap();
        assert_eq!(record.status, Some(GameStatus::Completed));
    }

    #[test]
    fn test_follow_requires_target() {
        let owner = UserId::new("1");
        assert!(request(ActivityKind::Follow).into_record(owner.clone()).is_err());

        let record = CreateActivity {
            target_user_id: Some("2".to_string()),
            ..request(ActivityKind::Follow)
        }
        .into_record(owner)
        .unwrap();
        assert_eq!(record.target_user_id, Some(UserId::new("2")));
    }

    #[test]
    fn test_catalog_error_mapping() {
        let response = ApiError::from(CatalogError::EmptyQuery).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(CatalogError::Status { status: 503 }).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        assert_eq!(ApiError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
    }
}
