use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::METRICS;
use crate::rate_limit::{RateLimiter, rate_limit};
use crate::user::{InMemoryUserRepository, User, UserService};
use anyhow::Result;
use axum::{
    Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{any::Any, sync::Arc};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::error;

/// HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<UserService>,
    /// `None` when rate limiting is disabled.
    pub limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, users: Arc<UserService>, limiter: Option<Arc<RateLimiter>>) -> Self {
        Self {
            config,
            users,
            limiter,
        }
    }

    /// Wire the in-memory repository and, if enabled, the limiter.
    pub fn from_config(config: Config) -> Result<Self> {
        let limiter = if config.rate_limiting.enabled {
            Some(Arc::new(RateLimiter::new(config.rate_limiting.policy()?)))
        } else {
            None
        };

        let users = Arc::new(UserService::with_page_sizes(
            Arc::new(InMemoryUserRepository::new()),
            config.users.default_page_size,
            config.users.max_page_size,
        ));

        Ok(Self::new(Arc::new(config), users, limiter))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Pagination is parsed leniently: anything that is not a non-negative
/// integer falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub offset: Option<String>,
    pub limit: Option<String>,
}

impl ListQuery {
    fn offset(&self) -> usize {
        parse_or_zero(self.offset.as_deref())
    }

    fn limit(&self) -> usize {
        parse_or_zero(self.limit.as_deref())
    }
}

fn parse_or_zero(value: Option<&str>) -> usize {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

/// Build the application router with its middleware stack
pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/users", get(list_users_handler).post(create_user_handler))
        .route("/users/:id", get(get_user_handler));

    if let Some(limiter) = state.limiter.clone() {
        app = app.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }

    // Last layer added runs first.
    app.layer(middleware::from_fn(track_requests))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /healthz
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "env": state.config.server.env,
    }))
}

/// GET /metrics (Prometheus format)
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, ApiError> {
    if let Some(limiter) = &state.limiter {
        METRICS.rate_limit_buckets.set(limiter.len() as f64);
    }

    METRICS.render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        ApiError::Internal
    })
}

/// POST /users
pub async fn create_user_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let Json(payload) = payload.map_err(|_| ApiError::InvalidJson)?;
    let user = state
        .users
        .create_user(&payload.name, &payload.email)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users?offset=&limit=
pub async fn list_users_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let page = state.users.list_users(query.offset(), query.limit()).await?;
    Ok(Json(UserListResponse {
        users: page.users,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// GET /users/:id
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.get_user(&id).await?))
}

async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    METRICS
        .http_requests_total
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    response
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);
    ApiError::Internal.into_response()
}
