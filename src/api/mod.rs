//! Query service HTTP API
//!
//! Read-only endpoints for the charting frontend plus static hosting of the
//! built assets. Success bodies are the bare structures the frontend
//! consumes; errors use the envelope with an explicit status code.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::persistence::{RatioStore, SubscriberRegistry};
use crate::types::RatioSample;

const ROBOTS_TXT: &str = "User-agent: *\nAllow: /\nAllow: /static/\nDisallow: /api/\n";

/// Error envelope for non-2xx responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(msg)))
}

/// Shared read-only state behind the handlers
pub struct ApiState {
    pub store: Arc<RatioStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub balance_url: Option<String>,
    pub client: reqwest::Client,
}

/// One point of the charted series
#[derive(Debug, Serialize)]
pub struct RatioPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub ratio: Decimal,
}

impl From<RatioSample> for RatioPoint {
    fn from(sample: RatioSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            ratio: sample.ratio,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RatioDataQuery {
    from_date: Option<String>,
    to_date: Option<String>,
}

/// Parse a `YYYY-MM-DD` bound, widened to the start or end of that day UTC.
fn parse_date_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(time.and_utc())
}

/// GET /api/ratio-data?from_date=&to_date= - Ascending sample series
async fn get_ratio_data(
    Query(query): Query<RatioDataQuery>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<RatioPoint>>, ApiError> {
    let from = match query.from_date.as_deref() {
        Some(raw) => Some(parse_date_bound(raw, false).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("from_date must be YYYY-MM-DD, got {raw:?}"),
            )
        })?),
        None => None,
    };
    let to = match query.to_date.as_deref() {
        Some(raw) => Some(parse_date_bound(raw, true).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("to_date must be YYYY-MM-DD, got {raw:?}"),
            )
        })?),
        None => None,
    };

    let samples = state.store.range(from, to).await;
    Ok(Json(samples.into_iter().map(RatioPoint::from).collect()))
}

/// Upstream balance shape, forwarded verbatim
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balance_usd: f64,
    pub weth_balance: f64,
}

/// GET /api/balance - Pass-through of the auxiliary balance reading
async fn get_balance(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<BalanceSnapshot>, ApiError> {
    let url = state.balance_url.as_deref().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "balance upstream not configured",
        )
    })?;

    let snapshot = state
        .client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, format!("balance upstream: {e}")))?
        .json::<BalanceSnapshot>()
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, format!("balance upstream: {e}")))?;

    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    samples: usize,
    subscribers: usize,
    latest: Option<RatioPoint>,
}

/// GET /api/health - Liveness plus store counters
async fn get_health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let latest = state.store.latest().await.ok().map(RatioPoint::from);
    Json(HealthResponse {
        status: "ok",
        samples: state.store.len().await,
        subscribers: state.registry.count().await,
        latest,
    })
}

async fn robots_txt() -> &'static str {
    ROBOTS_TXT
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<ApiState>, static_dir: &str) -> Router {
    let static_dir = Path::new(static_dir);

    Router::new()
        .route("/api/ratio-data", get(get_ratio_data))
        .route("/api/balance", get(get_balance))
        .route("/api/health", get(get_health))
        .route("/robots.txt", get(robots_txt))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .route_service("/favicon.ico", ServeFile::new(static_dir.join("favicon.ico")))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Bind and serve until the shutdown signal arrives.
pub async fn start_server(
    state: Arc<ApiState>,
    bind: &str,
    port: u16,
    static_dir: &str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state, static_dir);
    let addr = format!("{bind}:{port}");

    tracing::info!(%addr, "Query API starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    Ok(())
}
