//! REST API for the host bridge.
//!
//! The host app forwards its OS callbacks here and reads back status and
//! buffered samples. Every event endpoint waits until the core has handled
//! the event before answering, so a response means the effect is visible.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store
//! errors return HTTP 500, a stopped core returns HTTP 503 and malformed
//! requests return 400.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use rumpel_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use rumpel_core::{
    CoreEvent, LocationSample, RawFix, RegionId, RegionState, SyncHealth, SyncOutcome,
    TrackingPreferences,
};
use rumpel_store::SampleQuery;

use crate::config::MAX_BUDGET_SECS;
use crate::state::AppState;

/// Default page size for `/api/samples`.
pub const DEFAULT_SAMPLE_LIMIT: u32 = 100;
/// Largest page size for `/api/samples`.
pub const MAX_SAMPLE_LIMIT: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Platform callbacks
        .route("/api/events/fixes", post(fixes_received))
        .route("/api/events/region-exit", post(region_exit))
        .route("/api/events/background-fetch", post(background_fetch))
        .route("/api/events/foreground", post(app_foreground))
        .route("/api/events/background", post(app_background))
        // User settings
        .route("/api/tracking", put(set_tracking))
        .route("/api/preferences", get(get_preferences).put(update_preferences))
        .route("/api/auth/token", put(set_token).delete(clear_token))
        // Data
        .route("/api/samples", get(get_samples))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub running: bool,
    pub preferences: TrackingPreferences,
    pub region: RegionState,
    /// Whether an upload endpoint is configured.
    pub sync_configured: bool,
    pub token_set: bool,
    pub health: SyncHealth,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let sync_configured = state.config.read().await.sync.is_enabled();

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        running: state.core.is_running(),
        preferences: state.current_preferences(),
        region: state.core.region_state(),
        sync_configured,
        token_set: state.token.is_set(),
        health: state.core.health()?,
    }))
}

/// Acknowledgement for a handled platform event.
#[derive(Debug, Serialize)]
pub struct EventAck {
    pub event: &'static str,
}

async fn dispatch(
    state: &AppState,
    event: CoreEvent,
    name: &'static str,
) -> Result<(StatusCode, Json<EventAck>), AppError> {
    state.core.send(event).await?;
    state.core.flush().await?;
    Ok((StatusCode::ACCEPTED, Json(EventAck { event: name })))
}

async fn fixes_received(
    State(state): State<Arc<AppState>>,
    Json(fixes): Json<Vec<RawFix>>,
) -> Result<(StatusCode, Json<EventAck>), AppError> {
    dispatch(&state, CoreEvent::FixesReceived(fixes), "fixes_received").await
}

/// Body of `POST /api/events/region-exit`.
#[derive(Debug, Deserialize)]
pub struct RegionExitRequest {
    pub region_id: RegionId,
}

async fn region_exit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegionExitRequest>,
) -> Result<(StatusCode, Json<EventAck>), AppError> {
    dispatch(
        &state,
        CoreEvent::RegionExited(request.region_id),
        "region_exited",
    )
    .await
}

/// Body of `POST /api/events/background-fetch`.
#[derive(Debug, Deserialize)]
pub struct BackgroundFetchRequest {
    /// Seconds the OS granted for this window.
    pub budget_secs: u64,
}

async fn background_fetch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BackgroundFetchRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    if !(1..=MAX_BUDGET_SECS).contains(&request.budget_secs) {
        return Err(AppError::BadRequest(format!(
            "budget_secs must be between 1 and {}, got {}",
            MAX_BUDGET_SECS, request.budget_secs
        )));
    }

    let outcome = state
        .core
        .background_fetch(Duration::from_secs(request.budget_secs))
        .await?;
    Ok(Json(outcome))
}

async fn app_foreground(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<EventAck>), AppError> {
    dispatch(&state, CoreEvent::AppForeground, "app_foreground").await
}

async fn app_background(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<EventAck>), AppError> {
    dispatch(&state, CoreEvent::AppBackground, "app_background").await
}

/// Body of `PUT /api/tracking`.
#[derive(Debug, Deserialize)]
pub struct TrackingRequest {
    pub enabled: bool,
}

async fn set_tracking(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrackingRequest>,
) -> Result<Json<TrackingPreferences>, AppError> {
    state.core.set_tracking_enabled(request.enabled).await?;
    state.core.flush().await?;

    info!("Tracking {} via API", if request.enabled { "enabled" } else { "disabled" });
    Ok(Json(state.current_preferences()))
}

async fn get_preferences(State(state): State<Arc<AppState>>) -> Json<TrackingPreferences> {
    Json(state.current_preferences())
}

/// Update tracking preferences.
///
/// Omitted fields keep their defaults, not their current values.
async fn update_preferences(
    State(state): State<Arc<AppState>>,
    Json(preferences): Json<TrackingPreferences>,
) -> Result<Json<TrackingPreferences>, AppError> {
    if preferences.desired_accuracy_meters <= 0.0 {
        return Err(AppError::BadRequest(
            "desired_accuracy_meters must be greater than 0".to_string(),
        ));
    }
    if preferences.min_distance_meters < 0.0 {
        return Err(AppError::BadRequest(
            "min_distance_meters cannot be negative".to_string(),
        ));
    }

    state.preferences.send_replace(preferences);
    {
        let mut config = state.config.write().await;
        config.tracking.enabled = preferences.enabled;
        config.tracking.desired_accuracy_meters = preferences.desired_accuracy_meters;
        config.tracking.min_distance_meters = preferences.min_distance_meters;
    }

    info!("Tracking preferences updated via API: {:?}", preferences);
    Ok(Json(preferences))
}

/// Body of `PUT /api/auth/token`.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

async fn set_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokenRequest>,
) -> Result<StatusCode, AppError> {
    let token = request.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("token cannot be empty".to_string()));
    }

    state.token.set(token);
    state.core.clear_auth_expired();
    info!("Auth token updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_token(State(state): State<Arc<AppState>>) -> StatusCode {
    state.token.clear();
    info!("Auth token cleared");
    StatusCode::NO_CONTENT
}

/// Query parameters for `/api/samples`.
#[derive(Debug, Default, Deserialize)]
pub struct SamplesQuery {
    /// Unix timestamp (seconds), inclusive.
    pub since: Option<i64>,
    /// Unix timestamp (seconds), inclusive.
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    #[serde(default)]
    pub unsynced_only: bool,
}

impl SamplesQuery {
    /// Convert to a store query, rejecting bad ranges.
    pub fn to_store_query(&self) -> Result<SampleQuery, AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }

        let limit = self.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT);
        if limit == 0 || limit > MAX_SAMPLE_LIMIT {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_SAMPLE_LIMIT
            )));
        }

        let mut query = SampleQuery::new().limit(limit);
        if let Some(since) = self.since {
            query = query.since(parse_timestamp("since", since)?);
        }
        if let Some(until) = self.until {
            query = query.until(parse_timestamp("until", until)?);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        if self.unsynced_only {
            query = query.unsynced_only();
        }
        Ok(query)
    }
}

fn parse_timestamp(field: &str, secs: i64) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| AppError::BadRequest(format!("invalid '{}' timestamp: {}", field, e)))
}

/// A page of samples, newest first.
#[derive(Debug, Serialize)]
pub struct SamplesResponse {
    pub count: usize,
    pub total: u64,
    pub unsynced: u64,
    pub samples: Vec<LocationSample>,
}

async fn get_samples(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SamplesQuery>,
) -> Result<Json<SamplesResponse>, AppError> {
    let query = params.to_store_query()?;
    let samples = state.store.query_samples(&query)?;

    Ok(Json(SamplesResponse {
        count: samples.len(),
        total: state.store.count_samples()?,
        unsynced: state.store.unsynced_count()?,
        samples,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Store(rumpel_store::Error),
    Core(rumpel_core::Error),
}

impl From<rumpel_store::Error> for AppError {
    fn from(e: rumpel_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<rumpel_core::Error> for AppError {
    fn from(e: rumpel_core::Error) -> Self {
        match e {
            rumpel_core::Error::Storage(e) => AppError::Store(e),
            other => AppError::Core(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Core(e @ rumpel_core::Error::ChannelClosed) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            AppError::Core(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
