//! api.rs
//! HTTP routes: navigation commands, client-pushed location, crowd checks
//! and map overlays. Errors come back as `{error, message}`.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, services::ServeDir};
use tracing::warn;

use crate::advisor::CrowdAdvisor;
use crate::crowd::CrowdModel;
use crate::error::NavError;
use crate::heatmap::{hex_geojson, HeatMapRenderer};
use crate::models::types::{Coord, CrowdAssessment};
use crate::navigation::NavigationController;
use crate::registry::Registry;
use crate::tracking::{GeoTracker, PushLocationSource, RawFix};

#[derive(Clone)]
pub struct ApiState {
    pub nav: Arc<NavigationController>,
    pub tracker: Arc<GeoTracker>,
    /// Readings forwarded by the client device land here
    pub location: Arc<PushLocationSource>,
    pub advisor: Arc<CrowdAdvisor>,
    pub registry: Arc<Registry>,
    pub crowd: Arc<RwLock<CrowdModel>>,
    pub heat: Arc<RwLock<HeatMapRenderer>>,
    pub hex_res: u8,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/destinations", get(destinations))
        .route("/destinations/nearby", get(nearby))
        .route("/location", get(last_location).post(push_location))
        .route("/location/error", post(push_location_error))
        .route("/locate", post(locate))
        .route("/navigate", post(navigate))
        .route("/navigate/continue", post(nav_continue))
        .route("/navigate/alternative", post(nav_alternative))
        .route("/navigate/decline", post(nav_decline))
        .route("/navigate/cancel", post(nav_cancel))
        .route("/route", get(active_route).delete(clear_route))
        .route("/crowd/assess/:id", get(assess))
        .route("/map/heat", get(map_heat))
        .route("/map/heat/toggle", post(toggle_heat))
        .route("/map/hex", get(map_hex))
        .fallback_service(ServeDir::new("web"))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

// -------------------------------
// Errors
// -------------------------------
pub enum ApiError {
    Nav(NavError),
    Internal(anyhow::Error),
}

impl From<NavError> for ApiError {
    fn from(e: NavError) -> Self {
        ApiError::Nav(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

pub fn status_for(e: &NavError) -> StatusCode {
    match e {
        NavError::InvalidDestination(_) => StatusCode::NOT_FOUND,
        NavError::NavigationInProgress
        | NavError::NoActiveRoute
        | NavError::NoPendingWarning
        | NavError::Cancelled => StatusCode::CONFLICT,
        NavError::PermissionDenied => StatusCode::FORBIDDEN,
        NavError::PositionUnavailable(_) | NavError::LocationUnavailable | NavError::RoutingUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        NavError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        NavError::InvalidData(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Nav(e) => {
                (status_for(&e), Json(json!({ "error": e.kind(), "message": e.to_string() }))).into_response()
            }
            ApiError::Internal(e) => {
                warn!("api: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "internal", "message": format!("{e:#}") })))
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// -------------------------------
// Status & registry
// -------------------------------
async fn status(State(st): State<ApiState>) -> impl IntoResponse {
    let phase = st.nav.phase().await;
    let (samples, origin, loaded_at) = {
        let m = st.crowd.read().await;
        (m.len(), m.origin(), m.loaded_at())
    };
    Json(json!({
        "phase": phase,
        "crowd_samples": samples,
        "crowd_origin": origin,
        "crowd_loaded_at": loaded_at,
        "tracking": st.tracker.is_tracking(),
        "heat_visible": st.heat.read().await.is_visible(),
    }))
}

async fn destinations(State(st): State<ApiState>) -> impl IntoResponse {
    Json(st.registry.iter().cloned().collect::<Vec<_>>())
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
    /// default 1000 m
    pub radius_m: Option<f64>,
    pub tag: Option<String>,
}

async fn nearby(State(st): State<ApiState>, Query(q): Query<NearbyQuery>) -> ApiResult<impl IntoResponse> {
    let point = Coord::new(q.lat, q.lon)?;
    let radius_m = q.radius_m.filter(|r| r.is_finite() && *r >= 0.0).unwrap_or(1000.0);
    Ok(Json(st.registry.nearby(point, radius_m, q.tag.as_deref())))
}

// -------------------------------
// Location
// -------------------------------

/// Client reading. Stamped on receipt: the engine's freshness checks run on
/// server time.
#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
}

async fn push_location(State(st): State<ApiState>, Json(b): Json<LocationBody>) -> ApiResult<impl IntoResponse> {
    let fix = RawFix { lat: b.lat, lon: b.lon, accuracy_m: b.accuracy_m, timestamp: Utc::now() };
    // reject junk here instead of broadcasting it
    st.tracker.position_from(fix).map_err(|e| match e {
        NavError::PositionUnavailable(msg) => NavError::InvalidData(msg),
        other => other,
    })?;
    let delivered = st.location.push(fix);
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))))
}

/// Browser geolocation failure: 1 permission denied, 2 unavailable, 3 timeout.
#[derive(Debug, Deserialize)]
pub struct LocationErrorBody {
    pub code: u8,
    pub message: Option<String>,
}

async fn push_location_error(State(st): State<ApiState>, Json(b): Json<LocationErrorBody>) -> impl IntoResponse {
    let e = NavError::from_geolocation_code(b.code, b.message);
    let delivered = st.location.push_error(e.clone());
    (StatusCode::ACCEPTED, Json(json!({ "delivered": delivered, "error": e.kind() })))
}

async fn last_location(State(st): State<ApiState>) -> impl IntoResponse {
    Json(st.tracker.last_position().await)
}

async fn locate(State(st): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.nav.locate().await?))
}

// -------------------------------
// Navigation
// -------------------------------
#[derive(Debug, Deserialize)]
pub struct DestinationBody {
    pub destination_id: String,
}

async fn navigate(State(st): State<ApiState>, Json(b): Json<DestinationBody>) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.nav.request_navigation(&b.destination_id).await?))
}

async fn nav_continue(State(st): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.nav.continue_anyway().await?))
}

async fn nav_alternative(State(st): State<ApiState>, Json(b): Json<DestinationBody>) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.nav.choose_alternative(&b.destination_id).await?))
}

async fn nav_decline(State(st): State<ApiState>) -> ApiResult<impl IntoResponse> {
    st.nav.decline().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn nav_cancel(State(st): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "cancelled": st.nav.cancel().await }))
}

async fn active_route(State(st): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let route = st.nav.active_route().await.ok_or(NavError::NoActiveRoute)?;
    Ok(Json(route))
}

async fn clear_route(State(st): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.nav.clear_route().await?))
}

// -------------------------------
// Crowd & map
// -------------------------------

/// Assessment plus its display label/colour.
#[derive(Serialize)]
struct AssessmentView {
    #[serde(flatten)]
    assessment: CrowdAssessment,
    risk_label: &'static str,
    risk_color: &'static str,
}

async fn assess(State(st): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let a = st.advisor.assess_id(&id).await?;
    Ok(Json(AssessmentView { risk_label: a.risk.label(), risk_color: a.risk.color(), assessment: a }))
}

async fn map_heat(State(st): State<ApiState>) -> impl IntoResponse {
    let heat = st.heat.read().await;
    let crowd = st.crowd.read().await;
    Json(json!({ "visible": heat.is_visible(), "overlay": heat.overlay(crowd.samples()) }))
}

#[derive(Debug, Deserialize)]
pub struct ToggleBody {
    pub visible: bool,
}

async fn toggle_heat(State(st): State<ApiState>, Json(b): Json<ToggleBody>) -> impl IntoResponse {
    let mut heat = st.heat.write().await;
    let redrawn = heat.toggle(b.visible);
    Json(json!({ "visible": heat.is_visible(), "redrawn": redrawn, "redraws": heat.redraws() }))
}

#[derive(Debug, Deserialize)]
pub struct HexQuery {
    pub res: Option<u8>,
}

async fn map_hex(State(st): State<ApiState>, Query(q): Query<HexQuery>) -> ApiResult<impl IntoResponse> {
    let res = q.res.unwrap_or(st.hex_res);
    if res > 15 {
        return Err(NavError::InvalidData(format!("H3 resolution {res} not in 0..=15")).into());
    }
    let gj = {
        let crowd = st.crowd.read().await;
        hex_geojson(crowd.samples(), res)?
    };
    Ok(([(header::CONTENT_TYPE, "application/json")], gj))
}
