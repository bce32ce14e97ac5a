// src/api.rs
use std::sync::Arc;

use serde::Deserialize;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::cluster::{Bounds, ClusterPoint, ExpansionTarget, FeatureCollection};
use crate::pipeline::{ListQuery, ListView};
use crate::report::Report;
use crate::session::{SavedFilters, Session};
use crate::summary::Summary;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
}

impl AppState {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

type ApiError = (StatusCode, String);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn not_found(msg: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, msg.into())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/reports", get(list_reports))
        .route("/pinned", get(pinned))
        .route("/summary", get(summary))
        .route("/filters", get(get_filters).put(put_filters))
        .route("/clusters", get(list_collections))
        .route("/clusters/{collection}", get(clusters))
        .route("/clusters/{collection}/expand", post(expand))
        .route("/clusters/{collection}/leaves/{cluster_id}", get(leaves))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct ReportsParams {
    lat: Option<f64>,
    lon: Option<f64>,
    radius_km: Option<f64>,
    feed: Option<bool>,
}

/// Missing `radius_km` / `feed` fall back to the saved filters.
async fn list_reports(
    State(state): State<AppState>,
    Query(p): Query<ReportsParams>,
) -> Result<Json<ListView>, ApiError> {
    let origin = match (p.lat, p.lon) {
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(bad_request("lat/lon out of range"));
            }
            Some((lat, lon))
        }
        (None, None) => None,
        _ => return Err(bad_request("lat and lon must be given together")),
    };
    if p.radius_km.is_some_and(|r| r.is_nan() || r < 0.0) {
        return Err(bad_request("radius_km must be non-negative"));
    }
    let s = state.session.state();
    let saved = s.saved_filters();
    let query = ListQuery {
        origin,
        radius_km: p.radius_km.or(saved.radius_km),
        feed_only: p.feed.unwrap_or(saved.feed_only),
    };
    let view = s.list(&query);
    debug!(target: "api", count = view.len(), ?query, "GET /reports");
    Ok(Json(view))
}

async fn pinned(State(state): State<AppState>) -> Json<Option<Report>> {
    Json(state.session.state().pinned())
}

async fn summary(State(state): State<AppState>) -> Json<Option<Summary>> {
    Json(state.session.state().summary())
}

async fn get_filters(State(state): State<AppState>) -> Json<SavedFilters> {
    Json(state.session.state().saved_filters())
}

async fn put_filters(
    State(state): State<AppState>,
    Json(filters): Json<SavedFilters>,
) -> Result<Json<SavedFilters>, ApiError> {
    state
        .session
        .state()
        .save_filters(&filters)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(filters))
}

async fn list_collections(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.session.state().collection_names())
}

#[derive(Debug, Deserialize)]
struct ViewportParams {
    bbox: Option<String>,
    zoom: Option<i32>,
}

async fn clusters(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(p): Query<ViewportParams>,
) -> Result<Json<FeatureCollection>, ApiError> {
    let bounds = match p.bbox.as_deref() {
        Some(b) => Bounds::from_bbox_str(b).map_err(|e| bad_request(format!("{e:#}")))?,
        None => Bounds::WORLD,
    };
    let zoom = p.zoom.unwrap_or(0);
    state
        .session
        .state()
        .clusters(&collection, &bounds, zoom)
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown collection `{collection}`")))
}

#[derive(Debug, Deserialize)]
struct ExpandReq {
    cluster_id: u64,
    zoom: i32,
}

async fn expand(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(req): Json<ExpandReq>,
) -> Result<Json<ExpansionTarget>, ApiError> {
    state
        .session
        .state()
        .expand_cluster(&collection, req.cluster_id, req.zoom)
        .map(Json)
        .ok_or_else(|| not_found(format!("no cluster {} in `{collection}`", req.cluster_id)))
}

async fn leaves(
    State(state): State<AppState>,
    Path((collection, cluster_id)): Path<(String, u64)>,
) -> Result<Json<Vec<ClusterPoint>>, ApiError> {
    match state.session.state().cluster_leaves(&collection, cluster_id) {
        Some(points) if !points.is_empty() => Ok(Json(points)),
        Some(_) => Err(not_found(format!("no cluster {cluster_id} in `{collection}`"))),
        None => Err(not_found(format!("unknown collection `{collection}`"))),
    }
}
