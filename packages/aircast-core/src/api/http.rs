//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::guard::admin_guard;
use crate::api::proxy::listen_stream;
use crate::api::response::{api_data, api_ok};
use crate::api::AppState;
use crate::broker::BrokerConfigEdits;
use crate::error::AircastResult;
use crate::streams::{CreateStreamSpec, UpdateStreamPatch};
use crate::LISTENER_PAGE;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReorderRequest {
    order: Vec<String>,
}

#[derive(Deserialize)]
struct DeviceQuery {
    #[serde(default)]
    refresh: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Public listener surface
        .route("/", get(|| async { Redirect::temporary("/streams") }))
        .route("/streams", get(listener_page))
        .route("/listen/{id}", get(listen_stream))
        .route("/api/streams/status", get(public_stream_status))
        .route("/api/system/config", get(system_config))
        .route("/api/health", get(health))
        // Admin: streams
        .route("/api/streams", get(list_streams).post(create_stream))
        .route(
            "/api/streams/{id}",
            axum::routing::patch(update_stream).delete(delete_stream),
        )
        .route("/api/streams/{id}/start", post(start_stream))
        .route("/api/streams/{id}/stop", post(stop_stream))
        .route("/api/streams/{id}/restart", post(restart_stream))
        .route("/api/streams/start-all", post(start_all))
        .route("/api/streams/stop-all", post(stop_all))
        .route("/api/streams/reorder", post(reorder))
        // Admin: broker
        .route("/api/broker/start", post(broker_start))
        .route("/api/broker/stop", post(broker_stop))
        .route("/api/broker/restart", post(broker_restart))
        .route("/api/broker/configure", post(broker_configure))
        .route("/api/broker/status", get(broker_status))
        .route("/api/broker/health", get(broker_health))
        // Admin: devices, events, readiness
        .route("/api/devices", get(list_devices))
        .route("/api/events", get(events))
        .route("/api/ready", get(readiness))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            admin_guard,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Serves the embedded static listener page.
async fn listener_page() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        LISTENER_PAGE,
    )
}

/// Public subset of stream state for the listener page.
async fn public_stream_status(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({ "streams": state.streams.public_status() }))
}

/// Host/port listeners should use for building URLs.
async fn system_config(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({
        "host": state.network.get_lan_ip(),
        "port": state.network.get_port(),
        "baseUrl": state.network.base_url(),
    }))
}

/// Liveness plus the last background health verdict.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let overall = state
        .health
        .latest()
        .map(|report| format!("{:?}", report.overall).to_lowercase());
    api_data(json!({ "status": "ok", "broker": overall }))
}

/// Readiness: port bound, LAN IP known, broker initialized.
async fn readiness(State(state): State<AppState>) -> Response {
    let port = state.network.get_port();
    let lan_ip = state.network.get_lan_ip();
    let broker_ready = state.broker.is_initialized();

    let ready = port > 0 && !lan_ip.is_empty();
    let body = json!({
        "ready": ready,
        "checks": {
            "port": { "ready": port > 0, "value": port },
            "lanIp": { "ready": !lan_ip.is_empty(), "value": lan_ip },
            "broker": { "ready": broker_ready, "info": "optional - admin ops fail until initialized" },
        }
    });

    if ready {
        api_data(body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({ "streams": state.streams.get_stats() }))
}

async fn create_stream(
    State(state): State<AppState>,
    Json(spec): Json<CreateStreamSpec>,
) -> AircastResult<impl IntoResponse> {
    let created = state.streams.create_stream(spec)?;
    Ok(api_data(created))
}

async fn update_stream(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<UpdateStreamPatch>,
) -> AircastResult<impl IntoResponse> {
    let updated = state.streams.update_stream(&id, patch).await?;
    Ok(api_data(updated))
}

async fn delete_stream(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> AircastResult<impl IntoResponse> {
    state.streams.delete_stream(&id).await?;
    Ok(api_ok())
}

async fn start_stream(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> AircastResult<impl IntoResponse> {
    let stats = state.streams.start_stream(&id).await?;
    Ok(api_data(stats))
}

async fn stop_stream(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> AircastResult<impl IntoResponse> {
    let stats = state.streams.stop_stream(&id).await?;
    Ok(api_data(stats))
}

async fn restart_stream(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> AircastResult<impl IntoResponse> {
    let stats = state.streams.restart_stream(&id).await?;
    Ok(api_data(stats))
}

async fn start_all(State(state): State<AppState>) -> impl IntoResponse {
    let results = state.streams.start_all_stopped().await;
    api_data(json!({ "results": results }))
}

async fn stop_all(State(state): State<AppState>) -> impl IntoResponse {
    let results = state.streams.stop_all().await;
    api_data(json!({ "results": results }))
}

async fn reorder(
    State(state): State<AppState>,
    Json(request): Json<ReorderRequest>,
) -> AircastResult<impl IntoResponse> {
    state.streams.reorder(&request.order)?;
    Ok(api_data(json!({ "order": request.order })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Broker Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn broker_start(State(state): State<AppState>) -> AircastResult<impl IntoResponse> {
    state.broker.initialize().await?;
    state.broker.start(true).await?;
    Ok(api_data(state.broker.get_status().await))
}

async fn broker_stop(State(state): State<AppState>) -> AircastResult<impl IntoResponse> {
    state.broker.stop(true).await?;
    Ok(api_data(state.broker.get_status().await))
}

async fn broker_restart(State(state): State<AppState>) -> AircastResult<impl IntoResponse> {
    state.broker.restart(true).await?;
    Ok(api_data(state.broker.get_status().await))
}

async fn broker_configure(
    State(state): State<AppState>,
    Json(edits): Json<BrokerConfigEdits>,
) -> AircastResult<impl IntoResponse> {
    state.broker.configure(&edits).await?;
    Ok(api_data(state.broker.get_status().await))
}

async fn broker_status(State(state): State<AppState>) -> impl IntoResponse {
    api_data(state.broker.get_status().await)
}

async fn broker_health(State(state): State<AppState>) -> impl IntoResponse {
    api_data(state.health.run_check().await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> AircastResult<impl IntoResponse> {
    let outcome = state.devices.enumerate(query.refresh).await?;
    Ok(api_data(json!({
        "devices": outcome.devices,
        "warning": outcome.diagnosis.map(|d| d.short_form()),
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Events (SSE)
// ─────────────────────────────────────────────────────────────────────────────

/// Server-sent events feed of domain events for the admin dashboard.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default().json_data(&event).ok().map(Ok),
            // A lagged receiver just skips ahead; the dashboard re-syncs
            // from the REST endpoints.
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
