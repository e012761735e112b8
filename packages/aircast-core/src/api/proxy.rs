//! Same-origin listener proxy: `/listen/{streamId}` → broker mount.
//!
//! Listeners never talk to the broker directly; the proxy keeps the audio
//! on the orchestrator's origin and turns every upstream problem into one
//! uniform 502 body so the listener UI can show "stream not running"
//! without seeing broker internals.
//!
//! Backpressure: the relay buffers at most [`RELAY_BUFFER_CHUNKS`] chunks.
//! When a slow client keeps the buffer full for [`SLOW_CLIENT_GRACE`], the
//! upstream read is closed and the stream ends rather than buffering the
//! broker's output without bound.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::AppState;

/// Bounded relay depth between upstream and the client socket.
pub const RELAY_BUFFER_CHUNKS: usize = 32;

/// How long a full relay buffer is tolerated before the upstream read is
/// abandoned.
pub const SLOW_CLIENT_GRACE: Duration = Duration::from_secs(10);

/// Decrements the per-stream listener counter when the relay ends.
struct ListenerGuard {
    counts: Arc<DashMap<String, usize>>,
    stream_id: String,
}

impl ListenerGuard {
    fn register(counts: Arc<DashMap<String, usize>>, stream_id: &str) -> Self {
        *counts.entry(stream_id.to_string()).or_insert(0) += 1;
        Self {
            counts,
            stream_id: stream_id.to_string(),
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.counts.get_mut(&self.stream_id) {
            *count = count.saturating_sub(1);
        }
    }
}

fn unavailable() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": "stream-unavailable" })),
    )
        .into_response()
}

/// GET /listen/{streamId}
///
/// Proxies the broker mount for a known stream. Unknown ids and non-200
/// upstream answers both collapse to the uniform 502 body.
pub async fn listen_stream(
    Path(stream_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    // Only known mounts are proxied; arbitrary ids must not become probes
    // into the broker's URL space.
    if !state.streams.stream_exists(&stream_id) {
        log::debug!("[Proxy] Unknown stream '{}'", stream_id);
        return unavailable();
    }

    let port = state.broker.config_snapshot().port;
    let upstream_url = format!("http://127.0.0.1:{port}/{stream_id}");

    let upstream = match state.http_client.get(&upstream_url).send().await {
        Ok(response) => response,
        Err(e) => {
            log::info!("[Proxy] Upstream connect failed for '{}': {}", stream_id, e);
            return unavailable();
        }
    };

    if upstream.status() != reqwest::StatusCode::OK {
        log::info!(
            "[Proxy] Upstream returned {} for '{}'",
            upstream.status(),
            stream_id
        );
        return unavailable();
    }

    // Forward the media headers listeners care about.
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/mpeg")
        .to_string();

    let guard = ListenerGuard::register(Arc::clone(&state.listener_counts), &stream_id);
    log::info!("[Proxy] Listener connected to '{}'", stream_id);

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(RELAY_BUFFER_CHUNKS);
    let relay_id = stream_id.clone();
    tokio::spawn(async move {
        // Guard lives in the relay task: when the task ends (upstream
        // closed, client gone, or slow-client abandon) the count drops.
        let _guard = guard;
        let mut upstream = upstream;
        loop {
            let chunk = match upstream.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    log::info!("[Proxy] Upstream ended for '{}'", relay_id);
                    break;
                }
                Err(e) => {
                    log::info!("[Proxy] Upstream read error for '{}': {}", relay_id, e);
                    break;
                }
            };
            match tokio::time::timeout(SLOW_CLIENT_GRACE, tx.send(Ok(chunk))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // Client disconnected.
                    log::info!("[Proxy] Listener left '{}'", relay_id);
                    break;
                }
                Err(_) => {
                    log::warn!(
                        "[Proxy] Slow listener on '{}'; closing upstream read",
                        relay_id
                    );
                    break;
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| unavailable())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_guard_counts_up_and_down() {
        let counts: Arc<DashMap<String, usize>> = Arc::new(DashMap::new());
        {
            let _a = ListenerGuard::register(Arc::clone(&counts), "english");
            let _b = ListenerGuard::register(Arc::clone(&counts), "english");
            assert_eq!(*counts.get("english").unwrap(), 2);
        }
        assert_eq!(*counts.get("english").unwrap(), 0);
    }

    #[test]
    fn unavailable_body_is_the_contract_shape() {
        let response = unavailable();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
