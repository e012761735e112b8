//! HTTP response helpers for the `{ok, data?, error?}` envelope.
//!
//! Success shapes are built here; error shapes come from
//! [`AircastError`](crate::error::AircastError)'s `IntoResponse`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// Success envelope with a data payload.
pub fn api_data<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ok": true, "data": data })))
}

/// Bare success envelope.
pub fn api_ok() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ok": true })))
}
