//! Centralized error types for the Aircast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines the programmatic error taxonomy using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for the `{ok:false, error:{…}}` JSON envelope
//!
//! The taxonomy is orthogonal to [`Diagnosis`] categories: a diagnosis is
//! presentation material attached to an error, not the error itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::diagnostics::Diagnosis;

/// Application-wide error type for the Aircast orchestrator.
#[derive(Debug, Error)]
pub enum AircastError {
    /// Bad input. Never retried.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Duplicate display name. Rendered without a solutions list so the UI
    /// shows a plain modal instead of a troubleshooting overlay.
    #[error("Duplicate name: {0}")]
    Duplicate(String),

    /// State-dependent refusal (broker not running, device in use).
    #[error("{message}")]
    Precondition {
        /// Human-readable refusal.
        message: String,
        /// Structured diagnosis when one applies.
        diagnosis: Option<Box<Diagnosis>>,
    },

    /// Unknown stream or device.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Broker, encoder or OS-level failure.
    #[error("{message}")]
    External {
        /// Human-readable failure summary.
        message: String,
        /// Structured diagnosis of the failure.
        diagnosis: Option<Box<Diagnosis>>,
    },

    /// The broker admin endpoint could not be reached.
    #[error("Broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// Temporary failure; the caller may retry. The core never auto-retries
    /// user-initiated operations.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Initialization failure that prevents the orchestrator from serving.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl AircastError {
    /// Builds a precondition error from a diagnosis.
    #[must_use]
    pub fn precondition(diagnosis: Diagnosis) -> Self {
        Self::Precondition {
            message: diagnosis.description.clone(),
            diagnosis: Some(Box::new(diagnosis)),
        }
    }

    /// Builds an external error from a diagnosis.
    #[must_use]
    pub fn external(diagnosis: Diagnosis) -> Self {
        Self::External {
            message: diagnosis.description.clone(),
            diagnosis: Some(Box::new(diagnosis)),
        }
    }

    /// Returns the wire category for the envelope.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Duplicate(_) => "duplicate",
            Self::Precondition { diagnosis, .. } => diagnosis
                .as_ref()
                .map_or("precondition", |d| d.category.as_str()),
            Self::NotFound(_) => "not-found",
            Self::External { diagnosis, .. } => diagnosis
                .as_ref()
                .map_or("external", |d| d.category.as_str()),
            Self::BrokerUnreachable(_) => "broker-unreachable",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Duplicate(_) | Self::Precondition { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BrokerUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::External { .. } | Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the attached diagnosis, if any.
    #[must_use]
    pub fn diagnosis(&self) -> Option<&Diagnosis> {
        match self {
            Self::Precondition { diagnosis, .. } | Self::External { diagnosis, .. } => {
                diagnosis.as_deref()
            }
            _ => None,
        }
    }

    /// Short glyph-prefixed title for the envelope.
    fn title(&self) -> String {
        if let Some(d) = self.diagnosis() {
            return d.title.clone();
        }
        match self {
            Self::Validation(_) => "⚠ Invalid request".to_string(),
            Self::Duplicate(_) => "⚠ Name already in use".to_string(),
            Self::Precondition { .. } => "⚠ Operation not possible right now".to_string(),
            Self::NotFound(_) => "⚠ Not found".to_string(),
            Self::BrokerUnreachable(_) => "✖ Broker unreachable".to_string(),
            Self::Transient(_) => "⚠ Temporary failure".to_string(),
            Self::External { .. } | Self::Fatal(_) => "✖ Internal error".to_string(),
        }
    }

    /// Solutions for the envelope, capped at five entries.
    ///
    /// Duplicate-name errors intentionally return `None`.
    fn solutions(&self) -> Option<Vec<String>> {
        if matches!(self, Self::Duplicate(_)) {
            return None;
        }
        self.diagnosis().map(|d| {
            d.solutions.iter().take(5).cloned().collect()
        })
    }
}

/// Convenient Result alias for application-wide operations.
pub type AircastResult<T> = Result<T, AircastError>;

/// Inner error object of the JSON envelope.
#[derive(Serialize)]
struct ErrorBody {
    category: &'static str,
    title: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    solutions: Option<Vec<String>>,
}

/// Top-level error envelope: `{ok:false, error:{…}}`.
#[derive(Serialize)]
struct ErrorEnvelope {
    ok: bool,
    error: ErrorBody,
}

impl IntoResponse for AircastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            ok: false,
            error: ErrorBody {
                category: self.category(),
                title: self.title(),
                message: self.to_string(),
                solutions: self.solutions(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AircastError {
    fn from(err: std::io::Error) -> Self {
        Self::External {
            message: err.to_string(),
            diagnosis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err = AircastError::Validation("bad id".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn duplicate_maps_to_409_without_solutions() {
        let err = AircastError::Duplicate("Main".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.category(), "duplicate");
        assert!(err.solutions().is_none());
    }

    #[test]
    fn precondition_category_comes_from_diagnosis() {
        let err = AircastError::precondition(Diagnosis::device_conflict("dev-1", "s1"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.category(), "device-conflict");
        assert!(err.title().contains("Device already in use"));
    }

    #[test]
    fn solutions_are_capped_at_five() {
        let err = AircastError::precondition(Diagnosis::device_conflict("dev-1", "s1"));
        let solutions = err.solutions().unwrap();
        assert!(solutions.len() <= 5);
        assert!(!solutions.is_empty());
    }

    #[test]
    fn broker_unreachable_maps_to_502() {
        let err = AircastError::BrokerUnreachable("connect error".into());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
