//! Background services.

pub mod health;

pub use health::{CheckStatus, HealthLevel, HealthProbe, HealthReport, HEALTH_INTERVAL};
