//! Prometheus metrics, structured logging and alerting for the sxm maker bot.
//!
//! - Prometheus metrics for order latency, lifecycle transitions, venue errors
//! - Structured JSON logging with tracing
//! - Optional `/metrics` HTTP endpoint
//! - Failure alerts posted to a webhook

pub mod alert;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;

pub use alert::{AlertConfig, Alerter, Priority};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use server::run_metrics_server;
