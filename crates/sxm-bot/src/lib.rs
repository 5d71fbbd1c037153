//! Two-sided maker quoting bot.
//!
//! Orchestrates the components:
//! - Mark price feed (WebSocket, transparent reconnect)
//! - Quote engine (volatility gate, position guard, per-side state machine)
//! - Execution gateway (paper venue or a real adapter)
//! - Metrics endpoint and failure alerts

pub mod config;
pub mod error;
pub mod supervisor;

pub use config::{resolve_config_path, AppConfig, GatewayConfig, SupervisorConfig, TelemetryConfig};
pub use error::{AppError, AppResult};
pub use supervisor::{execute_action, QuoteStatus, ShutdownReport, Supervisor};
