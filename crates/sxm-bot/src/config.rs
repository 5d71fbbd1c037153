//! Application configuration.

use serde::{Deserialize, Serialize};
use sxm_feed::FeedConfig;
use sxm_gateway::PaperConfig;
use sxm_mm::MakerConfig;
use sxm_telemetry::AlertConfig;

use crate::error::{AppError, AppResult};

/// Environment variable overriding the config path.
pub const CONFIG_ENV: &str = "SXM_CONFIG";

/// Config path used when neither the CLI nor the environment sets one.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instrument to quote (e.g. "BTC-USD").
    pub symbol: String,

    #[serde(default)]
    pub maker: MakerConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub alert: AlertConfig,
}

/// Venue call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Place/cancel calls slower than this are treated as transient failures.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Paper venue used by the binary.
    #[serde(default)]
    pub paper: PaperConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: default_order_timeout_ms(),
            paper: PaperConfig::default(),
        }
    }
}

fn default_order_timeout_ms() -> u64 {
    2_000
}

/// Run loop and shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum time to wait for cancel confirmations on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Re-evaluate with the last sample after this long without a tick (0 = off).
    #[serde(default = "default_idle_eval_secs")]
    pub idle_eval_secs: u64,

    /// Query the venue position this often and overwrite the tracked one
    /// once two queries in a row agree (0 = off).
    #[serde(default = "default_position_resync_secs")]
    pub position_resync_secs: u64,

    /// Cancel quotes and close any venue position this often (0 = off).
    #[serde(default)]
    pub force_flat_check_secs: u64,

    /// Cancel whatever the venue still lists as open after the drain.
    #[serde(default = "default_true")]
    pub sweep_on_shutdown: bool,

    /// Cancel attempts per order once shutdown has started.
    #[serde(default = "default_shutdown_cancel_attempts")]
    pub shutdown_cancel_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            idle_eval_secs: default_idle_eval_secs(),
            position_resync_secs: default_position_resync_secs(),
            force_flat_check_secs: 0,
            sweep_on_shutdown: true,
            shutdown_cancel_attempts: default_shutdown_cancel_attempts(),
        }
    }
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
fn default_idle_eval_secs() -> u64 {
    5
}
fn default_position_resync_secs() -> u64 {
    30
}
fn default_shutdown_cancel_attempts() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// Metrics endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Port for `/metrics` (0 = disabled).
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

impl AppConfig {
    /// Minimal config for `symbol` with every section defaulted.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            maker: MakerConfig::default(),
            feed: FeedConfig::default(),
            gateway: GatewayConfig::default(),
            supervisor: SupervisorConfig::default(),
            telemetry: TelemetryConfig::default(),
            alert: AlertConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Check every startup precondition. Violations are fatal.
    pub fn validate(&self) -> AppResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(AppError::Config("symbol must not be empty".to_string()));
        }
        if self.gateway.order_timeout_ms == 0 {
            return Err(AppError::Config(
                "gateway.order_timeout_ms must be positive".to_string(),
            ));
        }
        self.maker.validate()?;
        Ok(())
    }
}

/// Resolve the config path: CLI arg > `SXM_CONFIG` > default.
pub fn resolve_config_path(cli: Option<String>) -> String {
    cli.or_else(|| std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
