//! Failure alerts posted to an HTTP webhook.
//!
//! Delivery is best effort: errors are logged and never propagate to the
//! caller, so a broken webhook cannot affect quoting.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TelemetryError, TelemetryResult};

/// Environment variable holding the webhook API key.
pub const ALERT_API_KEY_ENV: &str = "SXM_ALERT_API_KEY";

/// Alert webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Webhook URL. Unset disables alerts.
    #[serde(default)]
    pub url: Option<String>,

    /// Channel field of the payload.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            url: None,
            channel: default_channel(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_channel() -> String {
    "alert".to_string()
}
fn default_timeout_ms() -> u64 {
    5_000
}

/// Alert priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
    Critical,
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    title: &'a str,
    message: &'a str,
    channel: &'a str,
    priority: Priority,
}

/// Webhook alert sender. A disabled alerter accepts and drops every alert.
#[derive(Debug, Clone)]
pub struct Alerter {
    client: Option<Client>,
    url: Option<String>,
    api_key: Option<String>,
    channel: String,
}

impl Alerter {
    /// Build an alerter from config; the API key is read from `SXM_ALERT_API_KEY`.
    pub fn new(config: &AlertConfig) -> TelemetryResult<Self> {
        let api_key = std::env::var(ALERT_API_KEY_ENV).ok().filter(|k| !k.is_empty());
        let url = config.url.clone().filter(|u| !u.is_empty());

        let client = match url {
            Some(_) => Some(
                Client::builder()
                    .timeout(Duration::from_millis(config.timeout_ms))
                    .build()
                    .map_err(|e| TelemetryError::HttpClient(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            url,
            api_key,
            channel: config.channel.clone(),
        })
    }

    /// An alerter that never sends.
    pub fn disabled() -> Self {
        Self {
            client: None,
            url: None,
            api_key: None,
            channel: default_channel(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Post an alert. Returns `true` if the webhook accepted it.
    pub async fn send(&self, title: &str, message: &str, priority: Priority) -> bool {
        let (client, url) = match (&self.client, &self.url) {
            (Some(client), Some(url)) => (client, url),
            _ => {
                debug!(title, "Alert skipped (alerting disabled)");
                return false;
            }
        };

        let payload = AlertPayload {
            title,
            message,
            channel: &self.channel,
            priority,
        };
        let mut request = client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), title, "Alert webhook returned an error status");
                false
            }
            Err(e) => {
                warn!(error = %e, title, "Alert delivery failed");
                false
            }
        }
    }

    /// Fire-and-forget variant of `send`.
    pub fn spawn(&self, title: impl Into<String>, message: impl Into<String>, priority: Priority) {
        if !self.is_enabled() {
            return;
        }
        let alerter = self.clone();
        let title = title.into();
        let message = message.into();
        tokio::spawn(async move {
            alerter.send(&title, &message, priority).await;
        });
    }
}
