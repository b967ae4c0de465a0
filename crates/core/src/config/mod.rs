use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub render: RenderConfig,
    pub reconnect: ReconnectPolicy,
}

impl AppConfig {
    /// Reads a JSON config file. Missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        let reconnect = &mut config.reconnect;
        reconnect.initial_delay_ms = reconnect.initial_delay_ms.max(MIN_INITIAL_DELAY_MS);
        Ok(config)
    }
}

/// Where the state server lives and how to authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` of the server publishing the lights state.
    pub host: String,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    /// Controller token passed to authenticated methods and publications.
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:3000".to_string(),
            secure: false,
            token: None,
        }
    }
}

impl ServerConfig {
    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}/websocket", self.host)
    }
}

/// Configuration specific to the render device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name to look for during discovery. `None` accepts the first
    /// device that answers.
    pub device_id: Option<String>,
    pub discovery_timeout_ms: u64,
    pub monitor_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub discovery_port: u16,
    pub frame_port: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            discovery_timeout_ms: 10_000,
            monitor_interval_ms: 5_000,
            request_timeout_ms: 10_000,
            discovery_port: 5555,
            frame_port: 7777,
        }
    }
}

impl DeviceConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Settings for the render loop and its outer restart loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub restart_cooldown_ms: u64,
    /// Light layout file consumed by the paint activity.
    pub layout_path: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            restart_cooldown_ms: 1_000,
            layout_path: PathBuf::from("layout.json"),
        }
    }
}

impl RenderConfig {
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }
}

const MIN_INITIAL_DELAY_MS: u64 = 1;

/// Reconnection policy for the subscription websocket.
///
/// A connection that closes before `short_failure_threshold` counts as an
/// immediate failure and doubles the delay (up to `max_delay`); one that
/// survives longer resets the delay to `initial_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub short_failure_threshold_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            short_failure_threshold_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Never zero, otherwise doubling would keep it at zero.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.max(MIN_INITIAL_DELAY_MS))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn short_failure_threshold(&self) -> Duration {
        Duration::from_millis(self.short_failure_threshold_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
