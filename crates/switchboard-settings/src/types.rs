//! Settings types with compiled defaults.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it overrides.

use serde::{Deserialize, Serialize};
use switchboard_core::RouteDefinition;
use switchboard_logging::LogFormat;

/// Root settings object (`~/.switchboard/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// Network listener and per-connection limits.
    pub server: ServerSettings,
    /// Route table source.
    pub routing: RoutingSettings,
    /// Dispatcher behavior.
    pub dispatch: DispatchSettings,
    /// Shared-token authentication for the chat demo.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks an ephemeral port).
    pub port: u16,
    /// Maximum simultaneous WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without any inbound frame before the connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity (frames).
    pub outbound_queue_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7654,
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024,
            outbound_queue_size: 256,
        }
    }
}

/// Where routes come from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingSettings {
    /// Path to a JSON array of route definitions. Takes precedence over `routes`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes_path: Option<String>,
    /// Inline route definitions.
    pub routes: Vec<RouteDefinition>,
}

/// Dispatcher behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Send `{"error":{...}}` frames for routing/decoding/wiring failures.
    pub report_errors_to_client: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            report_errors_to_client: true,
        }
    }
}

/// Shared-token authentication.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Expected token. Authentication is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Metadata key carrying the token (query parameter or packet key).
    pub key_name: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token: None,
            key_name: "access_token".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` wins when set).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
