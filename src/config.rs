//! Gateway configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Durations are written in milliseconds.
//!
//! ```
//! use ponche_gateway::GatewayConfig;
//!
//! let config = GatewayConfig::from_json_str(r#"{ "default_timeout_ms": 2000 }"#).unwrap();
//! assert_eq!(config.default_timeout().as_millis(), 2000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::WireCodec;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default writer queue capacity (frames).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default read buffer size for the inbound channel.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Runtime settings for a [`QueryGateway`](crate::QueryGateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Timeout applied by `query_default` and the typed client.
    pub default_timeout_ms: u64,
    /// Largest accepted inbound frame body, in bytes.
    pub max_frame_size: u32,
    /// Outbound frames that may queue before submitters wait.
    pub channel_capacity: usize,
    /// Size of each read from the inbound stream.
    pub read_buffer_size: usize,
    /// Body encoding.
    pub codec: WireCodec,
}

impl GatewayConfig {
    /// Parse a JSON config document.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Default timeout as a `Duration`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            codec: WireCodec::MsgPack,
        }
    }
}
