//! `$ready` handshake message.
//!
//! Once the data layer has connected to the gateway's socket it prints one
//! JSON-RPC line on stdout announcing its protocol version and the methods
//! it serves:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"$ready","params":{"version":"1.0.0","methods":["get_json", ...]}}
//! ```
//!
//! # Example
//!
//! ```
//! use ponche_gateway::control::{build_ready_message, parse_ready_line, ReadySignal};
//!
//! let signal = ReadySignal::new().with_method("get_next_candidate");
//! let line = build_ready_message(&signal).unwrap();
//! let parsed = parse_ready_line(&line).unwrap().unwrap();
//! assert!(parsed.supports("get_next_candidate"));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{BootstrapError, CodecError};

/// Protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// JSON-RPC method name of the handshake line.
pub const READY_METHOD: &str = "$ready";

/// Capabilities announced by the data layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySignal {
    /// Protocol version spoken by the peer.
    pub version: String,
    /// Methods the peer serves. Empty means "not announced".
    #[serde(default)]
    pub methods: Vec<String>,
}

impl ReadySignal {
    /// Signal for this crate's protocol version with no methods.
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            methods: Vec::new(),
        }
    }

    /// Add a served method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    /// Whether `method` may be sent to this peer.
    ///
    /// A peer that announced no methods accepts everything.
    pub fn supports(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }

    /// Reject peers with a different major version.
    pub fn check_version(&self) -> Result<(), BootstrapError> {
        if major(&self.version) == major(PROTOCOL_VERSION) {
            Ok(())
        } else {
            Err(BootstrapError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                actual: self.version.clone(),
            })
        }
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

#[derive(Serialize)]
struct ReadyEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: &'a ReadySignal,
}

/// Build the `$ready` JSON-RPC line (without the trailing newline).
pub fn build_ready_message(signal: &ReadySignal) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&ReadyEnvelope {
        jsonrpc: "2.0",
        method: READY_METHOD,
        params: signal,
    })?)
}

/// Parse one stdout line.
///
/// Returns `Ok(None)` for lines that are not a `$ready` message (plain log
/// output, other JSON).
///
/// # Errors
///
/// - [`BootstrapError::InvalidReady`] if the line is a `$ready` message with
///   unusable params
/// - [`BootstrapError::VersionMismatch`] if the major version differs
pub fn parse_ready_line(line: &str) -> Result<Option<ReadySignal>, BootstrapError> {
    let Ok(mut msg) = serde_json::from_str::<Value>(line.trim()) else {
        return Ok(None);
    };
    if msg.get("method").and_then(Value::as_str) != Some(READY_METHOD) {
        return Ok(None);
    }

    let params = msg
        .get_mut("params")
        .map(Value::take)
        .ok_or_else(|| BootstrapError::InvalidReady("missing params".into()))?;
    let signal: ReadySignal = serde_json::from_value(params)
        .map_err(|e| BootstrapError::InvalidReady(e.to_string()))?;

    signal.check_version()?;
    Ok(Some(signal))
}

/// Read lines until the `$ready` message arrives.
///
/// Lines that are not a `$ready` message are logged at debug level and
/// skipped.
///
/// # Errors
///
/// - [`BootstrapError::ReadyTimeout`] if nothing arrives within `timeout`
/// - [`BootstrapError::PeerExited`] if the stream ends first
pub async fn read_ready_signal<R>(
    reader: &mut R,
    timeout: Duration,
) -> Result<ReadySignal, BootstrapError>
where
    R: AsyncBufRead + Unpin,
{
    let read = async {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(BootstrapError::PeerExited);
            }
            match parse_ready_line(&line)? {
                Some(signal) => return Ok(signal),
                None => tracing::debug!(line = line.trim_end(), "data layer stdout"),
            }
        }
    };

    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| BootstrapError::ReadyTimeout(timeout))?
}
