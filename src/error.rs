//! Error types for ponche-gateway.
//!
//! Three layers, matching where a failure originates:
//!
//! - [`ChannelError`] - transport level, terminal for the channel instance.
//! - [`TableError`] - pending-table bookkeeping.
//! - [`QueryError`] - what a caller of the gateway sees.
//!
//! [`BootstrapError`] and [`CodecError`] cover transport setup and payload
//! serialization; [`HandlerError`] is the data-layer side's counterpart of
//! [`QueryError`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::CorrelationId;

/// Transport-level failure of a framed channel.
///
/// Every variant is terminal: once a channel reports one of these, all
/// later reads or writes on it report the same error.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Peer closed the stream (EOF), possibly in the middle of a frame.
    #[error("channel closed by peer")]
    Closed,

    /// Framing was violated, e.g. the declared length exceeds the bound.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Underlying transport fault.
    #[error("I/O failure: {0}")]
    IoFailure(Arc<io::Error>),
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset => ChannelError::Closed,
            _ => ChannelError::IoFailure(Arc::new(err)),
        }
    }
}

/// Pending-table bookkeeping errors.
#[derive(Debug, Clone, Error)]
pub enum TableError {
    /// A correlation key was registered twice. Programmer/protocol error.
    #[error("correlation id {0} is already pending")]
    DuplicateKey(CorrelationId),

    /// A response arrived for a key that is not pending (late or duplicate).
    #[error("no pending request for correlation id {0}")]
    UnknownKey(CorrelationId),

    /// The table was failed by a channel fault and accepts no new entries.
    #[error("pending table closed: {0}")]
    Closed(ChannelError),
}

/// Error returned to callers of the query gateway.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// No response arrived before the deadline.
    #[error("request {id} timed out after {elapsed:?}")]
    Timeout {
        /// Correlation id of the request.
        id: CorrelationId,
        /// Time between submission and expiry.
        elapsed: Duration,
    },

    /// The channel to the data layer failed.
    #[error("transport failure: {0}")]
    Transport(#[from] ChannelError),

    /// A frame or payload did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The data layer answered with an error payload.
    #[error("data layer reported an error for {id}: {message}")]
    Remote {
        /// Correlation id of the request.
        id: CorrelationId,
        /// Error text sent by the data layer.
        message: String,
    },

    /// The data layer did not announce this method in its ready signal.
    #[error("method not supported by data layer: {0}")]
    UnsupportedMethod(String),

    /// Correlation id collision at registration time.
    #[error("duplicate correlation id {0}")]
    DuplicateKey(CorrelationId),

    /// The waiter was deregistered before a result was delivered.
    #[error("request cancelled")]
    Cancelled,
}

impl QueryError {
    /// True when the data layer could not be reached or did not answer in
    /// time, as opposed to answering with an error.
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, QueryError::Timeout { .. } | QueryError::Transport(_))
    }

    /// HTTP status an API handler should surface for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            QueryError::Timeout { .. } => 504,
            QueryError::Transport(_) => 503,
            QueryError::Remote { .. } | QueryError::Protocol(_) => 502,
            QueryError::UnsupportedMethod(_) => 501,
            QueryError::DuplicateKey(_) | QueryError::Cancelled => 500,
        }
    }
}

impl From<TableError> for QueryError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::DuplicateKey(id) => QueryError::DuplicateKey(id),
            TableError::UnknownKey(id) => {
                QueryError::Protocol(format!("no pending request for {id}"))
            }
            TableError::Closed(channel) => QueryError::Transport(channel),
        }
    }
}

impl From<CodecError> for QueryError {
    fn from(err: CodecError) -> Self {
        QueryError::Protocol(err.to_string())
    }
}

/// Payload serialization errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while serving a request on the data-layer side.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request payload did not match the handler's input type.
    #[error("invalid payload: {0}")]
    BadPayload(String),

    /// No handler is registered for the method.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The handler tried to answer the same request twice.
    #[error("request {0} was already answered")]
    AlreadyResponded(CorrelationId),

    /// The response could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The response could not be written.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Application-level failure, reported to the caller as the error text.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Application-level failure with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Errors while establishing the transport to the data layer.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// I/O error while binding, spawning or accepting.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The data layer did not connect in time.
    #[error("data layer did not connect within {0:?}")]
    AcceptTimeout(Duration),

    /// The data layer did not send its ready signal in time.
    #[error("data layer did not signal readiness within {0:?}")]
    ReadyTimeout(Duration),

    /// A required environment variable was not set.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// The spawned data-layer process exited, or closed stdout, before
    /// connecting and signalling readiness.
    #[error("data layer exited before it was ready")]
    PeerExited,

    /// The ready line could not be parsed.
    #[error("invalid ready signal: {0}")]
    InvalidReady(String),

    /// The data layer speaks an incompatible protocol version.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this crate implements.
        expected: String,
        /// Version announced by the data layer.
        actual: String,
    },
}
