//! Transport: the pair of byte streams the channel runs over, and how the
//! gateway obtains them.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)
//! - In-process duplex streams (tests, embedding)

mod bootstrap;
mod pipe;

pub use bootstrap::{
    connect_from_env, Established, TransportBootstrap, DEFAULT_ACCEPT_TIMEOUT,
    DEFAULT_READY_TIMEOUT, PIPE_PATH_ENV,
};
pub use pipe::{connect_pipe, generate_pipe_path, PipeCleanup, PipeListener};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::control::ReadySignal;

/// Boxed inbound stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed outbound stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established connection to the other side.
pub struct Transport {
    /// Bytes from the peer.
    pub reader: BoxedReader,
    /// Bytes to the peer.
    pub writer: BoxedWriter,
    /// Capabilities the peer announced, if the handshake was observed.
    pub ready: Option<ReadySignal>,
}

impl Transport {
    /// Wrap two independent halves.
    pub fn from_halves<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            ready: None,
        }
    }

    /// Split a bidirectional stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(reader, writer)
    }

    /// Two transports connected to each other in memory.
    ///
    /// The first is conventionally the gateway side, the second the peer.
    pub fn in_process(buffer_size: usize) -> (Transport, Transport) {
        let (a, b) = tokio::io::duplex(buffer_size);
        (Self::from_stream(a), Self::from_stream(b))
    }

    /// Attach a ready signal.
    pub fn with_ready(mut self, ready: ReadySignal) -> Self {
        self.ready = Some(ready);
        self
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}
