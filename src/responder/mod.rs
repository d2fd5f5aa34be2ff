//! Data-layer side of the channel: answers requests from the gateway.
//!
//! Provides:
//! - [`Responder`] - registers handlers and runs the serve loop
//! - [`HandlerRegistry`] - maps method names to handlers
//! - [`RequestContext`] - lets a handler answer its request
//!
//! Every request runs on its own task, so a slow handler never delays
//! others and responses may leave in a different order than requests
//! arrived.
//!
//! # Example
//!
//! ```ignore
//! use ponche_gateway::responder::Responder;
//! use ponche_gateway::transport::connect_from_env;
//! use serde_json::{json, Value};
//!
//! let transport = connect_from_env().await?;
//! Responder::new()
//!     .handle("get_next_candidate", |_req: Value, ctx| async move {
//!         ctx.respond(&json!({"name": "Boethiah", "distance": "some distance"})).await
//!     })
//!     .serve_transport(transport)
//!     .await?;
//! ```

mod context;
mod registry;

pub use context::{HandlerResult, RequestContext};
pub use registry::{BoxFuture, Handler, HandlerRegistry, TypedHandler};

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;

use crate::channel::{spawn_writer_task, FramedReader, FramedWriter};
use crate::codec::WireCodec;
use crate::config::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_READ_BUFFER_SIZE};
use crate::control::ReadySignal;
use crate::error::{ChannelError, HandlerError};
use crate::protocol::{WireRequest, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::Transport;

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Serves requests arriving over a framed channel.
pub struct Responder {
    registry: HandlerRegistry,
    codec: WireCodec,
    max_concurrent_handlers: usize,
    channel_capacity: usize,
    max_frame_size: u32,
}

impl Responder {
    /// Create a responder with no handlers.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            codec: WireCodec::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Register a method handler.
    ///
    /// The handler receives the deserialized payload and a context for
    /// answering. Returning an error before answering sends that error to
    /// the caller.
    pub fn handle<F, T, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(method, handler);
        self
    }

    /// Frame body encoding. Must match the gateway's.
    ///
    /// Default: MsgPack
    pub fn codec(mut self, codec: WireCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the maximum number of requests handled at once.
    ///
    /// When reached, reading pauses until a handler finishes.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit.max(1);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Largest inbound request body accepted.
    ///
    /// Default: 16 MB
    pub fn max_frame_size(mut self, bytes: u32) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Ready signal announcing the registered methods.
    pub fn ready_signal(&self) -> ReadySignal {
        ReadySignal {
            methods: self.registry.method_names(),
            ..ReadySignal::new()
        }
    }

    /// Serve over an established transport.
    pub async fn serve_transport(self, transport: Transport) -> Result<(), ChannelError> {
        self.serve(transport.reader, transport.writer).await
    }

    /// Serve until the gateway closes the channel.
    ///
    /// Returns `Ok(())` on a clean close, or the channel error otherwise.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<(), ChannelError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Responder {
            registry,
            codec,
            max_concurrent_handlers,
            channel_capacity,
            max_frame_size,
        } = self;

        let (writer, _writer_task) = spawn_writer_task(writer, channel_capacity);
        let mut reader =
            FramedReader::with_limits(reader, max_frame_size, DEFAULT_READ_BUFFER_SIZE);
        let registry = Arc::new(registry);
        let semaphore = Arc::new(Semaphore::new(max_concurrent_handlers));

        tracing::info!(methods = registry.len(), "responder serving");

        loop {
            let body = match reader.read_message().await {
                Ok(body) => body,
                Err(ChannelError::Closed) => {
                    tracing::info!("gateway closed the channel");
                    return Ok(());
                }
                Err(err) => {
                    tracing::error!(error = %err, "read loop error");
                    return Err(err);
                }
            };

            let request: WireRequest = match codec.decode(&body) {
                Ok(r) => r,
                Err(e) => {
                    // Without an id there is nobody to answer.
                    tracing::warn!(len = body.len(), error = %e, "dropping undecodable request");
                    continue;
                }
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return Ok(());
            };

            tokio::spawn(handle_request(
                request,
                registry.clone(),
                writer.clone(),
                codec,
                permit,
            ));
        }
    }
}

impl Default for Responder {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_request(
    request: WireRequest,
    registry: Arc<HandlerRegistry>,
    writer: FramedWriter,
    codec: WireCodec,
    _permit: tokio::sync::OwnedSemaphorePermit,
) {
    let WireRequest {
        id,
        method,
        payload,
    } = request;
    tracing::debug!(%id, %method, "handling request");

    let ctx = RequestContext::new(id, &method, writer, codec);

    let failure = match registry.dispatch(&method, payload, ctx.clone()).await {
        Ok(()) if ctx.is_answered() => return,
        Ok(()) => {
            tracing::warn!(id = %ctx.id(), %method, "handler returned without answering");
            "handler produced no response".to_string()
        }
        Err(HandlerError::Channel(err)) => {
            tracing::error!(id = %ctx.id(), %method, error = %err, "failed to send response");
            return;
        }
        Err(err) => {
            tracing::warn!(id = %ctx.id(), %method, error = %err, "handler failed");
            err.to_string()
        }
    };

    if ctx.is_answered() {
        return;
    }
    if let Err(err) = ctx.error(&failure).await {
        tracing::error!(id = %ctx.id(), %method, error = %err, "failed to send error response");
    }
}
