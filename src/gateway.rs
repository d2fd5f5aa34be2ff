//! Query gateway: the API-side entry point.
//!
//! The [`GatewayBuilder`] configures the channel; the resulting
//! [`QueryGateway`] owns the writer task, the dispatcher task and the
//! pending table. Every call to [`QueryGateway::submit`] gets its own
//! [`PendingQuery`] future, so any number of HTTP handlers can wait on the
//! data layer at once.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ponche_gateway::{QueryGateway, TransportBootstrap};
//! use serde_json::json;
//!
//! let established = TransportBootstrap::with_generated_path()
//!     .spawn_peer(tokio::process::Command::new("./data_layer"))
//!     .establish()
//!     .await?;
//! let gateway = QueryGateway::builder()
//!     .default_timeout(Duration::from_secs(2))
//!     .start(established.transport);
//!
//! let response = gateway
//!     .query_default("get_next_candidate", &json!({"user_id": "1"}))
//!     .await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

use crate::channel::{spawn_writer_task, FramedReader, FramedWriter};
use crate::codec::WireCodec;
use crate::config::GatewayConfig;
use crate::control::ReadySignal;
use crate::dispatcher::{Dispatcher, DispatcherState};
use crate::error::{ChannelError, QueryError};
use crate::pending::{PendingTable, Waiter};
use crate::protocol::{CorrelationId, WireRequest, WireResponse};
use crate::transport::Transport;

/// Fluent configuration for a [`QueryGateway`].
#[derive(Debug, Clone, Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    ready: Option<ReadySignal>,
}

impl GatewayBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every setting with `config`.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Timeout used by [`QueryGateway::query_default`].
    ///
    /// Default: 5 seconds
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Largest inbound frame body accepted.
    ///
    /// Default: 16 MB
    pub fn max_frame_size(mut self, bytes: u32) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Outbound frames that may queue before submitters wait.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Size of each read from the inbound stream.
    ///
    /// Default: 64 KB
    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.config.read_buffer_size = bytes;
        self
    }

    /// Frame body encoding.
    ///
    /// Default: MsgPack
    pub fn codec(mut self, codec: WireCodec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Restrict submissions to the methods in `ready`.
    pub fn ready_signal(mut self, ready: ReadySignal) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Start the gateway over an established transport.
    ///
    /// Uses the transport's ready signal unless one was set explicitly.
    /// Must be called within a Tokio runtime.
    pub fn start(mut self, transport: Transport) -> QueryGateway {
        if self.ready.is_none() {
            self.ready = transport.ready;
        }
        self.connect(transport.reader, transport.writer)
    }

    /// Start the gateway over a raw pair of streams.
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect<R, W>(self, reader: R, writer: W) -> QueryGateway
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let GatewayBuilder { config, ready } = self;

        let (writer, writer_task) = spawn_writer_task(writer, config.channel_capacity);

        let table = Arc::new(PendingTable::new());
        let reader =
            FramedReader::with_limits(reader, config.max_frame_size, config.read_buffer_size);
        let (dispatcher, state) = Dispatcher::new(reader, table.clone(), config.codec);
        let faults = dispatcher.fault_handle();
        let dispatcher_task = dispatcher.spawn();

        // An outbound failure is as terminal as an inbound one.
        let writer_task = tokio::spawn(async move {
            if let Ok(Err(err)) = writer_task.await {
                faults.fault(err);
            }
        });

        tracing::debug!(codec = ?config.codec, "gateway started");

        QueryGateway {
            shared: Arc::new(Shared {
                table,
                writer,
                state,
                config,
                ready,
                dispatcher_task,
                _writer_task: writer_task,
            }),
        }
    }
}

struct Shared {
    table: Arc<PendingTable>,
    writer: FramedWriter,
    state: watch::Receiver<DispatcherState>,
    config: GatewayConfig,
    ready: Option<ReadySignal>,
    dispatcher_task: JoinHandle<ChannelError>,
    /// Watches the writer task; exits on its own once `writer` is dropped.
    _writer_task: JoinHandle<()>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.dispatcher_task.abort();
    }
}

/// Handle for submitting requests to the data layer.
///
/// Cheaply cloneable; all clones share one channel and one pending table.
/// The background tasks stop when the last clone is dropped.
#[derive(Clone)]
pub struct QueryGateway {
    shared: Arc<Shared>,
}

impl QueryGateway {
    /// Create a new gateway builder.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Send `method` with `payload` and return a future for its response.
    ///
    /// Returns once the request has been written. The returned future
    /// resolves with the response, or with [`QueryError::Timeout`] once
    /// `timeout` (measured from this call) elapses.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Transport`] if the channel has failed, or this write fails
    /// - [`QueryError::UnsupportedMethod`] if the data layer did not announce `method`
    /// - [`QueryError::Protocol`] if `payload` cannot be encoded
    /// - [`QueryError::Timeout`] if the outbound queue stays full past the deadline
    pub async fn submit<P>(
        &self,
        method: &str,
        payload: &P,
        timeout: Duration,
    ) -> Result<PendingQuery, QueryError>
    where
        P: Serialize + ?Sized,
    {
        let deadline = deadline_after(timeout);

        if let Some(err) = self.fault() {
            return Err(QueryError::Transport(err));
        }
        if let Some(ready) = &self.shared.ready {
            if !ready.supports(method) {
                return Err(QueryError::UnsupportedMethod(method.to_string()));
            }
        }

        let payload = serde_json::to_value(payload).map_err(|e| {
            QueryError::Protocol(format!("cannot encode payload for {method}: {e}"))
        })?;
        let request = WireRequest {
            id: CorrelationId::new(),
            method: method.to_string(),
            payload,
        };
        let body = self.shared.config.codec.encode(&request)?;

        let id = request.id;
        let waiter = self.shared.table.register(id.clone(), method, deadline)?;
        let query = PendingQuery {
            id: id.clone(),
            waiter,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
            table: self.shared.table.clone(),
            done: false,
        };

        tracing::debug!(%id, method, ?timeout, "submitting request");

        // On any early return `query` is dropped, which removes the entry.
        let write = self.shared.writer.write_message(Bytes::from(body));
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => Ok(query),
            Ok(Err(err)) => {
                tracing::warn!(%id, method, error = %err, "request write failed");
                Err(QueryError::Transport(err))
            }
            Err(_) => {
                tracing::warn!(%id, method, "outbound queue full until deadline");
                Err(QueryError::Timeout {
                    id,
                    elapsed: timeout,
                })
            }
        }
    }

    /// Submit and wait for the response.
    pub async fn query<P>(
        &self,
        method: &str,
        payload: &P,
        timeout: Duration,
    ) -> Result<Response, QueryError>
    where
        P: Serialize + ?Sized,
    {
        self.submit(method, payload, timeout).await?.await
    }

    /// Submit and wait, decoding the response payload into `T`.
    pub async fn query_as<T, P>(
        &self,
        method: &str,
        payload: &P,
        timeout: Duration,
    ) -> Result<T, QueryError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.query(method, payload, timeout).await?.into_payload()
    }

    /// [`query`](Self::query) with the configured default timeout.
    pub async fn query_default<P>(&self, method: &str, payload: &P) -> Result<Response, QueryError>
    where
        P: Serialize + ?Sized,
    {
        self.query(method, payload, self.default_timeout()).await
    }

    /// Configured default timeout.
    pub fn default_timeout(&self) -> Duration {
        self.shared.config.default_timeout()
    }

    /// Requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.table.len()
    }

    /// Current dispatcher state.
    pub fn state(&self) -> DispatcherState {
        self.shared.state.borrow().clone()
    }

    /// Capabilities announced by the data layer, if known.
    pub fn ready_signal(&self) -> Option<&ReadySignal> {
        self.shared.ready.as_ref()
    }

    /// Wait until the channel fails and return the error.
    pub async fn closed(&self) -> ChannelError {
        let mut state = self.shared.state.clone();
        loop {
            if let DispatcherState::Faulted(err) = &*state.borrow_and_update() {
                return err.clone();
            }
            if state.changed().await.is_err() {
                return ChannelError::Closed;
            }
        }
    }

    fn fault(&self) -> Option<ChannelError> {
        match &*self.shared.state.borrow() {
            DispatcherState::Faulted(err) => Some(err.clone()),
            DispatcherState::Running => self.shared.writer.failure(),
        }
    }
}

/// Far enough ahead to mean "never" without overflowing `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// A successful response from the data layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation id of the request.
    pub id: CorrelationId,
    /// Result data.
    pub payload: Value,
}

impl Response {
    /// Decode the payload into `T`.
    pub fn into_payload<T: DeserializeOwned>(self) -> Result<T, QueryError> {
        serde_json::from_value(self.payload).map_err(|e| {
            QueryError::Protocol(format!("unexpected response shape for {}: {e}", self.id))
        })
    }
}

fn into_result(wire: WireResponse) -> Result<Response, QueryError> {
    match wire.error {
        Some(message) => Err(QueryError::Remote {
            id: wire.id,
            message,
        }),
        None => Ok(Response {
            id: wire.id,
            payload: wire.payload,
        }),
    }
}

/// Future for one submitted request.
///
/// Completes with the response, a timeout, or a transport error. Dropping
/// it before completion deregisters the request; a response arriving later
/// is discarded.
pub struct PendingQuery {
    id: CorrelationId,
    waiter: Waiter,
    sleep: Pin<Box<Sleep>>,
    table: Arc<PendingTable>,
    done: bool,
}

impl PendingQuery {
    /// Correlation id of this request.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Stop waiting. Equivalent to dropping the future.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Future for PendingQuery {
    type Output = Result<Response, QueryError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(outcome) = Pin::new(&mut this.waiter).poll(cx) {
            this.done = true;
            return Poll::Ready(outcome.and_then(into_result));
        }

        if this.sleep.as_mut().poll(cx).is_ready() {
            // Whoever removed the entry first has already sent the outcome.
            this.table.expire(&this.id);
            if let Poll::Ready(outcome) = Pin::new(&mut this.waiter).poll(cx) {
                this.done = true;
                return Poll::Ready(outcome.and_then(into_result));
            }
        }

        Poll::Pending
    }
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if !self.done {
            self.table.cancel(&self.id);
        }
    }
}

impl std::fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQuery")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_configuration() {
        let builder = QueryGateway::builder()
            .default_timeout(Duration::from_secs(2))
            .max_frame_size(1024)
            .channel_capacity(16)
            .read_buffer_size(4096)
            .codec(WireCodec::Json);

        assert_eq!(builder.config.default_timeout(), Duration::from_secs(2));
        assert_eq!(builder.config.max_frame_size, 1024);
        assert_eq!(builder.config.channel_capacity, 16);
        assert_eq!(builder.config.read_buffer_size, 4096);
        assert_eq!(builder.config.codec, WireCodec::Json);
    }

    #[test]
    fn test_wire_error_maps_to_remote() {
        let id = CorrelationId::from("r1");
        let result = into_result(WireResponse::err(id.clone(), "Invalid user id"));
        assert!(matches!(
            result,
            Err(QueryError::Remote { id: ref got, ref message })
                if *got == id && message == "Invalid user id"
        ));
    }

    #[test]
    fn test_into_payload_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        struct Candidate {
            #[allow(dead_code)]
            name: String,
        }

        let response = Response {
            id: CorrelationId::from("x"),
            payload: json!([1, 2, 3]),
        };
        assert!(matches!(
            response.into_payload::<Candidate>(),
            Err(QueryError::Protocol(_))
        ));
    }

    #[test]
    fn test_default_timeout_saturates() {
        let builder = QueryGateway::builder().default_timeout(Duration::MAX);
        assert_eq!(builder.config.default_timeout_ms, u64::MAX);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let (ours, _peer) = Transport::in_process(64 * 1024);
        let gateway = QueryGateway::builder().start(ours);

        let pending = gateway
            .submit("get_json", &json!({}), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(gateway.pending_count(), 1);
        drop(pending);
        assert_eq!(gateway.pending_count(), 0);

        assert!(deadline_after(Duration::MAX) > Instant::now() + Duration::from_secs(86400));
    }

    #[tokio::test]
    async fn test_unsupported_method_rejected_before_write() {
        let (ours, _peer) = Transport::in_process(1024);
        let gateway = QueryGateway::builder()
            .ready_signal(ReadySignal::new().with_method("get_json"))
            .start(ours);

        let err = gateway
            .submit("drop_everything", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedMethod(ref m) if m == "drop_everything"));
        assert_eq!(gateway.pending_count(), 0);
    }
}
