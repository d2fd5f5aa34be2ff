//! Inbound dispatcher.
//!
//! The single owner of the inbound half of the channel. It reads frames,
//! decodes each body as a [`WireResponse`] and resolves the matching
//! pending entry.
//!
//! ```text
//!            frame ─► decode ─► resolve
//!   Running ◄─────────────────────────┘
//!      │
//!      └─ ChannelError ─► Faulted (terminal) ─► fail_all
//! ```
//!
//! A body that frames correctly but is not a response record fails only
//! the request whose id it carries. The outbound side reports its own
//! failures through a [`FaultHandle`], so a broken writer faults the
//! channel the same way a broken reader does.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::FramedReader;
use crate::codec::WireCodec;
use crate::error::{ChannelError, QueryError, TableError};
use crate::pending::PendingTable;
use crate::protocol::{CorrelationId, WireResponse};

/// Lifecycle of the dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherState {
    /// Reading and routing responses.
    Running,
    /// The channel failed; no further responses will be routed.
    Faulted(ChannelError),
}

impl DispatcherState {
    /// True once the channel has failed.
    pub fn is_faulted(&self) -> bool {
        matches!(self, DispatcherState::Faulted(_))
    }
}

/// Moves the channel to [`DispatcherState::Faulted`] and fails every
/// pending request. Shared by the dispatcher and the gateway's writer
/// monitor; only the first fault is recorded.
#[derive(Clone)]
pub struct FaultHandle {
    table: Arc<PendingTable>,
    state: Arc<watch::Sender<DispatcherState>>,
}

impl FaultHandle {
    /// Record `err` as the channel's terminal error.
    ///
    /// Returns false if the channel had already faulted.
    pub fn fault(&self, err: ChannelError) -> bool {
        let first = self.state.send_if_modified(|state| {
            if state.is_faulted() {
                return false;
            }
            *state = DispatcherState::Faulted(err.clone());
            true
        });
        if !first {
            return false;
        }

        let failed = self.table.fail_all(err.clone());
        match &err {
            ChannelError::Closed => tracing::info!(failed, "data layer closed the channel"),
            other => tracing::error!(failed, error = %other, "channel fault"),
        }
        true
    }
}

/// Routes inbound responses to pending waiters.
pub struct Dispatcher<R> {
    reader: FramedReader<R>,
    table: Arc<PendingTable>,
    codec: WireCodec,
    faults: FaultHandle,
}

impl<R> Dispatcher<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Create a dispatcher and a receiver observing its state.
    pub fn new(
        reader: FramedReader<R>,
        table: Arc<PendingTable>,
        codec: WireCodec,
    ) -> (Self, watch::Receiver<DispatcherState>) {
        let (state, state_rx) = watch::channel(DispatcherState::Running);
        let faults = FaultHandle {
            table: table.clone(),
            state: Arc::new(state),
        };
        let dispatcher = Self {
            reader,
            table,
            codec,
            faults,
        };
        (dispatcher, state_rx)
    }

    /// Handle for faulting the channel from outside the read loop.
    pub fn fault_handle(&self) -> FaultHandle {
        self.faults.clone()
    }

    /// Run until the channel fails. Returns the error that stopped it.
    pub async fn run(mut self) -> ChannelError {
        loop {
            match self.reader.read_message().await {
                Ok(body) => self.route(&body),
                Err(err) => {
                    self.faults.fault(err.clone());
                    return err;
                }
            }
        }
    }

    /// Run on a new task.
    pub fn spawn(self) -> JoinHandle<ChannelError> {
        tokio::spawn(self.run())
    }

    fn route(&self, body: &[u8]) {
        let response: WireResponse = match self.codec.decode(body) {
            Ok(r) => r,
            Err(e) => {
                self.reject(body, e.to_string());
                return;
            }
        };

        let id = response.id.clone();
        tracing::debug!(%id, error = response.is_error(), "response received");

        match self.table.resolve(&id, response) {
            Ok(()) => {}
            Err(TableError::UnknownKey(_)) => {
                tracing::warn!(%id, "dropping response with no pending request");
            }
            Err(other) => tracing::warn!(%id, error = %other, "failed to route response"),
        }
    }

    /// Fail the request a malformed response belongs to, if its id is readable.
    fn reject(&self, body: &[u8], reason: String) {
        let Some(id) = self.recover_id(body) else {
            tracing::warn!(len = body.len(), error = %reason, "dropping undecodable response");
            return;
        };

        let err = QueryError::Protocol(format!("malformed response for {id}: {reason}"));
        if !self.table.fail(&id, err) {
            tracing::warn!(%id, error = %reason, "dropping malformed response for unknown id");
        }
    }

    fn recover_id(&self, body: &[u8]) -> Option<CorrelationId> {
        let value: serde_json::Value = self.codec.decode(body).ok()?;
        value.get("id")?.as_str().map(CorrelationId::from)
    }
}
