//! Pending-request table.
//!
//! Tracks every request that has been submitted but not yet answered and
//! correlates inbound responses to their waiters by id.
//!
//! ```text
//!            register            resolve / expire / fail / cancel / fail_all
//! Gateway ─────────────► entry ───────────────────────────────────────► removed
//!                          │                                       (exactly once)
//!                          └─ oneshot ─► Waiter (caller's future)
//! ```
//!
//! All removal paths take the entry out of the map under the same lock,
//! so whichever runs first wins and the others become no-ops.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ChannelError, QueryError, TableError};
use crate::protocol::{CorrelationId, WireResponse};

/// What a waiter eventually receives.
pub type Outcome = Result<WireResponse, QueryError>;

struct PendingEntry {
    resolver: oneshot::Sender<Outcome>,
    method: String,
    submitted_at: Instant,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CorrelationId, PendingEntry>,
    /// Set by `fail_all`; registration is refused afterwards.
    closed: Option<ChannelError>,
}

/// Map from correlation id to the waiter expecting that response.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry and return the handle its caller awaits.
    ///
    /// # Errors
    ///
    /// - [`TableError::DuplicateKey`] if `id` is already pending
    /// - [`TableError::Closed`] if the channel has already faulted
    pub fn register(
        &self,
        id: CorrelationId,
        method: &str,
        deadline: Instant,
    ) -> Result<Waiter, TableError> {
        let mut inner = self.inner.lock();

        if let Some(err) = &inner.closed {
            return Err(TableError::Closed(err.clone()));
        }
        if inner.entries.contains_key(&id) {
            return Err(TableError::DuplicateKey(id));
        }

        let (tx, rx) = oneshot::channel();
        inner.entries.insert(
            id,
            PendingEntry {
                resolver: tx,
                method: method.to_string(),
                submitted_at: Instant::now(),
                deadline,
            },
        );

        Ok(Waiter { rx })
    }

    /// Deliver a response to the waiter registered under `id`.
    ///
    /// # Errors
    ///
    /// [`TableError::UnknownKey`] if nothing is pending under `id` (the
    /// request already timed out, was cancelled, or this is a duplicate).
    pub fn resolve(&self, id: &CorrelationId, response: WireResponse) -> Result<(), TableError> {
        let entry = self.inner.lock().entries.remove(id);
        let Some(entry) = entry else {
            return Err(TableError::UnknownKey(id.clone()));
        };

        tracing::trace!(
            %id,
            method = %entry.method,
            elapsed = ?entry.submitted_at.elapsed(),
            "resolved pending request"
        );
        // Receiver gone means the caller dropped its future between our
        // removal and this send; nothing left to notify.
        let _ = entry.resolver.send(Ok(response));
        Ok(())
    }

    /// Remove `id` and signal a timeout to its waiter.
    ///
    /// Returns false if the entry was already gone.
    pub fn expire(&self, id: &CorrelationId) -> bool {
        let entry = self.inner.lock().entries.remove(id);
        let Some(entry) = entry else {
            return false;
        };

        let elapsed = entry.submitted_at.elapsed();
        tracing::debug!(%id, method = %entry.method, ?elapsed, "pending request expired");
        let _ = entry.resolver.send(Err(QueryError::Timeout {
            id: id.clone(),
            elapsed,
        }));
        true
    }

    /// Remove `id` and deliver `err` to its waiter.
    ///
    /// Returns false if the entry was already gone.
    pub fn fail(&self, id: &CorrelationId, err: QueryError) -> bool {
        let entry = self.inner.lock().entries.remove(id);
        let Some(entry) = entry else {
            return false;
        };

        tracing::debug!(%id, method = %entry.method, error = %err, "pending request failed");
        let _ = entry.resolver.send(Err(err));
        true
    }

    /// Remove `id` without signalling; the caller has stopped waiting.
    ///
    /// Returns false if the entry was already gone.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let removed = self.inner.lock().entries.remove(id).is_some();
        if removed {
            tracing::trace!(%id, "pending request cancelled");
        }
        removed
    }

    /// Fail every pending entry with a transport error and refuse new ones.
    ///
    /// Returns the number of entries failed.
    pub fn fail_all(&self, err: ChannelError) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = Some(err.clone());
            inner.entries.drain().collect()
        };

        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry
                .resolver
                .send(Err(QueryError::Transport(err.clone())));
        }
        count
    }

    /// Deadline recorded for `id`, if pending.
    pub fn deadline(&self, id: &CorrelationId) -> Option<Instant> {
        self.inner.lock().entries.get(id).map(|e| e.deadline)
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Error that closed the table, if any.
    pub fn closed_by(&self) -> Option<ChannelError> {
        self.inner.lock().closed.clone()
    }
}

/// Handle resolved when the table delivers an outcome for one entry.
///
/// Completes with [`QueryError::Cancelled`] if the entry was removed via
/// [`PendingTable::cancel`].
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for Waiter {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(QueryError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
