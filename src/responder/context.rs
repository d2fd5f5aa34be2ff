//! Request context for handlers.
//!
//! Provides methods for answering one request:
//! - `respond` - send the result payload
//! - `error` - send an error response
//!
//! Each request is answered at most once; a second answer is rejected.
//!
//! # Example
//!
//! ```ignore
//! async fn next_candidate(req: UserRef, ctx: RequestContext) -> HandlerResult {
//!     ctx.respond(&json!({"name": "Boethiah", "distance": "some distance"})).await
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::channel::FramedWriter;
use crate::codec::WireCodec;
use crate::error::{CodecError, HandlerError};
use crate::protocol::{CorrelationId, WireResponse};

/// Result type for handler functions.
pub type HandlerResult = Result<(), HandlerError>;

/// Context passed to request handlers.
///
/// `Clone`, so a handler may move it into helper tasks; all clones share
/// the answered flag.
#[derive(Clone)]
pub struct RequestContext {
    id: CorrelationId,
    method: Arc<str>,
    writer: FramedWriter,
    codec: WireCodec,
    answered: Arc<AtomicBool>,
}

impl RequestContext {
    pub(crate) fn new(
        id: CorrelationId,
        method: &str,
        writer: FramedWriter,
        codec: WireCodec,
    ) -> Self {
        Self {
            id,
            method: Arc::from(method),
            writer,
            codec,
            answered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Correlation id of the request being served.
    #[inline]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Method name of the request being served.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether a response has been sent.
    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }

    /// Send `payload` as the result.
    pub async fn respond<T: serde::Serialize + ?Sized>(&self, payload: &T) -> HandlerResult {
        let payload = serde_json::to_value(payload).map_err(CodecError::from)?;
        self.send(WireResponse::ok(self.id.clone(), payload)).await
    }

    /// Send an error response carrying `message`.
    pub async fn error(&self, message: &str) -> HandlerResult {
        self.send(WireResponse::err(self.id.clone(), message)).await
    }

    async fn send(&self, response: WireResponse) -> HandlerResult {
        if self.answered.swap(true, Ordering::AcqRel) {
            return Err(HandlerError::AlreadyResponded(self.id.clone()));
        }
        let body = self.codec.encode(&response)?;
        self.writer.write_message(Bytes::from(body)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("answered", &self.is_answered())
            .finish()
    }
}
