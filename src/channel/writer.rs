//! Outbound half of the framed channel: a dedicated writer task.
//!
//! Frames are handed to one task over an mpsc queue; that task is the only
//! owner of the outbound stream, so concurrent submitters can never
//! interleave partial frames.
//!
//! # Architecture
//!
//! ```text
//! Submitter 1 ─┐
//! Submitter 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Submitter N ─┘
//! ```
//!
//! Frames that are ready together are written with one vectored write.
//! Each frame carries a completion sender so the submitter learns whether
//! its bytes were flushed.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::error::ChannelError;
use crate::protocol::{encode_length_prefix, LENGTH_PREFIX_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

type WriteAck = oneshot::Sender<Result<(), ChannelError>>;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix.
    prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Body bytes.
    body: Bytes,
    /// Completion notification.
    ack: Option<WriteAck>,
}

impl OutboundFrame {
    fn new(body: Bytes) -> Result<Self, ChannelError> {
        let len = u32::try_from(body.len()).map_err(|_| {
            ChannelError::Malformed(format!("outbound body of {} bytes", body.len()))
        })?;
        Ok(Self {
            prefix: encode_length_prefix(len),
            body,
            ack: None,
        })
    }

    /// Create a frame plus the receiver for its write result.
    #[allow(clippy::type_complexity)]
    fn with_ack(
        body: Bytes,
    ) -> Result<(Self, oneshot::Receiver<Result<(), ChannelError>>), ChannelError> {
        let (tx, rx) = oneshot::channel();
        let mut frame = Self::new(body)?;
        frame.ack = Some(tx);
        Ok((frame, rx))
    }

    /// Total size of this frame (prefix + body).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.body.len()
    }

    fn complete(&mut self, result: Result<(), ChannelError>) {
        if let Some(ack) = self.ack.take() {
            // Submitter may have given up already.
            let _ = ack.send(result);
        }
    }
}

/// Handle for writing messages to the outbound stream.
///
/// Cheaply cloneable; every clone feeds the same writer task.
#[derive(Clone)]
pub struct FramedWriter {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames queued or being written.
    pending: Arc<AtomicUsize>,
    /// First error seen by the writer task.
    failure: Arc<Mutex<Option<ChannelError>>>,
}

impl FramedWriter {
    /// Frame `body` and write it to the stream.
    ///
    /// Suspends while the queue is full, then until the frame has been
    /// flushed. Fails with the channel's terminal error once the writer task
    /// has stopped.
    pub async fn write_message(&self, body: Bytes) -> Result<(), ChannelError> {
        if let Some(err) = self.failure() {
            return Err(err);
        }

        let (frame, ack) = OutboundFrame::with_ack(body)?;

        // Counted only once the frame is in the queue, so a caller cancelled
        // while waiting for space leaves nothing behind.
        let Ok(slot) = self.tx.reserve().await else {
            return Err(self.failure().unwrap_or(ChannelError::Closed));
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        slot.send(frame);

        match ack.await {
            Ok(result) => result,
            Err(_) => Err(self.failure().unwrap_or(ChannelError::Closed)),
        }
    }

    /// Frames queued or in flight.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Terminal error of the writer task, if it has failed.
    pub fn failure(&self) -> Option<ChannelError> {
        self.failure.lock().clone()
    }
}

/// Spawn the writer task and return a handle for writing messages.
///
/// The task ends cleanly (shutting the stream down) when every
/// [`FramedWriter`] clone has been dropped, or with an error on the first
/// write failure.
pub fn spawn_writer_task<W>(
    writer: W,
    channel_capacity: usize,
) -> (FramedWriter, JoinHandle<Result<(), ChannelError>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));
    let failure = Arc::new(Mutex::new(None));

    let handle = FramedWriter {
        tx,
        pending: pending.clone(),
        failure: failure.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending, failure));

    (handle, task)
}

/// Spawn the writer task with the default queue capacity.
pub fn spawn_writer_task_default<W>(
    writer: W,
) -> (FramedWriter, JoinHandle<Result<(), ChannelError>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, DEFAULT_CHANNEL_CAPACITY)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<ChannelError>>>,
) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                tracing::debug!("all writer handles dropped, shutting down outbound stream");
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);

        match result {
            Ok(()) => {
                tracing::trace!(frames = batch_size, "wrote batch");
                for frame in &mut batch {
                    frame.complete(Ok(()));
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "outbound write failed, closing writer");
                *failure.lock() = Some(err.clone());
                for frame in &mut batch {
                    frame.complete(Err(err.clone()));
                }

                // Fail everything still queued; later sends see the stored error.
                rx.close();
                while let Some(mut frame) = rx.recv().await {
                    pending.fetch_sub(1, Ordering::Release);
                    frame.complete(Err(err.clone()));
                }
                return Err(err);
            }
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )
            .into());
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data remaining after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let prefix_end = offset + LENGTH_PREFIX_SIZE;
        if skip_bytes < prefix_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.prefix[start..]));
        }
        offset = prefix_end;

        if !frame.body.is_empty() {
            let body_end = offset + frame.body.len();
            if skip_bytes < body_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.body[start..]));
            }
            offset = body_end;
        }
    }

    slices
}
