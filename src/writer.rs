//! Dedicated writer task per connection.
//!
//! Both ends of a connection queue outbound frames on a channel; one task
//! owns the socket write half and drains the queue, batching whatever is
//! ready into a single vectored write.
//!
//! ```text
//! Scheduler (sync) ──send_now──┐
//!                              ├─► queue ─► writer task ─► socket
//! Worker (async) ────send──────┘
//! ```
//!
//! The queue is unbounded so the synchronous scheduler core never blocks.
//! Async senders still get backpressure: [`WriterHandle::send`] waits while
//! more than `max_pending_frames` frames are queued.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{KioError, Result};
use crate::protocol::{Frame, Header, HEADER_SIZE};

/// Default maximum queued frames before async senders wait.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default time an async sender waits for the queue to drain.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    pub header: [u8; HEADER_SIZE],
    pub payload: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(command: i32, payload: Bytes) -> Self {
        Self {
            header: Header::new(command, payload.len() as u32).encode(),
            payload,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

impl From<Frame> for OutboundFrame {
    fn from(frame: Frame) -> Self {
        Self {
            header: frame.header.encode(),
            payload: frame.payload,
        }
    }
}

/// Configuration for the writer side of a connection.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_pending_frames: usize,
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Cheaply cloneable handle for queueing frames.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    max_pending: usize,
    timeout: Duration,
}

/// Receiving half of the queue, turned into the writer task once the socket exists.
pub struct WriterQueue {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

/// Create a queue without a socket yet.
///
/// Frames sent before [`WriterQueue::spawn`] are kept and written first.
pub fn writer_channel(config: &WriterConfig) -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(Notify::new());

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        drained: drained.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };
    let queue = WriterQueue {
        rx,
        pending,
        drained,
    };
    (handle, queue)
}

/// Spawn the writer task for `writer` and return a handle for sending frames.
pub fn spawn_writer_task<W>(writer: W, config: &WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (handle, queue) = writer_channel(config);
    (handle, queue.spawn(writer))
}

impl WriterHandle {
    /// Queue a frame, waiting while the queue is over its limit.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }
        self.send_now(frame)
    }

    /// Queue a frame immediately, ignoring the pending limit.
    pub fn send_now(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            KioError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if self.tx.is_closed() {
                return Err(KioError::ConnectionClosed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(KioError::BackpressureTimeout);
            }
        }
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl WriterQueue {
    /// Start writing queued frames to `writer`.
    pub fn spawn<W>(self, writer: W) -> JoinHandle<Result<()>>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(writer))
    }

    /// Drain the queue into `writer` until every handle is dropped.
    pub async fn run<W>(mut self, mut writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let result = self.drain(&mut writer).await;
        self.rx.close();
        self.drained.notify_waiters();
        if let Err(ref e) = result {
            tracing::debug!("writer task stopped: {}", e);
        }
        result
    }

    async fn drain<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        loop {
            let first = match self.rx.recv().await {
                Some(f) => f,
                None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            };
            batch.push(first);
            while batch.len() < MAX_BATCH_SIZE {
                match self.rx.try_recv() {
                    Ok(frame) => batch.push(frame),
                    Err(_) => break,
                }
            }

            write_batch(writer, &batch).await?;
            self.pending.fetch_sub(batch.len(), Ordering::Release);
            self.drained.notify_waiters();
            batch.clear();
        }
    }
}

/// Write a batch of frames with scatter/gather I/O, finishing partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total_size {
        let slices = build_remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(KioError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices for everything after the first `skip_bytes` bytes of `batch`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}
