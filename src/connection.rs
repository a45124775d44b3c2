//! Framed duplex channel between an application and one worker.
//!
//! [`Connection`] pairs a [`FrameReader`] (socket read half plus frame
//! buffer) with a [`WriterHandle`] (queue into the writer task). Frames have
//! no correlation id; both ends read them strictly in order.
//!
//! ```ignore
//! let mut conn = Connection::new(read_half, write_half, &WriterConfig::default());
//! conn.send(Command::Get, payload).await?;
//! while !conn.has_pending_frame() && !conn.wait_for_frame(Some(timeout)).await? {
//!     // keep-alive work
//! }
//! let frame = conn.read().await?;
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{KioError, Result};
use crate::protocol::{Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Read buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Boxed read half, so both socket and in-memory peers share one type.
pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Read side of a connection.
pub struct FrameReader {
    inner: BoxedReader,
    buffer: FrameBuffer,
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
    eof: bool,
}

impl FrameReader {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Self::with_max_payload(reader, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload<R>(reader: R, max_payload_size: u32) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Self {
            inner: Box::new(reader),
            buffer: FrameBuffer::with_max_payload(max_payload_size),
            pending: VecDeque::new(),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            eof: false,
        }
    }

    /// True when a complete frame is already buffered.
    #[inline]
    pub fn has_pending_frame(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Next frame. An error means the peer is gone.
    pub async fn read(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            self.fill().await?;
        }
    }

    /// Wait until a frame is available or `timeout` elapses.
    ///
    /// `None` waits forever. Returns `Ok(false)` on timeout; partially read
    /// bytes stay buffered.
    pub async fn wait_for_frame(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.has_pending_frame() {
            return Ok(true);
        }
        match timeout {
            Some(timeout) => {
                let deadline = tokio::time::Instant::now() + timeout;
                while !self.has_pending_frame() {
                    match tokio::time::timeout_at(deadline, self.fill()).await {
                        Ok(res) => res?,
                        Err(_) => return Ok(false),
                    }
                }
                Ok(true)
            }
            None => {
                while !self.has_pending_frame() {
                    self.fill().await?;
                }
                Ok(true)
            }
        }
    }

    /// One socket read. Cancel safe: bytes are only consumed once read.
    async fn fill(&mut self) -> Result<()> {
        if self.eof {
            return Err(KioError::ConnectionClosed);
        }
        let n = self.inner.read(&mut self.read_buf).await?;
        if n == 0 {
            self.eof = true;
            if !self.buffer.is_empty() {
                tracing::debug!("peer closed with {} unframed bytes", self.buffer.len());
            }
            return Err(KioError::ConnectionClosed);
        }
        let frames = self.buffer.push(&self.read_buf[..n])?;
        self.pending.extend(frames);
        Ok(())
    }
}

/// Both halves of a framed connection.
pub struct Connection {
    reader: FrameReader,
    writer: WriterHandle,
}

impl Connection {
    /// Wrap a read/write pair, spawning the writer task.
    pub fn new<R, W>(reader: R, writer: W, config: &WriterConfig) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        // The writer task ends by itself once every handle is dropped.
        let (writer, _task) = spawn_writer_task(writer, config);
        Self {
            reader: FrameReader::new(reader),
            writer,
        }
    }

    /// Assemble from parts created elsewhere.
    pub fn from_parts(reader: FrameReader, writer: WriterHandle) -> Self {
        Self { reader, writer }
    }

    /// Queue a frame, waiting for writer backpressure.
    pub async fn send(&self, id: impl Into<i32>, payload: Bytes) -> Result<()> {
        self.writer
            .send(OutboundFrame::new(id.into(), payload))
            .await
    }

    /// Queue a frame without waiting.
    pub fn send_now(&self, id: impl Into<i32>, payload: Bytes) -> Result<()> {
        self.writer.send_now(OutboundFrame::new(id.into(), payload))
    }

    pub async fn read(&mut self) -> Result<Frame> {
        self.reader.read().await
    }

    #[inline]
    pub fn has_pending_frame(&self) -> bool {
        self.reader.has_pending_frame()
    }

    pub async fn wait_for_frame(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.reader.wait_for_frame(timeout).await
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Split into read side and writer handle.
    pub fn into_split(self) -> (FrameReader, WriterHandle) {
        (self.reader, self.writer)
    }
}
