//! Per-slave I/O task.
//!
//! Owns the read half of one slave connection and the worker process (or
//! in-process task). Every decoded frame is forwarded to the scheduler as a
//! [`SlaveEvent::Frame`]; when the connection ends or the slave is killed a
//! single [`SlaveEvent::Died`] follows. While suspended the task stops
//! reading, which lets the socket fill up and stalls the worker.

use std::future::Future;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::connection::{BoxedReader, FrameReader};
use crate::error::{KioError, Result};
use crate::job::JobId;
use crate::protocol::Frame;
use crate::writer::{writer_channel, WriterConfig, WriterHandle, WriterQueue};

use super::SlaveId;

/// Boxed write half, the counterpart of [`BoxedReader`].
pub type BoxedWriter = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

/// Notifications delivered to the scheduler loop.
#[derive(Debug)]
pub enum SlaveEvent {
    Frame { slave: SlaveId, frame: Frame },
    Died { slave: SlaveId, reason: String },
    /// A job consumer drained its flow window.
    ConsumerReady { job: JobId },
    /// The caller let go of a job's handle.
    HandleDropped { job: JobId },
}

pub type SlaveEventSink = mpsc::UnboundedSender<SlaveEvent>;
pub type SlaveEvents = mpsc::UnboundedReceiver<SlaveEvent>;

/// Something that must be stopped when the slave dies.
pub trait SlaveProcess: Send {
    fn kill(&mut self);
}

impl SlaveProcess for tokio::process::Child {
    fn kill(&mut self) {
        if let Err(e) = self.start_kill() {
            tracing::debug!("kill failed: {}", e);
        }
    }
}

/// Worker running as a task in this process.
pub struct LocalTask(pub AbortHandle);

impl SlaveProcess for LocalTask {
    fn kill(&mut self) {
        self.0.abort();
    }
}

/// Scheduler-side controls of a launched slave.
pub struct SlaveLink {
    pub pid: Option<u32>,
    pub writer: WriterHandle,
    pub suspend: watch::Sender<bool>,
    pub kill: oneshot::Sender<()>,
}

impl std::fmt::Debug for SlaveLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveLink").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// The task half created together with a [`SlaveLink`].
pub struct SlaveIo {
    slave: SlaveId,
    queue: WriterQueue,
    suspend: watch::Receiver<bool>,
    kill: oneshot::Receiver<()>,
    max_payload_size: u32,
}

/// Create the link and task halves for one slave.
///
/// Frames sent on the link before the connection exists are buffered and
/// written as soon as it does.
pub fn slave_channel(slave: SlaveId, config: &WriterConfig, max_payload_size: u32) -> (SlaveLink, SlaveIo) {
    let (writer, queue) = writer_channel(config);
    let (suspend_tx, suspend_rx) = watch::channel(false);
    let (kill_tx, kill_rx) = oneshot::channel();
    let link = SlaveLink {
        pid: None,
        writer,
        suspend: suspend_tx,
        kill: kill_tx,
    };
    let io = SlaveIo {
        slave,
        queue,
        suspend: suspend_rx,
        kill: kill_rx,
        max_payload_size,
    };
    (link, io)
}

impl SlaveLink {
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }
}

#[cfg(test)]
impl SlaveIo {
    pub(crate) fn into_queue(self) -> WriterQueue {
        self.queue
    }
}

enum Exit {
    Killed,
    Lost(KioError),
}

impl SlaveIo {
    /// Spawn the I/O task. `connect` yields the socket halves once the
    /// worker is reachable.
    pub fn spawn<F>(self, connect: F, process: Box<dyn SlaveProcess>, events: SlaveEventSink) -> JoinHandle<()>
    where
        F: Future<Output = Result<(BoxedReader, BoxedWriter)>> + Send + 'static,
    {
        tokio::spawn(self.run(connect, process, events))
    }

    async fn run<F>(mut self, connect: F, mut process: Box<dyn SlaveProcess>, events: SlaveEventSink)
    where
        F: Future<Output = Result<(BoxedReader, BoxedWriter)>> + Send,
    {
        let slave = self.slave;
        let exit = tokio::select! {
            _ = &mut self.kill => Exit::Killed,
            res = connect => match res {
                Ok((reader, writer)) => {
                    let writer_task = self.queue.spawn(writer);
                    let reader = FrameReader::with_max_payload(reader, self.max_payload_size);
                    let exit = pump(slave, reader, &mut self.suspend, &mut self.kill, &events).await;
                    writer_task.abort();
                    exit
                }
                Err(e) => Exit::Lost(e),
            },
        };

        process.kill();
        let reason = match exit {
            Exit::Killed => "killed".to_string(),
            Exit::Lost(e) => e.to_string(),
        };
        tracing::debug!(slave = slave.0, "slave gone: {}", reason);
        let _ = events.send(SlaveEvent::Died { slave, reason });
    }
}

async fn pump(
    slave: SlaveId,
    mut reader: FrameReader,
    suspend: &mut watch::Receiver<bool>,
    kill: &mut oneshot::Receiver<()>,
    events: &SlaveEventSink,
) -> Exit {
    loop {
        if *suspend.borrow() {
            tokio::select! {
                _ = &mut *kill => return Exit::Killed,
                res = suspend.changed() => {
                    if res.is_err() {
                        return Exit::Killed;
                    }
                }
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = &mut *kill => return Exit::Killed,
            res = suspend.changed() => {
                if res.is_err() {
                    return Exit::Killed;
                }
            }
            res = reader.read() => match res {
                Ok(frame) => {
                    if events.send(SlaveEvent::Frame { slave, frame }).is_err() {
                        return Exit::Killed;
                    }
                }
                Err(e) => return Exit::Lost(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::protocol::{Command, Message, DEFAULT_MAX_PAYLOAD_SIZE};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::duplex;

    struct NoProcess;

    impl SlaveProcess for NoProcess {
        fn kill(&mut self) {}
    }

    fn start(slave: SlaveId) -> (SlaveLink, Connection, SlaveEvents) {
        let (app, worker) = duplex(64 * 1024);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link, io) = slave_channel(slave, &WriterConfig::default(), DEFAULT_MAX_PAYLOAD_SIZE);
        let (ar, aw) = tokio::io::split(app);
        let connect = async move {
            Ok::<_, KioError>((Box::new(ar) as BoxedReader, Box::new(aw) as BoxedWriter))
        };
        io.spawn(connect, Box::new(NoProcess), events_tx);
        let (wr, ww) = tokio::io::split(worker);
        (link, Connection::new(wr, ww, &WriterConfig::default()), events_rx)
    }

    #[tokio::test]
    async fn test_frames_forwarded_in_order() {
        let (link, mut worker, mut events) = start(SlaveId(1));
        link.writer
            .send_now(crate::writer::OutboundFrame::new(Command::Get as i32, Bytes::new()))
            .unwrap();
        assert!(worker.read().await.unwrap().is_command(Command::Get));

        worker.send(Message::Data, Bytes::from_static(b"a")).await.unwrap();
        worker.send(Message::Finished, Bytes::new()).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                SlaveEvent::Frame { slave, frame } => {
                    assert_eq!(slave, SlaveId(1));
                    ids.push(frame.id());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(ids, vec![100, 104]);
    }

    #[tokio::test]
    async fn test_peer_close_reports_death_once() {
        let (_link, worker, mut events) = start(SlaveId(2));
        drop(worker);

        match events.recv().await.unwrap() {
            SlaveEvent::Died { slave, .. } => assert_eq!(slave, SlaveId(2)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_kill_reports_death() {
        let (link, _worker, mut events) = start(SlaveId(3));
        let _ = link.kill.send(());

        match events.recv().await.unwrap() {
            SlaveEvent::Died { reason, .. } => assert_eq!(reason, "killed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_suspended_slave_is_not_read() {
        let (link, worker, mut events) = start(SlaveId(4));
        link.suspend.send_replace(true);
        tokio::task::yield_now().await;

        worker.send(Message::Data, Bytes::from_static(b"x")).await.unwrap();
        let early = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        assert!(early.is_err());

        link.suspend.send_replace(false);
        match events.recv().await.unwrap() {
            SlaveEvent::Frame { frame, .. } => assert_eq!(frame.payload(), b"x"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
