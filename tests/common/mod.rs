//! Shared helpers for the integration tests.
//!
//! [`ScriptedLauncher`] hands the worker end of every slave it launches to
//! the test, which then plays the worker by hand.

#![allow(dead_code)]

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use kio_dispatch::codec::MsgPackCodec;
use kio_dispatch::connection::{BoxedReader, Connection};
use kio_dispatch::protocol::Frame;
use kio_dispatch::slave::{
    slave_channel, BoxedWriter, LaunchRequest, LocalTask, SlaveEvents, SlaveId, SlaveLauncher, SlaveLink,
};
use kio_dispatch::writer::WriterConfig;
use kio_dispatch::{KioError, Result, Scheduler, SchedulerConfig};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// The worker end of a launched slave.
pub struct FakeWorker {
    pub slave: SlaveId,
    pub protocol: String,
    pub url: Url,
    pub conn: Connection,
}

impl FakeWorker {
    pub async fn read(&mut self) -> Frame {
        tokio::time::timeout(STEP_TIMEOUT, self.conn.read())
            .await
            .expect("worker read timed out")
            .expect("worker connection failed")
    }

    /// Skip frames until one with `id` arrives.
    pub async fn expect(&mut self, id: impl Into<i32>) -> Frame {
        let id = id.into();
        loop {
            let frame = self.read().await;
            if frame.id() == id {
                return frame;
            }
        }
    }

    /// Ids of the next `count` frames.
    pub async fn next_ids(&mut self, count: usize) -> Vec<i32> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.read().await.id());
        }
        ids
    }

    pub async fn send(&self, id: impl Into<i32>, payload: Bytes) {
        self.conn.send(id, payload).await.unwrap();
    }

    pub async fn send_encoded<T: serde::Serialize>(&self, id: impl Into<i32>, value: &T) {
        self.send(id, MsgPackCodec::encode_bytes(value).unwrap()).await;
    }

    /// Whether the application side went away.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(STEP_TIMEOUT, self.conn.read()).await {
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }
}

/// Launcher whose workers are driven by the test.
#[derive(Clone)]
pub struct ScriptedLauncher {
    workers: mpsc::UnboundedSender<FakeWorker>,
    failing: HashSet<String>,
}

impl ScriptedLauncher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeWorker>) {
        let (workers, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            workers,
            failing: HashSet::new(),
        };
        (launcher, rx)
    }

    /// Make launches of `protocol` fail.
    pub fn failing(mut self, protocol: &str) -> Self {
        self.failing.insert(protocol.to_string());
        self
    }
}

impl SlaveLauncher for ScriptedLauncher {
    fn launch(&self, req: LaunchRequest<'_>) -> Result<SlaveLink> {
        if self.failing.contains(req.protocol) {
            return Err(KioError::Launch {
                protocol: req.protocol.to_string(),
                reason: "no such worker".into(),
            });
        }
        let config = WriterConfig::default();
        let (app, worker) = tokio::io::duplex(256 * 1024);
        let (worker_read, worker_write) = tokio::io::split(worker);
        let conn = Connection::new(worker_read, worker_write, &config);

        let (app_read, app_write) = tokio::io::split(app);
        let connect = async move { Ok((Box::new(app_read) as BoxedReader, Box::new(app_write) as BoxedWriter)) };
        let process = tokio::spawn(std::future::pending::<()>());

        let (link, io) = slave_channel(req.slave, &config, req.max_payload_size);
        io.spawn(connect, Box::new(LocalTask(process.abort_handle())), req.events);
        let _ = self.workers.send(FakeWorker {
            slave: req.slave,
            protocol: req.protocol.to_string(),
            url: req.url.clone(),
            conn,
        });
        Ok(link)
    }
}

/// A bare [`Scheduler`] plus the plumbing to drive it step by step.
pub struct Harness {
    pub scheduler: Scheduler,
    pub events: SlaveEvents,
    pub workers: mpsc::UnboundedReceiver<FakeWorker>,
}

impl Harness {
    pub fn new(config: SchedulerConfig) -> Self {
        let (launcher, workers) = ScriptedLauncher::new();
        Self::with_launcher(config, launcher, workers)
    }

    pub fn with_launcher(
        config: SchedulerConfig,
        launcher: ScriptedLauncher,
        workers: mpsc::UnboundedReceiver<FakeWorker>,
    ) -> Self {
        let (scheduler, events) = Scheduler::new(config, Box::new(launcher));
        Self {
            scheduler,
            events,
            workers,
        }
    }

    /// The zero-delay tick.
    pub fn tick(&mut self) {
        self.scheduler.run_deferred();
    }

    /// Handle one slave event, then tick.
    pub async fn pump(&mut self) {
        let event = tokio::time::timeout(STEP_TIMEOUT, self.events.recv())
            .await
            .expect("no slave event")
            .expect("event channel closed");
        self.scheduler.handle_slave_event(event);
        self.tick();
    }

    pub async fn pump_until(&mut self, done: impl Fn(&Scheduler) -> bool) {
        while !done(&self.scheduler) {
            self.pump().await;
        }
    }

    /// The next launched worker, which must already exist.
    pub fn worker(&mut self) -> FakeWorker {
        self.workers.try_recv().expect("no worker launched")
    }

    pub fn no_more_workers(&mut self) -> bool {
        self.workers.try_recv().is_err()
    }
}

pub fn config_with_cap(protocol: &str, max_slaves: usize) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.protocols.entry(protocol.to_string()).or_default().max_slaves = Some(max_slaves);
    config
}
