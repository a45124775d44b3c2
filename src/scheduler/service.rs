//! The scheduler running on its own task.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::config::SchedulerConfig;
use crate::error::{KioError, Result};
use crate::job::{Job, JobHandle, JobId};
use crate::protocol::MetaData;
use crate::slave::{SlaveEvents, SlaveId, SlaveLauncher};

use super::{CoSlaveHandle, JobControl, PoolStats, Scheduler};

enum Request {
    Submit {
        job: Job,
        reply: oneshot::Sender<JobHandle>,
    },
    Cancel {
        job: JobId,
        quiet: bool,
        reply: oneshot::Sender<bool>,
    },
    Control {
        job: JobId,
        control: JobControl,
        reply: oneshot::Sender<Result<()>>,
    },
    PutOnHold {
        job: JobId,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveOnHold,
    OpenConnected {
        url: Url,
        metadata: MetaData,
        reply: oneshot::Sender<Result<CoSlaveHandle>>,
    },
    EnqueueOnConnected {
        slave: SlaveId,
        job: Job,
        reply: oneshot::Sender<Result<JobHandle>>,
    },
    CloseConnected {
        slave: SlaveId,
        reply: oneshot::Sender<Result<()>>,
    },
    Reparse {
        protocol: Option<String>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Shutdown,
}

/// Owns a [`Scheduler`] and drives it from requests, slave events and the
/// idle cleanup timer.
pub struct SchedulerService {
    scheduler: Scheduler,
    events: SlaveEvents,
    requests: mpsc::UnboundedReceiver<Request>,
}

impl SchedulerService {
    pub fn new(config: SchedulerConfig, launcher: impl SlaveLauncher + 'static) -> (Self, SchedulerHandle) {
        let (scheduler, events) = Scheduler::new(config, Box::new(launcher));
        Self::with_scheduler(scheduler, events)
    }

    /// Wrap an already built scheduler (e.g. one with a custom key store).
    pub fn with_scheduler(scheduler: Scheduler, events: SlaveEvents) -> (Self, SchedulerHandle) {
        let (tx, requests) = mpsc::unbounded_channel();
        let service = Self {
            scheduler,
            events,
            requests,
        };
        (service, SchedulerHandle { tx })
    }

    /// Build and spawn on the current runtime.
    pub fn spawn(config: SchedulerConfig, launcher: impl SlaveLauncher + 'static) -> (SchedulerHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(config, launcher);
        (handle, tokio::spawn(service.run()))
    }

    /// Run until [`SchedulerHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        let mut cleanup = tokio::time::interval(self.scheduler.config().cleanup_interval());
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        cleanup.tick().await;

        tracing::debug!("scheduler running");
        loop {
            let deferred = self.scheduler.has_deferred_work();
            tokio::select! {
                _ = std::future::ready(()), if deferred => self.scheduler.run_deferred(),
                req = self.requests.recv() => match req {
                    Some(Request::Shutdown) | None => break,
                    Some(req) => self.handle(req),
                },
                Some(event) = self.events.recv() => self.scheduler.handle_slave_event(event),
                _ = cleanup.tick() => {
                    let evicted = self.scheduler.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, "idle slaves evicted");
                    }
                }
            }
        }
        self.scheduler.shutdown();
    }

    fn handle(&mut self, req: Request) {
        let scheduler = &mut self.scheduler;
        // A dropped reply receiver means the caller gave up waiting.
        match req {
            Request::Submit { job, reply } => {
                let _ = reply.send(scheduler.submit(job));
            }
            Request::Cancel { job, quiet, reply } => {
                let _ = reply.send(scheduler.cancel(job, quiet));
            }
            Request::Control { job, control, reply } => {
                let _ = reply.send(scheduler.control(job, control));
            }
            Request::PutOnHold { job, reply } => {
                let _ = reply.send(scheduler.put_on_hold(job));
            }
            Request::RemoveOnHold => scheduler.remove_on_hold(),
            Request::OpenConnected { url, metadata, reply } => {
                let _ = reply.send(scheduler.open_connected(&url, metadata));
            }
            Request::EnqueueOnConnected { slave, job, reply } => {
                let _ = reply.send(scheduler.enqueue_on_connected(slave, job));
            }
            Request::CloseConnected { slave, reply } => {
                let _ = reply.send(scheduler.close_connected(slave));
            }
            Request::Reparse { protocol } => scheduler.reparse_slave_configuration(protocol.as_deref()),
            Request::Stats { reply } => {
                let _ = reply.send(scheduler.pool_stats());
            }
            Request::Shutdown => {}
        }
    }
}

/// Cloneable client of a running [`SchedulerService`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Request::Submit { .. } => "Submit",
            Request::Cancel { .. } => "Cancel",
            Request::Control { .. } => "Control",
            Request::PutOnHold { .. } => "PutOnHold",
            Request::RemoveOnHold => "RemoveOnHold",
            Request::OpenConnected { .. } => "OpenConnected",
            Request::EnqueueOnConnected { .. } => "EnqueueOnConnected",
            Request::CloseConnected { .. } => "CloseConnected",
            Request::Reparse { .. } => "Reparse",
            Request::Stats { .. } => "Stats",
            Request::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SchedulerHandle {
    fn post(&self, req: Request) -> Result<()> {
        self.tx.send(req).map_err(|_| KioError::SchedulerStopped)
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(make(reply))?;
        rx.await.map_err(|_| KioError::SchedulerStopped)
    }

    pub async fn submit(&self, job: Job) -> Result<JobHandle> {
        self.call(|reply| Request::Submit { job, reply }).await
    }

    /// Cancel with a `USER_CANCELED` result. Returns `false` for unknown or
    /// already finished jobs.
    pub async fn cancel(&self, job: JobId) -> Result<bool> {
        self.kill(job, false).await
    }

    /// Cancel, optionally without delivering a result.
    pub async fn kill(&self, job: JobId, quiet: bool) -> Result<bool> {
        self.call(|reply| Request::Cancel { job, quiet, reply }).await
    }

    pub async fn control(&self, job: JobId, control: JobControl) -> Result<()> {
        self.call(|reply| Request::Control { job, control, reply }).await?
    }

    pub async fn send_data(&self, job: JobId, data: Bytes) -> Result<()> {
        self.control(job, JobControl::SendData(data)).await
    }

    pub async fn answer_resume(&self, job: JobId, resume: bool) -> Result<()> {
        self.control(job, JobControl::AnswerResume(resume)).await
    }

    pub async fn answer_message_box(&self, job: JobId, answer: i32) -> Result<()> {
        self.control(job, JobControl::AnswerMessageBox(answer)).await
    }

    pub async fn continue_after_mime_type(&self, job: JobId) -> Result<()> {
        self.control(job, JobControl::ContinueAfterMimeType).await
    }

    pub async fn send_sub_url_data(&self, job: JobId, data: Bytes) -> Result<()> {
        self.control(job, JobControl::SendSubUrlData(data)).await
    }

    pub async fn suspend_job(&self, job: JobId) -> Result<()> {
        self.control(job, JobControl::Suspend).await
    }

    pub async fn resume_job(&self, job: JobId) -> Result<()> {
        self.control(job, JobControl::Resume).await
    }

    pub async fn file_read(&self, job: JobId, size: u64) -> Result<()> {
        self.control(job, JobControl::FileRead(size)).await
    }

    pub async fn file_write(&self, job: JobId, data: Bytes) -> Result<()> {
        self.control(job, JobControl::FileWrite(data)).await
    }

    pub async fn file_seek(&self, job: JobId, offset: u64) -> Result<()> {
        self.control(job, JobControl::FileSeek(offset)).await
    }

    pub async fn file_close(&self, job: JobId) -> Result<()> {
        self.control(job, JobControl::FileClose).await
    }

    pub async fn put_on_hold(&self, job: JobId) -> Result<()> {
        self.call(|reply| Request::PutOnHold { job, reply }).await?
    }

    pub fn remove_on_hold(&self) -> Result<()> {
        self.post(Request::RemoveOnHold)
    }

    pub async fn open_connected(&self, url: Url, metadata: MetaData) -> Result<CoSlaveHandle> {
        self.call(|reply| Request::OpenConnected { url, metadata, reply }).await?
    }

    pub async fn enqueue_on_connected(&self, slave: SlaveId, job: Job) -> Result<JobHandle> {
        self.call(|reply| Request::EnqueueOnConnected { slave, job, reply }).await?
    }

    pub async fn close_connected(&self, slave: SlaveId) -> Result<()> {
        self.call(|reply| Request::CloseConnected { slave, reply }).await?
    }

    pub fn reparse_slave_configuration(&self, protocol: Option<&str>) -> Result<()> {
        self.post(Request::Reparse {
            protocol: protocol.map(str::to_string),
        })
    }

    pub async fn pool_stats(&self) -> Result<PoolStats> {
        self.call(|reply| Request::Stats { reply }).await
    }

    /// Stop the service. Running jobs end with `USER_CANCELED`.
    pub fn shutdown(&self) -> Result<()> {
        self.post(Request::Shutdown)
    }
}
