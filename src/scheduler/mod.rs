//! Scheduler: matches jobs to slaves.
//!
//! ```text
//!  submit ──► new jobs ──(tick)──► ProtocolInfo.queue ──► held / idle / spawn
//!                                                             │
//!          finished / error ◄──── slave frames ◄── Active ◄───┘
//!                 │
//!                 └──► Idle pool (or CoIdle) ──(idle timeout)──► killed
//! ```
//!
//! [`Scheduler`] is the synchronous core and is only ever touched from one
//! task. [`SchedulerService`] runs it on a tokio task and hands out
//! cloneable [`SchedulerHandle`]s.

mod core;
mod dispatch;
mod protocol_info;
mod service;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::JobError;
use crate::slave::SlaveId;

pub use self::core::Scheduler;
pub use protocol_info::ProtocolInfo;
pub use service::{SchedulerHandle, SchedulerService};

/// Caller answers and requests for a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobControl {
    /// Next chunk of a put (an empty chunk ends the data).
    SendData(Bytes),
    /// `true` resumes at the offered offset, `false` starts over.
    AnswerResume(bool),
    AnswerMessageBox(i32),
    /// Let a worker parked after `MIME_TYPE` carry on.
    ContinueAfterMimeType,
    /// Data of the sub-URL the worker asked for.
    SendSubUrlData(Bytes),
    Suspend,
    Resume,
    FileRead(u64),
    FileWrite(Bytes),
    FileSeek(u64),
    FileClose,
}

/// Connection state changes of a co-slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Error(JobError),
    Died,
}

/// A dedicated slave opened with `open_connected`.
#[derive(Debug)]
pub struct CoSlaveHandle {
    slave: SlaveId,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl CoSlaveHandle {
    pub(crate) fn new(slave: SlaveId, events: mpsc::UnboundedReceiver<ConnectionEvent>) -> Self {
        Self { slave, events }
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }
}

/// Snapshot of the pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub co_idle: usize,
    pub co_busy: usize,
    pub on_hold: usize,
    /// Jobs not yet assigned to a slave.
    pub queued: usize,
    /// Jobs submitted and not yet finished.
    pub jobs: usize,
}
