//! Routing of slave frames to jobs.

use bytes::Bytes;
use url::Url;

use crate::codec::MsgPackCodec;
use crate::error::{JobError, Result};
use crate::job::{JobEvent, JobId};
use crate::protocol::{
    AuthKeyPayload, Command, ErrorPayload, Frame, FrameKind, Info, Message, MessageBoxRequest, MetaData,
    SlaveStatus, UdsEntry,
};
use crate::slave::{SlaveEvent, SlaveId, SlaveState};

use super::{ConnectionEvent, Scheduler};

fn decode<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T> {
    MsgPackCodec::decode(frame.payload())
}

impl Scheduler {
    /// Feed one event from the receiver returned by [`Scheduler::new`].
    pub fn handle_slave_event(&mut self, event: SlaveEvent) {
        match event {
            SlaveEvent::Frame { slave, frame } => self.on_frame(slave, frame),
            SlaveEvent::Died { slave, reason } => self.slave_died(slave, &reason),
            SlaveEvent::ConsumerReady { job } => self.consumer_ready(job),
            SlaveEvent::HandleDropped { job } => {
                self.drop_if_abandoned(job);
            }
        }
    }

    fn on_frame(&mut self, slave: SlaveId, frame: Frame) {
        if !self.slaves.contains_key(&slave) {
            tracing::trace!(%slave, id = frame.id(), "frame from a removed slave");
            return;
        }
        let res = match FrameKind::from_id(frame.id()) {
            FrameKind::Message(msg) => self.on_message(slave, msg, frame),
            FrameKind::Info(info) => self.on_info(slave, info, frame),
            FrameKind::Command(cmd) => {
                tracing::warn!(%slave, ?cmd, "slave sent a command");
                Ok(())
            }
            FrameKind::Unknown(id) => {
                tracing::debug!(%slave, id, "unknown frame id");
                Ok(())
            }
        };
        if let Err(e) = res {
            tracing::warn!(%slave, "bad frame from slave: {}", e);
            self.kill_slave(slave, "protocol error");
        }
    }

    fn current_job(&self, slave: SlaveId) -> Option<JobId> {
        self.slaves.get(&slave).and_then(|s| s.state().job())
    }

    fn emit(&self, job: Option<JobId>, event: JobEvent) {
        match job.and_then(|id| self.jobs.get(&id)) {
            Some(record) => record.sink.emit(event),
            None => tracing::debug!(?event, "event without a job"),
        }
    }

    fn reply(&self, slave: SlaveId, id: impl Into<i32>, payload: Bytes) -> Result<()> {
        match self.slaves.get(&slave) {
            Some(s) => s.send(id, payload),
            None => Ok(()),
        }
    }

    fn on_message(&mut self, slave: SlaveId, msg: Message, frame: Frame) -> Result<()> {
        let job = self.current_job(slave);
        match msg {
            Message::Data => self.deliver_data(slave, job, frame.payload),
            Message::DataReq => self.emit(job, JobEvent::DataRequest),
            Message::Error => {
                let payload: ErrorPayload = decode(&frame)?;
                let err = JobError::new(payload.code, payload.text);
                if job.is_some() {
                    self.finish_job(slave, Err(err));
                } else {
                    self.connection_error(slave, err);
                }
            }
            Message::Finished => {
                if job.is_some() {
                    self.finish_job(slave, Ok(()));
                } else {
                    tracing::debug!(%slave, "finished without a job");
                }
            }
            Message::Connected => self.notify_co(slave, ConnectionEvent::Connected),
            Message::StatEntry => self.emit(job, JobEvent::StatEntry(decode::<UdsEntry>(&frame)?)),
            Message::ListEntries => self.emit(job, JobEvent::ListEntries(decode::<Vec<UdsEntry>>(&frame)?)),
            Message::Renamed => self.emit(job, JobEvent::Renamed(decode(&frame)?)),
            Message::Resume => {
                // Offset 0 is informational; the worker does not wait.
                let offset: u64 = decode(&frame)?;
                if offset > 0 {
                    self.emit(job, JobEvent::ResumeOffer(offset));
                }
            }
            Message::CanResume => self.emit(job, JobEvent::ResumeSupported),
            Message::SlaveStatus => {
                let status: SlaveStatus = decode(&frame)?;
                if let Some(s) = self.slaves.get_mut(&slave) {
                    s.set_status(status);
                }
            }
            Message::SlaveAck => tracing::trace!(%slave, "slave ack"),
            Message::NetRequest => {
                let host: String = decode(&frame)?;
                tracing::debug!(%slave, %host, "network requested");
                self.reply(slave, Info::NetworkStatus, MsgPackCodec::encode_bytes(&true)?)?;
            }
            Message::NetDrop => tracing::debug!(%slave, "network no longer needed"),
            Message::NeedSubUrlData => self.emit(job, JobEvent::NeedSubUrlData),
            Message::AuthKey => {
                let key: AuthKeyPayload = decode(&frame)?;
                self.auth_keys.register(&key);
            }
            Message::AuthKeyDel => {
                let key: String = decode(&frame)?;
                self.auth_keys.release(&key);
            }
            Message::Opened => self.emit(job, JobEvent::Opened),
            Message::Written => self.emit(job, JobEvent::Written(decode(&frame)?)),
        }
        Ok(())
    }

    fn on_info(&mut self, slave: SlaveId, info: Info, frame: Frame) -> Result<()> {
        let job = self.current_job(slave);
        match info {
            Info::TotalSize => self.emit(job, JobEvent::TotalSize(decode(&frame)?)),
            Info::ProcessedSize => self.emit(job, JobEvent::ProcessedSize(decode(&frame)?)),
            Info::Speed => self.emit(job, JobEvent::Speed(decode(&frame)?)),
            Info::Position => self.emit(job, JobEvent::Position(decode(&frame)?)),
            Info::Redirection => self.emit(job, JobEvent::Redirection(decode::<Url>(&frame)?)),
            Info::MimeType => {
                let mime: String = decode(&frame)?;
                return self.on_mime_type(slave, job, mime);
            }
            Info::ErrorPage => self.emit(job, JobEvent::ErrorPage),
            Info::Warning => self.emit(job, JobEvent::Warning(decode(&frame)?)),
            Info::InfoMessage => self.emit(job, JobEvent::InfoMessage(decode(&frame)?)),
            Info::GettingFile => self.emit(job, JobEvent::GettingFile(decode(&frame)?)),
            Info::MetaData => self.emit(job, JobEvent::MetaData(decode::<MetaData>(&frame)?)),
            Info::MessageBox => self.emit(job, JobEvent::MessageBox(decode::<MessageBoxRequest>(&frame)?)),
            Info::NeedPasswd => tracing::debug!(%slave, "ignoring legacy password request"),
            Info::NetworkStatus => tracing::warn!(%slave, "slave sent network status"),
        }
        Ok(())
    }

    fn deliver_data(&mut self, slave: SlaveId, job: Option<JobId>, data: Bytes) {
        let Some(id) = job.filter(|id| self.jobs.contains_key(id)) else {
            tracing::debug!(%slave, len = data.len(), "data without a job");
            return;
        };
        if self.drop_if_abandoned(id) {
            return;
        }
        let Some(record) = self.jobs.get_mut(&id) else { return };
        if record.sink.deliver(data) {
            record.flow_suspended = true;
            if let Some(s) = self.slaves.get(&slave) {
                tracing::trace!(%slave, "consumer behind, suspending slave");
                s.suspend();
            }
        }
    }

    /// Workers block after `MIME_TYPE` until told to go on. Jobs that asked
    /// to see the mime type first are parked until the caller decides.
    fn on_mime_type(&mut self, slave: SlaveId, job: Option<JobId>, mime: String) -> Result<()> {
        let Some(record) = job.and_then(|id| self.jobs.get_mut(&id)) else {
            tracing::debug!(%slave, %mime, "mime type without a job");
            return Ok(());
        };
        record.sink.emit(JobEvent::MimeType(mime));
        if record.job.options().wait_on_mime_type {
            record.mime_pending = true;
            return Ok(());
        }
        self.reply(slave, Command::None, Bytes::new())
    }

    fn notify_co(&self, slave: SlaveId, event: ConnectionEvent) {
        if let Some(co) = self.co_slaves.get(&slave) {
            let _ = co.notify.send(event);
        }
    }

    /// `ERROR` outside a job: a failed connect on a connected slave.
    fn connection_error(&mut self, slave: SlaveId, err: JobError) {
        let idle_co = self.slaves.get(&slave).is_some_and(|s| *s.state() == SlaveState::CoIdle);
        if !idle_co {
            tracing::warn!(%slave, "error without a job: {}", err);
            return;
        }
        tracing::debug!(%slave, "connection failed: {}", err);
        self.notify_co(slave, ConnectionEvent::Error(err));
        if let Err(e) = self.reply(slave, Command::Disconnect, Bytes::new()) {
            tracing::debug!(%slave, "disconnect failed: {}", e);
        }
    }

    /// A job whose handle is gone is cancelled quietly, freeing its slave.
    fn drop_if_abandoned(&mut self, job: JobId) -> bool {
        let abandoned = self.jobs.get(&job).is_some_and(|record| record.sink.is_abandoned());
        if abandoned {
            tracing::debug!(%job, "job handle dropped");
            self.cancel(job, true);
        }
        abandoned
    }

    fn consumer_ready(&mut self, job: JobId) {
        let Some(record) = self.jobs.get_mut(&job) else { return };
        record.flow_suspended = false;
        if record.caller_suspended {
            return;
        }
        if let Some(s) = record.slave.and_then(|id| self.slaves.get(&id)) {
            s.resume();
        }
    }

    fn slave_died(&mut self, slave: SlaveId, reason: &str) {
        if self.slaves.contains_key(&slave) {
            tracing::warn!(%slave, reason, "slave died");
            self.purge_slave(slave, reason);
        }
    }
}
