use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::auth::{AuthKeyRegistry, LegacyKeyStore};
use crate::config::SchedulerConfig;
use crate::error::{ErrorCode, JobError, KioError, Result};
use crate::flow::DataWindow;
use crate::job::{job_channel, Job, JobHandle, JobId, JobSink};
use crate::protocol::{Command, HostArgs, Message, MetaData};
use crate::slave::{
    host_args, LaunchRequest, Slave, SlaveEventSink, SlaveEvents, SlaveId, SlaveLauncher, SlaveState,
};

use super::{CoSlaveHandle, ConnectionEvent, JobControl, PoolStats, ProtocolInfo};

/// Book-keeping for a submitted job.
pub(crate) struct JobRecord {
    pub(crate) job: Job,
    pub(crate) slave_protocol: String,
    pub(crate) sink: JobSink,
    pub(crate) slave: Option<SlaveId>,
    pub(crate) co_slave: Option<SlaveId>,
    pub(crate) caller_suspended: bool,
    pub(crate) flow_suspended: bool,
    pub(crate) mime_pending: bool,
}

pub(crate) struct CoSlave {
    pub(crate) queue: VecDeque<JobId>,
    pub(crate) notify: mpsc::UnboundedSender<ConnectionEvent>,
}

/// The scheduling core.
///
/// Owns every slave and every unfinished job. All methods are synchronous
/// and must be called from one task; slave I/O comes back as
/// [`SlaveEvent`](crate::slave::SlaveEvent)s on the receiver returned by
/// [`Scheduler::new`], to be fed to [`Scheduler::handle_slave_event`].
///
/// Starting queued jobs is deferred: `submit` and releases only mark work
/// as pending, and [`Scheduler::run_deferred`] performs it. The service
/// calls it once the current message is handled.
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    launcher: Box<dyn SlaveLauncher>,
    pub(crate) events: SlaveEventSink,
    pub(crate) slaves: BTreeMap<SlaveId, Slave>,
    pub(crate) protocols: HashMap<String, ProtocolInfo>,
    pub(crate) jobs: HashMap<JobId, JobRecord>,
    new_jobs: VecDeque<JobId>,
    pub(crate) co_slaves: HashMap<SlaveId, CoSlave>,
    on_hold: Option<SlaveId>,
    pub(crate) auth_keys: AuthKeyRegistry,
    next_job: u64,
    next_slave: u64,
    pub(crate) start_pending: bool,
    pub(crate) co_pending: bool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, launcher: Box<dyn SlaveLauncher>) -> (Self, SlaveEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            config,
            launcher,
            events,
            slaves: BTreeMap::new(),
            protocols: HashMap::new(),
            jobs: HashMap::new(),
            new_jobs: VecDeque::new(),
            co_slaves: HashMap::new(),
            on_hold: None,
            auth_keys: AuthKeyRegistry::default(),
            next_job: 1,
            next_slave: 1,
            start_pending: false,
            co_pending: false,
        };
        (scheduler, rx)
    }

    /// Back the legacy `AUTH_KEY` bookkeeping with `store`.
    pub fn with_key_store(mut self, store: Box<dyn LegacyKeyStore>) -> Self {
        self.auth_keys = AuthKeyRegistry::new(store);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn slave(&self, id: SlaveId) -> Option<&Slave> {
        self.slaves.get(&id)
    }

    pub fn slaves(&self) -> impl Iterator<Item = &Slave> {
        self.slaves.values()
    }

    /// State of an actual slave protocol, once a job has used it.
    pub fn protocol_info(&self, slave_protocol: &str) -> Option<&ProtocolInfo> {
        self.protocols.get(slave_protocol)
    }

    /// Slave running `job`, if it has started.
    pub fn job_slave(&self, job: JobId) -> Option<SlaveId> {
        self.jobs.get(&job).and_then(|r| r.slave)
    }

    pub fn on_hold(&self) -> Option<SlaveId> {
        self.on_hold
    }

    pub fn auth_keys(&self) -> &AuthKeyRegistry {
        &self.auth_keys
    }

    pub fn pool_stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            queued: self.new_jobs.len()
                + self.protocols.values().map(ProtocolInfo::queued_count).sum::<usize>()
                + self.co_slaves.values().map(|c| c.queue.len()).sum::<usize>(),
            jobs: self.jobs.len(),
            ..PoolStats::default()
        };
        for slave in self.slaves.values() {
            match slave.state() {
                SlaveState::Idle => stats.idle += 1,
                SlaveState::Active(_) => stats.active += 1,
                SlaveState::CoIdle => stats.co_idle += 1,
                SlaveState::CoBusy(_) => stats.co_busy += 1,
                SlaveState::OnHold(_) => stats.on_hold += 1,
            }
        }
        stats
    }

    fn register_job(&mut self, job: Job, co_slave: Option<SlaveId>) -> (JobId, JobHandle) {
        let id = JobId(self.next_job);
        self.next_job += 1;
        let slave_protocol = self.config.slave_protocol_for(job.protocol()).to_string();
        let (sink, handle) = job_channel(id, DataWindow::default(), self.events.clone());
        tracing::debug!(job = %id, url = %job.url(), command = ?job.command(), "job submitted");
        self.jobs.insert(
            id,
            JobRecord {
                job,
                slave_protocol,
                sink,
                slave: None,
                co_slave,
                caller_suspended: false,
                flow_suspended: false,
                mime_pending: false,
            },
        );
        (id, handle)
    }

    /// Queue `job`. It is started on the next [`run_deferred`](Self::run_deferred).
    pub fn submit(&mut self, job: Job) -> JobHandle {
        let (id, handle) = self.register_job(job, None);
        self.new_jobs.push_back(id);
        self.start_pending = true;
        handle
    }

    pub fn has_deferred_work(&self) -> bool {
        self.start_pending || self.co_pending
    }

    /// Start whatever became startable since the last call.
    pub fn run_deferred(&mut self) {
        if std::mem::take(&mut self.start_pending) {
            self.start_step();
        }
        if std::mem::take(&mut self.co_pending) {
            self.schedule_co_slaves();
        }
    }

    fn start_step(&mut self) {
        while let Some(id) = self.new_jobs.pop_front() {
            let Some(record) = self.jobs.get(&id) else { continue };
            let slave_protocol = record.slave_protocol.clone();
            self.protocol_entry(&slave_protocol).queue.push_back(id);
        }

        let mut busy: Vec<String> = self
            .protocols
            .iter()
            .filter(|(_, info)| !info.queue.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        busy.sort();
        for slave_protocol in busy {
            self.start_queued(&slave_protocol);
        }
    }

    fn protocol_entry(&mut self, slave_protocol: &str) -> &mut ProtocolInfo {
        let max_slaves = self.config.max_slaves_for(slave_protocol);
        self.protocols
            .entry(slave_protocol.to_string())
            .or_insert_with(|| ProtocolInfo::new(max_slaves))
    }

    /// Start jobs of one protocol in FIFO order until the head has to wait.
    fn start_queued(&mut self, slave_protocol: &str) {
        loop {
            let Some(id) = self.protocols.get(slave_protocol).and_then(|p| p.queue.front().copied()) else {
                return;
            };
            if !self.jobs.contains_key(&id) {
                self.protocol_entry(slave_protocol).queue.pop_front();
                continue;
            }
            match self.find_slave(id, slave_protocol) {
                Ok(Some(slave)) => {
                    self.protocol_entry(slave_protocol).queue.pop_front();
                    self.start_job(id, slave);
                }
                Ok(None) => return,
                Err(err) => {
                    self.protocol_entry(slave_protocol).queue.pop_front();
                    if let Some(record) = self.jobs.remove(&id) {
                        record.sink.finish(Err(err));
                    }
                }
            }
        }
    }

    /// Held slave, then exact idle match, then any idle slave, then a new one.
    /// `Ok(None)` means the protocol is at its cap.
    fn find_slave(&mut self, id: JobId, slave_protocol: &str) -> std::result::Result<Option<SlaveId>, JobError> {
        let has_capacity = self.protocols.get(slave_protocol).map_or(true, ProtocolInfo::has_capacity);
        if !has_capacity {
            return Ok(None);
        }
        let Some(record) = self.jobs.get(&id) else {
            return Ok(None);
        };
        let url = record.job.url().clone();
        let protocol = record.job.protocol().to_string();
        let cacheable = record.job.is_cacheable_read();

        if cacheable {
            if let Some(held) = self.take_held_slave(&url, slave_protocol) {
                tracing::debug!(job = %id, slave = %held, "reusing slave on hold");
                return Ok(Some(held));
            }
        }

        let target = host_args(&url);
        if let Some(slave) = self
            .find_idle(slave_protocol, &target, true)
            .or_else(|| self.find_idle(slave_protocol, &target, false))
        {
            return Ok(Some(slave));
        }

        match self.spawn_slave(&protocol, slave_protocol, &url) {
            Ok(slave) => Ok(Some(slave)),
            Err(e) => {
                tracing::warn!(job = %id, protocol = %slave_protocol, "cannot launch slave: {}", e);
                Err(JobError::new(ErrorCode::CANNOT_LAUNCH_PROCESS, e.to_string()))
            }
        }
    }

    /// Claim the held slave if it holds `url`, otherwise drop it.
    fn take_held_slave(&mut self, url: &Url, slave_protocol: &str) -> Option<SlaveId> {
        let held = self.on_hold?;
        let reusable = self.slaves.get(&held).is_some_and(|s| {
            s.slave_protocol() == slave_protocol && matches!(s.state(), SlaveState::OnHold(u) if u == url)
        });
        if reusable {
            self.on_hold = None;
            return Some(held);
        }
        self.remove_on_hold();
        None
    }

    pub(crate) fn find_idle(&self, slave_protocol: &str, target: &HostArgs, exact: bool) -> Option<SlaveId> {
        self.slaves
            .values()
            .filter(|s| *s.state() == SlaveState::Idle && s.is_alive())
            .filter(|s| s.slave_protocol() == slave_protocol)
            .find(|s| !exact || s.matches(target))
            .map(Slave::id)
    }

    fn spawn_slave(&mut self, protocol: &str, slave_protocol: &str, url: &Url) -> Result<SlaveId> {
        let id = SlaveId(self.next_slave);
        self.next_slave += 1;
        let link = self.launcher.launch(LaunchRequest {
            slave: id,
            protocol: slave_protocol,
            url,
            events: self.events.clone(),
            max_payload_size: self.config.max_payload_size,
        })?;
        tracing::info!(slave = %id, protocol = %slave_protocol, pid = ?link.pid, "slave launched");
        self.slaves.insert(id, Slave::new(id, protocol, slave_protocol, link));
        Ok(id)
    }

    /// `CONFIG` payload for a slave serving `protocol`.
    fn protocol_metadata(&self, protocol: &str, slave_protocol: &str) -> MetaData {
        let mut config = self.config.metadata_for(slave_protocol);
        if protocol != slave_protocol {
            config.extend(self.config.metadata_for(protocol));
        }
        config
    }

    pub(crate) fn start_job(&mut self, id: JobId, slave_id: SlaveId) {
        if !self.slaves.contains_key(&slave_id) {
            if let Some(record) = self.jobs.remove(&id) {
                record.sink.finish(Err(JobError::slave_died(record.job.protocol())));
            }
            return;
        }
        let co = self.co_slaves.contains_key(&slave_id);
        let Some(record) = self.jobs.get(&id) else { return };
        let config = self.protocol_metadata(record.job.protocol(), &record.slave_protocol);
        let slave_protocol = record.slave_protocol.clone();
        if !co {
            self.protocol_entry(&slave_protocol).active.insert(slave_id);
        }

        let (Some(record), Some(slave)) = (self.jobs.get_mut(&id), self.slaves.get_mut(&slave_id)) else {
            return;
        };
        record.slave = Some(slave_id);
        let held = matches!(slave.state(), SlaveState::OnHold(_));
        slave.set_state(if co { SlaveState::CoBusy(id) } else { SlaveState::Active(id) });
        tracing::debug!(job = %id, slave = %slave_id, "job started");

        if let Err(e) = send_job(slave, &record.job, &config, held) {
            tracing::warn!(slave = %slave_id, "cannot send job: {}", e);
            self.kill_slave(slave_id, "write failed");
        }
    }

    /// The running job of `slave_id` ended; hand out the result and put the
    /// slave back into its pool.
    pub(crate) fn finish_job(&mut self, slave_id: SlaveId, result: std::result::Result<(), JobError>) {
        let Some(id) = self.slaves.get(&slave_id).and_then(|s| s.state().job()) else {
            tracing::debug!(slave = %slave_id, "job end without a job");
            return;
        };
        if let Some(record) = self.jobs.remove(&id) {
            tracing::debug!(job = %id, ok = result.is_ok(), "job finished");
            record.sink.finish(result);
        }
        self.release_slave(slave_id);
    }

    fn release_slave(&mut self, slave_id: SlaveId) {
        let co = self.co_slaves.get(&slave_id).map(|c| !c.queue.is_empty());
        let Some(slave) = self.slaves.get_mut(&slave_id) else { return };
        slave.resume();
        if let Some(has_queue) = co {
            slave.set_state(SlaveState::CoIdle);
            self.co_pending |= has_queue;
            return;
        }
        let disconnect = slave.disconnect_on_release();
        if let Some(info) = self.protocols.get_mut(slave.slave_protocol()) {
            info.active.remove(&slave_id);
        }
        self.make_idle(slave_id, disconnect);
        self.start_pending |= self.protocols.values().any(|p| !p.queue.is_empty());
    }

    /// Move a slave to the general idle pool.
    fn make_idle(&mut self, slave_id: SlaveId, disconnect: bool) {
        let Some(slave) = self.slaves.get_mut(&slave_id) else { return };
        slave.set_state(SlaveState::Idle);
        slave.set_idle();
        if disconnect {
            if let Err(e) = slave.send(Command::Disconnect, Bytes::new()) {
                tracing::debug!(slave = %slave_id, "disconnect failed: {}", e);
            }
        }
        if let Err(e) = slave.send(Command::SlaveStatus, Bytes::new()) {
            tracing::debug!(slave = %slave_id, "status request failed: {}", e);
        }
    }

    /// Cancel a job. A running job takes its slave down with it. Unless
    /// `quiet`, the caller receives `USER_CANCELED`.
    pub fn cancel(&mut self, id: JobId, quiet: bool) -> bool {
        let Some(record) = self.jobs.remove(&id) else {
            return false;
        };
        match record.slave {
            Some(slave) => self.kill_slave(slave, "job cancelled"),
            None => {
                self.new_jobs.retain(|j| *j != id);
                if let Some(info) = self.protocols.get_mut(&record.slave_protocol) {
                    info.queue.retain(|j| *j != id);
                }
                if let Some(co) = record.co_slave.and_then(|s| self.co_slaves.get_mut(&s)) {
                    co.queue.retain(|j| *j != id);
                }
            }
        }
        tracing::debug!(job = %id, quiet, "job cancelled");
        if !quiet {
            record.sink.finish(Err(JobError::user_canceled()));
        }
        true
    }

    pub(crate) fn kill_slave(&mut self, id: SlaveId, reason: &str) {
        if let Some(slave) = self.slaves.get_mut(&id) {
            slave.kill();
        }
        self.purge_slave(id, reason);
    }

    /// Forget a slave. Its job, if still unfinished, fails with `SLAVE_DIED`.
    pub(crate) fn purge_slave(&mut self, id: SlaveId, reason: &str) {
        let Some(slave) = self.slaves.remove(&id) else { return };
        tracing::info!(slave = %id, protocol = %slave.slave_protocol(), reason, "slave removed");
        if let Some(info) = self.protocols.get_mut(slave.slave_protocol()) {
            info.active.remove(&id);
        }
        if self.on_hold == Some(id) {
            self.on_hold = None;
        }
        if let Some(co) = self.co_slaves.remove(&id) {
            let _ = co.notify.send(ConnectionEvent::Died);
            for job in co.queue {
                if let Some(record) = self.jobs.remove(&job) {
                    record.sink.finish(Err(JobError::slave_died(slave.protocol())));
                }
            }
        }
        if let Some(job) = slave.state().job() {
            if let Some(record) = self.jobs.remove(&job) {
                record.sink.finish(Err(JobError::slave_died(slave.protocol())));
            }
        }
        self.start_pending = true;
    }

    /// Kill idle slaves unused for longer than the idle timeout.
    pub fn evict_idle(&mut self) -> usize {
        let threshold = self.config.idle_timeout();
        let stale: Vec<SlaveId> = self
            .slaves
            .values()
            .filter(|s| *s.state() == SlaveState::Idle && s.idle_time() > threshold)
            .map(Slave::id)
            .collect();
        for id in &stale {
            self.kill_slave(*id, "idle timeout");
        }
        stale.len()
    }

    /// Detach the slave of a running job and park it on the job's URL so a
    /// following read of the same URL can pick up where it stopped. The job
    /// ends without a result.
    pub fn put_on_hold(&mut self, id: JobId) -> Result<()> {
        let record = self.jobs.get(&id).ok_or(KioError::UnknownJob(id.0))?;
        let slave_id = record
            .slave
            .ok_or_else(|| KioError::Protocol(format!("{} is not running", id)))?;
        if self.co_slaves.contains_key(&slave_id) {
            return Err(KioError::Protocol(format!("{} runs on a connected slave", id)));
        }

        self.remove_on_hold();
        let Some(record) = self.jobs.remove(&id) else {
            return Err(KioError::UnknownJob(id.0));
        };
        if let Some(info) = self.protocols.get_mut(&record.slave_protocol) {
            info.active.remove(&slave_id);
        }
        let slave = self.slaves.get_mut(&slave_id).ok_or(KioError::UnknownSlave(slave_id.0))?;
        if let Err(e) = slave.hold(record.job.url()) {
            self.kill_slave(slave_id, "hold failed");
            return Err(e);
        }
        tracing::debug!(job = %id, slave = %slave_id, url = %record.job.url(), "slave put on hold");
        self.on_hold = Some(slave_id);
        self.start_pending = true;
        Ok(())
    }

    /// Kill the held slave, if any.
    pub fn remove_on_hold(&mut self) {
        if let Some(id) = self.on_hold.take() {
            self.kill_slave(id, "hold released");
        }
    }

    /// Dedicate a slave to `url` and connect it. The slave stays outside the
    /// protocol cap until [`close_connected`](Self::close_connected).
    pub fn open_connected(&mut self, url: &Url, metadata: MetaData) -> Result<CoSlaveHandle> {
        let protocol = url.scheme().to_string();
        let slave_protocol = self.config.slave_protocol_for(&protocol).to_string();
        let target = host_args(url);
        let slave_id = match self.find_idle(&slave_protocol, &target, true) {
            Some(id) => id,
            None => self.spawn_slave(&protocol, &slave_protocol, url)?,
        };

        let (notify, events) = mpsc::unbounded_channel();
        self.co_slaves.insert(
            slave_id,
            CoSlave {
                queue: VecDeque::new(),
                notify,
            },
        );
        let mut config = self.protocol_metadata(&protocol, &slave_protocol);
        config.extend(metadata);

        let slave = self.slaves.get_mut(&slave_id).ok_or(KioError::UnknownSlave(slave_id.0))?;
        slave.set_state(SlaveState::CoIdle);
        if let Err(e) = connect(slave, &config, &target) {
            self.kill_slave(slave_id, "connect failed");
            return Err(e);
        }
        tracing::debug!(slave = %slave_id, url = %url, "connected slave opened");
        Ok(CoSlaveHandle::new(slave_id, events))
    }

    /// Queue `job` on a connected slave. Jobs run one at a time in order.
    pub fn enqueue_on_connected(&mut self, slave: SlaveId, job: Job) -> Result<JobHandle> {
        if !self.co_slaves.contains_key(&slave) {
            return Err(KioError::UnknownSlave(slave.0));
        }
        let (id, handle) = self.register_job(job, Some(slave));
        if let Some(co) = self.co_slaves.get_mut(&slave) {
            co.queue.push_back(id);
        }
        self.co_pending = true;
        Ok(handle)
    }

    /// Give a connected slave back to the idle pool. Jobs still queued on it
    /// fail with `USER_CANCELED`; a running job finishes first.
    pub fn close_connected(&mut self, slave_id: SlaveId) -> Result<()> {
        let co = self.co_slaves.remove(&slave_id).ok_or(KioError::UnknownSlave(slave_id.0))?;
        for job in co.queue {
            if let Some(record) = self.jobs.remove(&job) {
                record.sink.finish(Err(JobError::user_canceled()));
            }
        }
        let Some(slave) = self.slaves.get_mut(&slave_id) else {
            return Ok(());
        };
        if let SlaveState::CoBusy(_) = slave.state() {
            slave.set_disconnect_on_release();
        } else {
            self.make_idle(slave_id, true);
            self.start_pending = true;
        }
        tracing::debug!(slave = %slave_id, "connected slave closed");
        Ok(())
    }

    fn schedule_co_slaves(&mut self) {
        let ready: Vec<SlaveId> = self
            .co_slaves
            .iter()
            .filter(|(id, co)| {
                !co.queue.is_empty() && self.slaves.get(id).is_some_and(|s| *s.state() == SlaveState::CoIdle)
            })
            .map(|(id, _)| *id)
            .collect();
        for slave_id in ready {
            let next = self.co_slaves.get_mut(&slave_id).and_then(|co| co.queue.pop_front());
            if let Some(job) = next {
                self.start_job(job, slave_id);
            }
        }
    }

    /// Tell live slaves to re-read their configuration, all of them or only
    /// those serving `protocol`.
    pub fn reparse_slave_configuration(&mut self, protocol: Option<&str>) {
        for slave in self.slaves.values() {
            let wanted = protocol.map_or(true, |p| slave.protocol() == p || slave.slave_protocol() == p);
            if !wanted {
                continue;
            }
            if let Err(e) = slave.send(Command::ReparseConfiguration, Bytes::new()) {
                tracing::debug!(slave = %slave.id(), "reparse failed: {}", e);
            }
        }
    }

    /// Forward a caller request to the slave running `id`.
    pub fn control(&mut self, id: JobId, control: JobControl) -> Result<()> {
        let record = self.jobs.get_mut(&id).ok_or(KioError::UnknownJob(id.0))?;
        let slave_id = record
            .slave
            .ok_or_else(|| KioError::Protocol(format!("{} is not running", id)))?;
        let slave = self.slaves.get_mut(&slave_id).ok_or(KioError::UnknownSlave(slave_id.0))?;
        match control {
            JobControl::SendData(data) | JobControl::SendSubUrlData(data) => slave.send(Message::Data, data),
            JobControl::AnswerResume(true) => slave.send(Command::ResumeAnswer, Bytes::new()),
            JobControl::AnswerResume(false) => slave.send(Command::None, Bytes::new()),
            JobControl::AnswerMessageBox(answer) => slave.send_encoded(Command::MessageBoxAnswer, &answer),
            JobControl::ContinueAfterMimeType => {
                if std::mem::take(&mut record.mime_pending) {
                    slave.send(Command::None, Bytes::new())
                } else {
                    Ok(())
                }
            }
            JobControl::Suspend => {
                record.caller_suspended = true;
                slave.suspend();
                Ok(())
            }
            JobControl::Resume => {
                record.caller_suspended = false;
                if !record.flow_suspended {
                    slave.resume();
                }
                Ok(())
            }
            JobControl::FileRead(size) => slave.send_encoded(Command::Read, &size),
            JobControl::FileWrite(data) => slave.send(Command::Write, data),
            JobControl::FileSeek(offset) => slave.send_encoded(Command::Seek, &offset),
            JobControl::FileClose => slave.send(Command::Close, Bytes::new()),
        }
    }

    /// Cancel every job and kill every slave.
    pub fn shutdown(&mut self) {
        let jobs: Vec<JobId> = self.jobs.keys().copied().collect();
        for id in jobs {
            self.cancel(id, false);
        }
        let slaves: Vec<SlaveId> = self.slaves.keys().copied().collect();
        for id in slaves {
            self.kill_slave(id, "scheduler shutdown");
        }
        self.auth_keys.release_all();
        self.start_pending = false;
        self.co_pending = false;
        tracing::info!("scheduler shut down");
    }
}

fn send_job(slave: &mut Slave, job: &Job, config: &MetaData, held: bool) -> Result<()> {
    if held {
        slave.resume();
    }
    let target = host_args(job.url());
    if !slave.is_configured_for(&target) {
        slave.set_config(config)?;
        slave.set_host(&target)?;
    }
    if !job.metadata().is_empty() {
        slave.send_encoded(Command::MetaData, job.metadata())?;
    }
    slave.send(job.command(), job.args().clone())
}

fn connect(slave: &mut Slave, config: &MetaData, target: &HostArgs) -> Result<()> {
    slave.set_config(config)?;
    slave.set_host(target)?;
    slave.send(Command::Connect, Bytes::new())
}
