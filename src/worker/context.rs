//! Worker-side output primitives and per-operation state.
//!
//! A [`Worker`] is what a [`Protocol`](super::Protocol) talks to while it
//! executes an operation: it sends data, progress and results back to the
//! application, and runs the blocking sub-dialogues (resume negotiation,
//! message boxes, mime type decisions) by reading frames until the
//! expected answer arrives.
//!
//! # Example
//!
//! ```ignore
//! async fn get(&mut self, worker: &mut Worker, url: &Url) -> Result<()> {
//!     let body = self.fetch(url).await?;
//!     worker.mime_type("text/plain").await?;
//!     worker.total_size(body.len() as u64).await?;
//!     worker.data(body).await?;
//!     worker.data(Bytes::new()).await?;
//!     worker.finished().await
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

use crate::auth::{AuthContext, AuthInfo, CredentialCache};
use crate::codec::MsgPackCodec;
use crate::connection::Connection;
use crate::error::{ErrorCode, KioError, Result};
use crate::protocol::{
    Command, ErrorPayload, Frame, HostArgs, Info, Message, MessageBoxRequest, MetaData,
    SlaveStatus, UdsEntry,
};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum spacing of `PROCESSED_SIZE` updates.
const PROCESSED_SIZE_INTERVAL: Duration = Duration::from_millis(100);

const LIST_MIN_UPDATE_MS: u64 = 100;
const LIST_MAX_UPDATE_MS: u64 = 300;
const INITIAL_LIST_BATCH: usize = 100;

/// Externally settable kill flag, polled by the dispatch loop.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_killed(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once [`kill`](Self::kill) was called.
    pub async fn killed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_killed() {
                return;
            }
            notified.await;
        }
    }
}

/// The worker half of a slave connection.
pub struct Worker {
    protocol: String,
    conn: Connection,
    kill: KillSwitch,
    credentials: Option<Arc<dyn CredentialCache>>,
    incoming_metadata: MetaData,
    outgoing_metadata: MetaData,
    config: MetaData,
    target: HostArgs,
    connected: bool,
    on_hold: Option<Url>,
    sub_url: Option<Url>,
    deferred: VecDeque<Frame>,
    seq_nr: i64,
    timeout: Option<(Instant, Bytes)>,
    total_size: Option<u64>,
    last_processed: Option<Instant>,
    need_send_can_resume: bool,
    in_open_loop: bool,
    pending_entries: Vec<UdsEntry>,
    sent_entries: u64,
    list_batch: usize,
    list_stamp: Instant,
    exit: bool,
}

impl Worker {
    pub(crate) fn new(protocol: &str, conn: Connection) -> Self {
        Self {
            protocol: protocol.to_string(),
            conn,
            kill: KillSwitch::new(),
            credentials: None,
            incoming_metadata: MetaData::new(),
            outgoing_metadata: MetaData::new(),
            config: MetaData::new(),
            target: HostArgs::default(),
            connected: false,
            on_hold: None,
            sub_url: None,
            deferred: VecDeque::new(),
            seq_nr: 0,
            timeout: None,
            total_size: None,
            last_processed: None,
            need_send_can_resume: false,
            in_open_loop: false,
            pending_entries: Vec::new(),
            sent_entries: 0,
            list_batch: INITIAL_LIST_BATCH,
            list_stamp: Instant::now(),
            exit: false,
        }
    }

    pub(crate) fn set_kill_switch(&mut self, kill: KillSwitch) {
        self.kill = kill;
    }

    pub(crate) fn set_credential_cache(&mut self, cache: Arc<dyn CredentialCache>) {
        self.credentials = Some(cache);
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Current target as last set by `HOST`.
    pub fn target(&self) -> &HostArgs {
        &self.target
    }

    pub fn sub_url(&self) -> Option<&Url> {
        self.sub_url.as_ref()
    }

    /// URL the application parked this worker on, if any.
    pub fn hold_url(&self) -> Option<&Url> {
        self.on_hold.as_ref()
    }

    pub fn was_killed(&self) -> bool {
        self.kill.is_killed()
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill
    }

    pub(crate) fn should_exit(&self) -> bool {
        self.exit || self.was_killed()
    }

    pub(crate) fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub(crate) fn in_open_loop(&self) -> bool {
        self.in_open_loop
    }

    pub(crate) fn pop_deferred(&mut self) -> Option<Frame> {
        self.deferred.pop_front()
    }

    // ---- metadata ----

    /// Incoming metadata first, then the pushed configuration.
    pub fn meta_data(&self, key: &str) -> Option<&str> {
        self.incoming_metadata
            .get(key)
            .or_else(|| self.config.get(key))
            .map(String::as_str)
    }

    pub fn has_meta_data(&self, key: &str) -> bool {
        self.incoming_metadata.contains_key(key) || self.config.contains_key(key)
    }

    pub fn incoming_meta_data(&self) -> &MetaData {
        &self.incoming_metadata
    }

    pub fn config(&self) -> &MetaData {
        &self.config
    }

    /// Queue outgoing metadata; sent before the next data or result.
    pub fn set_meta_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.outgoing_metadata.insert(key.into(), value.into());
    }

    pub async fn send_meta_data(&mut self) -> Result<()> {
        self.flush_meta_data().await?;
        self.outgoing_metadata.clear();
        Ok(())
    }

    async fn flush_meta_data(&mut self) -> Result<()> {
        if self.outgoing_metadata.is_empty() {
            return Ok(());
        }
        let payload = MsgPackCodec::encode_bytes(&self.outgoing_metadata)?;
        self.send(Info::MetaData, payload).await
    }

    fn timeout_value(&self, key: &str, default: Duration) -> Duration {
        self.meta_data(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.timeout_value("ConnectTimeout", DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn proxy_connect_timeout(&self) -> Duration {
        self.timeout_value("ProxyConnectTimeout", DEFAULT_PROXY_CONNECT_TIMEOUT)
    }

    pub fn response_timeout(&self) -> Duration {
        self.timeout_value("ResponseTimeout", DEFAULT_RESPONSE_TIMEOUT)
    }

    pub fn read_timeout(&self) -> Duration {
        self.timeout_value("ReadTimeout", DEFAULT_READ_TIMEOUT)
    }

    // ---- timeouts ----

    /// Arm (or with `None` disarm) a one-shot call to `special(data)`.
    pub fn set_timeout_special_command(&mut self, timeout: Option<Duration>, data: Bytes) {
        self.timeout = timeout.map(|t| (Instant::now() + t, data));
    }

    /// Time left until the armed special command fires.
    pub(crate) fn timeout_remaining(&self) -> Option<Duration> {
        self.timeout
            .as_ref()
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn take_due_timeout(&mut self) -> Option<Bytes> {
        match &self.timeout {
            Some((deadline, _)) if *deadline <= Instant::now() => {
                self.timeout.take().map(|(_, data)| data)
            }
            _ => None,
        }
    }

    // ---- raw I/O ----

    async fn send(&mut self, id: impl Into<i32>, payload: Bytes) -> Result<()> {
        let res = self.conn.send(id, payload).await;
        if res.is_err() {
            self.exit = true;
        }
        res
    }

    async fn send_encoded<T: serde::Serialize + ?Sized>(&mut self, id: impl Into<i32>, value: &T) -> Result<()> {
        let payload = MsgPackCodec::encode_bytes(value)?;
        self.send(id, payload).await
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let res = tokio::select! {
            res = self.conn.read() => res,
            _ = self.kill.killed() => Err(KioError::Protocol("worker killed".into())),
        };
        if res.is_err() {
            self.exit = true;
        }
        res
    }

    /// Apply a subcommand that needs no protocol object. Returns the frame
    /// back when the protocol has to handle it.
    pub(crate) async fn apply_sub_command(&mut self, cmd: Command, frame: Frame) -> Result<Option<Frame>> {
        match cmd {
            Command::MetaData => {
                if let Some(md) = decode_or_warn::<MetaData>(&frame) {
                    self.incoming_metadata.extend(md);
                }
            }
            Command::Config => {
                if let Some(config) = decode_or_warn::<MetaData>(&frame) {
                    self.config = config;
                }
            }
            Command::SlaveStatus => self.slave_status().await?,
            Command::SlaveHold => {
                if let Some(url) = decode_or_warn::<Url>(&frame) {
                    tracing::debug!(protocol = %self.protocol, "put on hold for {}", url);
                    self.on_hold = Some(url);
                }
            }
            Command::SlaveConnect => {
                self.on_hold = None;
                self.send(Message::SlaveAck, Bytes::new()).await?;
            }
            _ => return Ok(Some(frame)),
        }
        Ok(None)
    }

    pub(crate) fn on_host(&mut self, target: &HostArgs) {
        self.target = target.clone();
        self.seq_nr = 0;
    }

    pub(crate) fn on_disconnect(&mut self) {
        self.connected = false;
    }

    pub(crate) fn on_put(&mut self) {
        self.need_send_can_resume = true;
    }

    pub(crate) fn on_sub_url(&mut self, url: Url) {
        self.sub_url = Some(url);
    }

    /// Read frames until one with an id in `expected` arrives.
    ///
    /// Subcommands that arrive meanwhile are applied (or queued for the
    /// protocol) and do not end the wait.
    pub async fn wait_for_answer(&mut self, expected: &[i32]) -> Result<Frame> {
        loop {
            let frame = self.read_frame().await?;
            if expected.contains(&frame.id()) {
                return Ok(frame);
            }
            match Command::from_id(frame.id()) {
                Some(cmd) if cmd.is_sub_command() => {
                    if let Some(frame) = self.apply_sub_command(cmd, frame).await? {
                        self.deferred.push_back(frame);
                    }
                }
                _ => tracing::warn!("got frame {} while waiting for an answer", frame.id()),
            }
        }
    }

    fn reset_operation(&mut self) {
        self.total_size = None;
        self.last_processed = None;
        self.need_send_can_resume = false;
        self.in_open_loop = false;
        self.sent_entries = 0;
        self.list_batch = INITIAL_LIST_BATCH;
    }

    // ---- results ----

    /// Terminal failure of the current operation.
    pub async fn error(&mut self, code: ErrorCode, text: impl Into<String>) -> Result<()> {
        self.incoming_metadata.clear();
        self.outgoing_metadata.clear();
        self.pending_entries.clear();
        let payload = ErrorPayload {
            code,
            text: text.into(),
        };
        let res = self.send_encoded(Message::Error, &payload).await;
        self.reset_operation();
        res
    }

    /// Terminal success of the current operation.
    pub async fn finished(&mut self) -> Result<()> {
        self.incoming_metadata.clear();
        if !self.pending_entries.is_empty() {
            let entries = std::mem::take(&mut self.pending_entries);
            self.list_entries(entries).await?;
        }
        self.send_meta_data().await?;
        let res = self.send(Message::Finished, Bytes::new()).await;
        self.reset_operation();
        res
    }

    pub async fn unsupported(&mut self, cmd: Command) -> Result<()> {
        let text = format!("{}: {} is not supported", self.protocol, cmd.operation_name());
        self.error(ErrorCode::UNSUPPORTED_ACTION, text).await
    }

    // ---- data ----

    /// Send a chunk; an empty chunk marks the end of data.
    pub async fn data(&mut self, data: Bytes) -> Result<()> {
        self.send_meta_data().await?;
        self.send(Message::Data, data).await
    }

    /// Ask the application for the next chunk of a put.
    pub async fn data_req(&mut self) -> Result<()> {
        if self.need_send_can_resume {
            self.can_resume(0).await?;
        }
        self.send(Message::DataReq, Bytes::new()).await
    }

    /// Wait for the chunk requested with [`data_req`](Self::data_req).
    pub async fn read_data(&mut self) -> Result<Bytes> {
        let frame = self.wait_for_answer(&[Message::Data as i32]).await?;
        Ok(frame.payload)
    }

    /// Offer to resume at `offset`. Non-zero offsets wait for the
    /// application's decision.
    pub async fn can_resume(&mut self, offset: u64) -> Result<bool> {
        self.need_send_can_resume = false;
        self.send_encoded(Message::Resume, &offset).await?;
        if offset == 0 {
            return Ok(true);
        }
        let answer = self
            .wait_for_answer(&[Command::ResumeAnswer as i32, Command::None as i32])
            .await?;
        Ok(answer.id() == Command::ResumeAnswer as i32)
    }

    /// Tell the application this transfer could be resumed.
    pub async fn announce_resume_support(&mut self) -> Result<()> {
        self.send(Message::CanResume, Bytes::new()).await
    }

    pub async fn need_sub_url_data(&mut self) -> Result<()> {
        self.send(Message::NeedSubUrlData, Bytes::new()).await
    }

    // ---- progress ----

    pub async fn total_size(&mut self, bytes: u64) -> Result<()> {
        self.total_size = Some(bytes);
        self.sent_entries = 0;
        self.send_encoded(Info::TotalSize, &bytes).await
    }

    /// Rate limited; the final count always goes out.
    pub async fn processed_size(&mut self, bytes: u64) -> Result<()> {
        let now = Instant::now();
        let is_final = self.total_size == Some(bytes);
        let due = self
            .last_processed
            .map_or(true, |last| now.duration_since(last) >= PROCESSED_SIZE_INTERVAL);
        if !(is_final || due) {
            return Ok(());
        }
        self.last_processed = Some(now);
        self.send_encoded(Info::ProcessedSize, &bytes).await
    }

    pub async fn speed(&mut self, bytes_per_second: u64) -> Result<()> {
        self.send_encoded(Info::Speed, &bytes_per_second).await
    }

    pub async fn getting_file(&mut self, name: &str) -> Result<()> {
        self.send_encoded(Info::GettingFile, name).await
    }

    // ---- notifications ----

    pub async fn redirection(&mut self, url: &Url) -> Result<()> {
        self.send_encoded(Info::Redirection, url).await
    }

    /// The data that follows is an error page, not the requested content.
    pub async fn error_page(&mut self) -> Result<()> {
        self.send(Info::ErrorPage, Bytes::new()).await
    }

    pub async fn warning(&mut self, msg: &str) -> Result<()> {
        self.send_encoded(Info::Warning, msg).await
    }

    pub async fn info_message(&mut self, msg: &str) -> Result<()> {
        self.send_encoded(Info::InfoMessage, msg).await
    }

    pub async fn connected(&mut self) -> Result<()> {
        self.connected = true;
        self.send(Message::Connected, Bytes::new()).await
    }

    pub async fn slave_status(&mut self) -> Result<()> {
        let status = SlaveStatus {
            pid: std::process::id(),
            protocol: self.protocol.clone(),
            host: self.target.host.clone(),
            connected: self.connected,
        };
        self.send_encoded(Message::SlaveStatus, &status).await
    }

    /// Report the mime type, then wait for the application's go-ahead.
    ///
    /// Until `NONE` arrives subcommands are serviced, `HOST` is ignored and
    /// any other command makes the mime type go out again.
    pub async fn mime_type(&mut self, mime: &str) -> Result<()> {
        loop {
            self.flush_meta_data().await?;
            self.send_encoded(Info::MimeType, mime).await?;
            let answer = loop {
                let frame = self.read_frame().await?;
                match Command::from_id(frame.id()) {
                    Some(Command::Host) => continue,
                    Some(cmd) if cmd.is_sub_command() => {
                        if let Some(frame) = self.apply_sub_command(cmd, frame).await? {
                            self.deferred.push_back(frame);
                        }
                    }
                    other => break other,
                }
            };
            if answer == Some(Command::None) {
                break;
            }
            tracing::debug!("re-sending mime type after {:?}", answer);
        }
        self.outgoing_metadata.clear();
        Ok(())
    }

    // ---- listings ----

    pub async fn stat_entry(&mut self, entry: &UdsEntry) -> Result<()> {
        self.send_encoded(Message::StatEntry, entry).await
    }

    pub async fn list_entries(&mut self, entries: Vec<UdsEntry>) -> Result<()> {
        self.sent_entries += entries.len() as u64;
        self.send_encoded(Message::ListEntries, &entries).await
    }

    /// Batched listing. The batch size adapts so that updates go out
    /// between 100 and 300 ms apart; `ready` flushes.
    pub async fn list_entry(&mut self, entry: UdsEntry, ready: bool) -> Result<()> {
        let mut flush = ready;
        if !entry.is_empty() {
            self.pending_entries.push(entry);
        }
        if !ready && self.pending_entries.len() > self.list_batch {
            let elapsed = (self.list_stamp.elapsed().as_millis() as u64).max(1);
            let pending = self.pending_entries.len() as u64;
            let remaining = self
                .total_size
                .map(|total| total.saturating_sub(self.sent_entries));
            if elapsed > LIST_MAX_UPDATE_MS {
                self.list_batch = (self.list_batch * 3 / 4).max(1);
                flush = true;
            } else if let Some(remaining) =
                remaining.filter(|rem| pending * LIST_MAX_UPDATE_MS / elapsed > *rem)
            {
                self.list_batch = remaining as usize + 1;
            } else if elapsed < LIST_MIN_UPDATE_MS {
                self.list_batch = (pending * LIST_MAX_UPDATE_MS / elapsed) as usize;
            } else {
                flush = true;
            }
        }
        if flush && !self.pending_entries.is_empty() {
            let entries = std::mem::take(&mut self.pending_entries);
            self.list_entries(entries).await?;
            self.list_stamp = Instant::now();
        }
        Ok(())
    }

    // ---- open loop ----

    /// The file is open; switch to the read/write/seek/close loop.
    pub async fn opened(&mut self) -> Result<()> {
        self.in_open_loop = true;
        self.send(Message::Opened, Bytes::new()).await
    }

    pub async fn written(&mut self, bytes: u64) -> Result<()> {
        self.send_encoded(Message::Written, &bytes).await
    }

    pub async fn position(&mut self, offset: u64) -> Result<()> {
        self.send_encoded(Info::Position, &offset).await
    }

    // ---- dialogues ----

    /// Ask the user. Returns the button code, 0 if the application could
    /// not be reached.
    pub async fn message_box(&mut self, request: &MessageBoxRequest) -> i32 {
        if self.send_encoded(Info::MessageBox, request).await.is_err() {
            return 0;
        }
        match self.wait_for_answer(&[Command::MessageBoxAnswer as i32]).await {
            Ok(frame) => MsgPackCodec::decode::<i32>(frame.payload()).unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Ask the application to bring the network up for `host`.
    pub async fn request_network(&mut self, host: &str) -> bool {
        if self.send_encoded(Message::NetRequest, host).await.is_err() {
            return false;
        }
        match self.wait_for_answer(&[Info::NetworkStatus as i32]).await {
            Ok(frame) => MsgPackCodec::decode::<bool>(frame.payload()).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn drop_network(&mut self, host: &str) -> Result<()> {
        self.send_encoded(Message::NetDrop, host).await
    }

    // ---- credentials ----

    fn auth_context(&self) -> AuthContext {
        let number = |key: &str| {
            self.meta_data(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };
        AuthContext {
            window_id: number("window-id"),
            user_timestamp: number("user-timestamp"),
            seq_nr: self.seq_nr,
            no_prompt: self.meta_data("no-auth-prompt") == Some("true"),
        }
    }

    fn credential_cache(&self) -> Option<Arc<dyn CredentialCache>> {
        if self.credentials.is_none() {
            tracing::warn!(protocol = %self.protocol, "no credential cache available");
        }
        self.credentials.clone()
    }

    /// Fill `info` from the cache. Returns `true` on a hit.
    pub async fn check_cached_authentication(&mut self, info: &mut AuthInfo) -> bool {
        let Some(cache) = self.credential_cache() else {
            return false;
        };
        match cache.lookup(info, &self.auth_context()).await {
            Some(found) => {
                *info = found;
                true
            }
            None => false,
        }
    }

    /// Prompt for credentials. Returns `false` when the user cancelled or
    /// prompting is disabled.
    pub async fn open_password_dialog(&mut self, info: &mut AuthInfo, error_message: &str) -> bool {
        let Some(cache) = self.credential_cache() else {
            return false;
        };
        let reply = cache.prompt(info, &self.auth_context(), error_message).await;
        self.seq_nr = reply.seq_nr;
        match reply.info {
            Some(answer) => {
                *info = answer;
                true
            }
            None => false,
        }
    }

    pub async fn cache_authentication(&mut self, info: &AuthInfo) -> bool {
        let Some(cache) = self.credential_cache() else {
            return false;
        };
        cache.store(info, &self.auth_context()).await
    }

    pub fn seq_nr(&self) -> i64 {
        self.seq_nr
    }
}

fn decode_or_warn<T: serde::de::DeserializeOwned>(frame: &Frame) -> Option<T> {
    match MsgPackCodec::decode(frame.payload()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("bad payload for command {}: {}", frame.id(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriterConfig;
    use tokio::io::duplex;

    fn pair() -> (Worker, Connection) {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let config = WriterConfig::default();
        (
            Worker::new("test", Connection::new(ar, aw, &config)),
            Connection::new(br, bw, &config),
        )
    }

    #[tokio::test]
    async fn test_kill_switch_wakes_waiter() {
        let kill = KillSwitch::new();
        let waiter = {
            let kill = kill.clone();
            tokio::spawn(async move { kill.killed().await })
        };
        tokio::task::yield_now().await;
        kill.kill();
        waiter.await.unwrap();
        assert!(kill.is_killed());
    }

    #[tokio::test]
    async fn test_meta_data_falls_back_to_config() {
        let (mut worker, _app) = pair();
        worker.config.insert("UserAgent".into(), "kio".into());
        worker.config.insert("ReadTimeout".into(), "5".into());
        worker.incoming_metadata.insert("ReadTimeout".into(), "30".into());

        assert_eq!(worker.meta_data("UserAgent"), Some("kio"));
        assert_eq!(worker.read_timeout(), Duration::from_secs(30));
        assert_eq!(worker.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert!(!worker.has_meta_data("missing"));
    }

    #[tokio::test]
    async fn test_negative_timeout_uses_default() {
        let (mut worker, _app) = pair();
        worker.incoming_metadata.insert("ResponseTimeout".into(), "-1".into());
        assert_eq!(worker.response_timeout(), DEFAULT_RESPONSE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_data_flushes_metadata_first() {
        let (mut worker, mut app) = pair();
        worker.set_meta_data("content-type", "text/html");
        worker.data(Bytes::from_static(b"<html>")).await.unwrap();

        let first = app.read().await.unwrap();
        let second = app.read().await.unwrap();
        assert_eq!(first.id(), Info::MetaData as i32);
        let md: MetaData = MsgPackCodec::decode(first.payload()).unwrap();
        assert_eq!(md.get("content-type").map(String::as_str), Some("text/html"));
        assert_eq!(second.id(), Message::Data as i32);
    }

    #[tokio::test]
    async fn test_finished_clears_incoming_metadata() {
        let (mut worker, mut app) = pair();
        worker.incoming_metadata.insert("resume".into(), "10".into());
        worker.finished().await.unwrap();

        assert!(worker.incoming_meta_data().is_empty());
        assert_eq!(app.read().await.unwrap().id(), Message::Finished as i32);
    }

    #[tokio::test]
    async fn test_error_payload() {
        let (mut worker, mut app) = pair();
        worker.error(ErrorCode::DOES_NOT_EXIST, "/nope").await.unwrap();

        let frame = app.read().await.unwrap();
        assert_eq!(frame.id(), Message::Error as i32);
        let err: ErrorPayload = MsgPackCodec::decode(frame.payload()).unwrap();
        assert_eq!(err.code, ErrorCode::DOES_NOT_EXIST);
        assert_eq!(err.text, "/nope");
    }

    #[tokio::test]
    async fn test_unsupported_text() {
        let (mut worker, mut app) = pair();
        worker.unsupported(Command::Chown).await.unwrap();

        let err: ErrorPayload = MsgPackCodec::decode(app.read().await.unwrap().payload()).unwrap();
        assert_eq!(err.code, ErrorCode::UNSUPPORTED_ACTION);
        assert_eq!(err.text, "test: change ownership is not supported");
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_size_rate_limited() {
        let (mut worker, mut app) = pair();
        worker.total_size(300).await.unwrap();
        worker.processed_size(100).await.unwrap();
        worker.processed_size(150).await.unwrap();
        worker.processed_size(300).await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        worker.processed_size(200).await.unwrap();
        worker.finished().await.unwrap();

        let mut sizes = Vec::new();
        loop {
            let frame = app.read().await.unwrap();
            if frame.id() == Info::ProcessedSize as i32 {
                sizes.push(MsgPackCodec::decode::<u64>(frame.payload()).unwrap());
            }
            if frame.id() == Message::Finished as i32 {
                break;
            }
        }
        assert_eq!(sizes, vec![100, 300, 200]);
    }

    #[tokio::test]
    async fn test_can_resume_zero_does_not_wait() {
        let (mut worker, mut app) = pair();
        assert!(worker.can_resume(0).await.unwrap());
        let frame = app.read().await.unwrap();
        assert_eq!(frame.id(), Message::Resume as i32);
    }

    #[tokio::test]
    async fn test_can_resume_declined() {
        let (mut worker, mut app) = pair();
        app.send(Command::None, Bytes::new()).await.unwrap();

        assert!(!worker.can_resume(4096).await.unwrap());
        let offer = app.read().await.unwrap();
        assert_eq!(MsgPackCodec::decode::<u64>(offer.payload()).unwrap(), 4096);
    }

    #[tokio::test]
    async fn test_wait_for_answer_applies_metadata_and_defers_reparse() {
        let (mut worker, app) = pair();
        let mut md = MetaData::new();
        md.insert("cookies".into(), "none".into());
        app.send(Command::MetaData, MsgPackCodec::encode_bytes(&md).unwrap())
            .await
            .unwrap();
        app.send(Command::ReparseConfiguration, Bytes::new()).await.unwrap();
        app.send(Command::ResumeAnswer, Bytes::new()).await.unwrap();

        let frame = worker
            .wait_for_answer(&[Command::ResumeAnswer as i32])
            .await
            .unwrap();
        assert_eq!(frame.id(), Command::ResumeAnswer as i32);
        assert_eq!(worker.meta_data("cookies"), Some("none"));
        let deferred = worker.pop_deferred().unwrap();
        assert!(deferred.is_command(Command::ReparseConfiguration));
    }

    #[tokio::test]
    async fn test_message_box_without_application() {
        let (mut worker, app) = pair();
        drop(app);
        let request = MessageBoxRequest {
            kind: crate::protocol::MessageBoxKind::QuestionYesNo,
            text: "Continue?".into(),
            caption: String::new(),
            button_yes: String::new(),
            button_no: String::new(),
            dont_ask_again: String::new(),
        };
        assert_eq!(worker.message_box(&request).await, 0);
        assert!(worker.should_exit());
    }

    #[tokio::test]
    async fn test_list_entry_flush_on_ready() {
        let (mut worker, mut app) = pair();
        for name in ["a", "b"] {
            let mut entry = UdsEntry::new();
            entry.insert_text(crate::protocol::uds::NAME, name);
            worker.list_entry(entry, false).await.unwrap();
        }
        worker.list_entry(UdsEntry::new(), true).await.unwrap();

        let frame = app.read().await.unwrap();
        assert_eq!(frame.id(), Message::ListEntries as i32);
        let entries: Vec<UdsEntry> = MsgPackCodec::decode(frame.payload()).unwrap();
        let names: Vec<_> = entries.iter().filter_map(|e| e.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_special_command() {
        let (mut worker, _app) = pair();
        worker.set_timeout_special_command(Some(Duration::from_secs(2)), Bytes::from_static(b"k"));
        assert!(worker.take_due_timeout().is_none());
        assert_eq!(worker.timeout_remaining(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(worker.take_due_timeout().unwrap(), "k");
        assert!(worker.timeout_remaining().is_none());
    }
}
