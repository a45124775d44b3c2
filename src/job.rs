//! Jobs: one application-level I/O request each.
//!
//! A [`Job`] is the immutable request (URL, command, encoded arguments,
//! outgoing metadata). Submitting it to the scheduler yields a
//! [`JobHandle`] that streams [`JobEvent`]s and ends with exactly one
//! [`JobEvent::Finished`], unless the job was killed quietly.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use url::Url;

use crate::codec::MsgPackCodec;
use crate::error::{JobError, Result};
use crate::flow::DataWindow;
use crate::protocol::{
    ChmodArgs, ChownArgs, Command, CopyArgs, DelArgs, MessageBoxRequest, MetaData, MkdirArgs,
    OpenArgs, PutArgs, RenameArgs, SymlinkArgs, UdsEntry,
};
use crate::slave::{SlaveEvent, SlaveEventSink};

/// Scheduler-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Behaviour switches that are not part of the wire request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Leave the worker parked after it reports a mime type until the caller
    /// continues or puts the slave on hold.
    pub wait_on_mime_type: bool,
    /// Streams data to the caller (get, put, special posts).
    pub transfer: bool,
}

/// An I/O request against one URL.
#[derive(Debug, Clone)]
pub struct Job {
    url: Url,
    command: Command,
    args: Bytes,
    metadata: MetaData,
    options: JobOptions,
}

impl Job {
    /// Build a job from an already encoded argument payload.
    pub fn new(url: Url, command: Command, args: Bytes) -> Self {
        Self {
            url,
            command,
            args,
            metadata: MetaData::new(),
            options: JobOptions::default(),
        }
    }

    fn encoded<T: serde::Serialize>(url: Url, command: Command, args: &T) -> Result<Self> {
        Ok(Self::new(url, command, MsgPackCodec::encode_bytes(args)?))
    }

    pub fn get(url: Url) -> Result<Self> {
        Ok(Self::encoded(url.clone(), Command::Get, &url)?.transfer())
    }

    pub fn put(args: PutArgs) -> Result<Self> {
        Ok(Self::encoded(args.url.clone(), Command::Put, &args)?.transfer())
    }

    pub fn stat(url: Url) -> Result<Self> {
        Self::encoded(url.clone(), Command::Stat, &url)
    }

    pub fn mimetype(url: Url) -> Result<Self> {
        Ok(Self::encoded(url.clone(), Command::MimeType, &url)?.transfer())
    }

    pub fn list_dir(url: Url) -> Result<Self> {
        Self::encoded(url.clone(), Command::ListDir, &url)
    }

    pub fn mkdir(args: MkdirArgs) -> Result<Self> {
        Self::encoded(args.url.clone(), Command::Mkdir, &args)
    }

    pub fn rename(args: RenameArgs) -> Result<Self> {
        Self::encoded(args.src.clone(), Command::Rename, &args)
    }

    pub fn symlink(args: SymlinkArgs) -> Result<Self> {
        Self::encoded(args.dest.clone(), Command::Symlink, &args)
    }

    pub fn copy(args: CopyArgs) -> Result<Self> {
        Self::encoded(args.src.clone(), Command::Copy, &args)
    }

    pub fn del(args: DelArgs) -> Result<Self> {
        Self::encoded(args.url.clone(), Command::Del, &args)
    }

    pub fn chmod(args: ChmodArgs) -> Result<Self> {
        Self::encoded(args.url.clone(), Command::Chmod, &args)
    }

    pub fn chown(args: ChownArgs) -> Result<Self> {
        Self::encoded(args.url.clone(), Command::Chown, &args)
    }

    /// Protocol specific command; `data` is passed through untouched.
    pub fn special(url: Url, data: Bytes) -> Self {
        Self::new(url, Command::Special, data)
    }

    pub fn open(args: OpenArgs) -> Result<Self> {
        Self::encoded(args.url.clone(), Command::Open, &args)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn wait_on_mime_type(mut self) -> Self {
        self.options.wait_on_mime_type = true;
        self
    }

    pub fn transfer(mut self) -> Self {
        self.options.transfer = true;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn args(&self) -> &Bytes {
        &self.args
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn options(&self) -> JobOptions {
        self.options
    }

    /// URL scheme the caller asked for.
    pub fn protocol(&self) -> &str {
        self.url.scheme()
    }

    /// Reads that may be served by a slave put on hold for the same URL.
    pub fn is_cacheable_read(&self) -> bool {
        let cacheable = match self.command {
            Command::Get => true,
            Command::Special => self.options.transfer,
            _ => false,
        };
        cacheable
            && self
                .metadata
                .get("resume")
                .map_or(true, |offset| offset.is_empty() || offset == "0")
    }
}

/// Everything a running job reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A chunk of payload. An empty chunk marks the end of data.
    Data(Bytes),
    /// The worker wants the next chunk for a put (answer with `send_data`).
    DataRequest,
    /// The worker asks whether the destination can be resumed at `offset`
    /// (answer with `answer_resume`).
    ResumeOffer(u64),
    /// The worker can resume this transfer.
    ResumeSupported,
    MimeType(String),
    Redirection(Url),
    TotalSize(u64),
    ProcessedSize(u64),
    Speed(u64),
    Position(u64),
    Written(u64),
    StatEntry(UdsEntry),
    ListEntries(Vec<UdsEntry>),
    Renamed(String),
    MetaData(MetaData),
    Warning(String),
    InfoMessage(String),
    GettingFile(String),
    ErrorPage,
    /// Answer with `answer_message_box`.
    MessageBox(MessageBoxRequest),
    NeedSubUrlData,
    /// The worker opened the file; `file_*` requests are now accepted.
    Opened,
    Finished(std::result::Result<(), JobError>),
}

/// Scheduler side of a job's event stream.
#[derive(Debug)]
pub(crate) struct JobSink {
    tx: mpsc::UnboundedSender<JobEvent>,
    window: DataWindow,
}

impl JobSink {
    pub(crate) fn emit(&self, event: JobEvent) {
        // A dropped handle only means nobody listens any more.
        let _ = self.tx.send(event);
    }

    /// Deliver data. Returns `true` when the producer should be suspended.
    pub(crate) fn deliver(&self, data: Bytes) -> bool {
        let throttle = self.window.deliver(data.len());
        self.emit(JobEvent::Data(data));
        throttle
    }

    pub(crate) fn is_throttled(&self) -> bool {
        self.window.is_throttled()
    }

    /// Nobody holds the [`JobHandle`] any more.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Terminal outcome; consumes the sink so it can only happen once.
    pub(crate) fn finish(self, result: std::result::Result<(), JobError>) {
        self.emit(JobEvent::Finished(result));
    }
}

/// Create the two ends of a job's event stream.
pub(crate) fn job_channel(id: JobId, window: DataWindow, wake: SlaveEventSink) -> (JobSink, JobHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = JobSink {
        tx,
        window: window.clone(),
    };
    let handle = JobHandle {
        id,
        events: rx,
        window,
        wake,
    };
    (sink, handle)
}

/// Caller side of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    events: mpsc::UnboundedReceiver<JobEvent>,
    window: DataWindow,
    wake: SlaveEventSink,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Next event; `None` once the stream ended.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    /// Next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<JobEvent> {
        let event = self.events.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&self, event: &JobEvent) {
        if let JobEvent::Data(data) = event {
            if self.window.consume(data.len()) {
                let _ = self.wake.send(SlaveEvent::ConsumerReady { job: self.id });
            }
        }
    }

    /// Skip to the outcome. `None` when the job was killed quietly.
    pub async fn wait(mut self) -> Option<std::result::Result<(), JobError>> {
        while let Some(event) = self.next_event().await {
            if let JobEvent::Finished(result) = event {
                return Some(result);
            }
        }
        None
    }

    /// Collect all data of a transfer.
    pub async fn read_to_end(mut self) -> std::result::Result<Bytes, JobError> {
        let mut buf = BytesMut::new();
        while let Some(event) = self.next_event().await {
            match event {
                JobEvent::Data(chunk) => buf.extend_from_slice(&chunk),
                JobEvent::Finished(result) => return result.map(|_| buf.freeze()),
                _ => {}
            }
        }
        Err(JobError::user_canceled())
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        let _ = self.wake.send(SlaveEvent::HandleDropped { job: self.id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_get_encodes_url() {
        let job = Job::get(url("ftp://example.org/pub/file")).unwrap();
        assert_eq!(job.command(), Command::Get);
        assert_eq!(job.protocol(), "ftp");
        assert!(job.options().transfer);

        let decoded: Url = MsgPackCodec::decode(job.args()).unwrap();
        assert_eq!(decoded, *job.url());
    }

    #[test]
    fn test_rename_targets_source() {
        let job = Job::rename(RenameArgs {
            src: url("file:///tmp/a"),
            dest: url("file:///tmp/b"),
            overwrite: false,
        })
        .unwrap();
        assert_eq!(job.url().path(), "/tmp/a");
    }

    #[test]
    fn test_cacheable_read() {
        let get = Job::get(url("http://h/x")).unwrap();
        assert!(get.is_cacheable_read());
        assert!(get.clone().with_metadata("resume", "0").is_cacheable_read());
        assert!(!get.with_metadata("resume", "1024").is_cacheable_read());

        let post = Job::special(url("http://h/x"), Bytes::from_static(b"p"));
        assert!(!post.is_cacheable_read());
        assert!(post.transfer().is_cacheable_read());

        assert!(!Job::stat(url("http://h/x")).unwrap().is_cacheable_read());
    }

    #[tokio::test]
    async fn test_consumer_drain_wakes_scheduler() {
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        let (sink, mut handle) = job_channel(JobId(7), DataWindow::new(8, 4), wake_tx);

        assert!(!sink.deliver(Bytes::from_static(b"1234")));
        assert!(sink.deliver(Bytes::from_static(b"5678")));
        assert!(sink.is_throttled());

        handle.next_event().await.unwrap();
        assert!(wake_rx.try_recv().is_err());
        handle.next_event().await.unwrap();
        match wake_rx.try_recv() {
            Ok(SlaveEvent::ConsumerReady { job }) => assert_eq!(job, JobId(7)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_to_end() {
        let (wake_tx, _wake_rx) = mpsc::unbounded_channel();
        let (sink, handle) = job_channel(JobId(1), DataWindow::default(), wake_tx);
        sink.emit(JobEvent::MimeType("text/plain".into()));
        sink.deliver(Bytes::from_static(b"hello "));
        sink.deliver(Bytes::from_static(b"world"));
        sink.finish(Ok(()));

        assert_eq!(handle.read_to_end().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_dropping_handle_reports_abandonment() {
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        let (sink, handle) = job_channel(JobId(3), DataWindow::default(), wake_tx);
        assert!(!sink.is_abandoned());

        drop(handle);
        assert!(sink.is_abandoned());
        match wake_rx.try_recv() {
            Ok(SlaveEvent::HandleDropped { job }) => assert_eq!(job, JobId(3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_without_result() {
        let (wake_tx, _wake_rx) = mpsc::unbounded_channel();
        let (sink, handle) = job_channel(JobId(2), DataWindow::default(), wake_tx);
        drop(sink);

        assert!(handle.wait().await.is_none());
    }
}
