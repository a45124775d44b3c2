//! Launchers create a worker and the I/O task that talks to it.
//!
//! - [`ProcessLauncher`]: `<worker_dir>/kio_<protocol>` as a child process,
//!   reached through the socket announced in its `$init` line
//! - [`LocalLauncher`]: registered [`Protocol`] implementations run as tasks
//!   in this process over an in-memory duplex pipe

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use url::Url;

use crate::auth::CredentialCache;
use crate::connection::{BoxedReader, Connection};
use crate::control::{parse_init_message, read_control_line};
use crate::error::{KioError, Result};
use crate::transport::PipeStream;
use crate::worker::{Protocol, SlaveBase};
use crate::writer::WriterConfig;

use super::io::{slave_channel, BoxedWriter, LocalTask, SlaveEventSink, SlaveLink};
use super::SlaveId;

/// Default time a worker process gets to print its `$init` line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a launcher needs to start one slave.
pub struct LaunchRequest<'a> {
    pub slave: SlaveId,
    /// Protocol the worker must implement.
    pub protocol: &'a str,
    /// URL of the job that triggered the launch.
    pub url: &'a Url,
    pub events: SlaveEventSink,
    pub max_payload_size: u32,
}

/// Creates workers on demand.
///
/// `launch` must not block: the returned link is usable at once and frames
/// sent on it are buffered until the worker is reachable. Failures after
/// this point are reported as a [`SlaveEvent::Died`](super::SlaveEvent).
pub trait SlaveLauncher: Send {
    fn launch(&self, req: LaunchRequest<'_>) -> Result<SlaveLink>;
}

/// Launches worker executables.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    worker_dir: PathBuf,
    handshake_timeout: Duration,
    writer_config: WriterConfig,
}

impl ProcessLauncher {
    pub fn new(worker_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_dir: worker_dir.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            writer_config: WriterConfig::default(),
        }
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Path of the worker executable for `protocol`.
    pub fn executable(&self, protocol: &str) -> PathBuf {
        self.worker_dir.join(format!("kio_{}", protocol))
    }
}

impl SlaveLauncher for ProcessLauncher {
    fn launch(&self, req: LaunchRequest<'_>) -> Result<SlaveLink> {
        let program = self.executable(req.protocol);
        let launch_error = |reason: String| KioError::Launch {
            protocol: req.protocol.to_string(),
            reason,
        };

        let mut child = tokio::process::Command::new(&program)
            .arg(req.protocol)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| launch_error(format!("{}: {}", program.display(), e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error("stdout not captured".into()))?;
        let pid = child.id();
        tracing::info!(slave = req.slave.0, protocol = req.protocol, ?pid, url = %req.url, "worker spawned");

        let protocol = req.protocol.to_string();
        let timeout = self.handshake_timeout;
        let connect = async move {
            let mut stdout = BufReader::new(stdout);
            let line = read_control_line(&mut stdout, timeout).await?;
            let init = parse_init_message(&line)?;
            if init.protocol != protocol {
                return Err(KioError::Protocol(format!(
                    "worker announced {}, expected {}",
                    init.protocol, protocol
                )));
            }
            tracing::debug!(protocol = %protocol, socket = %init.socket.display(), "connecting to worker");
            let (reader, writer) = PipeStream::connect(&init.socket).await?.into_split();
            Ok((Box::new(reader) as BoxedReader, Box::new(writer) as BoxedWriter))
        };

        let (link, io) = slave_channel(req.slave, &self.writer_config, req.max_payload_size);
        io.spawn(connect, Box::new(child), req.events);
        Ok(link.with_pid(pid))
    }
}

type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type WorkerFactory = Arc<dyn Fn(Connection, Option<Arc<dyn CredentialCache>>) -> WorkerFuture + Send + Sync>;

/// Runs workers as tasks of the current runtime.
#[derive(Clone)]
pub struct LocalLauncher {
    workers: HashMap<String, WorkerFactory>,
    writer_config: WriterConfig,
    buffer_size: usize,
    credentials: Option<Arc<dyn CredentialCache>>,
}

impl LocalLauncher {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            writer_config: WriterConfig::default(),
            buffer_size: 64 * 1024,
            credentials: None,
        }
    }

    /// Serve `protocol` with a fresh `make()` per slave.
    pub fn register<P, F>(mut self, protocol: &str, make: F) -> Self
    where
        P: Protocol + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let name = protocol.to_string();
        let factory: WorkerFactory = Arc::new(move |conn, credentials| {
            let mut base = SlaveBase::new(&name, make(), conn);
            if let Some(cache) = credentials {
                base = base.with_credential_cache(cache);
            }
            Box::pin(base.run())
        });
        self.workers.insert(protocol.to_string(), factory);
        self
    }

    pub fn with_credential_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.credentials = Some(cache);
        self
    }

    /// Size of the in-memory pipe between application and worker.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLauncher")
            .field("protocols", &self.workers.keys().collect::<Vec<_>>())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

impl SlaveLauncher for LocalLauncher {
    fn launch(&self, req: LaunchRequest<'_>) -> Result<SlaveLink> {
        let factory = self.workers.get(req.protocol).ok_or_else(|| KioError::Launch {
            protocol: req.protocol.to_string(),
            reason: "no worker registered".into(),
        })?;

        let (app, worker) = tokio::io::duplex(self.buffer_size);
        let (worker_read, worker_write) = tokio::io::split(worker);
        let conn = Connection::new(worker_read, worker_write, &self.writer_config);
        let task = tokio::spawn(factory(conn, self.credentials.clone()));

        let (app_read, app_write) = tokio::io::split(app);
        let connect = async move { Ok((Box::new(app_read) as BoxedReader, Box::new(app_write) as BoxedWriter)) };

        let (link, io) = slave_channel(req.slave, &self.writer_config, req.max_payload_size);
        io.spawn(connect, Box::new(LocalTask(task.abort_handle())), req.events);
        tracing::debug!(slave = req.slave.0, protocol = req.protocol, "local worker started");
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::protocol::{Command, ErrorPayload, Message, DEFAULT_MAX_PAYLOAD_SIZE};
    use crate::slave::{SlaveEvent, SlaveEvents};
    use crate::writer::OutboundFrame;
    use tokio::sync::mpsc;

    struct Nothing;

    impl Protocol for Nothing {}

    fn request<'a>(protocol: &'a str, url: &'a Url, events: SlaveEventSink) -> LaunchRequest<'a> {
        LaunchRequest {
            slave: SlaveId(7),
            protocol,
            url,
            events,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    async fn next_frame(events: &mut SlaveEvents) -> crate::protocol::Frame {
        match events.recv().await.unwrap() {
            SlaveEvent::Frame { slave, frame } => {
                assert_eq!(slave, SlaveId(7));
                frame
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_launcher_round_trip() {
        let launcher = LocalLauncher::new().register("nothing", || Nothing);
        let url = Url::parse("nothing://host/file").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = launcher.launch(request("nothing", &url, tx)).unwrap();
        let payload = MsgPackCodec::encode_bytes(&url).unwrap();
        link.writer
            .send_now(OutboundFrame::new(Command::Get as i32, payload))
            .unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.id(), Message::Error as i32);
        let err: ErrorPayload = MsgPackCodec::decode(frame.payload()).unwrap();
        assert_eq!(err.text, "nothing: retrieve data is not supported");
    }

    #[tokio::test]
    async fn test_local_launcher_kill_reports_death() {
        let launcher = LocalLauncher::new().register("nothing", || Nothing);
        let url = Url::parse("nothing://host/").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = launcher.launch(request("nothing", &url, tx)).unwrap();
        link.kill.send(()).unwrap();

        match rx.recv().await.unwrap() {
            SlaveEvent::Died { slave, reason } => {
                assert_eq!(slave, SlaveId(7));
                assert_eq!(reason, "killed");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_launcher_unknown_protocol() {
        let launcher = LocalLauncher::new();
        let url = Url::parse("gopher://host/").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = launcher.launch(request("gopher", &url, tx)).unwrap_err();
        assert!(matches!(err, KioError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_process_launcher_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path());
        let url = Url::parse("ftp://host/").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = launcher.launch(request("ftp", &url, tx)).unwrap_err();
        match err {
            KioError::Launch { protocol, .. } => assert_eq!(protocol, "ftp"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_process_launcher_rejects_bad_handshake() {
        let dir = tempfile::tempdir().unwrap();
        // echo prints its argument, which is not an $init line.
        std::os::unix::fs::symlink("/bin/echo", dir.path().join("kio_echo")).unwrap();
        let launcher = ProcessLauncher::new(dir.path()).handshake_timeout(Duration::from_secs(5));
        let url = Url::parse("echo://host/").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = launcher.launch(request("echo", &url, tx)).unwrap();
        assert!(link.pid.is_some());
        match rx.recv().await.unwrap() {
            SlaveEvent::Died { reason, .. } => assert!(reason.contains("JSON")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_executable_path() {
        let launcher = ProcessLauncher::new("/usr/lib/kio");
        assert_eq!(launcher.executable("sftp"), PathBuf::from("/usr/lib/kio/kio_sftp"));
    }
}
