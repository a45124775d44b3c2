//! The worker dispatch loop.
//!
//! ```text
//!            ┌────────── normal mode ──────────┐
//! frame ──►  │ HOST / GET / PUT / STAT / ...   │ ──opened()──► open loop
//!            │ subcommands (always legal)      │ ◄──close()─── READ/WRITE/SEEK/CLOSE
//!            └─────────────────────────────────┘
//! ```
//!
//! Subcommands that need the protocol object but arrive inside a blocking
//! sub-dialogue are queued by the [`Worker`] and dispatched here, in order,
//! before the next frame is read.

use std::sync::Arc;

use url::Url;

use crate::auth::CredentialCache;
use crate::codec::MsgPackCodec;
use crate::connection::Connection;
use crate::error::{ErrorCode, Result};
use crate::protocol::{
    ChmodArgs, ChownArgs, Command, CopyArgs, DelArgs, Frame, HostArgs, MkdirArgs, OpenArgs,
    PutArgs, RenameArgs, SymlinkArgs,
};

use super::{KillSwitch, Protocol, Worker};

fn decode<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T> {
    MsgPackCodec::decode(frame.payload())
}

/// Runs one [`Protocol`] against one application connection.
pub struct SlaveBase<P: Protocol> {
    worker: Worker,
    protocol: P,
}

impl<P: Protocol> SlaveBase<P> {
    pub fn new(protocol_name: &str, protocol: P, connection: Connection) -> Self {
        Self {
            worker: Worker::new(protocol_name, connection),
            protocol,
        }
    }

    pub fn with_kill_switch(mut self, kill: KillSwitch) -> Self {
        self.worker.set_kill_switch(kill);
        self
    }

    pub fn with_credential_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.worker.set_credential_cache(cache);
        self
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.worker.kill_switch().clone()
    }

    /// Serve commands until the application hangs up or the worker is killed.
    pub async fn run(mut self) {
        tracing::debug!(protocol = %self.worker.protocol(), "dispatch loop started");
        while !self.worker.should_exit() {
            if let Some(frame) = self.worker.pop_deferred() {
                self.handle(frame).await;
                continue;
            }
            if let Some(data) = self.worker.take_due_timeout() {
                let res = self.protocol.special(&mut self.worker, data).await;
                self.complete(res).await;
                continue;
            }

            let wait = self.worker.timeout_remaining();
            let kill = self.worker.kill_switch().clone();
            let ready = {
                let conn = self.worker.connection();
                tokio::select! {
                    res = conn.wait_for_frame(wait) => Some(res),
                    _ = kill.killed() => None,
                }
            };
            match ready {
                Some(Ok(true)) => {}
                Some(Ok(false)) => continue,
                Some(Err(e)) => {
                    tracing::debug!("application gone: {}", e);
                    break;
                }
                None => break,
            }

            match self.worker.connection().read().await {
                Ok(frame) => self.handle(frame).await,
                Err(e) => {
                    tracing::debug!("application gone: {}", e);
                    break;
                }
            }
        }
        if self.worker.was_killed() {
            tracing::info!(protocol = %self.worker.protocol(), "worker killed");
        }
    }

    async fn handle(&mut self, frame: Frame) {
        let res = if self.worker.in_open_loop() {
            self.dispatch_open(frame).await
        } else {
            self.dispatch(frame).await
        };
        self.complete(res).await;
    }

    /// Failed operations that still have a connection get an internal error.
    async fn complete(&mut self, res: Result<()>) {
        let Err(e) = res else {
            return;
        };
        if self.worker.should_exit() {
            tracing::debug!("operation aborted: {}", e);
            return;
        }
        tracing::warn!(protocol = %self.worker.protocol(), "operation failed: {}", e);
        let _ = self.worker.error(ErrorCode::INTERNAL, e.to_string()).await;
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let Some(cmd) = Command::from_id(frame.id()) else {
            tracing::debug!("ignoring unknown command {}", frame.id());
            return Ok(());
        };
        if cmd.is_sub_command() {
            return self.dispatch_sub_command(cmd, frame).await;
        }

        let worker = &mut self.worker;
        let protocol = &mut self.protocol;
        match cmd {
            Command::Host => {
                let target: HostArgs = decode(&frame)?;
                worker.on_host(&target);
                protocol.set_host(worker, &target).await
            }
            Command::Connect => protocol.open_connection(worker).await,
            Command::Disconnect => {
                worker.on_disconnect();
                protocol.close_connection(worker).await
            }
            Command::Get => {
                let url: Url = decode(&frame)?;
                protocol.get(worker, &url).await
            }
            Command::Put => {
                let args: PutArgs = decode(&frame)?;
                worker.on_put();
                protocol.put(worker, &args).await
            }
            Command::Stat => {
                let url: Url = decode(&frame)?;
                protocol.stat(worker, &url).await
            }
            Command::MimeType => {
                let url: Url = decode(&frame)?;
                protocol.mimetype(worker, &url).await
            }
            Command::ListDir => {
                let url: Url = decode(&frame)?;
                protocol.list_dir(worker, &url).await
            }
            Command::Mkdir => {
                let args: MkdirArgs = decode(&frame)?;
                protocol.mkdir(worker, &args).await
            }
            Command::Rename => {
                let args: RenameArgs = decode(&frame)?;
                protocol.rename(worker, &args).await
            }
            Command::Symlink => {
                let args: SymlinkArgs = decode(&frame)?;
                protocol.symlink(worker, &args).await
            }
            Command::Copy => {
                let args: CopyArgs = decode(&frame)?;
                protocol.copy(worker, &args).await
            }
            Command::Del => {
                let args: DelArgs = decode(&frame)?;
                protocol.del(worker, &args).await
            }
            Command::Chmod => {
                let args: ChmodArgs = decode(&frame)?;
                protocol.chmod(worker, &args).await
            }
            Command::Chown => {
                let args: ChownArgs = decode(&frame)?;
                protocol.chown(worker, &args).await
            }
            Command::Special => protocol.special(worker, frame.payload).await,
            Command::Open => {
                let args: OpenArgs = decode(&frame)?;
                protocol.open(worker, &args).await
            }
            Command::None => {
                tracing::debug!("NONE outside of a dialogue");
                Ok(())
            }
            other => {
                tracing::debug!("ignoring {:?} in normal mode", other);
                Ok(())
            }
        }
    }

    async fn dispatch_sub_command(&mut self, cmd: Command, frame: Frame) -> Result<()> {
        let Some(frame) = self.worker.apply_sub_command(cmd, frame).await? else {
            return Ok(());
        };
        let worker = &mut self.worker;
        let protocol = &mut self.protocol;
        match cmd {
            Command::ReparseConfiguration => protocol.reparse_configuration(worker).await,
            Command::SubUrl => {
                let url: Url = decode(&frame)?;
                worker.on_sub_url(url.clone());
                protocol.set_sub_url(worker, &url).await
            }
            Command::MultiGet => protocol.multi_get(worker, frame.payload).await,
            _ => Ok(()),
        }
    }

    async fn dispatch_open(&mut self, frame: Frame) -> Result<()> {
        let cmd = Command::from_id(frame.id());
        if let Some(cmd) = cmd.filter(|c| c.is_sub_command()) {
            return self.dispatch_sub_command(cmd, frame).await;
        }

        let worker = &mut self.worker;
        let protocol = &mut self.protocol;
        match cmd {
            Some(Command::Read) => {
                let size: u64 = decode(&frame)?;
                protocol.read(worker, size).await
            }
            Some(Command::Write) => protocol.write(worker, frame.payload).await,
            Some(Command::Seek) => {
                let offset: u64 = decode(&frame)?;
                protocol.seek(worker, offset).await
            }
            Some(Command::Close) => {
                protocol.close(worker).await?;
                if worker.in_open_loop() {
                    // close() must end the operation one way or another.
                    worker.finished().await?;
                }
                Ok(())
            }
            Some(Command::None) => Ok(()),
            other => {
                tracing::warn!("unexpected {:?} in open loop", other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KioError;
    use crate::protocol::{ErrorPayload, Message};
    use crate::writer::WriterConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::io::duplex;

    #[derive(Default)]
    struct Echo {
        hosts: Vec<String>,
    }

    #[async_trait]
    impl Protocol for Echo {
        async fn set_host(&mut self, _worker: &mut Worker, target: &HostArgs) -> Result<()> {
            self.hosts.push(target.host.clone());
            Ok(())
        }

        async fn get(&mut self, worker: &mut Worker, url: &Url) -> Result<()> {
            worker.data(Bytes::from(url.path().to_string())).await?;
            worker.finished().await
        }

        async fn stat(&mut self, _worker: &mut Worker, _url: &Url) -> Result<()> {
            Err(KioError::Protocol("stat exploded".into()))
        }
    }

    fn start() -> Connection {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let config = WriterConfig::default();
        let base = SlaveBase::new("echo", Echo::default(), Connection::new(br, bw, &config));
        tokio::spawn(base.run());
        Connection::new(ar, aw, &config)
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_future_is_send() {
        let (_a, b) = duplex(1024);
        let (br, bw) = tokio::io::split(b);
        let base = SlaveBase::new("echo", Echo::default(), Connection::new(br, bw, &WriterConfig::default()));
        let run = base.run();
        assert_send(&run);
    }

    fn url(s: &str) -> Bytes {
        MsgPackCodec::encode_bytes(&Url::parse(s).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_get_round_trip() {
        let mut app = start();
        app.send(Command::Get, url("echo://host/some/path")).await.unwrap();

        let data = app.read().await.unwrap();
        assert_eq!(data.id(), Message::Data as i32);
        assert_eq!(data.payload(), b"/some/path");
        assert_eq!(app.read().await.unwrap().id(), Message::Finished as i32);
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let mut app = start();
        app.send(Command::ListDir, url("echo://host/")).await.unwrap();

        let frame = app.read().await.unwrap();
        assert_eq!(frame.id(), Message::Error as i32);
        let err: ErrorPayload = MsgPackCodec::decode(frame.payload()).unwrap();
        assert_eq!(err.code, ErrorCode::UNSUPPORTED_ACTION);
    }

    #[tokio::test]
    async fn test_operation_failure_becomes_internal_error() {
        let mut app = start();
        app.send(Command::Stat, url("echo://host/")).await.unwrap();

        let err: ErrorPayload = MsgPackCodec::decode(app.read().await.unwrap().payload()).unwrap();
        assert_eq!(err.code, ErrorCode::INTERNAL);
        assert!(err.text.contains("stat exploded"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_reported() {
        let mut app = start();
        app.send(Command::Get, Bytes::from_static(b"\xc1")).await.unwrap();

        let frame = app.read().await.unwrap();
        assert_eq!(frame.id(), Message::Error as i32);
    }

    #[tokio::test]
    async fn test_slave_status_reports_host() {
        let mut app = start();
        let target = HostArgs {
            host: "example.org".into(),
            ..HostArgs::default()
        };
        app.send(Command::Host, MsgPackCodec::encode_bytes(&target).unwrap())
            .await
            .unwrap();
        app.send(Command::SlaveStatus, Bytes::new()).await.unwrap();

        let frame = app.read().await.unwrap();
        assert_eq!(frame.id(), Message::SlaveStatus as i32);
        let status: crate::protocol::SlaveStatus = MsgPackCodec::decode(frame.payload()).unwrap();
        assert_eq!(status.host, "example.org");
        assert_eq!(status.protocol, "echo");
        assert!(!status.connected);
    }

    #[tokio::test]
    async fn test_kill_switch_stops_loop() {
        let (a, b) = duplex(1024);
        let (_ar, _aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let base = SlaveBase::new(
            "echo",
            Echo::default(),
            Connection::new(br, bw, &WriterConfig::default()),
        );
        let kill = base.kill_switch();
        let task = tokio::spawn(base.run());

        kill.kill();
        task.await.unwrap();
    }
}
