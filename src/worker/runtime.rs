//! Worker process runtime.
//!
//! The [`WorkerBuilder`] configures a worker process and runs it:
//! 1. Initialise stderr logging, crash and SIGTERM handling
//! 2. Bind a rendezvous socket
//! 3. Announce it with `$init` on stdout
//! 4. Accept the application and run the dispatch loop
//!
//! # Example
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> kio_dispatch::Result<()> {
//!     kio_dispatch::worker::run_worker("ftp", FtpProtocol::default()).await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};

use crate::auth::CredentialCache;
use crate::connection::Connection;
use crate::control::{build_init_message, write_stdout_line, InitParams};
use crate::error::{KioError, Result};
use crate::transport::{generate_socket_path, PipeListener};
use crate::writer::WriterConfig;

use super::{KillSwitch, Protocol, SlaveBase};

/// How long a worker waits for the application to connect.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for a worker process.
pub struct WorkerBuilder<P: Protocol> {
    protocol_name: String,
    protocol: P,
    writer_config: WriterConfig,
    accept_timeout: Duration,
    credentials: Option<Arc<dyn CredentialCache>>,
}

impl<P: Protocol + 'static> WorkerBuilder<P> {
    pub fn new(protocol_name: &str, protocol: P) -> Self {
        Self {
            protocol_name: protocol_name.to_string(),
            protocol,
            writer_config: WriterConfig::default(),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            credentials: None,
        }
    }

    /// Set the maximum pending frames before output primitives wait.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn credential_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.credentials = Some(cache);
        self
    }

    /// Run until the application disconnects or SIGTERM arrives.
    pub async fn run(self) -> Result<()> {
        crate::logging::init_worker_logging(&self.protocol_name);
        install_crash_handler(&self.protocol_name);

        let kill = KillSwitch::new();
        watch_terminate(kill.clone())?;

        let path = generate_socket_path();
        let listener = PipeListener::bind(&path).await?;
        let init = build_init_message(&InitParams::new(&self.protocol_name, path))?;
        write_stdout_line(&init)?;

        let stream = tokio::time::timeout(self.accept_timeout, listener.accept())
            .await
            .map_err(|_| KioError::Protocol("application never connected".into()))??;
        drop(listener);
        tracing::info!(protocol = %self.protocol_name, pid = std::process::id(), "application connected");

        let (reader, writer) = stream.into_split();
        let conn = Connection::new(reader, writer, &self.writer_config);
        let mut base = SlaveBase::new(&self.protocol_name, self.protocol, conn).with_kill_switch(kill);
        if let Some(cache) = self.credentials {
            base = base.with_credential_cache(cache);
        }
        base.run().await;
        Ok(())
    }
}

/// Run `protocol` as this process's worker with default settings.
pub async fn run_worker<P: Protocol + 'static>(protocol_name: &str, protocol: P) -> Result<()> {
    WorkerBuilder::new(protocol_name, protocol).run().await
}

/// A panic leaves the pool's view of this worker undefined: report it and
/// exit so the application sees the slave die.
fn install_crash_handler(protocol: &str) {
    let protocol = protocol.to_string();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        eprintln!(
            "kio worker: ####### CRASH ###### protocol = {} pid = {}",
            protocol,
            std::process::id()
        );
        default_hook(info);
        std::process::exit(1);
    }));
}

fn watch_terminate(kill: KillSwitch) -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        if term.recv().await.is_some() {
            tracing::info!("SIGTERM received");
            kill.kill();
        }
    });
    Ok(())
}
