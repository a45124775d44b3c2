//! Unix domain socket rendezvous between the application and a worker.
//!
//! The worker binds a fresh socket, announces its path through the `$init`
//! control line and accepts exactly one connection: the scheduler that
//! spawned it.
//!
//! # Example
//!
//! ```ignore
//! use kio_dispatch::transport::{generate_socket_path, PipeListener};
//!
//! let path = generate_socket_path();
//! let listener = PipeListener::bind(&path).await?;
//! let stream = listener.accept().await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/kio-dispatch-{pid}-{random}.sock`
pub fn generate_socket_path() -> PathBuf {
    generate_socket_path_in(&std::env::temp_dir())
}

/// Generate a unique socket path inside `dir`.
pub fn generate_socket_path_in(dir: &Path) -> PathBuf {
    let pid = std::process::id();
    dir.join(format!("kio-dispatch-{}-{:x}.sock", pid, rand_u64()))
}

/// Time, pid and a process-wide counter, mixed.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ (pid << 32) ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Unix domain socket listener. Removes its socket file on drop.
pub struct PipeListener {
    listener: UnixListener,
    path: PathBuf,
}

impl PipeListener {
    /// Bind to a socket path, replacing a stale socket file if present.
    pub async fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<PipeStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(PipeStream { stream })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connected socket, either side of the rendezvous.
pub struct PipeStream {
    stream: UnixStream,
}

impl PipeStream {
    /// Connect to a listening worker.
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Split into read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}
