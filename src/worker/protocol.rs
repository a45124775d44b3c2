//! The operations a worker implements.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::Result;
use crate::protocol::{
    ChmodArgs, ChownArgs, Command, CopyArgs, DelArgs, HostArgs, MkdirArgs, OpenArgs, PutArgs,
    RenameArgs, SymlinkArgs,
};

use super::Worker;

/// One wire protocol (file, ftp, http, ...).
///
/// Every operation reports its outcome through the [`Worker`] it is given:
/// `worker.finished()` on success, `worker.error(..)` on failure. Returning
/// `Err` is reserved for infrastructure failures; the dispatch loop turns
/// those into an internal error or stops when the application is gone.
///
/// Operations left at their default answer "unsupported action", except
/// [`mimetype`](Protocol::mimetype) which falls back to `get`.
#[async_trait]
pub trait Protocol: Send {
    /// Target changed. Called for every `HOST`; connect lazily.
    async fn set_host(&mut self, _worker: &mut Worker, _target: &HostArgs) -> Result<()> {
        Ok(())
    }

    /// Establish a persistent connection (connected slaves).
    async fn open_connection(&mut self, worker: &mut Worker) -> Result<()> {
        worker.unsupported(Command::Connect).await
    }

    async fn close_connection(&mut self, _worker: &mut Worker) -> Result<()> {
        Ok(())
    }

    async fn get(&mut self, worker: &mut Worker, _url: &Url) -> Result<()> {
        worker.unsupported(Command::Get).await
    }

    async fn put(&mut self, worker: &mut Worker, _args: &PutArgs) -> Result<()> {
        worker.unsupported(Command::Put).await
    }

    async fn stat(&mut self, worker: &mut Worker, _url: &Url) -> Result<()> {
        worker.unsupported(Command::Stat).await
    }

    async fn mimetype(&mut self, worker: &mut Worker, url: &Url) -> Result<()> {
        self.get(worker, url).await
    }

    async fn list_dir(&mut self, worker: &mut Worker, _url: &Url) -> Result<()> {
        worker.unsupported(Command::ListDir).await
    }

    async fn mkdir(&mut self, worker: &mut Worker, _args: &MkdirArgs) -> Result<()> {
        worker.unsupported(Command::Mkdir).await
    }

    async fn rename(&mut self, worker: &mut Worker, _args: &RenameArgs) -> Result<()> {
        worker.unsupported(Command::Rename).await
    }

    async fn symlink(&mut self, worker: &mut Worker, _args: &SymlinkArgs) -> Result<()> {
        worker.unsupported(Command::Symlink).await
    }

    async fn copy(&mut self, worker: &mut Worker, _args: &CopyArgs) -> Result<()> {
        worker.unsupported(Command::Copy).await
    }

    async fn del(&mut self, worker: &mut Worker, _args: &DelArgs) -> Result<()> {
        worker.unsupported(Command::Del).await
    }

    async fn chmod(&mut self, worker: &mut Worker, _args: &ChmodArgs) -> Result<()> {
        worker.unsupported(Command::Chmod).await
    }

    async fn chown(&mut self, worker: &mut Worker, _args: &ChownArgs) -> Result<()> {
        worker.unsupported(Command::Chown).await
    }

    /// Protocol specific command, also fired by an armed timeout.
    async fn special(&mut self, worker: &mut Worker, _data: Bytes) -> Result<()> {
        worker.unsupported(Command::Special).await
    }

    async fn multi_get(&mut self, worker: &mut Worker, _data: Bytes) -> Result<()> {
        worker.unsupported(Command::MultiGet).await
    }

    /// Open a file for random access. Call `worker.opened()` to enter the
    /// open loop.
    async fn open(&mut self, worker: &mut Worker, _args: &OpenArgs) -> Result<()> {
        worker.unsupported(Command::Open).await
    }

    async fn read(&mut self, worker: &mut Worker, _size: u64) -> Result<()> {
        worker.unsupported(Command::Read).await
    }

    async fn write(&mut self, worker: &mut Worker, _data: Bytes) -> Result<()> {
        worker.unsupported(Command::Write).await
    }

    async fn seek(&mut self, worker: &mut Worker, _offset: u64) -> Result<()> {
        worker.unsupported(Command::Seek).await
    }

    async fn close(&mut self, worker: &mut Worker) -> Result<()> {
        worker.unsupported(Command::Close).await
    }

    async fn set_sub_url(&mut self, _worker: &mut Worker, _url: &Url) -> Result<()> {
        Ok(())
    }

    async fn reparse_configuration(&mut self, _worker: &mut Worker) -> Result<()> {
        Ok(())
    }
}
