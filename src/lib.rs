//! # kio-dispatch
//!
//! Job scheduler, worker process pool and framed IPC for network-transparent
//! I/O slaves.
//!
//! An application submits [`Job`]s (get, put, stat, list, ...) against URLs.
//! The [`Scheduler`] matches each job to a slave: a worker process that
//! implements one protocol (ftp, sftp, http, ...). Slaves are reused across
//! jobs, capped per protocol and evicted when idle.
//!
//! ## Architecture
//!
//! - **Control Plane** (stdout): one JSON `$init` line announcing the
//!   worker's rendezvous socket
//! - **Data Plane** (Unix socket): length-prefixed frames, an 8-byte header
//!   (`u32` length, `i32` command id) followed by a MsgPack payload
//! - **Application side**: [`SchedulerService`] / [`SchedulerHandle`],
//!   one [`Slave`](slave::Slave) proxy per worker
//! - **Worker side**: [`worker::SlaveBase`] runs the dispatch loop and calls
//!   into a [`worker::Protocol`] implementation
//!
//! ## Example
//!
//! ```ignore
//! use kio_dispatch::{Job, SchedulerConfig, SchedulerService};
//! use kio_dispatch::slave::ProcessLauncher;
//!
//! #[tokio::main]
//! async fn main() -> kio_dispatch::Result<()> {
//!     kio_dispatch::logging::init_logging();
//!     let (scheduler, _task) =
//!         SchedulerService::spawn(SchedulerConfig::load_or_init()?, ProcessLauncher::new("/usr/lib/kio"));
//!
//!     let url = url::Url::parse("ftp://ftp.example.org/README").expect("valid url");
//!     let job = scheduler.submit(Job::get(url)?).await?;
//!     match job.read_to_end().await {
//!         Ok(data) => println!("{} bytes", data.len()),
//!         Err(e) => eprintln!("get failed: {}", e),
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod flow;
pub mod job;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod slave;
pub mod transport;
pub mod worker;
pub mod writer;

pub use config::SchedulerConfig;
pub use error::{ErrorCode, JobError, KioError, Result};
pub use job::{Job, JobEvent, JobHandle, JobId, JobOptions};
pub use scheduler::{JobControl, Scheduler, SchedulerHandle, SchedulerService};
