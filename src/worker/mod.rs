//! Worker side: the dispatch loop that runs inside a slave.
//!
//! - [`Protocol`]: the operations a concrete worker implements
//! - [`Worker`]: output primitives and blocking sub-dialogues
//! - [`SlaveBase`]: reads commands and drives the protocol
//! - [`WorkerBuilder`] / [`run_worker`]: process entry point

mod context;
mod dispatch;
mod protocol;
mod runtime;

pub use context::{
    KillSwitch, Worker, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROXY_CONNECT_TIMEOUT,
    DEFAULT_READ_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
};
pub use dispatch::SlaveBase;
pub use protocol::Protocol;
pub use runtime::{run_worker, WorkerBuilder, DEFAULT_ACCEPT_TIMEOUT};
