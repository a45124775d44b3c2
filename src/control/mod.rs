//! Control plane module - `$init` handshake over stdio.
//!
//! # Workflow
//!
//! 1. The application spawns the worker with stdout piped
//! 2. The worker binds a socket and writes `$init` on stdout
//! 3. The application validates the line and connects to the socket
//! 4. Framed binary communication begins on the socket

mod init;
mod stdio;

pub use init::{build_init_message, parse_init_message, InitParams, PROTOCOL_VERSION};
pub use stdio::{read_control_line, write_stdout_line};
