//! Transport module - Unix domain socket rendezvous.

mod pipe;

pub use pipe::{generate_socket_path, generate_socket_path_in, PipeListener, PipeStream};
