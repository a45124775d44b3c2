//! Error types for kio-dispatch.
//!
//! Two layers:
//! - [`KioError`] covers failures of the machinery itself (I/O, codec, launch,
//!   configuration). These never reach a job caller directly.
//! - [`JobError`] is the terminal outcome of a failed job: an [`ErrorCode`]
//!   plus a human readable text, exactly as a worker reported it or as the
//!   scheduler synthesised it (slave died, cancelled, spawn failed).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for all transport and bookkeeping operations.
#[derive(Debug, Error)]
pub enum KioError {
    /// I/O error during socket or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (control plane handshake only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol violation (oversized frame, malformed payload, bad handshake).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Write queue stayed full for longer than the configured timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// A worker process could not be started.
    #[error("Cannot launch worker for {protocol}: {reason}")]
    Launch { protocol: String, reason: String },

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be serialized.
    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// XDG base directory lookup failed.
    #[error("Config directory error: {0}")]
    ConfigDir(#[from] xdg::BaseDirectoriesError),

    /// The scheduler service has shut down.
    #[error("Scheduler stopped")]
    SchedulerStopped,

    /// The referenced job is unknown or already finished.
    #[error("Unknown job {0}")]
    UnknownJob(u64),

    /// The referenced slave is unknown or dead.
    #[error("Unknown slave {0}")]
    UnknownSlave(u64),
}

/// Result type alias using KioError.
pub type Result<T> = std::result::Result<T, KioError>;

/// Job-level error code carried by `MSG_ERROR` frames.
///
/// Kept as an open integer so codes from newer workers survive the trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

const USER_DEFINED: i32 = 100;

impl ErrorCode {
    pub const USER_CANCELED: ErrorCode = ErrorCode(1);
    pub const CANNOT_OPEN_FOR_READING: ErrorCode = ErrorCode(USER_DEFINED + 1);
    pub const CANNOT_OPEN_FOR_WRITING: ErrorCode = ErrorCode(USER_DEFINED + 2);
    pub const CANNOT_LAUNCH_PROCESS: ErrorCode = ErrorCode(USER_DEFINED + 3);
    pub const INTERNAL: ErrorCode = ErrorCode(USER_DEFINED + 4);
    pub const MALFORMED_URL: ErrorCode = ErrorCode(USER_DEFINED + 5);
    pub const UNSUPPORTED_PROTOCOL: ErrorCode = ErrorCode(USER_DEFINED + 6);
    pub const UNSUPPORTED_ACTION: ErrorCode = ErrorCode(USER_DEFINED + 8);
    pub const IS_DIRECTORY: ErrorCode = ErrorCode(USER_DEFINED + 9);
    pub const IS_FILE: ErrorCode = ErrorCode(USER_DEFINED + 10);
    pub const DOES_NOT_EXIST: ErrorCode = ErrorCode(USER_DEFINED + 11);
    pub const FILE_ALREADY_EXIST: ErrorCode = ErrorCode(USER_DEFINED + 12);
    pub const UNKNOWN_HOST: ErrorCode = ErrorCode(USER_DEFINED + 14);
    pub const ACCESS_DENIED: ErrorCode = ErrorCode(USER_DEFINED + 15);
    pub const COULD_NOT_CONNECT: ErrorCode = ErrorCode(USER_DEFINED + 23);
    pub const CONNECTION_BROKEN: ErrorCode = ErrorCode(USER_DEFINED + 24);
    pub const COULD_NOT_LOGIN: ErrorCode = ErrorCode(USER_DEFINED + 33);
    pub const CANNOT_RESUME: ErrorCode = ErrorCode(USER_DEFINED + 39);
    pub const SLAVE_DIED: ErrorCode = ErrorCode(USER_DEFINED + 43);
    pub const COULD_NOT_AUTHENTICATE: ErrorCode = ErrorCode(USER_DEFINED + 46);
    pub const ABORTED: ErrorCode = ErrorCode(USER_DEFINED + 47);
    pub const SERVER_TIMEOUT: ErrorCode = ErrorCode(USER_DEFINED + 49);
    pub const UNKNOWN: ErrorCode = ErrorCode(USER_DEFINED + 51);
    pub const NEED_PASSWD: ErrorCode = ErrorCode(USER_DEFINED + 58);
    pub const SLAVE_DEFINED: ErrorCode = ErrorCode(USER_DEFINED + 63);
    pub const COULD_NOT_SEEK: ErrorCode = ErrorCode(USER_DEFINED + 66);

    /// Symbolic name for well-known codes.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::USER_CANCELED => "user canceled",
            Self::CANNOT_OPEN_FOR_READING => "cannot open for reading",
            Self::CANNOT_OPEN_FOR_WRITING => "cannot open for writing",
            Self::CANNOT_LAUNCH_PROCESS => "cannot launch process",
            Self::INTERNAL => "internal error",
            Self::MALFORMED_URL => "malformed url",
            Self::UNSUPPORTED_PROTOCOL => "unsupported protocol",
            Self::UNSUPPORTED_ACTION => "unsupported action",
            Self::IS_DIRECTORY => "is a directory",
            Self::IS_FILE => "is a file",
            Self::DOES_NOT_EXIST => "does not exist",
            Self::FILE_ALREADY_EXIST => "file already exists",
            Self::UNKNOWN_HOST => "unknown host",
            Self::ACCESS_DENIED => "access denied",
            Self::COULD_NOT_CONNECT => "could not connect",
            Self::CONNECTION_BROKEN => "connection broken",
            Self::COULD_NOT_LOGIN => "could not login",
            Self::CANNOT_RESUME => "cannot resume",
            Self::SLAVE_DIED => "slave died",
            Self::COULD_NOT_AUTHENTICATE => "could not authenticate",
            Self::ABORTED => "aborted",
            Self::SERVER_TIMEOUT => "server timeout",
            Self::UNKNOWN => "unknown error",
            Self::NEED_PASSWD => "password needed",
            Self::SLAVE_DEFINED => "slave defined",
            Self::COULD_NOT_SEEK => "could not seek",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "error {}", self.0),
        }
    }
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {text}")]
pub struct JobError {
    pub code: ErrorCode,
    pub text: String,
}

impl JobError {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn user_canceled() -> Self {
        Self::new(ErrorCode::USER_CANCELED, "")
    }

    pub fn slave_died(protocol: &str) -> Self {
        Self::new(ErrorCode::SLAVE_DIED, protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display_known() {
        assert_eq!(
            ErrorCode::UNSUPPORTED_ACTION.to_string(),
            "unsupported action (108)"
        );
        assert_eq!(ErrorCode::USER_CANCELED.to_string(), "user canceled (1)");
    }

    #[test]
    fn test_error_code_display_unknown() {
        assert_eq!(ErrorCode(4242).to_string(), "error 4242");
        assert!(ErrorCode(4242).name().is_none());
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::new(ErrorCode::DOES_NOT_EXIST, "/tmp/missing");
        assert_eq!(err.to_string(), "does not exist (111): /tmp/missing");
    }

    #[test]
    fn test_kio_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: KioError = io.into();
        assert!(matches!(err, KioError::Io(_)));
    }
}
