//! `$init` handshake line.
//!
//! A worker process tells the application where to connect by writing one
//! JSON-RPC line on stdout:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"$init","params":{"protocol":"ftp","pid":4242,"socket":"/tmp/kio-dispatch-4242-1f.sock","version":"1.0"}}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{KioError, Result};

/// Wire protocol version announced by workers.
pub const PROTOCOL_VERSION: &str = "1.0";

const INIT_METHOD: &str = "$init";

/// Parameters of the `$init` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitParams {
    /// Protocol the worker implements.
    pub protocol: String,
    pub pid: u32,
    /// Socket the worker is listening on.
    pub socket: PathBuf,
    pub version: String,
}

impl InitParams {
    pub fn new(protocol: &str, socket: PathBuf) -> Self {
        Self {
            protocol: protocol.to_string(),
            pid: std::process::id(),
            socket,
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InitMessage {
    jsonrpc: String,
    method: String,
    params: InitParams,
}

/// Build the `$init` line (without trailing newline).
pub fn build_init_message(params: &InitParams) -> Result<String> {
    let msg = InitMessage {
        jsonrpc: "2.0".to_string(),
        method: INIT_METHOD.to_string(),
        params: params.clone(),
    };
    Ok(serde_json::to_string(&msg)?)
}

/// Parse and validate an `$init` line read from a worker.
///
/// Rejects other methods and workers speaking a different major version.
pub fn parse_init_message(line: &str) -> Result<InitParams> {
    let msg: InitMessage = serde_json::from_str(line.trim_end())?;
    if msg.method != INIT_METHOD {
        return Err(KioError::Protocol(format!(
            "expected {} from worker, got {}",
            INIT_METHOD, msg.method
        )));
    }
    if major(&msg.params.version) != major(PROTOCOL_VERSION) {
        return Err(KioError::Protocol(format!(
            "worker speaks protocol {}, expected {}",
            msg.params.version, PROTOCOL_VERSION
        )));
    }
    Ok(msg.params)
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
