//! Scheduler configuration, loaded from `~/.config/kio-dispatch/config.toml`.
//!
//! ```toml
//! max_slaves_default = 3
//! idle_timeout_secs = 180
//!
//! [protocols.webdavs]
//! slave_protocol = "webdav"
//! max_slaves = 5
//!
//! [protocols.http.metadata]
//! UserAgent = "kio-dispatch"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{MetaData, DEFAULT_MAX_PAYLOAD_SIZE};

/// Per-protocol settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Cap on concurrently active slaves; the global default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_slaves: Option<usize>,
    /// Protocol of the worker that actually serves this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave_protocol: Option<String>,
    /// Sent to every slave of this protocol as `CONFIG`.
    pub metadata: MetaData,
}

/// Global configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_slaves_default: usize,
    /// Idle slaves older than this are killed.
    pub idle_timeout_secs: u64,
    /// Period of the idle eviction timer.
    pub cleanup_interval_secs: u64,
    /// Directory holding `kio_<protocol>` executables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_dir: Option<PathBuf>,
    /// Frames above this size kill the slave connection.
    pub max_payload_size: u32,
    pub protocols: HashMap<String, ProtocolConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_slaves_default: 3,
            idle_timeout_secs: 180,
            cleanup_interval_secs: 30,
            worker_dir: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            protocols: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    /// Load from the XDG config dir, writing the defaults there if missing.
    pub fn load_or_init() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            let default_cfg = Self::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, toml::to_string_pretty(&default_cfg)?)?;
            tracing::info!("created default config at {}", path.display());
            return Ok(default_cfg);
        }
        Self::load(&path)
    }

    /// Protocol whose workers serve `protocol`.
    pub fn slave_protocol_for<'a>(&'a self, protocol: &'a str) -> &'a str {
        self.protocols
            .get(protocol)
            .and_then(|p| p.slave_protocol.as_deref())
            .unwrap_or(protocol)
    }

    /// Cap for an actual slave protocol. Never below 1.
    pub fn max_slaves_for(&self, slave_protocol: &str) -> usize {
        self.protocols
            .get(slave_protocol)
            .and_then(|p| p.max_slaves)
            .unwrap_or(self.max_slaves_default)
            .max(1)
    }

    pub fn metadata_for(&self, protocol: &str) -> MetaData {
        self.protocols
            .get(protocol)
            .map(|p| p.metadata.clone())
            .unwrap_or_default()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("kio-dispatch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_slaves_default, 3);
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(180));
        assert_eq!(cfg.cleanup_interval(), Duration::from_secs(30));
        assert_eq!(cfg.slave_protocol_for("ftp"), "ftp");
        assert_eq!(cfg.max_slaves_for("ftp"), 3);
    }

    #[test]
    fn test_protocol_tables() {
        let cfg = SchedulerConfig::from_toml_str(
            r#"
            max_slaves_default = 4

            [protocols.webdavs]
            slave_protocol = "webdav"

            [protocols.webdav]
            max_slaves = 2

            [protocols.http.metadata]
            UserAgent = "kio"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.slave_protocol_for("webdavs"), "webdav");
        assert_eq!(cfg.max_slaves_for("webdav"), 2);
        assert_eq!(cfg.max_slaves_for("http"), 4);
        assert_eq!(cfg.metadata_for("http").get("UserAgent").map(String::as_str), Some("kio"));
        assert!(cfg.metadata_for("ftp").is_empty());
        assert_eq!(cfg.idle_timeout_secs, 180);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let cfg = SchedulerConfig::from_toml_str("max_slaves_default = 0").unwrap();
        assert_eq!(cfg.max_slaves_for("ftp"), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "idle_timeout_secs = 5").unwrap();
        writeln!(file, "worker_dir = \"/opt/kio\"").unwrap();

        let cfg = SchedulerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.worker_dir, Some(PathBuf::from("/opt/kio")));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(SchedulerConfig::from_toml_str("max_slaves_default = \"many\"").is_err());
    }
}
