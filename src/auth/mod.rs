//! Credentials shared between workers.
//!
//! Workers never talk to a password store directly. They go through a
//! [`CredentialCache`] which remembers what the user entered, serialises
//! prompts with a sequence number (so two workers failing on the same site
//! do not both ask) and may be backed by anything from a hash map to a
//! keyring daemon.
//!
//! [`AuthKeyRegistry`] is the older refcounted key scheme, kept for workers
//! that still send `AUTH_KEY`.

mod legacy;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub use legacy::{AuthKeyRegistry, LegacyKeyStore, MemoryKeyStore};
pub use memory::{MemoryCredentialCache, Prompter};

/// One set of credentials and what they are for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub url: Url,
    pub username: String,
    pub password: String,
    /// Server-supplied realm; empty matches any realm.
    pub realm: String,
    /// Shown to the user above the prompt.
    pub comment: String,
    pub keep_password: bool,
    /// Only reuse for URLs below the one the credentials were entered for.
    pub verify_path: bool,
    /// Set by a prompt when the user changed anything.
    pub modified: bool,
}

impl AuthInfo {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: String::new(),
            password: String::new(),
            realm: String::new(),
            comment: String::new(),
            keep_password: false,
            verify_path: false,
            modified: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .field("realm", &self.realm)
            .field("keep_password", &self.keep_password)
            .field("verify_path", &self.verify_path)
            .field("modified", &self.modified)
            .finish()
    }
}

/// Who is asking, taken from job metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// `window-id` metadata, 0 when absent.
    pub window_id: i64,
    /// `user-timestamp` metadata, 0 when absent.
    pub user_timestamp: i64,
    /// Sequence number of the last prompt this worker saw.
    pub seq_nr: i64,
    /// `no-auth-prompt=true`: never show a dialog.
    pub no_prompt: bool,
}

/// Outcome of [`CredentialCache::prompt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptReply {
    /// Sequence number the worker should remember for its next prompt.
    pub seq_nr: i64,
    /// `None` when the user cancelled or prompting was not allowed.
    pub info: Option<AuthInfo>,
}

/// Credential lookup, storage and prompting.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Cached credentials matching `info`, without prompting.
    async fn lookup(&self, info: &AuthInfo, ctx: &AuthContext) -> Option<AuthInfo>;

    /// Remember `info`. Returns `false` when a newer entry already exists.
    async fn store(&self, info: &AuthInfo, ctx: &AuthContext) -> bool;

    /// Ask the user, unless another worker already did so since `ctx.seq_nr`.
    async fn prompt(&self, info: &AuthInfo, ctx: &AuthContext, error_message: &str) -> PromptReply;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let mut info = AuthInfo::new(Url::parse("ftp://example.org/").unwrap()).with_username("joe");
        info.password = "hunter2".into();
        let dbg = format!("{:?}", info);
        assert!(dbg.contains("joe"));
        assert!(!dbg.contains("hunter2"));
    }
}
