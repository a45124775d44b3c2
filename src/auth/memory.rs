//! In-memory [`CredentialCache`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{AuthContext, AuthInfo, CredentialCache, PromptReply};

/// Shows a password dialog: `(request, error message) -> answer`.
/// `None` means the user cancelled.
pub type Prompter = Arc<dyn Fn(&AuthInfo, &str) -> Option<AuthInfo> + Send + Sync>;

#[derive(Debug, Clone)]
struct Entry {
    info: AuthInfo,
    directory: String,
    seq_nr: i64,
}

/// Process-local credential cache.
///
/// Entries are keyed by scheme, host, port and realm. Among matching entries
/// the one stored for the longest path prefix of the request wins.
#[derive(Default)]
pub struct MemoryCredentialCache {
    entries: Mutex<Vec<Entry>>,
    seq: AtomicI64,
    prompter: Option<Prompter>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompter(prompter: Prompter) -> Self {
        Self {
            prompter: Some(prompter),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn best_match(entries: &[Entry], info: &AuthInfo) -> Option<usize> {
        let path = info.url.path();
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| same_site(&e.info, info))
            .filter(|(_, e)| info.realm.is_empty() || e.info.realm == info.realm)
            .filter(|(_, e)| !e.info.verify_path || path.starts_with(&e.directory))
            .filter(|(_, e)| info.username.is_empty() || e.info.username == info.username)
            .max_by_key(|(_, e)| e.directory.len())
            .map(|(i, _)| i)
    }

    fn insert(&self, info: &AuthInfo, seq_nr: i64) -> bool {
        let mut entries = self.lock();
        let directory = directory(info);
        let existing = entries.iter().position(|e| {
            same_site(&e.info, info) && e.info.realm == info.realm && e.directory == directory
        });
        let entry = Entry {
            info: AuthInfo {
                modified: false,
                ..info.clone()
            },
            directory,
            seq_nr,
        };
        match existing {
            Some(i) if entries[i].seq_nr > seq_nr => {
                tracing::debug!(url = %info.url, "ignoring stale credentials");
                false
            }
            Some(i) => {
                entries[i] = entry;
                true
            }
            None => {
                entries.push(entry);
                true
            }
        }
    }
}

#[async_trait]
impl CredentialCache for MemoryCredentialCache {
    async fn lookup(&self, info: &AuthInfo, _ctx: &AuthContext) -> Option<AuthInfo> {
        let entries = self.lock();
        Self::best_match(&entries, info).map(|i| entries[i].info.clone())
    }

    async fn store(&self, info: &AuthInfo, ctx: &AuthContext) -> bool {
        self.insert(info, ctx.seq_nr)
    }

    async fn prompt(&self, info: &AuthInfo, ctx: &AuthContext, error_message: &str) -> PromptReply {
        {
            let entries = self.lock();
            if let Some(i) = Self::best_match(&entries, info) {
                // Someone else prompted after this worker last did.
                if entries[i].seq_nr > ctx.seq_nr {
                    return PromptReply {
                        seq_nr: entries[i].seq_nr,
                        info: Some(entries[i].info.clone()),
                    };
                }
            }
        }

        let unanswered = PromptReply {
            seq_nr: ctx.seq_nr,
            info: None,
        };
        if ctx.no_prompt {
            tracing::debug!(url = %info.url, "prompting disabled");
            return unanswered;
        }
        let Some(prompter) = &self.prompter else {
            return unanswered;
        };
        tracing::debug!(url = %info.url, window_id = ctx.window_id, "asking for credentials");
        let Some(mut answer) = prompter(info, error_message) else {
            return unanswered;
        };
        answer.modified = true;

        let seq_nr = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.insert(&answer, seq_nr);
        PromptReply {
            seq_nr,
            info: Some(answer),
        }
    }
}

fn same_site(a: &AuthInfo, b: &AuthInfo) -> bool {
    a.url.scheme() == b.url.scheme()
        && a.url.host_str() == b.url.host_str()
        && a.url.port_or_known_default() == b.url.port_or_known_default()
}

/// Directory part of the URL path, with trailing slash.
fn directory(info: &AuthInfo) -> String {
    let path = info.url.path();
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn info(url: &str) -> AuthInfo {
        AuthInfo::new(Url::parse(url).unwrap())
    }

    fn creds(url: &str, user: &str, password: &str) -> AuthInfo {
        let mut info = info(url).with_username(user);
        info.password = password.into();
        info
    }

    #[tokio::test]
    async fn test_lookup_longest_prefix() {
        let cache = MemoryCredentialCache::new();
        let ctx = AuthContext::default();
        let mut root = creds("http://example.org/index.html", "root", "a");
        root.verify_path = true;
        let mut deep = creds("http://example.org/private/index.html", "deep", "b");
        deep.verify_path = true;
        assert!(cache.store(&root, &ctx).await);
        assert!(cache.store(&deep, &ctx).await);

        let hit = cache.lookup(&info("http://example.org/private/x/y"), &ctx).await.unwrap();
        assert_eq!(hit.username, "deep");
        let hit = cache.lookup(&info("http://example.org/public"), &ctx).await.unwrap();
        assert_eq!(hit.username, "root");
        assert!(cache.lookup(&info("http://other.org/"), &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_realm_and_port_are_part_of_the_key() {
        let cache = MemoryCredentialCache::new();
        let ctx = AuthContext::default();
        cache
            .store(&creds("http://example.org/", "joe", "x").with_realm("admin"), &ctx)
            .await;

        assert!(cache
            .lookup(&info("http://example.org/").with_realm("users"), &ctx)
            .await
            .is_none());
        assert!(cache.lookup(&info("http://example.org:8080/"), &ctx).await.is_none());
        assert!(cache.lookup(&info("http://example.org:80/"), &ctx).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_store_is_ignored() {
        let cache = MemoryCredentialCache::new();
        let newer = AuthContext {
            seq_nr: 5,
            ..AuthContext::default()
        };
        assert!(cache.store(&creds("ftp://h/", "new", "1"), &newer).await);
        assert!(!cache.store(&creds("ftp://h/", "old", "2"), &AuthContext::default()).await);

        let hit = cache.lookup(&info("ftp://h/"), &newer).await.unwrap();
        assert_eq!(hit.username, "new");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_once_for_concurrent_failures() {
        let prompter: Prompter = Arc::new(|req: &AuthInfo, _msg: &str| {
            let mut answer = req.clone().with_username("joe");
            answer.password = "secret".into();
            Some(answer)
        });
        let cache = MemoryCredentialCache::with_prompter(prompter);
        let ctx = AuthContext::default();

        let first = cache.prompt(&info("sftp://h/"), &ctx, "").await;
        assert_eq!(first.seq_nr, 1);
        assert!(first.info.as_ref().unwrap().modified);

        // A second worker that has not seen prompt #1 gets its result.
        let second = cache.prompt(&info("sftp://h/"), &ctx, "").await;
        assert_eq!(second.seq_nr, 1);
        assert_eq!(second.info.unwrap().username, "joe");

        // The first worker retrying after a failed login is asked again.
        let retry = cache
            .prompt(&info("sftp://h/"), &AuthContext { seq_nr: 1, ..ctx }, "wrong password")
            .await;
        assert_eq!(retry.seq_nr, 2);
    }

    #[tokio::test]
    async fn test_no_prompt_and_cancel() {
        let cache = MemoryCredentialCache::with_prompter(Arc::new(|_: &AuthInfo, _: &str| -> Option<AuthInfo> { None }));
        let ctx = AuthContext {
            seq_nr: 3,
            ..AuthContext::default()
        };
        let reply = cache.prompt(&info("ftp://h/"), &ctx, "").await;
        assert_eq!(reply, PromptReply { seq_nr: 3, info: None });

        let silent = MemoryCredentialCache::with_prompter(Arc::new(|_: &AuthInfo, _: &str| -> Option<AuthInfo> {
            panic!("must not prompt")
        }));
        let ctx = AuthContext {
            no_prompt: true,
            ..AuthContext::default()
        };
        assert!(silent.prompt(&info("ftp://h/"), &ctx, "").await.info.is_none());
    }
}
