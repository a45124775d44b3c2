//! Deprecated refcounted authorization keys.
//!
//! Old workers announce credentials they stored elsewhere with
//! `AUTH_KEY(key, group, keep)`. The registry counts how many groups use a
//! key (under `<key>-refcount` in the store) and removes the key when the
//! last non-persistent user goes away. New code uses
//! [`CredentialCache`](super::CredentialCache) instead.

use std::collections::HashMap;

use crate::protocol::AuthKeyPayload;

/// Key/value backend of the legacy scheme.
pub trait LegacyKeyStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    values: HashMap<String, String>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LegacyKeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedKey {
    key: String,
    persistent: bool,
}

/// Reference counts for legacy authorization keys, grouped by owner.
pub struct AuthKeyRegistry {
    store: Box<dyn LegacyKeyStore>,
    groups: HashMap<String, Vec<TrackedKey>>,
}

impl AuthKeyRegistry {
    pub fn new(store: Box<dyn LegacyKeyStore>) -> Self {
        Self {
            store,
            groups: HashMap::new(),
        }
    }

    pub fn store(&self) -> &dyn LegacyKeyStore {
        self.store.as_ref()
    }

    /// Take a reference on `key` for `group`. Repeats within a group are ignored.
    pub fn register(&mut self, payload: &AuthKeyPayload) {
        let tracked = self.groups.entry(payload.group.clone()).or_default();
        if tracked.iter().any(|t| t.key == payload.key) {
            return;
        }
        tracked.push(TrackedKey {
            key: payload.key.clone(),
            persistent: payload.keep,
        });
        let count = refcount(self.store.as_ref(), &payload.key) + 1;
        self.store.set(&refcount_key(&payload.key), count.to_string());
        tracing::debug!(key = %payload.key, group = %payload.group, count, "auth key registered");
    }

    /// Drop every non-persistent reference on `key`.
    pub fn release(&mut self, key: &str) {
        let mut dropped = 0;
        for tracked in self.groups.values_mut() {
            tracked.retain(|t| {
                let drop = t.key == key && !t.persistent;
                dropped += drop as usize;
                !drop
            });
        }
        for _ in 0..dropped {
            self.drop_ref(key);
        }
    }

    /// Drop the references held by `group`, except persistent ones.
    pub fn release_group(&mut self, group: &str) {
        let Some(tracked) = self.groups.remove(group) else {
            return;
        };
        let (persistent, transient): (Vec<_>, Vec<_>) = tracked.into_iter().partition(|t| t.persistent);
        for t in transient {
            self.drop_ref(&t.key);
        }
        if !persistent.is_empty() {
            self.groups.insert(group.to_string(), persistent);
        }
    }

    pub fn release_all(&mut self) {
        let groups: Vec<String> = self.groups.keys().cloned().collect();
        for group in groups {
            self.release_group(&group);
        }
    }

    /// Live references on `key`.
    pub fn refcount(&self, key: &str) -> u32 {
        refcount(self.store.as_ref(), key)
    }

    fn drop_ref(&mut self, key: &str) {
        let count = refcount(self.store.as_ref(), key).saturating_sub(1);
        if count == 0 {
            self.store.remove(key);
            self.store.remove(&refcount_key(key));
            tracing::debug!(key, "auth key removed");
        } else {
            self.store.set(&refcount_key(key), count.to_string());
        }
    }
}

impl Default for AuthKeyRegistry {
    fn default() -> Self {
        Self::new(Box::new(MemoryKeyStore::new()))
    }
}

fn refcount_key(key: &str) -> String {
    format!("{}-refcount", key)
}

fn refcount(store: &dyn LegacyKeyStore, key: &str) -> u32 {
    store
        .get(&refcount_key(key))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
