//! In-process [`KeyStore`] for tests and local runs.
//!
//! Behaves like a Redis server as seen through the capability interface:
//! reading a key under the wrong representation yields
//! [`StoreError::WrongType`], and the document capability can be switched off
//! to mimic a server without the JSON module.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::store::{KeyStore, StoreError, StoreResult};

/// One stored representation
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Document(String),
    String(String),
    List(Vec<String>),
    Set(HashSet<String>),
    Hash(BTreeMap<String, String>),
}

impl StoredValue {
    pub fn set<I, T>(members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::Set(members.into_iter().map(Into::into).collect())
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Injected failure for one command name
#[derive(Debug, Clone, Copy)]
enum Failure {
    Transport,
    Timeout(Duration),
}

#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    documents_supported: bool,
    failing: RwLock<HashMap<&'static str, Failure>>,
    closed: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            documents_supported: true,
            failing: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// A store whose backend has no document capability
    pub fn without_documents() -> Self {
        Self {
            documents_supported: false,
            ..Self::new()
        }
    }

    pub fn with(self, key: impl Into<String>, value: StoredValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&self, key: impl Into<String>, value: StoredValue) {
        self.entries.write().insert(key.into(), value);
    }

    /// Make every later call of `command` (e.g. `"LRANGE"`) fail with a transport error
    pub fn fail_command(&self, command: &'static str) {
        self.failing.write().insert(command, Failure::Transport);
    }

    /// Make every later call of `command` report that it gave up after `after`
    pub fn time_out_command(&self, command: &'static str, after: Duration) {
        self.failing.write().insert(command, Failure::Timeout(after));
    }

    fn check(&self, command: &'static str) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Transport("store closed".to_string()));
        }
        match self.failing.read().get(command) {
            None => Ok(()),
            Some(Failure::Transport) => Err(StoreError::Transport(format!("{} failed", command))),
            Some(Failure::Timeout(after)) => Err(StoreError::Timeout(*after)),
        }
    }

    fn read<T>(
        &self,
        command: &'static str,
        key: &str,
        extract: impl FnOnce(&StoredValue) -> Option<T>,
    ) -> StoreResult<Option<T>> {
        self.check(command)?;
        match self.entries.read().get(key) {
            None => Ok(None),
            Some(value) => extract(value)
                .map(Some)
                .ok_or_else(|| StoreError::WrongType(format!("{} against '{}'", command, key))),
        }
    }
}

impl KeyStore for MemoryStore {
    async fn get_document(&self, key: &str) -> StoreResult<Option<String>> {
        if !self.documents_supported {
            return Err(StoreError::Unsupported("JSON.GET".to_string()));
        }
        self.read("JSON.GET", key, |value| match value {
            StoredValue::Document(blob) => Some(blob.clone()),
            _ => None,
        })
    }

    async fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        self.read("GET", key, |value| match value {
            StoredValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    async fn get_sequence(&self, key: &str) -> StoreResult<Vec<String>> {
        let items: Option<Vec<String>> = self.read("LRANGE", key, |value| match value {
            StoredValue::List(items) => Some(items.clone()),
            _ => None,
        })?;
        Ok(items.unwrap_or_default())
    }

    async fn get_set(&self, key: &str) -> StoreResult<Vec<String>> {
        let members: Option<Vec<String>> = self.read("SMEMBERS", key, |value| match value {
            StoredValue::Set(members) => Some(members.iter().cloned().collect()),
            _ => None,
        })?;
        Ok(members.unwrap_or_default())
    }

    async fn get_mapping(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        let fields: Option<BTreeMap<String, String>> = self.read("HGETALL", key, |value| match value {
            StoredValue::Hash(fields) => Some(fields.clone()),
            _ => None,
        })?;
        Ok(fields.unwrap_or_default())
    }

    async fn list_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check("SCAN")?;
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check("PING")
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Glob matching with `*` (any run) and `?` (any single character)
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    // Position of the last `*` seen and the candidate index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some(&ch) if ch == '?' || ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star, tried)) => {
                    p = star + 1;
                    c = tried + 1;
                    backtrack = Some((star, tried + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}
