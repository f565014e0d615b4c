//! Package-info cache gateway.
//!
//! Each adapter owns one partition, a JSON file keyed by normalized
//! package name. Entries carry the cached definition, an optional
//! validator tag from the upstream index, and the refresh timestamp
//! the TTL check runs against. Writes go through a temp file and
//! rename so a crashed run never leaves a torn partition behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One cached package definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub definition: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl CacheEntry {
    pub fn new(definition: Value, etag: Option<String>) -> Self {
        Self {
            definition,
            etag,
            updated_at: Utc::now().timestamp(),
        }
    }

    pub fn is_fresh(&self, ttl_secs: i64) -> bool {
        Utc::now().timestamp() - self.updated_at < ttl_secs
    }

    /// Keep the definition and tag but restart the TTL clock, as after
    /// an upstream not-modified response.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp();
    }
}

/// A scoped handle on one adapter's cache partition. Dropping the
/// handle releases it; mutations persist explicitly via [`persist`].
///
/// [`persist`]: CachePartition::persist
#[derive(Debug)]
pub struct CachePartition {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl CachePartition {
    /// Open the partition named `name` under the cache root. A
    /// missing or corrupt file is recovered locally as an empty
    /// partition.
    pub fn open(root: &Path, name: &str) -> Self {
        let path = root.join(format!("{}.json", name));
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(partition = name, error = %err, "corrupt cache partition, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        debug!(partition = name, entries = entries.len(), "opened cache partition");
        Self { path, entries }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Entry for `key` only when it is younger than `ttl_secs`.
    pub fn fresh(&self, key: &str, ttl_secs: i64) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|entry| entry.is_fresh(ttl_secs))
    }

    pub fn put(&mut self, key: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn touch(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
        }
    }

    /// Write the partition atomically.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create cache dir {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(&self.entries)?;
        std::fs::write(&tmp, raw)
            .with_context(|| format!("cannot write cache file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot replace cache file {}", self.path.display()))?;
        Ok(())
    }
}

/// Root directory for every partition.
pub fn cache_root() -> PathBuf {
    std::env::var("ENVCTL_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".envctl/cache"))
}
