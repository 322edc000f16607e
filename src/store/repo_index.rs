//! Persistent index of discovered repositories.
//!
//! The index maps `owner/project` to the repository URL and a per-repo
//! `lastCheckedAt` watermark. The miner appends repositories during
//! discovery and advances the watermark after each completed mining pass,
//! persisting the whole document each time. Concurrent workers touch
//! disjoint keys, so last-writer-wins rewrites are acceptable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::json::{self, timestamp, StoreError};

/// Per-repository index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryData {
    pub url: String,
    /// When the repository was last mined. `None` means never.
    #[serde(default, with = "timestamp::option")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// The persistent set of discovered repositories.
pub struct RepositoryIndex {
    backing_file: PathBuf,
    repos: Mutex<BTreeMap<String, RepositoryData>>,
}

impl RepositoryIndex {
    /// Loads an index from file. A missing file yields an empty index that
    /// will be created on the first persist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let backing_file = path.into();
        let repos = if backing_file.exists() {
            json::read_json(&backing_file)?
        } else {
            BTreeMap::new()
        };
        Ok(RepositoryIndex {
            backing_file,
            repos: Mutex::new(repos),
        })
    }

    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    /// Adds a repository with no watermark. Re-adding keeps the existing
    /// entry so an established watermark is never lost.
    pub fn add(&self, full_name: &str, url: &str) {
        self.repos
            .lock()
            .entry(full_name.to_string())
            .or_insert_with(|| RepositoryData {
                url: url.to_string(),
                last_checked_at: None,
            });
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.repos.lock().contains_key(full_name)
    }

    pub fn len(&self) -> usize {
        self.repos.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.lock().is_empty()
    }

    /// All repository names, in key order.
    pub fn names(&self) -> Vec<String> {
        self.repos.lock().keys().cloned().collect()
    }

    /// The last time the repository was mined, or the UNIX epoch if never.
    pub fn last_checked(&self, full_name: &str) -> DateTime<Utc> {
        self.repos
            .lock()
            .get(full_name)
            .and_then(|data| data.last_checked_at)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Advances the repository's watermark. The watermark never moves
    /// backwards, even if a caller passes a stale instant.
    pub fn set_checked(&self, full_name: &str, at: DateTime<Utc>) {
        if let Some(data) = self.repos.lock().get_mut(full_name) {
            data.last_checked_at = Some(match data.last_checked_at {
                Some(existing) => existing.max(at),
                None => at,
            });
        }
    }

    /// Persists the whole index atomically.
    pub fn persist(&self) -> Result<(), StoreError> {
        let snapshot = self.repos.lock().clone();
        json::write_json(&self.backing_file, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let index = RepositoryIndex::load(dir.path().join("repositoryIndex.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn add_persist_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repositoryIndex.json");

        let index = RepositoryIndex::load(&path).unwrap();
        index.add("apache/maven", "https://github.com/apache/maven");
        index.persist().unwrap();

        let reloaded = RepositoryIndex::load(&path).unwrap();
        assert!(reloaded.contains("apache/maven"));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.last_checked("apache/maven"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn unchecked_repo_reads_as_epoch() {
        let dir = tempdir().unwrap();
        let index = RepositoryIndex::load(dir.path().join("idx.json")).unwrap();
        index.add("a/b", "https://github.com/a/b");
        assert_eq!(index.last_checked("a/b"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn watermark_is_monotonic() {
        let dir = tempdir().unwrap();
        let index = RepositoryIndex::load(dir.path().join("idx.json")).unwrap();
        index.add("a/b", "https://github.com/a/b");

        let later = json::parse_timestamp("2023-06-01 12:00:00").unwrap();
        let earlier = json::parse_timestamp("2023-01-01 12:00:00").unwrap();

        index.set_checked("a/b", later);
        index.set_checked("a/b", earlier);
        assert_eq!(index.last_checked("a/b"), later);
    }

    #[test]
    fn re_add_keeps_watermark() {
        let dir = tempdir().unwrap();
        let index = RepositoryIndex::load(dir.path().join("idx.json")).unwrap();
        index.add("a/b", "https://github.com/a/b");
        let at = json::parse_timestamp("2023-06-01 12:00:00").unwrap();
        index.set_checked("a/b", at);

        index.add("a/b", "https://github.com/a/b");
        assert_eq!(index.last_checked("a/b"), at);
    }

    #[test]
    fn wire_format_uses_dataset_timestamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repositoryIndex.json");
        let index = RepositoryIndex::load(&path).unwrap();
        index.add("a/b", "https://github.com/a/b");
        index.set_checked("a/b", json::parse_timestamp("2023-06-01 12:00:00").unwrap());
        index.persist().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lastCheckedAt\": \"2023-06-01 12:00:00\""), "{raw}");
        assert!(raw.contains("\"url\": \"https://github.com/a/b\""), "{raw}");
    }
}
