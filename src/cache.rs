//! On-disk review cache
//!
//! Persists verdicts to .mend/ keyed by a content fingerprint so
//! re-validating an unchanged artifact costs no model calls.
//!
//! # Error Handling
//!
//! Cache operations are best-effort. Callers typically use
//! `let _ = cache.put(...)` because:
//! - A cache failure is recoverable (the verdict is recomputed next time)
//! - Validation must never fail because of cache issues
//! - The .mend/ directory might not exist or have permission problems
//!
//! Correctness never depends on cache presence; only latency does.

use crate::review::{ReviewVerdict, Severity};
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

const CACHE_DIR: &str = ".mend";
const REVIEW_CACHE_FILE: &str = "reviews.json";

/// Max age for cached verdicts (in hours)
const REVIEW_CACHE_HOURS: i64 = 24;

/// Deterministic digest of everything that affects a verdict: the
/// artifact itself plus the reviewing model and threshold.
pub fn fingerprint(artifact: &str, reviewer_model: &str, threshold: Severity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artifact.as_bytes());
    hasher.update(b"\x00");
    hasher.update(reviewer_model.as_bytes());
    hasher.update(b"\x00");
    hasher.update(threshold.label().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    verdict: ReviewVerdict,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
}

/// Fingerprint-keyed verdict store with TTL eviction.
pub struct ReviewCache {
    dir: PathBuf,
}

impl ReviewCache {
    /// Cache rooted in the given directory (usually the working
    /// directory; entries land in `<root>/.mend/`).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join(CACHE_DIR),
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(REVIEW_CACHE_FILE)
    }

    fn load(&self) -> CacheFile {
        let path = self.cache_path();
        let Ok(content) = fs::read_to_string(&path) else {
            return CacheFile::default();
        };
        let mut file: CacheFile = serde_json::from_str(&content).unwrap_or_default();
        let cutoff = Utc::now() - Duration::hours(REVIEW_CACHE_HOURS);
        file.entries.retain(|_, entry| entry.created_at > cutoff);
        file
    }

    /// Look up a verdict by fingerprint. Expired and unreadable entries
    /// are misses.
    pub fn get(&self, key: &str) -> Option<ReviewVerdict> {
        self.load().entries.remove(key).map(|e| e.verdict)
    }

    /// Store a verdict. Failures are swallowed into the returned result;
    /// callers are expected to ignore it.
    pub fn put(&self, key: &str, verdict: &ReviewVerdict) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.cache_path();
        let lock_path = self.dir.join("reviews.lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()?;

        let mut file = self.load();
        file.entries.insert(
            key.to_string(),
            CacheEntry {
                verdict: verdict.clone(),
                created_at: Utc::now(),
            },
        );
        let content = serde_json::to_string_pretty(&file)?;
        let result = fs::write(&path, content);

        let _ = fs2::FileExt::unlock(&lock);
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{Category, Issue};

    #[test]
    fn test_fingerprint_changes_with_inputs() {
        let a = fingerprint("code", "model-a", Severity::Error);
        let b = fingerprint("code", "model-b", Severity::Error);
        let c = fingerprint("code", "model-a", Severity::Warning);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, fingerprint("code", "model-a", Severity::Error));
    }

    #[test]
    fn test_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ReviewCache::new(tmp.path());

        let mut verdict = ReviewVerdict::clean();
        verdict.valid = false;
        verdict
            .issues
            .push(Issue::new(Severity::Error, Category::Security, "bad"));

        let key = fingerprint("artifact", "m", Severity::Error);
        cache.put(&key, &verdict).unwrap();
        assert_eq!(cache.get(&key), Some(verdict));
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ReviewCache::new(tmp.path());
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn test_corrupt_cache_file_degrades_to_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ReviewCache::new(tmp.path());
        fs::create_dir_all(tmp.path().join(CACHE_DIR)).unwrap();
        fs::write(tmp.path().join(CACHE_DIR).join(REVIEW_CACHE_FILE), "{not json").unwrap();
        assert_eq!(cache.get("anything"), None);
    }

    #[test]
    fn test_expired_entries_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ReviewCache::new(tmp.path());

        let key = "stale";
        let verdict = ReviewVerdict::clean();
        cache.put(key, &verdict).unwrap();

        // Rewrite the entry with an ancient timestamp
        let path = cache.cache_path();
        let content = fs::read_to_string(&path).unwrap();
        let aged = content.replace(
            &Utc::now().format("%Y-%m-%d").to_string(),
            "2001-01-01",
        );
        fs::write(&path, aged).unwrap();

        assert_eq!(cache.get(key), None);
    }
}
