//! Deduplication cache for crash analyses.
//!
//! Keyed by `(user_id, md5(normalized log))` with a TTL, so re-submitting
//! the same crash within the window replays the recorded result instead of
//! burning another model call. Capacity-bounded LRU behind a mutex.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use md5::{Digest, Md5};

use super::CrashReport;

const DEFAULT_CAPACITY: usize = 512;

/// Lowercase and collapse whitespace so formatting noise does not defeat
/// deduplication.
pub fn normalize_for_hash(log: &str) -> String {
    log.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// MD5 fingerprint of a normalized crash log.
pub fn fingerprint(log: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(normalize_for_hash(log).as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Entry {
    report: CrashReport,
    inserted_at: Instant,
}

/// In-process dedup cache shared across requests.
pub struct DedupCache {
    entries: Mutex<LruCache<(String, String), Entry>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero"),
            )),
            ttl,
        }
    }

    /// Look up a fresh cached report for this user and log fingerprint.
    pub fn get(&self, user_id: &str, log_md5: &str) -> Option<CrashReport> {
        let mut entries = self.entries.lock().expect("dedup cache poisoned");
        let key = (user_id.to_string(), log_md5.to_string());
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.report.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, user_id: &str, log_md5: &str, report: CrashReport) {
        let mut entries = self.entries.lock().expect("dedup cache poisoned");
        entries.put(
            (user_id.to_string(), log_md5.to_string()),
            Entry {
                report,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dedup cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
