/// Fingerprint registry with passive time-to-live eviction
use std::collections::HashMap;
use std::hash::Hash;

/// Mapping fingerprint -> first-seen time (POSIX seconds).
///
/// Nothing expires on its own: callers check with `seen`, `record` what they
/// used, then `sweep` once at the end of each ingestion batch.
#[derive(Debug, Clone)]
pub struct DedupRegistry<K> {
    entries: HashMap<K, f64>,
    ttl: f64,
}

impl<K: Eq + Hash> DedupRegistry<K> {
    pub fn new(ttl_seconds: f64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: ttl_seconds,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Present and not yet expired at `now`
    pub fn seen(&self, key: &K, now: f64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|first| now - *first <= self.ttl)
    }

    /// Insert, or restart the window of an expired entry
    pub fn record(&mut self, key: K, now: f64) {
        self.entries.insert(key, now);
    }

    /// `record` unless already seen; true when the key is novel
    pub fn check_and_record(&mut self, key: K, now: f64) -> bool {
        if self.seen(&key, now) {
            return false;
        }
        self.record(key, now);
        true
    }

    /// Drop every entry older than the TTL; returns how many were removed
    pub fn sweep(&mut self, now: f64) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, first| now - *first <= ttl);
        before - self.entries.len()
    }
}
