//! # Result cache
//! Fingerprint-keyed store for completed analyses with a fresh TTL and a
//! longer stale-retention window backing the degraded-response path.
//!
//! The map is sharded so requests for different fingerprints never contend
//! on one lock. Entries are never updated in place; a `put` for an existing
//! fingerprint is last-write-wins replacement.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::model::AnalysisResult;

const SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry {
    subject_key: String,
    result: AnalysisResult,
    expires_at: Instant,
    /// Past this point the entry is gone entirely (sweeper removes it).
    stale_until: Instant,
}

/// Outcome of a cache read. `Stale` results are only served on the degraded
/// path after every provider has been exhausted.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(AnalysisResult),
    Stale(AnalysisResult),
    Miss,
}

#[derive(Debug)]
pub struct ResultCache {
    shards: Vec<Mutex<HashMap<String, CacheEntry>>>,
    stale_retention_factor: u64,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            stale_retention_factor: cfg.stale_retention_factor,
            default_ttl: Duration::from_secs(cfg.default_ttl_secs),
        }
    }

    /// TTL to stamp on a result whose provider supplied none.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, fingerprint: &str) -> CacheLookup {
        let lookup = self.lookup(fingerprint);
        match &lookup {
            CacheLookup::Fresh(_) => counter!("cache_hits_total").increment(1),
            CacheLookup::Stale(_) => counter!("cache_stale_lookups_total").increment(1),
            CacheLookup::Miss => counter!("cache_misses_total").increment(1),
        }
        lookup
    }

    /// Uncounted read for the degraded path; `get` has already recorded
    /// this fingerprint's serving outcome once per request.
    pub fn peek(&self, fingerprint: &str) -> CacheLookup {
        self.lookup(fingerprint)
    }

    fn lookup(&self, fingerprint: &str) -> CacheLookup {
        let now = Instant::now();
        let shard = self.shard_for(fingerprint);
        let guard = shard.lock().expect("cache shard mutex poisoned");
        match guard.get(fingerprint) {
            Some(entry) if now < entry.expires_at => CacheLookup::Fresh(entry.result.clone()),
            Some(entry) if now < entry.stale_until => CacheLookup::Stale(entry.result.clone()),
            _ => CacheLookup::Miss,
        }
    }

    /// Store a result under its fingerprint. TTL comes from the result
    /// itself; the stale slot is retained for `ttl × stale_retention_factor`.
    pub fn put(&self, fingerprint: &str, subject_key: &str, result: AnalysisResult) {
        let ttl = if result.ttl_seconds == 0 {
            self.default_ttl
        } else {
            Duration::from_secs(result.ttl_seconds)
        };
        self.put_with_ttl(fingerprint, subject_key, result, ttl);
    }

    pub fn put_with_ttl(
        &self,
        fingerprint: &str,
        subject_key: &str,
        result: AnalysisResult,
        ttl: Duration,
    ) {
        let now = Instant::now();
        let entry = CacheEntry {
            subject_key: subject_key.to_string(),
            result,
            expires_at: now + ttl,
            stale_until: now + ttl * self.stale_retention_factor as u32,
        };
        let shard = self.shard_for(fingerprint);
        shard
            .lock()
            .expect("cache shard mutex poisoned")
            .insert(fingerprint.to_string(), entry);
    }

    /// Policy hook for ward-scoped invalidation on fresh source data. Not
    /// wired into the request path; callers opt in.
    pub fn invalidate_subject(&self, subject_key: &str) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().expect("cache shard mutex poisoned");
            let before = guard.len();
            guard.retain(|_, e| e.subject_key != subject_key);
            removed += before - guard.len();
        }
        removed
    }

    /// Drop entries whose stale-retention window has elapsed. Returns how
    /// many entries were removed; also refreshes the size gauge.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut remaining = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().expect("cache shard mutex poisoned");
            let before = guard.len();
            guard.retain(|_, e| now < e.stale_until);
            removed += before - guard.len();
            remaining += guard.len();
        }
        if removed > 0 {
            counter!("cache_sweep_removed_total").increment(removed as u64);
        }
        gauge!("cache_entries").set(remaining as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("cache shard mutex poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_for(&self, fingerprint: &str) -> &Mutex<HashMap<String, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }
}

/// Spawn the periodic eviction sweep.
pub fn spawn_sweeper(cache: Arc<ResultCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                tracing::debug!(removed, "cache sweep");
            }
        }
    })
}
