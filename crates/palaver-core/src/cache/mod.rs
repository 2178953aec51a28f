//! Response caching for chat completions
//!
//! This module avoids redundant network calls for conversationally-similar
//! prompts by storing prior (context, prompt) → response pairs and retrieving
//! them with approximate string matching.
//!
//! ## How it works
//!
//! 1. A composite key is derived from the conversation: the last three turns
//!    before the prompt form a context fingerprint, followed by the prompt
//!    text itself
//! 2. Lookup tries the exact key first, then falls back to a fuzzy scan over
//!    entries whose context fingerprint is identical to the query's
//! 3. A fuzzy candidate must score at least the configured similarity
//!    threshold; the best-scoring entry wins
//! 4. Entries expire a fixed interval after their last access, and the store
//!    is capacity-bounded with oldest-by-last-access eviction
//!
//! The whole mapping is persisted as one snapshot through an injected
//! [`KvStore`], with the aggregate hit counter in a separate record. Every
//! public operation degrades to a miss or a no-op on persistence failure:
//! caching is a best-effort optimization, never a correctness dependency of
//! the chat flow.

pub mod client;
pub mod similarity;
pub mod types;

#[cfg(test)]
mod tests;

pub use client::{CachedChatClient, ChatCompletion};
pub use types::{CacheConfig, CacheEntry, CacheKey, CacheStats};

use crate::error::PalaverResult;
use crate::messages::Message;
use crate::storage::KvStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use types::{context_fingerprint, key_context, now_millis, StatsRecord};

/// Record holding the serialized entry mapping
const ENTRIES_KEY: &str = "palaver_response_cache";
/// Record holding the aggregate hit counter
const STATS_KEY: &str = "palaver_cache_stats";
/// Record holding the caller-side enabled gate
const ENABLED_KEY: &str = "palaver_cache_enabled";

/// Fraction of entries discarded (oldest first) when the substrate reports
/// an exhausted quota
const QUOTA_EVICT_FRACTION: f64 = 0.3;

type EntryMap = BTreeMap<String, CacheEntry>;

/// Context-scoped response cache with fuzzy prompt matching
///
/// The store exclusively owns its persisted records; callers only mutate
/// entries through [`lookup`](Self::lookup)/[`store`](Self::store) side
/// effects. All operations serialize their read-modify-write persistence
/// cycle behind an internal mutex, so a shared `ResponseCache` is safe to use
/// from multiple threads.
pub struct ResponseCache {
    storage: Mutex<Box<dyn KvStore>>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a cache over the given storage backend with default settings
    pub fn new(storage: impl KvStore + 'static) -> Self {
        Self::with_config(storage, CacheConfig::default())
    }

    /// Create a cache with explicit configuration
    pub fn with_config(storage: impl KvStore + 'static, config: CacheConfig) -> Self {
        Self {
            storage: Mutex::new(Box::new(storage)),
            config,
        }
    }

    /// The active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resolve a conversation against the cache
    ///
    /// `turns` is the full ordered conversation with the unanswered prompt as
    /// its last element. Returns the cached response on an exact or fuzzy
    /// hit, `None` on a miss. A hit bumps the entry's hit count, refreshes
    /// its timestamp, and increments the aggregate counter; an entry found
    /// expired is deleted and reported as a miss. Persistence failures
    /// degrade to a miss.
    pub fn lookup(&self, turns: &[Message]) -> Option<String> {
        match self.try_lookup(turns) {
            Ok(hit) => hit,
            Err(err) => {
                warn!("cache lookup degraded to miss: {}", err);
                None
            }
        }
    }

    fn try_lookup(&self, turns: &[Message]) -> PalaverResult<Option<String>> {
        let Some(key) = CacheKey::from_turns(turns) else {
            return Ok(None);
        };
        // from_turns returned Some, so a last turn exists
        let prompt = turns.last().map(|t| t.content.as_str()).unwrap_or("");
        let fingerprint = context_fingerprint(turns).unwrap_or_default();

        let mut storage = self.storage.lock();
        let mut entries = load_entries(&**storage);
        let now = now_millis();

        let matched = if entries.contains_key(key.as_str()) {
            debug!("cache hit candidate (exact)");
            Some(key.as_str().to_string())
        } else {
            self.find_similar(&fingerprint, prompt, &entries)
        };
        let Some(matched_key) = matched else {
            debug!("cache miss");
            return Ok(None);
        };

        let expired = match entries.get(&matched_key) {
            Some(entry) => entry.is_expired(now, self.config.expiry),
            None => return Ok(None),
        };
        if expired {
            entries.remove(&matched_key);
            self.save_entries(&mut **storage, &mut entries)?;
            debug!("cache entry expired, removed");
            return Ok(None);
        }

        let (response, hits) = match entries.get_mut(&matched_key) {
            Some(entry) => {
                entry.touch(now);
                (entry.response.clone(), entry.hit_count)
            }
            None => return Ok(None),
        };
        self.save_entries(&mut **storage, &mut entries)?;
        if let Err(err) = bump_total_hits(&mut **storage) {
            // The hit itself stands even if the counter record cannot be
            // written
            warn!("failed to update cache hit counter: {}", err);
        }
        debug!(hits, "cache hit");
        Ok(Some(response))
    }

    /// Best fuzzy match among entries whose context fingerprint equals the
    /// query's. Ordered iteration plus strict improvement keeps the
    /// lexicographically lowest key among equal scores.
    fn find_similar(&self, fingerprint: &str, prompt: &str, entries: &EntryMap) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;
        for (stored_key, entry) in entries {
            if key_context(stored_key) != fingerprint {
                continue;
            }
            let score = similarity::similarity(prompt, &entry.prompt);
            if score < self.config.similarity_threshold {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((stored_key.as_str(), score));
            }
        }
        best.map(|(key, score)| {
            debug!(score, "cache hit candidate (fuzzy)");
            key.to_string()
        })
    }

    /// Associate a response with the conversation that produced it
    ///
    /// The entry is written at the exact derived key, replacing any previous
    /// entry there (last-write-wins, hit count reset). If the store then
    /// exceeds its capacity, the oldest entries by timestamp are dropped.
    /// Persistence failures degrade to "response not cached".
    pub fn store(&self, turns: &[Message], response: &str) {
        if let Err(err) = self.try_store(turns, response) {
            warn!("failed to cache response: {}", err);
        }
    }

    fn try_store(&self, turns: &[Message], response: &str) -> PalaverResult<()> {
        let (Some(key), Some(last)) = (CacheKey::from_turns(turns), turns.last()) else {
            debug!("not caching: empty conversation");
            return Ok(());
        };

        let mut storage = self.storage.lock();
        let mut entries = load_entries(&**storage);
        entries.insert(key.into_string(), CacheEntry::new(&last.content, response));

        if entries.len() > self.config.max_entries {
            let excess = entries.len() - self.config.max_entries;
            remove_oldest(&mut entries, excess);
            debug!(removed = excess, "cache over capacity, dropped oldest entries");
        }

        self.save_entries(&mut **storage, &mut entries)
    }

    /// Remove every expired entry, persisting once at the end
    ///
    /// Returns the number removed. Intended to run once per session start,
    /// not on a timer.
    pub fn sweep_expired(&self) -> usize {
        match self.try_sweep() {
            Ok(removed) => removed,
            Err(err) => {
                warn!("cache sweep failed: {}", err);
                0
            }
        }
    }

    fn try_sweep(&self) -> PalaverResult<usize> {
        let mut storage = self.storage.lock();
        let mut entries = load_entries(&**storage);
        let now = now_millis();

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.config.expiry));
        let removed = before - entries.len();

        if removed > 0 {
            self.save_entries(&mut **storage, &mut entries)?;
            debug!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Drop the entire entry mapping and the aggregate hit counter
    ///
    /// Safe to call on an already-empty store.
    pub fn clear(&self) {
        if let Err(err) = self.try_clear() {
            warn!("failed to clear cache: {}", err);
        }
    }

    fn try_clear(&self) -> PalaverResult<()> {
        let mut storage = self.storage.lock();
        storage.remove(ENTRIES_KEY)?;
        storage.remove(STATS_KEY)?;
        debug!("cache cleared");
        Ok(())
    }

    /// Current entry count, lifetime hits, and advisory serialized size
    pub fn stats(&self) -> CacheStats {
        let storage = self.storage.lock();
        let entries = load_entries(&**storage);
        let total_hits = load_stats(&**storage).total_hits;
        let approximate_bytes = if entries.is_empty() {
            0
        } else {
            serde_json::to_string(&entries).map(|s| s.len()).unwrap_or(0)
        };
        CacheStats {
            total_entries: entries.len(),
            total_hits,
            approximate_bytes,
        }
    }

    /// Dump all entries with their keys, for inspection and export
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        let storage = self.storage.lock();
        load_entries(&**storage).into_iter().collect()
    }

    /// Read the persisted enabled gate; absent or unreadable means enabled
    ///
    /// The gate is caller-side policy: the orchestration layer checks it
    /// before calling [`lookup`](Self::lookup)/[`store`](Self::store), which
    /// remain correct regardless of its value.
    pub fn is_enabled(&self) -> bool {
        let storage = self.storage.lock();
        match storage.get(ENABLED_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or(true),
            Ok(None) => true,
            Err(err) => {
                warn!("failed to read cache enabled flag: {}", err);
                true
            }
        }
    }

    /// Persist the enabled gate
    pub fn set_enabled(&self, enabled: bool) {
        let mut storage = self.storage.lock();
        let value = if enabled { "true" } else { "false" };
        if let Err(err) = storage.set(ENABLED_KEY, value) {
            warn!("failed to persist cache enabled flag: {}", err);
        }
    }

    /// Persist the mapping snapshot. On quota exhaustion, discard the oldest
    /// entries and retry once; a second failure propagates to the caller's
    /// degradation path.
    fn save_entries(&self, storage: &mut dyn KvStore, entries: &mut EntryMap) -> PalaverResult<()> {
        let payload = serde_json::to_string(entries)?;
        match storage.set(ENTRIES_KEY, &payload) {
            Ok(()) => Ok(()),
            Err(err) if err.is_quota_exceeded() => {
                let evict = (entries.len() as f64 * QUOTA_EVICT_FRACTION).ceil() as usize;
                remove_oldest(entries, evict);
                warn!(
                    evicted = evict,
                    "storage quota exceeded, retrying with reduced cache"
                );
                let payload = serde_json::to_string(entries)?;
                storage.set(ENTRIES_KEY, &payload)
            }
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Load the entry mapping, degrading to empty on read failure or malformed
/// data
fn load_entries(storage: &dyn KvStore) -> EntryMap {
    let raw = match storage.get(ENTRIES_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return EntryMap::new(),
        Err(err) => {
            warn!("failed to read cache record: {}", err);
            return EntryMap::new();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!("discarding malformed cache record: {}", err);
        EntryMap::new()
    })
}

/// Load the aggregate counter record, defaulting to zero
fn load_stats(storage: &dyn KvStore) -> StatsRecord {
    match storage.get(STATS_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
        _ => StatsRecord::default(),
    }
}

fn bump_total_hits(storage: &mut dyn KvStore) -> PalaverResult<()> {
    let mut stats = load_stats(storage);
    stats.total_hits += 1;
    let payload = serde_json::to_string(&stats)?;
    storage.set(STATS_KEY, &payload)
}

/// Remove `count` entries, oldest timestamp first. The sort is stable over
/// the map's key order, so ties on timestamp drop the lowest key first.
fn remove_oldest(entries: &mut EntryMap, count: usize) {
    let mut by_age: Vec<(String, i64)> = entries
        .iter()
        .map(|(key, entry)| (key.clone(), entry.timestamp))
        .collect();
    by_age.sort_by_key(|(_, timestamp)| *timestamp);
    for (key, _) in by_age.into_iter().take(count) {
        entries.remove(&key);
    }
}
