//! Cache types and data structures

use crate::messages::Message;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of context turns folded into a cache key, counted backwards from
/// the turn immediately before the prompt
pub const CONTEXT_WINDOW: usize = 3;

/// Per-turn content prefix length (in chars) used in the context fingerprint
pub const CONTEXT_CONTENT_CHARS: usize = 100;

/// Current wall-clock time in milliseconds
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Composite cache key: `contextFingerprint|promptText`
///
/// The fingerprint concatenates `role:content` (content truncated to
/// [`CONTEXT_CONTENT_CHARS`] chars) for the up-to-three turns preceding the
/// prompt, `|`-separated, in turn order. Turns outside that window never
/// affect the key, so the cache is sensitive to immediate context but blind
/// to older history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a conversation whose last turn is the unanswered
    /// prompt. Returns `None` for an empty conversation.
    pub fn from_turns(turns: &[Message]) -> Option<Self> {
        let (prompt, _) = turns.split_last()?;
        let fingerprint = context_fingerprint(turns)?;
        Some(Self(format!("{}|{}", fingerprint, prompt.content)))
    }

    /// The full key string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The context portion: everything before the final `|`
    pub fn context(&self) -> &str {
        key_context(&self.0)
    }

    /// Consume the key, yielding the underlying string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context portion of a stored key string: the substring before the final `|`
pub(crate) fn key_context(key: &str) -> &str {
    key.rsplit_once('|').map_or("", |(context, _)| context)
}

/// Context fingerprint for a conversation whose last turn is the prompt.
/// Returns `None` for an empty conversation.
pub(crate) fn context_fingerprint(turns: &[Message]) -> Option<String> {
    let (_, context) = turns.split_last()?;
    let window = &context[context.len().saturating_sub(CONTEXT_WINDOW)..];
    Some(
        window
            .iter()
            .map(|turn| {
                format!(
                    "{}:{}",
                    turn.role,
                    truncate_chars(&turn.content, CONTEXT_CONTENT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("|"),
    )
}

/// Truncate to at most `max` chars without splitting a UTF-8 scalar
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One cached (prompt, response) pair
///
/// `timestamp` is refreshed on every read hit, which makes eviction
/// LRU-by-last-access rather than insertion-order. The serialized field names
/// match the persisted layout (`hitCount`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Exact text of the user turn that produced this entry
    pub prompt: String,
    /// Complete model output associated with the prompt under its context
    pub response: String,
    /// Last-write-or-hit instant, wall-clock milliseconds
    pub timestamp: i64,
    /// Number of successful retrievals of this entry
    pub hit_count: u64,
}

impl CacheEntry {
    /// Create a fresh entry stamped with the current time
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            timestamp: now_millis(),
            hit_count: 0,
        }
    }

    /// Check whether the entry's last access is older than `expiry`
    pub fn is_expired(&self, now: i64, expiry: Duration) -> bool {
        now - self.timestamp > expiry.as_millis() as i64
    }

    /// Record a read hit: bump the hit count and refresh the timestamp
    pub fn touch(&mut self, now: i64) {
        self.hit_count += 1;
        self.timestamp = now;
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries kept after a write
    pub max_entries: usize,
    /// Time-to-live since last access
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
    /// Minimum similarity required for a fuzzy hit
    pub similarity_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            expiry: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            similarity_threshold: 0.85,
        }
    }
}

/// Aggregate cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Current number of stored entries
    pub total_entries: usize,
    /// Hits accumulated across the cache's lifetime (exact and fuzzy)
    pub total_hits: u64,
    /// Serialized size of the entry mapping; advisory, for display only
    pub approximate_bytes: usize,
}

/// Persisted aggregate counter, kept in its own record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct StatsRecord {
    pub total_hits: u64,
}
