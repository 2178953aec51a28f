//! Palaver client core
//!
//! This crate provides the client-side core of the Palaver chat application:
//! chat message types, a key-value persistence substrate, and a
//! context-scoped response cache with fuzzy prompt matching that spares the
//! network a round-trip when a conversationally-similar prompt was already
//! answered.
//!
//! The cache is a best-effort optimization: storage failures degrade to
//! cache misses and skipped writes, never to errors in the chat flow.

pub mod cache;
pub mod error;
pub mod messages;
pub mod storage;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheEntry, CacheKey, CacheStats, CachedChatClient, ChatCompletion, ResponseCache,
};
pub use error::{PalaverError, PalaverResult};
pub use messages::{Message, MessageRole};
pub use storage::{FileStore, KvStore, MemoryStore};
