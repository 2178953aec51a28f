//! Cache-aware chat client wrapper

use super::ResponseCache;
use crate::error::PalaverResult;
use crate::messages::Message;
use async_trait::async_trait;
use tracing::debug;

/// Narrow seam to the network completion client
///
/// Implementors take the full ordered conversation and produce the final
/// assembled response text. Streaming, retries, and the wire protocol are the
/// implementor's concern; the cache layer only sees complete responses.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Produce the response to the conversation's last turn
    async fn complete(&self, messages: &[Message]) -> PalaverResult<String>;
}

/// Chat client wrapper that consults the response cache around an inner
/// [`ChatCompletion`] implementation
///
/// The persisted enabled gate is enforced here, on the caller side: when the
/// cache is disabled neither lookup nor store is attempted. Cache failures
/// are invisible to users of this wrapper; only errors from the inner client
/// surface.
pub struct CachedChatClient<T> {
    inner: T,
    cache: ResponseCache,
}

impl<T> CachedChatClient<T> {
    /// Wrap a completion client with a response cache
    pub fn new(inner: T, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }

    /// The inner completion client
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The response cache, for host-driven maintenance (sweep at session
    /// start, clear, stats display)
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl<T: ChatCompletion> CachedChatClient<T> {
    /// Resolve the conversation: cached response if available, otherwise the
    /// inner client's response, which is then cached
    pub async fn complete(&self, messages: &[Message]) -> PalaverResult<String> {
        let enabled = self.cache.is_enabled();
        if enabled {
            if let Some(cached) = self.cache.lookup(messages) {
                debug!("serving response from cache");
                return Ok(cached);
            }
        }

        let response = self.inner.complete(messages).await?;

        if enabled {
            self.cache.store(messages, &response);
        }
        Ok(response)
    }
}
