//! Cache of web search answers
//!
//! Identical queries within the TTL are answered without another provider
//! round trip.

use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

use super::DispatchOutcome;

/// TTL-bounded cache of search answers keyed by normalized query
#[derive(Clone)]
pub struct SearchCache {
    /// Moka cache storing normalized query -> answer with automatic TTL
    cache: Cache<String, DispatchOutcome>,
}

impl SearchCache {
    /// Creates a new `SearchCache`
    ///
    /// # Arguments
    ///
    /// * `ttl` - How long an answer stays valid
    /// * `max_capacity` - Maximum number of cached answers
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Lowercase the query and collapse runs of whitespace
    #[must_use]
    pub fn normalize(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Cached answer for `query`
    pub async fn get(&self, query: &str) -> Option<DispatchOutcome> {
        let hit = self.cache.get(&Self::normalize(query)).await;
        if hit.is_some() {
            debug!(query = %query, "Search cache hit");
        }
        hit
    }

    /// Store the answer for `query`
    pub async fn insert(&self, query: &str, outcome: DispatchOutcome) {
        self.cache.insert(Self::normalize(query), outcome).await;
    }
}
