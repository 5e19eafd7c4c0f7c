//! Topic metadata cache.
//!
//! The cache is the producer's only view of cluster topology. It maps a topic
//! name to its partition ids and follows a cache-aside pattern:
//!
//! 1. Check if the topic is cached, fresh and not flagged stale
//! 2. If yes, return the cached list
//! 3. If no, fetch from the connector, cache the result and return it
//!
//! Fetch failures are returned to the caller and the cached entry, if any,
//! is left as it was. Concurrent misses for the same topic may each fetch;
//! the last writer wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::connector::Connector;
use crate::error::Result;

#[derive(Debug, Clone)]
struct CachedTopic {
    partitions: Arc<[u32]>,
    fetched_at: Instant,
    stale: bool,
}

/// TTL cache of topic partition lists.
pub struct MetadataCache {
    connector: Arc<dyn Connector>,
    expiry: Duration,
    topics: RwLock<HashMap<String, CachedTopic>>,
}

impl MetadataCache {
    pub fn new(connector: Arc<dyn Connector>, expiry: Duration) -> Self {
        Self {
            connector,
            expiry,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Partition ids of `topic`, sorted ascending.
    ///
    /// Served from cache while the entry is younger than the expiry and not
    /// flagged stale; refetched otherwise.
    ///
    /// # Errors
    ///
    /// Whatever the connector returns (`TopicNotFound`, `MetadataError`, ...).
    pub async fn get(&self, topic: &str) -> Result<Arc<[u32]>> {
        {
            let topics = self.topics.read().await;
            if let Some(entry) = topics.get(topic) {
                if !entry.stale && entry.fetched_at.elapsed() <= self.expiry {
                    trace!(topic = %topic, "Metadata cache hit");
                    return Ok(entry.partitions.clone());
                }
            }
        }

        let mut partitions = self.connector.fetch_partitions(topic).await?;
        partitions.sort_unstable();
        partitions.dedup();
        let partitions: Arc<[u32]> = partitions.into();

        if partitions.is_empty() {
            debug!(topic = %topic, "Topic has no partitions yet, not caching");
            return Ok(partitions);
        }

        debug!(
            topic = %topic,
            partition_count = partitions.len(),
            "Refreshed topic metadata"
        );
        let mut topics = self.topics.write().await;
        topics.insert(
            topic.to_string(),
            CachedTopic {
                partitions: partitions.clone(),
                fetched_at: Instant::now(),
                stale: false,
            },
        );
        Ok(partitions)
    }

    /// Flag `topic` so the next [`get`](Self::get) refetches.
    ///
    /// The cached list stays in place until that refetch succeeds.
    pub async fn invalidate(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if let Some(entry) = topics.get_mut(topic) {
            if !entry.stale {
                debug!(topic = %topic, "Marking topic metadata stale");
            }
            entry.stale = true;
        }
    }

    /// Number of topics currently cached.
    pub async fn cached_topics(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}
