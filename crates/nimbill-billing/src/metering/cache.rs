//! Redis segment cache
//!
//! Persists reconciled coverage between billing runs so that telemetry
//! re-delivered in a later run still merges with what was already billed.
//! Only the compact `serialize_str` encoding is stored.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use nimbill_common::{NimbillError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::aggregator::ReconcileKey;

const DEFAULT_PREFIX: &str = "nimbill";
const DEFAULT_TTL: Duration = Duration::from_secs(35 * 24 * 3600);

/// Where reconciled coverage is persisted between runs
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Encoded coverage for `key`, if any
    async fn load(&self, key: &ReconcileKey) -> Result<Option<String>>;

    /// Persist encoded coverage for `key`
    async fn store(&self, key: &ReconcileKey, encoded: String) -> Result<()>;
}

fn segment_key(prefix: &str, key: &ReconcileKey) -> String {
    let hash = blake3::hash(key.canonical().as_bytes());
    format!("{}:segments:{}", prefix, hash.to_hex())
}

/// Cached coverage with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSegments {
    encoded: String,
    cached_at: i64,
    expires_at: i64,
}

impl CachedSegments {
    fn new(encoded: String, ttl: Duration) -> Self {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            encoded,
            cached_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    fn is_live(&self) -> bool {
        Utc::now().timestamp_millis() < self.expires_at
    }
}

/// Redis-based segment cache
pub struct SegmentCache {
    /// Redis client
    client: Client,
    /// Shared multiplexed connection
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    /// Key prefix for cache entries
    prefix: String,
    /// TTL for cache entries
    ttl: Duration,
}

impl SegmentCache {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| NimbillError::Config(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| NimbillError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(Some(connection))),
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: DEFAULT_TTL,
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Drop the cached coverage of one key
    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: &ReconcileKey) -> Result<bool> {
        let redis_key = segment_key(&self.prefix, key);
        let mut conn = self.get_connection().await?;

        let deleted: u64 = conn
            .del(&redis_key)
            .await
            .map_err(|e| NimbillError::Storage(format!("Redis DEL failed: {}", e)))?;

        debug!(key = %redis_key, deleted, "Invalidated segments");
        Ok(deleted > 0)
    }

    /// Clear all cached coverage under the prefix
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<u64> {
        let pattern = format!("{}:segments:*", self.prefix);
        let mut conn = self.get_connection().await?;

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| NimbillError::Storage(format!("Redis KEYS failed: {}", e)))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| NimbillError::Storage(format!("Redis DEL failed: {}", e)))?;

        debug!(deleted, "Cleared all segment entries");
        Ok(deleted)
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        let guard = self.connection.read().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        drop(guard);

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| NimbillError::Storage(format!("Failed to reconnect to Redis: {}", e)))?;

        *guard = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl SegmentStore for SegmentCache {
    #[instrument(skip(self))]
    async fn load(&self, key: &ReconcileKey) -> Result<Option<String>> {
        let redis_key = segment_key(&self.prefix, key);
        let mut conn = self.get_connection().await?;

        let cached: Option<String> = conn.get(&redis_key).await.map_err(|e| {
            warn!("Segment cache get error: {}", e);
            NimbillError::Storage(format!("Redis get failed: {}", e))
        })?;

        let Some(json) = cached else {
            debug!(key = %redis_key, "Cache miss");
            return Ok(None);
        };

        // Unreadable entries are treated as absent
        match serde_json::from_str::<CachedSegments>(&json) {
            Ok(entry) => {
                debug!(key = %redis_key, "Cache hit");
                Ok(Some(entry.encoded))
            }
            Err(e) => {
                warn!(key = %redis_key, error = %e, "Discarding unreadable segment entry");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, encoded))]
    async fn store(&self, key: &ReconcileKey, encoded: String) -> Result<()> {
        let redis_key = segment_key(&self.prefix, key);
        let json = serde_json::to_string(&CachedSegments::new(encoded, self.ttl))?;

        let mut conn = self.get_connection().await?;
        let ttl_secs = self.ttl.as_secs().max(1);

        conn.set_ex::<_, _, ()>(&redis_key, json, ttl_secs)
            .await
            .map_err(|e| {
                warn!("Segment cache set error: {}", e);
                NimbillError::Storage(format!("Redis set failed: {}", e))
            })?;

        debug!(key = %redis_key, ttl_secs, "Cached segments");
        Ok(())
    }
}

/// In-memory fallback cache using DashMap
pub struct InMemorySegmentCache {
    cache: DashMap<String, CachedSegments>,
    prefix: String,
    ttl: Duration,
    max_entries: usize,
}

impl InMemorySegmentCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: DEFAULT_TTL,
            max_entries,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn get(&self, key: &ReconcileKey) -> Option<String> {
        let cache_key = segment_key(&self.prefix, key);
        self.cache
            .get(&cache_key)
            .and_then(|entry| entry.is_live().then(|| entry.encoded.clone()))
    }

    pub fn set(&self, key: &ReconcileKey, encoded: String) {
        // Evict old entries if at capacity
        if self.cache.len() >= self.max_entries {
            self.cache.retain(|_, v| v.is_live());

            if self.cache.len() >= self.max_entries {
                if let Some(oldest) = self
                    .cache
                    .iter()
                    .min_by_key(|e| e.value().cached_at)
                    .map(|e| e.key().clone())
                {
                    self.cache.remove(&oldest);
                }
            }
        }

        self.cache
            .insert(segment_key(&self.prefix, key), CachedSegments::new(encoded, self.ttl));
    }

    pub fn invalidate(&self, key: &ReconcileKey) -> bool {
        self.cache.remove(&segment_key(&self.prefix, key)).is_some()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl SegmentStore for InMemorySegmentCache {
    async fn load(&self, key: &ReconcileKey) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn store(&self, key: &ReconcileKey, encoded: String) -> Result<()> {
        self.set(key, encoded);
        Ok(())
    }
}
