//! LRU caching built on Moka.
//!
//! A thin typed wrapper so repositories and the permission checker share one
//! cache idiom without carrying Moka types through their signatures.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

/// Configuration for a cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,

    /// Time-to-live for cache entries.
    pub ttl: Option<Duration>,

    /// Time-to-idle for cache entries.
    pub tti: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Some(Duration::from_secs(300)),
            tti: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set time-to-live for cache entries.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = Some(duration);
        self
    }

    /// Set time-to-idle for cache entries.
    #[must_use]
    pub fn tti(mut self, duration: Duration) -> Self {
        self.tti = Some(duration);
        self
    }
}

/// A typed cache over Moka.
///
/// Cloning is cheap and shares the underlying cache.
pub struct TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Cache<K, V>>,
    name: Arc<str>,
}

// Manual Clone implementation that doesn't require K: Clone, V: Clone
impl<K, V> Clone for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: Arc::clone(&self.name),
        }
    }
}

impl<K, V> TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new typed cache with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = config.tti {
            builder = builder.time_to_idle(tti);
        }

        Self {
            inner: Arc::new(builder.build()),
            name: name.into(),
        }
    }

    /// Insert a key-value pair into the cache.
    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Get a value from the cache if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }
}

impl<K, V> std::fmt::Debug for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCache")
            .field("name", &self.name)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}
