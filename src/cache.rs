//! TTL-based cache for threat context lookups.

use crate::context::ThreatContext;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Cached threat context.
#[derive(Debug, Clone)]
pub struct CachedContext {
    /// The looked-up context.
    pub context: ThreatContext,
    /// Provider that returned this context.
    pub provider: String,
    /// When this entry was cached.
    pub cached_at: Instant,
    /// TTL for this entry.
    pub ttl: Duration,
}

impl CachedContext {
    /// Check if this cache entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Thread-safe TTL cache keyed by address.
pub struct ContextCache {
    cache: RwLock<HashMap<IpAddr, CachedContext>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl ContextCache {
    /// Create a new context cache.
    pub fn new(default_ttl_seconds: u64, max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            default_ttl: Duration::from_secs(default_ttl_seconds),
            max_entries,
        }
    }

    /// Get a cached context if available and not expired.
    pub fn get(&self, ip: &IpAddr) -> Option<CachedContext> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(ip)?;

        if entry.is_expired() {
            // Left for cleanup so reads never take the write lock
            None
        } else {
            Some(entry.clone())
        }
    }

    /// Store a context with the default TTL.
    pub fn set(&self, ip: IpAddr, context: ThreatContext, provider: &str) {
        self.set_with_ttl(ip, context, provider, self.default_ttl);
    }

    /// Store a context with a custom TTL.
    pub fn set_with_ttl(&self, ip: IpAddr, context: ThreatContext, provider: &str, ttl: Duration) {
        let entry = CachedContext {
            context,
            provider: provider.to_string(),
            cached_at: Instant::now(),
            ttl,
        };

        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= self.max_entries && !cache.contains_key(&ip) {
                Self::evict_expired_entries(&mut cache);

                // Still full: drop the oldest entry
                if cache.len() >= self.max_entries {
                    if let Some(oldest_ip) = cache
                        .iter()
                        .min_by_key(|(_, v)| v.cached_at)
                        .map(|(k, _)| *k)
                    {
                        cache.remove(&oldest_ip);
                    }
                }
            }

            cache.insert(ip, entry);
        }
    }

    /// Remove expired entries from the cache.
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            Self::evict_expired_entries(&mut cache);
        }
    }

    fn evict_expired_entries(cache: &mut HashMap<IpAddr, CachedContext>) {
        cache.retain(|_, v| !v.is_expired());
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
