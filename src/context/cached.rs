//! Caching wrapper for context providers.

use super::{ContextError, ContextProvider, ThreatContext};
use crate::cache::ContextCache;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Serves repeated lookups from a TTL cache before asking the inner provider.
pub struct CachedProvider {
    inner: Arc<dyn ContextProvider>,
    cache: Arc<ContextCache>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn ContextProvider>, cache: Arc<ContextCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ContextProvider for CachedProvider {
    async fn lookup(&self, ip: &IpAddr) -> Result<ThreatContext, ContextError> {
        if let Some(cached) = self.cache.get(ip) {
            debug!(ip = %ip, provider = %cached.provider, "Context cache hit");
            return Ok(cached.context);
        }

        // Failures are not cached
        let context = self.inner.lookup(ip).await?;
        self.cache.set(*ip, context, self.inner.name());
        Ok(context)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
