//! Cache Invalidator (§4.6, §9 "Cache-invalidation coupling"): the Store
//! emits domain events after every mutation; a separate subscriber decides
//! what to do with them. This decouples persistence semantics from cache
//! semantics, unlike the source's entangled cache-deletion-inside-Store
//! calls.

use async_trait::async_trait;

use crate::types::CacheScope;

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Fire-and-forget: the Store remains authoritative regardless of
    /// whether this succeeds (§5 "Shared resources").
    async fn invalidate(&self, user_id: i64, scope: CacheScope);
}

/// No-op invalidator for deployments without a cache layer, and for tests.
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate(&self, _user_id: i64, _scope: CacheScope) {}
}

/// Logs every invalidation at `debug`, useful as a drop-in while wiring a
/// real cache layer (e.g. Redis key-pattern deletion) behind this trait.
pub struct LoggingCacheInvalidator;

#[async_trait]
impl CacheInvalidator for LoggingCacheInvalidator {
    async fn invalidate(&self, user_id: i64, scope: CacheScope) {
        tracing::debug!(user_id, ?scope, "cache invalidation");
    }
}
