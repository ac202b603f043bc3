//! Permission cache abstraction
//!
//! The authorization service only talks to [`PermissionCache`]; the default
//! backend is an in-process moka cache with a TTL per entry. Keys are scoped
//! per principal:
//!
//! - `permission:{user_id}:{permission}` holds a single decision
//! - `permissions:{user_id}:effective` holds the effective permission set

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use thiserror::Error;
use uuid::Uuid;

/// Cache backend failure
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// A cached authorization value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedAccess {
    Decision(bool),
    Effective(BTreeSet<String>),
}

/// Key of a single permission decision
pub fn permission_key(user_id: Uuid, permission: &str) -> String {
    format!("permission:{}:{}", user_id, permission)
}

/// Key of the effective permission set
pub fn effective_key(user_id: Uuid) -> String {
    format!("permissions:{}:effective", user_id)
}

/// Capability the authorization service caches through
#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedAccess>, CacheError>;

    async fn set(&self, key: &str, value: CachedAccess, ttl: Duration) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &str) -> Result<(), CacheError>;

    /// Drop every entry scoped to `user_id`
    async fn invalidate_principal(&self, user_id: Uuid) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct TimedAccess {
    value: CachedAccess,
    ttl: Duration,
}

/// Expire each entry after the TTL it was stored with
struct PerEntryTtl;

impl Expiry<String, TimedAccess> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TimedAccess,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TimedAccess,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process permission cache
pub struct MokaPermissionCache {
    cache: Cache<String, TimedAccess>,
}

impl MokaPermissionCache {
    /// Create a new cache holding at most `max_capacity` entries
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();
        Self { cache }
    }

    /// Number of live entries, approximate until pending tasks run
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MokaPermissionCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl PermissionCache for MokaPermissionCache {
    async fn get(&self, key: &str) -> Result<Option<CachedAccess>, CacheError> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: CachedAccess, ttl: Duration) -> Result<(), CacheError> {
        self.cache
            .insert(key.to_string(), TimedAccess { value, ttl })
            .await;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn invalidate_principal(&self, user_id: Uuid) -> Result<(), CacheError> {
        let decisions = format!("permission:{}:", user_id);
        let effective = effective_key(user_id);

        // Matching entries stop being returned at once and are evicted lazily
        self.cache
            .invalidate_entries_if(move |key, _| key.starts_with(&decisions) || *key == effective)
            .map(|_| ())
            .map_err(|e| CacheError::Unavailable(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let cache = MokaPermissionCache::new(100);
        let user_id = Uuid::new_v4();
        let key = permission_key(user_id, "edit-patients");

        cache
            .set(&key, CachedAccess::Decision(true), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(CachedAccess::Decision(true)));

        cache.invalidate(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entry_expires_after_its_ttl() {
        let cache = MokaPermissionCache::new(100);
        let key = effective_key(Uuid::new_v4());

        cache
            .set(&key, CachedAccess::Effective(BTreeSet::new()), Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_principal_leaves_other_principals() {
        let cache = MokaPermissionCache::new(100);
        let nurse = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        for user_id in [nurse, doctor] {
            cache
                .set(&permission_key(user_id, "view-bills"), CachedAccess::Decision(true), ttl)
                .await
                .unwrap();
            cache
                .set(&effective_key(user_id), CachedAccess::Effective(BTreeSet::new()), ttl)
                .await
                .unwrap();
        }

        cache.invalidate_principal(nurse).await.unwrap();

        assert_eq!(cache.get(&permission_key(nurse, "view-bills")).await.unwrap(), None);
        assert_eq!(cache.get(&effective_key(nurse)).await.unwrap(), None);
        assert_eq!(
            cache.get(&permission_key(doctor, "view-bills")).await.unwrap(),
            Some(CachedAccess::Decision(true))
        );

        // Entries written after the invalidation are served again
        cache
            .set(&permission_key(nurse, "view-bills"), CachedAccess::Decision(false), ttl)
            .await
            .unwrap();
        assert_eq!(
            cache.get(&permission_key(nurse, "view-bills")).await.unwrap(),
            Some(CachedAccess::Decision(false))
        );
    }

    #[test]
    fn test_keys_are_scoped_per_principal() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(permission_key(a, "view-bills"), permission_key(b, "view-bills"));
        assert_ne!(permission_key(a, "effective"), effective_key(a));
    }
}
