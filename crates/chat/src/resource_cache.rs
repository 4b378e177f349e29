//! Per-provider cache of discovered models.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::warn;
use switchboard_core::providers::{ResourceCacheEntry, ResourceCacheSnapshot};
use switchboard_core::utils::time_utils::now_millis;

/// Cached resources, the set of providers with a refresh in flight and the
/// time of each provider's last failed refresh.
///
/// Readers never wait on a refresh: the refresh itself runs outside both
/// locks and only takes the write lock to store its result.
#[derive(Default)]
pub struct ResourceCache {
    entries: RwLock<ResourceCacheSnapshot>,
    refreshing: Mutex<HashSet<String>>,
    failed_at: Mutex<HashMap<String, i64>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ResourceCacheSnapshot) -> Self {
        Self {
            entries: RwLock::new(snapshot),
            ..Self::default()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ResourceCacheSnapshot> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Resource cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResourceCacheSnapshot> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Resource cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn refreshing(&self) -> MutexGuard<'_, HashSet<String>> {
        self.refreshing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn failed_at(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.failed_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, provider: &str) -> Option<ResourceCacheEntry> {
        self.read().get(provider).cloned()
    }

    pub fn insert(&self, provider: &str, entry: ResourceCacheEntry) {
        self.write().insert(provider.to_string(), entry);
        self.failed_at().remove(provider);
    }

    /// Note a failed refresh so `is_stale` backs off for a full interval.
    pub fn record_failure(&self, provider: &str) {
        self.failed_at().insert(provider.to_string(), now_millis());
    }

    pub fn remove(&self, provider: &str) -> Option<ResourceCacheEntry> {
        self.write().remove(provider)
    }

    pub fn snapshot(&self) -> ResourceCacheSnapshot {
        self.read().clone()
    }

    /// Whether `provider` was never refreshed or its last refresh attempt,
    /// successful or not, is older than `interval`.
    pub fn is_stale(&self, provider: &str, interval: Duration) -> bool {
        let stored = self.read().get(provider).map(|e| e.updated_at);
        let failed = self.failed_at().get(provider).copied();
        let Some(updated_at) = stored.max(failed) else {
            return true;
        };
        let age_ms = now_millis().saturating_sub(updated_at);
        age_ms < 0 || age_ms as u128 >= interval.as_millis()
    }

    pub fn is_refreshing(&self, provider: &str) -> bool {
        self.refreshing().contains(provider)
    }

    /// Mark `provider` as refreshing.
    ///
    /// Returns `None` when a refresh is already in flight. The marker is
    /// removed when the returned guard drops.
    pub fn try_begin_refresh(self: &Arc<Self>, provider: &str) -> Option<RefreshGuard> {
        if !self.refreshing().insert(provider.to_string()) {
            return None;
        }
        Some(RefreshGuard {
            cache: Arc::clone(self),
            provider: provider.to_string(),
        })
    }
}

/// Holds a provider's refreshing marker.
pub struct RefreshGuard {
    cache: Arc<ResourceCache>,
    provider: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.cache.refreshing().remove(&self.provider);
    }
}
