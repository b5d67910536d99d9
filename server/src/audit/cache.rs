//! Time-to-live caches for duplicate suppression.
//!
//! The in-process [`MemoryTtlCache`] uses `DashMap` so check-and-set is
//! atomic per key. [`RedisTtlCache`] shares the same state across server
//! instances and lets Redis expire keys.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fred::interfaces::LuaInterface;
use fred::prelude::*;
use fred::types::{Expiration, SetOptions};

/// Key to last-seen timestamp map with expiring entries.
#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn set(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> anyhow::Result<()>;

    /// Atomically record `now` for `key` unless it was recorded less than
    /// `window` ago. Returns `true` if the key was (re)acquired.
    async fn try_acquire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<bool>;

    /// Forget `key` if it still holds the timestamp recorded at `at`.
    ///
    /// Undoes a successful `try_acquire` whose guarded work failed, without
    /// clobbering a newer acquisition by another caller.
    async fn release(&self, key: &str, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Drop entries last seen more than `max_age` before `now`.
    /// Returns the number of entries removed.
    async fn sweep(&self, now: DateTime<Utc>, max_age: Duration) -> anyhow::Result<usize>;

    /// Number of entries held locally.
    async fn entry_count(&self) -> anyhow::Result<usize>;
}

/// In-process cache for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryTtlCache {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryTtlCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtlCache for MemoryTtlCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.entries.get(key).map(|entry| *entry.value()))
    }

    async fn set(&self, key: &str, at: DateTime<Utc>, _ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), at);
        Ok(())
    }

    async fn try_acquire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<bool> {
        // The entry guard holds the shard lock, so no other caller can
        // interleave between the check and the write.
        let acquired = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now - *entry.get() < window {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };
        Ok(acquired)
    }

    async fn release(&self, key: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.entries.remove_if(key, |_, seen| *seen == at);
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>, max_age: Duration) -> anyhow::Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, seen| now - *seen <= max_age);
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn entry_count(&self) -> anyhow::Result<usize> {
        Ok(self.entries.len())
    }
}

/// Redis-backed cache shared by all server instances.
///
/// Values are Unix milliseconds. Keys carry a Redis TTL, so `sweep` has
/// nothing to do and `entry_count` reports no local entries.
#[derive(Clone)]
pub struct RedisTtlCache {
    redis: Client,
    prefix: String,
}

impl RedisTtlCache {
    pub fn new(redis: Client, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

/// Delete KEYS[1] only while it still holds ARGV[1].
const RELEASE_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

fn ttl_millis(ttl: Duration) -> i64 {
    ttl.num_milliseconds().max(1)
}

#[async_trait]
impl TtlCache for RedisTtlCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self.redis.get(self.key(key)).await?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    async fn set(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> anyhow::Result<()> {
        let _: () = self
            .redis
            .set(
                self.key(key),
                at.timestamp_millis(),
                Some(Expiration::PX(ttl_millis(ttl))),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    async fn try_acquire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<bool> {
        // SET NX only succeeds when the previous key has expired.
        let reply: Option<String> = self
            .redis
            .set(
                self.key(key),
                now.timestamp_millis(),
                Some(Expiration::PX(ttl_millis(window))),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let _: i64 = self
            .redis
            .eval(
                RELEASE_LUA,
                vec![self.key(key)],
                vec![at.timestamp_millis().to_string()],
            )
            .await?;
        Ok(())
    }

    async fn sweep(&self, _now: DateTime<Utc>, _max_age: Duration) -> anyhow::Result<usize> {
        Ok(0)
    }

    async fn entry_count(&self) -> anyhow::Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_respects_window() {
        let cache = MemoryTtlCache::new();
        let t0 = Utc::now();
        let window = Duration::milliseconds(1000);

        assert!(cache.try_acquire("k", t0, window).await.unwrap());
        assert!(!cache
            .try_acquire("k", t0 + Duration::milliseconds(999), window)
            .await
            .unwrap());
        assert!(cache
            .try_acquire("k", t0 + Duration::milliseconds(1000), window)
            .await
            .unwrap());
        assert!(cache.try_acquire("other", t0, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_acquire_keeps_original_timestamp() {
        let cache = MemoryTtlCache::new();
        let t0 = Utc::now();
        let window = Duration::milliseconds(1000);

        cache.try_acquire("k", t0, window).await.unwrap();
        cache
            .try_acquire("k", t0 + Duration::milliseconds(600), window)
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(t0));
    }

    #[tokio::test]
    async fn test_release_only_drops_matching_timestamp() {
        let cache = MemoryTtlCache::new();
        let t0 = Utc::now();
        let window = Duration::milliseconds(1000);

        cache.try_acquire("k", t0, window).await.unwrap();
        cache
            .release("k", t0 + Duration::milliseconds(1))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(t0));

        cache.release("k", t0).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.try_acquire("k", t0, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_entries() {
        let cache = MemoryTtlCache::new();
        let t0 = Utc::now();
        let ttl = Duration::seconds(1);

        cache.set("old", t0, ttl).await.unwrap();
        cache
            .set("fresh", t0 + Duration::seconds(5), ttl)
            .await
            .unwrap();

        let removed = cache
            .sweep(t0 + Duration::milliseconds(5500), ttl)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.entry_count().await.unwrap(), 1);
        assert!(cache.get("old").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_admits_one() {
        let cache = std::sync::Arc::new(MemoryTtlCache::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .try_acquire("same", now, Duration::seconds(5))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 1);
    }
}
