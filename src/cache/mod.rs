//! Concurrent key-value store sharded across independently locked
//! partitions, with per-entry access stamps and background eviction of
//! idle entries. The per-IP rate limiter keeps one token bucket per
//! client behind this map.

mod element;
mod shard;

pub use shard::Shard;

use element::ElementPool;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash64;

/// Number of independently locked partitions. Must stay a power of two
/// so keys can be routed with a mask.
pub const SHARD_COUNT: usize = 256;

const SHARD_MASK: u64 = SHARD_COUNT as u64 - 1;

/// How often each shard's sweeper scans for idle entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// How long an entry may go unread before it is evicted.
pub const IDLE_TTL: Duration = Duration::from_secs(30);

/// Sharded expiring map.
///
/// Every operation routes its key to one shard by hash and runs under
/// that shard's lock only; a key lives in exactly one shard. Entries
/// that go unread for [`IDLE_TTL`] are evicted by per-shard sweeper
/// tasks and their slots recycled through a shared free list.
///
/// Construction spawns the sweepers, so a tokio runtime must be
/// running. Call [`ShardedCache::stop`] to cancel and join them; using
/// the cache after `stop` returns no values.
pub struct ShardedCache<V> {
    shards: Vec<Shard<V>>,
    stopped: AtomicBool,
}

impl<V: Clone + Send + Sync + 'static> ShardedCache<V> {
    pub fn new() -> Self {
        Self::with_timings(SWEEP_INTERVAL, IDLE_TTL)
    }

    /// Build a cache with custom sweep cadence and idle TTL, trading
    /// memory for entry reuse.
    pub fn with_timings(sweep_interval: Duration, idle_ttl: Duration) -> Self {
        let pool = Arc::new(ElementPool::new());
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard::new(Arc::clone(&pool), sweep_interval, idle_ttl))
            .collect();

        Self {
            shards,
            stopped: AtomicBool::new(false),
        }
    }

    fn shard(&self, key: &str) -> &Shard<V> {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key.as_bytes());
        &self.shards[(hasher.finish() & SHARD_MASK) as usize]
    }

    /// Look a key up. A hit refreshes the entry's access stamp before
    /// the value is returned.
    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).get(key)
    }

    /// Return the existing value for `key`, or insert the one `factory`
    /// builds. The boolean reports whether the key already existed. The
    /// factory runs under the shard lock and must not call back into
    /// this cache.
    pub fn get_or_create(&self, key: &str, factory: impl FnOnce() -> V) -> (V, bool) {
        self.shard(key).get_or_create(key, factory)
    }

    /// Unconditional insert-or-replace.
    pub fn set(&self, key: &str, value: V) {
        self.shard(key).set(key, value)
    }

    pub fn delete(&self, key: &str) {
        self.shard(key).delete(key)
    }

    /// The shards themselves, for bulk operations that visit every
    /// entry. Iteration locks each shard independently; there is no
    /// global snapshot.
    pub fn shards(&self) -> &[Shard<V>] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every shard's sweeper and wait for them to exit.
    /// Idempotent; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for shard in &self.shards {
            shard.stop().await;
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for ShardedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn set_then_get_returns_the_value() {
        let cache = ShardedCache::new();
        cache.set("192.168.0.1", Arc::new(42u32));

        assert_eq!(cache.get("192.168.0.1").as_deref(), Some(&42));
        assert!(cache.get("192.168.0.2").is_none());
        cache.stop().await;
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let cache = ShardedCache::new();
        cache.set("key", Arc::new(1u32));
        cache.delete("key");

        assert!(cache.get("key").is_none());
        assert!(cache.is_empty());
        cache.stop().await;
    }

    #[tokio::test]
    async fn get_or_create_reports_existence() {
        let cache = ShardedCache::new();

        let (first, existed) = cache.get_or_create("key", || Arc::new(1u32));
        assert!(!existed);
        assert_eq!(*first, 1);

        let (second, existed) = cache.get_or_create("key", || Arc::new(2u32));
        assert!(existed);
        assert_eq!(*second, 1);
        cache.stop().await;
    }

    #[tokio::test]
    async fn concurrent_get_or_create_invokes_factory_once() {
        let cache = Arc::new(ShardedCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                let (value, _) = cache.get_or_create("10.1.2.3", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Arc::new(String::from("bucket"))
                });
                assert_eq!(*value, "bucket");
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cache.stop().await;
    }

    #[tokio::test]
    async fn every_key_lands_in_exactly_one_shard() {
        let cache = ShardedCache::new();
        for i in 0..1000 {
            cache.set(&format!("10.0.{}.{}", i / 256, i % 256), Arc::new(i));
        }
        assert_eq!(cache.len(), 1000);
        cache.stop().await;
    }

    #[tokio::test]
    async fn idle_entries_are_swept() {
        let cache = ShardedCache::with_timings(
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        for i in 0..100 {
            cache.set(&format!("192.168.1.{i}"), Arc::new(i));
        }
        assert_eq!(cache.len(), 100);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.len(), 0);
        cache.stop().await;
    }

    #[tokio::test]
    async fn reads_defer_eviction() {
        let cache = ShardedCache::with_timings(
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        cache.set("held", Arc::new(1u32));
        cache.set("idle", Arc::new(2u32));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(cache.get("held").is_some());
        }

        // 900ms in: "idle" crossed the TTL long ago, "held" never did.
        assert!(cache.get("idle").is_none());
        assert!(cache.get("held").is_some());
        cache.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let cache = ShardedCache::new();
        cache.set("key", Arc::new(1u32));
        cache.stop().await;
        cache.stop().await;
    }
}
