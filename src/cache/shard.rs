use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::element::{unix_millis, Element, ElementPool};

type Entries<V> = Arc<Mutex<HashMap<String, Element<V>>>>;

/// One lock-protected partition of a [`super::ShardedCache`], paired
/// with the background task that evicts its idle entries.
pub struct Shard<V> {
    entries: Entries<V>,
    pool: Arc<ElementPool<V>>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> Shard<V> {
    pub(crate) fn new(
        pool: Arc<ElementPool<V>>,
        sweep_interval: Duration,
        idle_ttl: Duration,
    ) -> Self {
        let entries: Entries<V> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(
            Arc::clone(&entries),
            Arc::clone(&pool),
            cancel.clone(),
            sweep_interval,
            idle_ttl,
        );

        Self {
            entries,
            pool,
            cancel,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Element<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).and_then(|element| element.get())
    }

    /// Look the key up and, on a miss, build the payload while still
    /// holding the shard lock. Concurrent callers for the same missing
    /// key therefore observe exactly one factory invocation.
    pub(crate) fn get_or_create(&self, key: &str, factory: impl FnOnce() -> V) -> (V, bool) {
        let mut entries = self.lock();
        if let Some(element) = entries.get(key) {
            if let Some(value) = element.get() {
                return (value, true);
            }
        }

        let mut element = self.pool.acquire();
        let value = factory();
        element.install(value.clone());
        entries.insert(key.to_string(), element);
        (value, false)
    }

    pub(crate) fn set(&self, key: &str, value: V) {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(element) => element.install(value),
            None => {
                let mut element = self.pool.acquire();
                element.install(value);
                entries.insert(key.to_string(), element);
            }
        }
    }

    pub(crate) fn delete(&self, key: &str) {
        let mut entries = self.lock();
        if let Some(element) = entries.remove(key) {
            self.pool.release(element);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Visit every live entry under this shard's lock. Visiting does
    /// not refresh access stamps, so a bulk reconfiguration pass does
    /// not keep idle entries alive.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &V),
    {
        let entries = self.lock();
        for (key, element) in entries.iter() {
            if let Some(value) = element.peek() {
                visit(key, value);
            }
        }
    }

    /// Cancel the sweeper and wait for it to exit.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();
        let handle = {
            let mut sweeper = self.sweeper.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            sweeper.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<V> Drop for Shard<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_sweeper<V>(
    entries: Entries<V>,
    pool: Arc<ElementPool<V>>,
    cancel: CancellationToken,
    sweep_interval: Duration,
    idle_ttl: Duration,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let idle_ttl_ms = idle_ttl.as_millis() as i64;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(sweep_interval) => {}
            }
            if cancel.is_cancelled() {
                return;
            }

            let mut entries = entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = unix_millis();
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, element)| now - element.touched_at() >= idle_ttl_ms)
                .map(|(key, _)| key.clone())
                .collect();
            if expired.is_empty() {
                continue;
            }

            debug!(evicted = expired.len(), "sweeper evicted idle cache entries");
            for key in &expired {
                if let Some(element) = entries.remove(key) {
                    pool.release(element);
                }
            }
        }
    })
}
