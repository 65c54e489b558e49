use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A pooled cache slot: an optional payload plus the millisecond stamp
/// of the last time the payload was installed or read.
pub struct Element<V> {
    value: Option<V>,
    touched_ms: AtomicI64,
}

impl<V> Element<V> {
    pub(crate) fn new() -> Self {
        Self {
            value: None,
            touched_ms: AtomicI64::new(unix_millis()),
        }
    }

    /// Install a payload, refreshing the access stamp.
    pub(crate) fn install(&mut self, value: V) {
        self.touch();
        self.value = Some(value);
    }

    /// Drop the payload ahead of returning the slot to the pool.
    pub(crate) fn clear(&mut self) {
        self.touch();
        self.value = None;
    }

    /// Read the payload without refreshing the access stamp.
    pub(crate) fn peek(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub(crate) fn touch(&self) {
        self.touched_ms.store(unix_millis(), Ordering::Release);
    }

    pub(crate) fn touched_at(&self) -> i64 {
        self.touched_ms.load(Ordering::Acquire)
    }
}

impl<V: Clone> Element<V> {
    /// Read the payload. The access stamp is refreshed before the value
    /// is handed back, so a hit always defers eviction.
    pub(crate) fn get(&self) -> Option<V> {
        self.touch();
        self.value.clone()
    }
}

/// Free list of cache slots shared by every shard of one cache, so
/// steady-state churn stops allocating once the population stabilizes.
pub struct ElementPool<V> {
    free: Mutex<Vec<Element<V>>>,
}

impl<V> ElementPool<V> {
    pub(crate) fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acquire(&self) -> Element<V> {
        let mut free = self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        free.pop().unwrap_or_else(Element::new)
    }

    /// Clear the slot's payload and park it for reuse.
    pub(crate) fn release(&self, mut element: Element<V>) {
        element.clear();
        let mut free = self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        free.push(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_refreshes_the_access_stamp() {
        let mut element = Element::new();
        element.install(7u32);
        let before = element.touched_at();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(element.get(), Some(7));
        assert!(element.touched_at() >= before);
    }

    #[test]
    fn released_slots_come_back_empty() {
        let pool = ElementPool::new();
        let mut element = pool.acquire();
        element.install("payload");
        pool.release(element);

        let recycled = pool.acquire();
        assert!(recycled.peek().is_none());
    }
}
