//! One level of the cache hierarchy
//!
//! A `Layer` is a map guarded by its own reader/writer lock. Every lock is
//! released before the call returns, so walking tenant → granularity →
//! station only ever holds one layer lock at a time and always in that order.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

pub(crate) struct Layer<K, V> {
    map: RwLock<FxHashMap<K, Arc<V>>>,
}

impl<K, V> Layer<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
        }
    }

    /// Shared-lock lookup, never allocates
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().get(key).cloned()
    }

    /// Return the child for `key`, creating it if absent.
    ///
    /// Optimistic read under the shared lock, then a re-check and insert
    /// under the exclusive lock, so concurrent first writers agree on a single
    /// child. The flag is true only for the caller that created it.
    pub(crate) fn get_or_create<Q>(&self, key: &Q, create: impl FnOnce() -> V) -> (Arc<V>, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(child) = self.map.read().get(key) {
            return (Arc::clone(child), false);
        }

        let mut map = self.map.write();
        if let Some(child) = map.get(key) {
            return (Arc::clone(child), false);
        }
        let child = Arc::new(create());
        map.insert(key.to_owned(), Arc::clone(&child));
        (child, true)
    }

    pub(crate) fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.write().remove(key)
    }

    /// Snapshot of the children; the lock is released before returning
    pub(crate) fn values(&self) -> Vec<Arc<V>> {
        self.map.read().values().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let layer: Layer<String, AtomicUsize> = Layer::new();
        let (first, created) = layer.get_or_create("a", AtomicUsize::default);
        assert!(created);
        first.fetch_add(1, Ordering::SeqCst);

        let (second, created) = layer.get_or_create("a", AtomicUsize::default);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(layer.values().len(), 1);
    }

    #[test]
    fn test_concurrent_first_writers_share_one_child() {
        let layer: Arc<Layer<u32, AtomicUsize>> = Arc::new(Layer::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let layer = Arc::clone(&layer);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let (child, created) = layer.get_or_create(&7, AtomicUsize::default);
                    child.fetch_add(1, Ordering::SeqCst);
                    created
                })
            })
            .collect();

        let creators = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(creators, 1);
        assert_eq!(layer.values().len(), 1);
        assert_eq!(layer.get(&7).unwrap().load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_remove() {
        let layer: Layer<u32, u32> = Layer::new();
        layer.get_or_create(&1, || 10);
        assert_eq!(layer.remove(&1).as_deref(), Some(&10));
        assert!(layer.get(&1).is_none());
        assert!(layer.remove(&1).is_none());
    }
}
