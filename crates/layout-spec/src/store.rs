use std::sync::{Arc, PoisonError, RwLock};

/// Holder of the current snapshot. Readers clone the `Arc` and keep a
/// consistent view for as long as they like; writers replace it whole.
#[derive(Debug, Default)]
pub struct SnapshotStore<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotStore<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, value: T) {
        self.publish_arc(Arc::new(value));
    }

    pub fn publish_arc(&self, value: Arc<T>) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value;
    }
}

impl<T: Clone> SnapshotStore<T> {
    /// Mutates the current value in place, cloning it first if readers
    /// still hold the old snapshot.
    pub fn update<R>(&self, apply: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        apply(Arc::make_mut(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot() {
        let store = SnapshotStore::new(vec![1]);
        let before = store.snapshot();
        store.update(|values| values.push(2));
        assert_eq!(*before, vec![1]);
        assert_eq!(*store.snapshot(), vec![1, 2]);
    }

    #[test]
    fn publish_replaces_wholesale() {
        let store = SnapshotStore::new(String::from("old"));
        store.publish("new".into());
        assert_eq!(store.snapshot().as_str(), "new");
    }
}
