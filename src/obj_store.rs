use std::collections::HashMap;

/// Which S3-FIFO sub-queue an object currently resides in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum S3Queue {
    Small,
    Main,
}

/// Per-object policy bookkeeping, stored inline in the object record.
///
/// Each policy selects its own variant on admit. Policies with heavier
/// per-object state (the learned 3L policy) keep that state in their own
/// dense tables instead and leave the record at `None`.
#[derive(Clone, Copy, Debug)]
pub enum PolicyState {
    /// No inline state (FIFO, LRU, plugin, 3L).
    None,
    /// S3-FIFO: 2-bit saturating reference counter and current sub-queue.
    S3Fifo { freq: u8, queue: S3Queue },
    /// GDSF: access frequency plus the object's current priority-set key.
    Gdsf { freq: u64, seq: u64, priority: f64 },
}

/// Canonical record for a resident object.
///
/// Owned by the [`ObjectStore`]; every policy references the object by its
/// id and mutates only its own `policy_state` variant.
///
/// * `size` - bytes currently accounted against the cache capacity
///   (request size plus optional per-object metadata overhead)
/// * `create_time` - logical admission time (request sequence number),
///   used for eviction-age accounting
/// * `enter_time` - trace timestamp at admission, used for TTL expiry
#[derive(Clone, Debug)]
pub struct CacheObject {
    pub obj_id: u64,
    pub size: u64,
    pub create_time: u64,
    pub enter_time: u64,
    pub policy_state: PolicyState,
}

/// A copyable snapshot of an object record, returned by lookup operations
/// so callers never hold borrows into the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub obj_id: u64,
    pub size: u64,
    pub create_time: u64,
}

impl CacheObject {
    #[inline]
    pub(crate) fn info(&self) -> ObjectInfo {
        ObjectInfo {
            obj_id: self.obj_id,
            size: self.size,
            create_time: self.create_time,
        }
    }
}

/// Hash index over all resident objects: `obj_id -> CacheObject`.
///
/// The store is the single source of truth for residency. Policies keep
/// ordering structures (queues, priority sets, dense tables) that reference
/// ids held here; ghost lists hold ids that are deliberately *not* in the
/// store.
#[derive(Debug, Default)]
pub struct ObjectStore {
    map: HashMap<u64, CacheObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Number of resident objects.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn contains(&self, obj_id: u64) -> bool {
        self.map.contains_key(&obj_id)
    }

    #[inline]
    pub fn get(&self, obj_id: u64) -> Option<&CacheObject> {
        self.map.get(&obj_id)
    }

    #[inline]
    pub fn get_mut(&mut self, obj_id: u64) -> Option<&mut CacheObject> {
        self.map.get_mut(&obj_id)
    }

    /// Inserts a freshly admitted record. Replacing an existing id is a
    /// bookkeeping bug, so the previous record must not exist.
    pub(crate) fn insert(&mut self, obj: CacheObject) {
        let prev = self.map.insert(obj.obj_id, obj);
        debug_assert!(prev.is_none(), "object admitted twice");
    }

    #[inline]
    pub(crate) fn remove(&mut self, obj_id: u64) -> Option<CacheObject> {
        self.map.remove(&obj_id)
    }

    /// All resident ids, unordered.
    pub fn ids(&self) -> Vec<u64> {
        self.map.keys().copied().collect()
    }

    /// Sum of accounted bytes over all resident objects. O(n); used by
    /// invariant checks, never on the request path.
    pub fn total_bytes(&self) -> u64 {
        self.map.values().map(|o| o.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: u64, size: u64) -> CacheObject {
        CacheObject {
            obj_id: id,
            size,
            create_time: 0,
            enter_time: 0,
            policy_state: PolicyState::None,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = ObjectStore::new();
        store.insert(obj(1, 10));
        store.insert(obj(2, 20));

        assert_eq!(store.len(), 2);
        assert!(store.contains(1));
        assert_eq!(store.get(2).unwrap().size, 20);
        assert!(store.get(3).is_none());
    }

    #[test]
    fn test_remove() {
        let mut store = ObjectStore::new();
        store.insert(obj(1, 10));

        let removed = store.remove(1).unwrap();
        assert_eq!(removed.size, 10);
        assert!(store.remove(1).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_total_bytes() {
        let mut store = ObjectStore::new();
        store.insert(obj(1, 10));
        store.insert(obj(2, 30));
        assert_eq!(store.total_bytes(), 40);
    }

    #[test]
    fn test_policy_state_mutation() {
        let mut store = ObjectStore::new();
        store.insert(obj(1, 10));

        if let Some(o) = store.get_mut(1) {
            o.policy_state = PolicyState::S3Fifo {
                freq: 2,
                queue: S3Queue::Main,
            };
        }
        match store.get(1).unwrap().policy_state {
            PolicyState::S3Fifo { freq, queue } => {
                assert_eq!(freq, 2);
                assert_eq!(queue, S3Queue::Main);
            }
            _ => panic!("wrong policy state"),
        }
    }
}
