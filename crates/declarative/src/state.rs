//! State store for applied state
//!
//! The executor is the only writer; the planner and refresher only read.
//! [`MemoryStateStore`] locks per node slot, so concurrent commits to
//! distinct nodes never wait on each other beyond the slot lookup.

use crate::error::StateError;
use crate::types::{AppliedState, NodeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Storage for the last-known applied state of every node
pub trait StateStore: Send + Sync {
    fn get(&self, node: &NodeId) -> Option<AppliedState>;

    fn put(&self, node: &NodeId, state: AppliedState) -> Result<(), StateError>;

    /// Remove a node's state, returning what was stored
    fn delete(&self, node: &NodeId) -> Result<Option<AppliedState>, StateError>;

    /// All applied states ordered by node id
    fn snapshot(&self) -> Vec<AppliedState>;

    fn contains(&self, node: &NodeId) -> bool {
        self.get(node).is_some()
    }
}

type Slot = Arc<Mutex<Option<AppliedState>>>;

/// In-memory store with one lock per node
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slots: RwLock<BTreeMap<NodeId, Slot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_states(states: impl IntoIterator<Item = AppliedState>) -> Self {
        let slots = states
            .into_iter()
            .map(|state| (state.node.clone(), Arc::new(Mutex::new(Some(state)))))
            .collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, node: &NodeId) -> Option<Slot> {
        let slots = match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.get(node).cloned()
    }

    fn slot_or_insert(&self, node: &NodeId) -> Slot {
        if let Some(slot) = self.slot(node) {
            return slot;
        }
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(slots.entry(node.clone()).or_default())
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, node: &NodeId) -> Option<AppliedState> {
        let slot = self.slot(node)?;
        let guard = lock(&slot);
        guard.clone()
    }

    fn put(&self, node: &NodeId, state: AppliedState) -> Result<(), StateError> {
        if &state.node != node {
            return Err(StateError::new(format!(
                "state for {} cannot be stored under {node}",
                state.node
            )));
        }
        let slot = self.slot_or_insert(node);
        *lock(&slot) = Some(state);
        Ok(())
    }

    fn delete(&self, node: &NodeId) -> Result<Option<AppliedState>, StateError> {
        let Some(slot) = self.slot(node) else {
            return Ok(None);
        };
        let previous = lock(&slot).take();
        Ok(previous)
    }

    fn snapshot(&self) -> Vec<AppliedState> {
        let slots: Vec<Slot> = {
            let guard = match self.slots.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.values().cloned().collect()
        };
        slots.iter().filter_map(|slot| lock(slot).clone()).collect()
    }
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn get(&self, node: &NodeId) -> Option<AppliedState> {
        (**self).get(node)
    }

    fn put(&self, node: &NodeId, state: AppliedState) -> Result<(), StateError> {
        (**self).put(node, state)
    }

    fn delete(&self, node: &NodeId) -> Result<Option<AppliedState>, StateError> {
        (**self).delete(node)
    }

    fn snapshot(&self) -> Vec<AppliedState> {
        (**self).snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attributes;
    use chrono::Utc;

    fn applied(name: &str, generation: u64) -> AppliedState {
        AppliedState {
            node: NodeId::new("null_resource", name),
            provider: "null".into(),
            resource_id: format!("{name}-id"),
            inputs: Attributes::new(),
            outputs: Attributes::new(),
            dependencies: vec![],
            generation,
            deposed: vec![],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStateStore::new();
        let id = NodeId::new("null_resource", "a");
        assert!(store.get(&id).is_none());

        store.put(&id, applied("a", 1)).unwrap();
        assert_eq!(store.get(&id).unwrap().generation, 1);

        store.put(&id, applied("a", 2)).unwrap();
        assert_eq!(store.get(&id).unwrap().generation, 2);

        let removed = store.delete(&id).unwrap();
        assert_eq!(removed.unwrap().generation, 2);
        assert!(!store.contains(&id));
        assert!(store.delete(&id).unwrap().is_none());
    }

    #[test]
    fn test_put_rejects_mismatched_key() {
        let store = MemoryStateStore::new();
        let err = store
            .put(&NodeId::new("null_resource", "b"), applied("a", 1))
            .unwrap_err();
        assert!(err.message.contains("cannot be stored"));
    }

    #[test]
    fn test_snapshot_is_ordered_and_skips_deleted() {
        let store = MemoryStateStore::from_states([applied("c", 1), applied("a", 1), applied("b", 1)]);
        store.delete(&NodeId::new("null_resource", "b")).unwrap();
        let names: Vec<_> = store.snapshot().into_iter().map(|s| s.node.name).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_writes_to_distinct_nodes() {
        let store = Arc::new(MemoryStateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for generation in 1..=50 {
                        let name = format!("n{i}");
                        let id = NodeId::new("null_resource", &name);
                        store.put(&id, applied(&name, generation)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 8);
        assert!(snapshot.iter().all(|s| s.generation == 50));
    }
}
