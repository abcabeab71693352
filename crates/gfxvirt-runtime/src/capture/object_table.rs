//! Capture-side map from virtual id to the real handle it stands for.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::capture::ids::HandleIdAllocator;
use crate::value::NULL_HANDLE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedObject {
    pub handle_type: String,
    pub real: u64,
    pub parent: Option<u64>,
    pub co_parent: Option<u64>,
}

#[derive(Debug, Default)]
struct Tables {
    objects: HashMap<u64, CapturedObject>,
    by_real: HashMap<(String, u64), u64>,
}

impl Tables {
    fn remove(&mut self, id: u64) -> Option<CapturedObject> {
        let object = self.objects.remove(&id)?;
        self.by_real.remove(&(object.handle_type.clone(), object.real));
        Some(object)
    }
}

/// Guarded by its own lock, independent of the session's trace-state lock.
#[derive(Debug, Default)]
pub struct CaptureObjectTable {
    inner: Mutex<Tables>,
}

impl CaptureObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assigns a virtual id to `real` and records its owners.
    ///
    /// With `reuse` set, a real handle already wrapped under the same type keeps its id.
    /// The null handle always maps to the null id.
    pub fn wrap(
        &self,
        ids: &HandleIdAllocator,
        handle_type: &str,
        real: u64,
        parent: Option<u64>,
        co_parent: Option<u64>,
        reuse: bool,
    ) -> u64 {
        if real == NULL_HANDLE {
            return NULL_HANDLE;
        }
        let mut tables = self.tables();
        let key = (handle_type.to_owned(), real);
        if reuse {
            if let Some(&id) = tables.by_real.get(&key) {
                return id;
            }
        }
        let id = ids.next_id();
        if let Some(stale) = tables.by_real.insert(key, id) {
            // The driver handed out a real handle we still track; the old id is dead.
            tables.objects.remove(&stale);
        }
        tables.objects.insert(
            id,
            CapturedObject {
                handle_type: handle_type.to_owned(),
                real,
                parent,
                co_parent,
            },
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<CapturedObject> {
        self.tables().objects.get(&id).cloned()
    }

    pub fn real_handle(&self, id: u64) -> Option<u64> {
        self.tables().objects.get(&id).map(|o| o.real)
    }

    pub fn find_by_real(&self, handle_type: &str, real: u64) -> Option<u64> {
        self.tables()
            .by_real
            .get(&(handle_type.to_owned(), real))
            .copied()
    }

    pub fn remove(&self, id: u64) -> Option<CapturedObject> {
        self.tables().remove(id)
    }

    /// Removes `id` and every object owned by it, transitively. Ownership follows the parent
    /// link, and the co-parent link when `by_co_parent` is set. Returns the removed ids.
    pub fn remove_tree(&self, id: u64, by_co_parent: bool) -> Vec<u64> {
        let mut tables = self.tables();
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if tables.remove(next).is_none() {
                continue;
            }
            removed.push(next);
            pending.extend(tables.objects.iter().filter_map(|(&child, o)| {
                let owned = o.parent == Some(next) || (by_co_parent && o.co_parent == Some(next));
                owned.then_some(child)
            }));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tables().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_returns_existing_id_for_same_type_only() {
        let table = CaptureObjectTable::new();
        let ids = HandleIdAllocator::default();
        let a = table.wrap(&ids, "VkPhysicalDevice", 0x100, Some(1), None, true);
        let b = table.wrap(&ids, "VkPhysicalDevice", 0x100, Some(1), None, true);
        let c = table.wrap(&ids, "VkImage", 0x100, None, None, true);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn null_handle_is_never_tracked() {
        let table = CaptureObjectTable::new();
        let ids = HandleIdAllocator::default();
        assert_eq!(table.wrap(&ids, "VkBuffer", NULL_HANDLE, None, None, false), NULL_HANDLE);
        assert!(table.is_empty());
        assert_eq!(ids.peek(), 1);
    }

    #[test]
    fn remove_tree_follows_owners() {
        let table = CaptureObjectTable::new();
        let ids = HandleIdAllocator::default();
        let device = table.wrap(&ids, "VkDevice", 0x1, None, None, false);
        let pool = table.wrap(&ids, "VkCommandPool", 0x2, Some(device), None, false);
        let cb = table.wrap(&ids, "VkCommandBuffer", 0x3, Some(device), Some(pool), false);
        let other = table.wrap(&ids, "VkDevice", 0x4, None, None, false);

        let mut removed = table.remove_tree(pool, true);
        removed.sort_unstable();
        assert_eq!(removed, vec![pool, cb]);
        assert!(table.get(device).is_some());

        table.wrap(&ids, "VkBuffer", 0x5, Some(device), None, false);
        assert_eq!(table.remove_tree(device, false).len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get(other).is_some());
    }
}
