//! Replay-side map from (handle type, virtual id) to the handle the replay driver created.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub real: u64,
    pub parent_id: Option<u64>,
    pub co_parent_id: Option<u64>,
}

/// Mutated only from the replay thread, in trace order.
#[derive(Debug, Default)]
pub struct ObjectInfoTable {
    by_type: HashMap<String, HashMap<u64, ObjectInfo>>,
}

impl ObjectInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_info(&self, handle_type: &str, id: u64) -> Option<&ObjectInfo> {
        self.by_type.get(handle_type)?.get(&id)
    }

    /// Inserts (or replaces) the entry for `id`. The returned entry can be amended, e.g. with
    /// its co-parent.
    pub fn add_info(
        &mut self,
        handle_type: &str,
        id: u64,
        parent_id: Option<u64>,
        real: u64,
    ) -> &mut ObjectInfo {
        let info = ObjectInfo {
            real,
            parent_id,
            co_parent_id: None,
        };
        match self.by_type.entry(handle_type.to_owned()).or_default().entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(info);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(info),
        }
    }

    pub fn remove_info(&mut self, handle_type: &str, id: u64) -> Option<ObjectInfo> {
        self.by_type.get_mut(handle_type)?.remove(&id)
    }

    /// Removes `id` and everything it owns, transitively. Returns how many entries went away.
    pub fn remove_tree(&mut self, handle_type: &str, id: u64, by_co_parent: bool) -> usize {
        if self.remove_info(handle_type, id).is_none() {
            return 0;
        }
        let mut removed = 1;
        let mut pending = vec![id];
        while let Some(owner) = pending.pop() {
            for entries in self.by_type.values_mut() {
                entries.retain(|&child, info| {
                    let owned = info.parent_id == Some(owner)
                        || (by_co_parent && info.co_parent_id == Some(owner));
                    if owned {
                        pending.push(child);
                        removed += 1;
                    }
                    !owned
                });
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
