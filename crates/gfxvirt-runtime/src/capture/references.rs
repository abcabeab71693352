use std::collections::HashMap;
use std::sync::Mutex;

/// Virtual ids referenced by each command buffer since it was allocated.
#[derive(Debug, Default)]
pub struct CommandBufferReferences {
    refs: Mutex<HashMap<u64, Vec<u64>>>,
}

impl CommandBufferReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, command_buffer: u64, ids: impl IntoIterator<Item = u64>) {
        let mut refs = self
            .refs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let list = refs.entry(command_buffer).or_default();
        for id in ids {
            if !list.contains(&id) {
                list.push(id);
            }
        }
    }

    pub fn references(&self, command_buffer: u64) -> Vec<u64> {
        self.refs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&command_buffer)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops the list of a freed command buffer.
    pub fn release(&self, command_buffer: u64) -> bool {
        self.refs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&command_buffer)
            .is_some()
    }
}
