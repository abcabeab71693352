//! Partition of the command set into the instance and device dispatch tables.

use crate::classify::DispatchScope;
use crate::model::ReturnKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchEntry {
    pub name: String,
    pub return_kind: ReturnKind,
}

/// Table layout. Entry order follows schema order; `layer` holds the top-level creation entry
/// points, which never appear in either table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchPartition {
    pub instance: Vec<DispatchEntry>,
    pub device: Vec<DispatchEntry>,
    pub layer: Vec<DispatchEntry>,
}

impl DispatchPartition {
    pub fn push(&mut self, scope: DispatchScope, entry: DispatchEntry) {
        match scope {
            DispatchScope::Instance => self.instance.push(entry),
            DispatchScope::Device => self.device.push(entry),
            DispatchScope::Layer => self.layer.push(entry),
        }
    }

    pub fn entries(&self, scope: DispatchScope) -> &[DispatchEntry] {
        match scope {
            DispatchScope::Instance => &self.instance,
            DispatchScope::Device => &self.device,
            DispatchScope::Layer => &self.layer,
        }
    }

    pub fn scope_of(&self, name: &str) -> Option<DispatchScope> {
        [DispatchScope::Instance, DispatchScope::Device, DispatchScope::Layer]
            .into_iter()
            .find(|scope| self.entries(*scope).iter().any(|e| e.name == name))
    }
}
