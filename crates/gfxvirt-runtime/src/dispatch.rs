//! Two-tier dispatch tables with logging no-op defaults.
//!
//! Every slot starts as a stub that logs the call and returns the neutral value for its return
//! type. Loading a table overwrites only the slots whose entry point the resolver can supply, so
//! a partially implemented driver still gets safe behavior for everything it lacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gfxvirt_schema::{DispatchPartition, DispatchScope, GeneratorOptions, ReturnKind};
use tracing::{debug, warn};

use crate::value::{ReturnValue, Value};

/// A callable entry point. Handles in `params` are real handles; outputs are written in place.
pub type EntryPoint = Arc<dyn Fn(&mut [Value]) -> ReturnValue + Send + Sync>;

/// Source of real entry points for one dispatch scope.
pub trait ProcAddrResolver: Send + Sync {
    /// Resolves `name` against a real top-level handle (null for global commands).
    fn resolve(&self, handle: u64, name: &str) -> Option<EntryPoint>;

    /// The resolver's own `vkGet*ProcAddr` entry point, installed as-is.
    fn proc_addr_entry(&self, name: &str) -> Option<EntryPoint> {
        self.resolve(0, name)
    }
}

/// The stub installed in every slot until a real entry point replaces it.
pub fn noop_entry(name: &str, kind: ReturnKind) -> EntryPoint {
    let name = name.to_owned();
    Arc::new(move |_params: &mut [Value]| {
        warn!(
            "Unsupported function {} was called, resulting in no-op behavior.",
            name
        );
        ReturnValue::neutral(kind)
    })
}

struct Slot {
    kind: ReturnKind,
    entry: EntryPoint,
    loaded: bool,
}

impl Slot {
    fn stub(name: &str, kind: ReturnKind) -> Self {
        Self {
            kind,
            entry: noop_entry(name, kind),
            loaded: false,
        }
    }
}

pub struct DispatchTable {
    instance: HashMap<String, Slot>,
    device: HashMap<String, Slot>,
    layer: HashMap<String, Slot>,
    proc_addr_commands: Vec<String>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("instance", &self.instance.len())
            .field("device", &self.device.len())
            .field("layer", &self.layer.len())
            .finish()
    }
}

impl DispatchTable {
    pub fn new(partition: &DispatchPartition, options: &GeneratorOptions) -> Self {
        let stubs = |scope| {
            partition
                .entries(scope)
                .iter()
                .map(|e| (e.name.clone(), Slot::stub(&e.name, e.return_kind)))
                .collect::<HashMap<_, _>>()
        };
        Self {
            instance: stubs(DispatchScope::Instance),
            device: stubs(DispatchScope::Device),
            layer: stubs(DispatchScope::Layer),
            proc_addr_commands: options.proc_addr_commands.clone(),
        }
    }

    fn slots(&self, scope: DispatchScope) -> &HashMap<String, Slot> {
        match scope {
            DispatchScope::Instance => &self.instance,
            DispatchScope::Device => &self.device,
            DispatchScope::Layer => &self.layer,
        }
    }

    fn slots_mut(&mut self, scope: DispatchScope) -> &mut HashMap<String, Slot> {
        match scope {
            DispatchScope::Instance => &mut self.instance,
            DispatchScope::Device => &mut self.device,
            DispatchScope::Layer => &mut self.layer,
        }
    }

    /// Resolves every instance-table slot against `instance`. Returns the number of slots loaded.
    pub fn load_instance_table(&mut self, resolver: &dyn ProcAddrResolver, instance: u64) -> usize {
        self.load(DispatchScope::Instance, resolver, instance)
    }

    /// Resolves every device-table slot against `device`. Returns the number of slots loaded.
    pub fn load_device_table(&mut self, resolver: &dyn ProcAddrResolver, device: u64) -> usize {
        self.load(DispatchScope::Device, resolver, device)
    }

    fn load(
        &mut self,
        scope: DispatchScope,
        resolver: &dyn ProcAddrResolver,
        handle: u64,
    ) -> usize {
        let proc_addr = std::mem::take(&mut self.proc_addr_commands);
        let mut loaded = 0;
        for (name, slot) in self.slots_mut(scope).iter_mut() {
            let entry = if proc_addr.iter().any(|p| p == name) {
                resolver.proc_addr_entry(name)
            } else {
                resolver.resolve(handle, name)
            };
            // Unresolved slots keep whatever they already hold.
            if let Some(entry) = entry {
                slot.entry = entry;
                slot.loaded = true;
                loaded += 1;
            }
        }
        self.proc_addr_commands = proc_addr;
        debug!(?scope, handle, loaded, "dispatch table loaded");
        loaded
    }

    /// Installs one entry point directly, e.g. the top-level creation calls.
    /// Returns `false` when no slot with that name exists in `scope`.
    pub fn set_entry(&mut self, scope: DispatchScope, name: &str, entry: EntryPoint) -> bool {
        match self.slots_mut(scope).get_mut(name) {
            Some(slot) => {
                slot.entry = entry;
                slot.loaded = true;
                true
            }
            None => false,
        }
    }

    pub fn entry(&self, scope: DispatchScope, name: &str) -> Option<EntryPoint> {
        self.slots(scope).get(name).map(|s| s.entry.clone())
    }

    pub fn is_loaded(&self, scope: DispatchScope, name: &str) -> bool {
        self.slots(scope).get(name).is_some_and(|s| s.loaded)
    }

    pub fn return_kind(&self, scope: DispatchScope, name: &str) -> Option<ReturnKind> {
        self.slots(scope).get(name).map(|s| s.kind)
    }

    pub fn len(&self, scope: DispatchScope) -> usize {
        self.slots(scope).len()
    }

    /// Calls through the slot for `name`. A name with no slot behaves like a stub returning
    /// `fallback`.
    pub fn call(
        &self,
        scope: DispatchScope,
        name: &str,
        params: &mut [Value],
        fallback: ReturnValue,
    ) -> ReturnValue {
        match self.entry(scope, name) {
            Some(entry) => entry(params),
            None => {
                warn!(
                    "Unsupported function {} was called, resulting in no-op behavior.",
                    name
                );
                fallback
            }
        }
    }
}
