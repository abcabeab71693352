//! Capture session: the intercepting side of handle virtualization.
//!
//! Applications see only virtual ids. Every call runs the step sequence its [`CallPlan`] derives:
//! ids are swapped for real handles on the way in, new real handles are wrapped on the way out,
//! and the call is written to the trace with ids only.

pub(crate) mod handles;
pub mod hooks;
pub mod ids;
pub mod object_table;
pub mod references;
pub mod trace;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use gfxvirt_schema::{
    ApiRegistry, CallCategory, CallPlan, CaptureStep, CommandTraits, DestroyKind, DispatchScope,
};
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::dispatch::{DispatchTable, EntryPoint, ProcAddrResolver};
use crate::value::{ReturnValue, Value, NULL_HANDLE};

use handles::{step_owners, trim_outputs, Unwrapper, Wrapper};
use hooks::{CaptureHooks, NoHooks};
use ids::HandleIdAllocator;
use object_table::CaptureObjectTable;
use references::CommandBufferReferences;
use trace::{ApiCallRecord, TraceWriter};

#[derive(Debug, Default)]
struct TraceState {
    finalized: bool,
}

pub struct CaptureSession {
    registry: Arc<ApiRegistry>,
    config: CaptureConfig,
    state: RwLock<TraceState>,
    ids: HandleIdAllocator,
    objects: CaptureObjectTable,
    references: CommandBufferReferences,
    dispatch: RwLock<DispatchTable>,
    overrides: HashMap<String, EntryPoint>,
    hooks: Arc<dyn CaptureHooks>,
    writer: Arc<dyn TraceWriter>,
    calls: AtomicU64,
}

/// Per-call scratch state threaded through the step sequence.
struct CallState<'a> {
    guard: Option<RwLockReadGuard<'a, TraceState>>,
    result: ReturnValue,
    output_omitted: bool,
    native: Option<Vec<Value>>,
}

impl CaptureSession {
    pub fn new(registry: Arc<ApiRegistry>, writer: Arc<dyn TraceWriter>) -> Self {
        Self::with_config(registry, writer, CaptureConfig::default())
    }

    pub fn with_config(
        registry: Arc<ApiRegistry>,
        writer: Arc<dyn TraceWriter>,
        config: CaptureConfig,
    ) -> Self {
        let dispatch = DispatchTable::new(registry.dispatch_partition(), registry.options());
        Self {
            ids: HandleIdAllocator::new(config.first_handle_id),
            config,
            state: RwLock::new(TraceState::default()),
            objects: CaptureObjectTable::new(),
            references: CommandBufferReferences::new(),
            dispatch: RwLock::new(dispatch),
            overrides: HashMap::new(),
            hooks: Arc::new(NoHooks),
            writer,
            calls: AtomicU64::new(0),
            registry,
        }
    }

    pub fn set_hooks(&mut self, hooks: Arc<dyn CaptureHooks>) {
        self.hooks = hooks;
    }

    /// Registers the implementation behind an override name from the generator options.
    ///
    /// Overrides are pass-through: the replacement receives the caller's parameters with
    /// virtual ids untouched and owns any unwrapping and wrapping it needs. The session still
    /// runs the hooks, the trace entry and failure suppression around it.
    pub fn register_override(&mut self, replacement: impl Into<String>, entry: EntryPoint) {
        self.overrides.insert(replacement.into(), entry);
    }

    pub fn registry(&self) -> &ApiRegistry {
        &self.registry
    }

    pub fn objects(&self) -> &CaptureObjectTable {
        &self.objects
    }

    pub fn references(&self) -> &CommandBufferReferences {
        &self.references
    }

    pub fn ids(&self) -> &HandleIdAllocator {
        &self.ids
    }

    /// Number of calls intercepted so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Real handle behind a virtual id, for loaders that need the driver's own objects.
    pub fn real_handle(&self, id: u64) -> Option<u64> {
        self.objects.real_handle(id)
    }

    pub fn set_layer_entry(&self, name: &str, entry: EntryPoint) -> bool {
        self.dispatch_mut().set_entry(DispatchScope::Layer, name, entry)
    }

    pub fn load_instance_table(
        &self,
        resolver: &dyn ProcAddrResolver,
        real_instance: u64,
    ) -> usize {
        self.dispatch_mut().load_instance_table(resolver, real_instance)
    }

    pub fn load_device_table(&self, resolver: &dyn ProcAddrResolver, real_device: u64) -> usize {
        self.dispatch_mut().load_device_table(resolver, real_device)
    }

    fn dispatch_mut(&self) -> std::sync::RwLockWriteGuard<'_, DispatchTable> {
        self.dispatch
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_finalized(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .finalized
    }

    /// Stops recording. Waits for every in-flight call to release the shared lock; calls made
    /// afterwards still run and stay virtualized but are not written.
    pub fn finalize(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !state.finalized {
            state.finalized = true;
            self.writer.flush();
            debug!(calls = self.call_count(), "capture finalized");
        }
    }

    /// Runs one intercepted call. Returns the driver's result unchanged.
    pub fn invoke(&self, name: &str, params: &mut [Value]) -> ReturnValue {
        let Some(plan) = self.registry.command(name) else {
            warn!(
                "Unsupported function {} was called, resulting in no-op behavior.",
                name
            );
            return ReturnValue::Void;
        };
        if params.len() != plan.command.params.len() {
            warn!(
                call = name,
                expected = plan.command.params.len(),
                found = params.len(),
                "parameter count mismatch"
            );
        }
        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut call = CallState {
            guard: None,
            result: ReturnValue::Void,
            output_omitted: false,
            native: None,
        };
        for step in plan.sequence() {
            self.run_step(plan, step, params, &mut call);
        }
        call.result
    }

    fn run_step<'s>(
        &'s self,
        plan: &CallPlan,
        step: CaptureStep,
        params: &mut [Value],
        call: &mut CallState<'s>,
    ) {
        match step {
            CaptureStep::AcquireSharedLock => {
                call.guard = Some(
                    self.state
                        .read()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()),
                );
            }
            CaptureStep::PreCallHook => self.hooks.pre_call(plan.name(), params),
            CaptureStep::EncodeParameters => self.encode(plan, params, call),
            CaptureStep::UnwrapHandles => {
                let mut native = params.to_vec();
                Unwrapper {
                    registry: &self.registry,
                    objects: &self.objects,
                }
                .unwrap_params(plan, &mut native);
                call.native = Some(native);
            }
            CaptureStep::Dispatch => {
                let mut native = call.native.take().unwrap_or_else(|| params.to_vec());
                // Released before the call so entry points may load tables.
                let entry = self
                    .dispatch
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .entry(plan.scope(), plan.name());
                call.result = match entry {
                    Some(entry) => entry(&mut native),
                    None => ReturnValue::neutral(plan.return_kind),
                };
                // Outputs flow back to the caller; wrapping replaces their handles next.
                for (i, p) in plan.command.params.iter().enumerate() {
                    if p.is_output() {
                        if let (Some(dst), Some(src)) = (params.get_mut(i), native.get_mut(i)) {
                            *dst = std::mem::take(src);
                        }
                    }
                }
            }
            CaptureStep::InvokeOverride => {
                let entry = plan
                    .classification
                    .override_name
                    .as_deref()
                    .and_then(|n| self.overrides.get(n));
                call.result = match entry {
                    Some(entry) => entry(params),
                    None => {
                        warn!(
                            call = plan.name(),
                            replacement = ?plan.classification.override_name,
                            "override not registered, resulting in no-op behavior"
                        );
                        ReturnValue::neutral(plan.return_kind)
                    }
                };
            }
            CaptureStep::ResolveOutputs => {
                if call.result.is_failure() {
                    call.output_omitted =
                        plan.traits().contains(CommandTraits::SUPPRESS_ON_FAILURE);
                } else if !plan.is_override() {
                    self.wrap_outputs(plan, params);
                }
            }
            CaptureStep::RemoveDestroyed => self.remove_destroyed(plan, params),
            CaptureStep::PostCallHook => self.hooks.post_call(plan.name(), params, &call.result),
            CaptureStep::ReleaseLock => {
                call.guard.take();
            }
        }
    }

    fn encode(&self, plan: &CallPlan, params: &[Value], call: &CallState<'_>) {
        if let CallCategory::Record(record) = plan.category() {
            if self.config.track_command_buffer_references {
                if let Some(cb) = params.get(record.command_buffer).and_then(Value::as_handle) {
                    let mut ids = Vec::new();
                    for &i in &record.tracked {
                        if let Some(v) = params.get(i) {
                            v.collect_handles(&mut ids);
                        }
                    }
                    self.references.record(cb, ids);
                }
            }
        }

        if call.guard.as_ref().is_some_and(|state| state.finalized) {
            return;
        }
        let mut encoded = params.to_vec();
        if !call.result.is_failure() && !plan.is_override() {
            trim_outputs(&self.registry, plan, &mut encoded);
        }
        if call.output_omitted {
            for (i, p) in plan.command.params.iter().enumerate() {
                if p.is_output() {
                    if let Some(v) = encoded.get_mut(i) {
                        *v = Value::Null;
                    }
                }
            }
        }
        self.writer.write_call(&ApiCallRecord {
            call: plan.name().to_owned(),
            tracked: plan.traits().contains(CommandTraits::TRACKED),
            params: encoded,
            result: call.result,
            output_omitted: call.output_omitted,
        });
    }

    fn wrap_outputs(&self, plan: &CallPlan, params: &mut [Value]) {
        for step in &plan.wrap {
            let (parent, co_parent) = step_owners(step, params);
            let wrapper = Wrapper {
                registry: &self.registry,
                objects: &self.objects,
                ids: &self.ids,
                parent,
                co_parent,
                reuse: self.config.reuse_retrieved_ids
                    && matches!(plan.category(), CallCategory::Retrieve(_)),
            };
            wrapper.wrap_output(&plan.command, step, params);
        }
    }

    fn remove_destroyed(&self, plan: &CallPlan, params: &[Value]) {
        let CallCategory::Destroy(destroy) = plan.category() else {
            return;
        };
        let target_type = plan
            .command
            .params
            .get(destroy.target)
            .map(|p| p.base_type.as_str())
            .unwrap_or_default();
        let cascade_pool = self.registry.options().is_pool_type(target_type);

        let ids: Vec<u64> = match params.get(destroy.target) {
            Some(Value::Handle(id)) => vec![*id],
            Some(Value::Handles(ids)) => ids.clone(),
            _ => Vec::new(),
        };
        for id in ids.into_iter().filter(|id| *id != NULL_HANDLE) {
            let removed = match destroy.kind {
                DestroyKind::WholeScope => self.objects.remove_tree(id, true),
                _ if cascade_pool => self.objects.remove_tree(id, true),
                _ => self.objects.remove(id).map(|_| vec![id]).unwrap_or_default(),
            };
            for gone in &removed {
                self.references.release(*gone);
            }
            debug!(call = plan.name(), id, removed = removed.len(), "destroyed");
        }
    }
}
