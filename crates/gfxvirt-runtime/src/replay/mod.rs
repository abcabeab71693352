//! Replay consumer: re-issues recorded calls against a live driver.
//!
//! Recorded calls carry virtual ids only. Before each call the consumer maps them to the
//! handles the replay driver created; after a successful creation it registers the new handles
//! under the ids the capture assigned, so later calls that name those ids resolve correctly.

pub mod decoded;
pub mod mapper;
pub mod object_info;

use std::sync::Arc;

use gfxvirt_schema::{ApiRegistry, CallCategory, CallPlan, DestroyKind, DispatchScope, WrapKind};
use tracing::{debug, warn};

use crate::capture::handles::step_owners;
use crate::capture::trace::ApiCallRecord;
use crate::config::ReplayConfig;
use crate::dispatch::{DispatchTable, EntryPoint, ProcAddrResolver};
use crate::error::{DecodeWarning, ReplayError};
use crate::value::{ReturnValue, Value, NULL_HANDLE};

use decoded::Decoded;
use mapper::{add_handles, StructHandleMapper};
use object_info::ObjectInfoTable;

pub struct ReplayConsumer {
    registry: Arc<ApiRegistry>,
    config: ReplayConfig,
    objects: ObjectInfoTable,
    dispatch: DispatchTable,
    warnings: Vec<DecodeWarning>,
    calls: u64,
}

impl ReplayConsumer {
    pub fn new(registry: Arc<ApiRegistry>) -> Self {
        Self::with_config(registry, ReplayConfig::default())
    }

    pub fn with_config(registry: Arc<ApiRegistry>, config: ReplayConfig) -> Self {
        let dispatch = DispatchTable::new(registry.dispatch_partition(), registry.options());
        Self {
            registry,
            config,
            objects: ObjectInfoTable::new(),
            dispatch,
            warnings: Vec::new(),
            calls: 0,
        }
    }

    pub fn objects(&self) -> &ObjectInfoTable {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectInfoTable {
        &mut self.objects
    }

    pub fn warnings(&self) -> &[DecodeWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<DecodeWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn call_count(&self) -> u64 {
        self.calls
    }

    pub fn set_entry(&mut self, scope: DispatchScope, name: &str, entry: EntryPoint) -> bool {
        self.dispatch.set_entry(scope, name, entry)
    }

    pub fn load_instance_table(
        &mut self,
        resolver: &dyn ProcAddrResolver,
        real_instance: u64,
    ) -> usize {
        self.dispatch.load_instance_table(resolver, real_instance)
    }

    pub fn load_device_table(
        &mut self,
        resolver: &dyn ProcAddrResolver,
        real_device: u64,
    ) -> usize {
        self.dispatch.load_device_table(resolver, real_device)
    }

    /// Replays `records` in order, stopping at the first error.
    pub fn replay_all<'r>(
        &mut self,
        records: impl IntoIterator<Item = &'r ApiCallRecord>,
    ) -> Result<Vec<ReturnValue>, ReplayError> {
        records.into_iter().map(|r| self.replay_call(r)).collect()
    }

    /// Replays one recorded call and returns the replay driver's result.
    pub fn replay_call(&mut self, record: &ApiCallRecord) -> Result<ReturnValue, ReplayError> {
        let registry = Arc::clone(&self.registry);
        let Some(plan) = registry.command(&record.call) else {
            warn!(
                "Unsupported function {} was called, resulting in no-op behavior.",
                record.call
            );
            return Ok(record.result.neutral_like());
        };
        let command = &plan.command;
        if record.params.len() != command.params.len() {
            return Err(ReplayError::ParamCount {
                command: command.name.clone(),
                expected: command.params.len(),
                found: record.params.len(),
            });
        }
        self.calls += 1;

        let mapper = StructHandleMapper::new(&registry);
        let mut warnings = Vec::new();
        let mut decoded: Vec<Decoded> = command
            .params
            .iter()
            .zip(&record.params)
            .map(|(p, v)| mapper.decode_param(p, v, &mut warnings))
            .collect();

        for (i, (param, value)) in command.params.iter().zip(decoded.iter_mut()).enumerate() {
            if param.is_output() {
                self.size_output(value);
            } else {
                mapper.map_param(command, i, value, &record.params, &self.objects, &mut warnings)?;
            }
        }

        let mut native: Vec<Value> = decoded.iter().map(Decoded::to_native).collect();
        let result = match self.dispatch.entry(plan.scope(), plan.name()) {
            Some(entry) => entry(&mut native),
            None => ReturnValue::neutral(plan.return_kind),
        };

        let outputs = command.params.iter().zip(decoded.iter_mut()).zip(&native);
        for ((param, value), written) in outputs {
            if param.is_output() {
                mapper.populate(&command.name, &param.name, value, written)?;
            }
        }

        if result.is_failure() || record.result.is_failure() || record.output_omitted {
            debug!(
                call = plan.name(),
                ?result,
                recorded = ?record.result,
                "outputs not registered"
            );
        } else {
            self.add_outputs(&mapper, plan, &decoded, &record.params, &mut warnings)?;
        }
        self.remove_destroyed(plan, &record.params);
        self.retain_warnings(warnings);
        Ok(result)
    }

    /// Sizes the handle storage of output structs flagged for it, before the driver writes.
    fn size_output(&self, value: &mut Decoded) {
        let mapper = StructHandleMapper::new(&self.registry);
        let structs = match value {
            Decoded::Struct(s) => std::slice::from_mut(s),
            Decoded::Structs(ss) => ss.as_mut_slice(),
            _ => return,
        };
        for s in structs {
            if let Some(id) = s.struct_id {
                if self.registry.struct_handlers(id).set_lengths {
                    mapper.set_struct_handle_lengths(s);
                }
            }
        }
    }

    fn add_outputs(
        &mut self,
        mapper: &StructHandleMapper<'_>,
        plan: &CallPlan,
        decoded: &[Decoded],
        recorded: &[Value],
        warnings: &mut Vec<DecodeWarning>,
    ) -> Result<(), ReplayError> {
        for step in &plan.wrap {
            let (parent_id, co_parent_id) = step_owners(step, recorded);
            let member = plan
                .command
                .params
                .get(step.param)
                .map(|p| p.name.as_str())
                .unwrap_or_default();
            let added = match (decoded.get(step.param), &step.kind) {
                (
                    Some(Decoded::Handles(ptr)),
                    WrapKind::Handle { handle_type } | WrapKind::HandleArray { handle_type, .. },
                ) => add_handles(
                    plan.name(),
                    member,
                    handle_type,
                    parent_id,
                    co_parent_id,
                    ptr,
                    &mut self.objects,
                    warnings,
                )?,
                (Some(Decoded::Struct(s)), _) => {
                    mapper.add_struct_handles(parent_id, s, &mut self.objects, warnings)?
                }
                (Some(Decoded::Structs(ss)), _) => {
                    let mut added = 0;
                    for s in ss {
                        added +=
                            mapper.add_struct_handles(parent_id, s, &mut self.objects, warnings)?;
                    }
                    added
                }
                _ => 0,
            };
            debug!(call = plan.name(), member, added, ?parent_id, "registered replay handles");
        }
        Ok(())
    }

    fn remove_destroyed(&mut self, plan: &CallPlan, recorded: &[Value]) {
        let CallCategory::Destroy(destroy) = plan.category() else {
            return;
        };
        let Some(target) = plan.command.params.get(destroy.target) else {
            return;
        };
        let cascade = match destroy.kind {
            DestroyKind::WholeScope => self.config.cascade_scope_destroy,
            _ => self.registry.options().is_pool_type(&target.base_type),
        };
        let ids: Vec<u64> = match recorded.get(destroy.target) {
            Some(Value::Handle(id)) => vec![*id],
            Some(Value::Handles(ids)) => ids.clone(),
            _ => Vec::new(),
        };
        for id in ids.into_iter().filter(|id| *id != NULL_HANDLE) {
            let removed = if cascade {
                self.objects.remove_tree(&target.base_type, id, true)
            } else {
                usize::from(self.objects.remove_info(&target.base_type, id).is_some())
            };
            debug!(call = plan.name(), id, removed, "released replay objects");
        }
    }

    fn retain_warnings(&mut self, mut warnings: Vec<DecodeWarning>) {
        self.warnings.append(&mut warnings);
        let excess = self
            .warnings
            .len()
            .saturating_sub(self.config.max_retained_warnings);
        if excess > 0 {
            self.warnings.drain(..excess);
        }
    }
}
