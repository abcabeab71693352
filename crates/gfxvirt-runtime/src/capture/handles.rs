//! Virtual-id substitution over call values, driven by the handle relations.

use gfxvirt_schema::{
    ApiRegistry, CallPlan, CoParent, Command, LengthPath, RelationMember, StructId, UnwrapKind,
    ValueShape, WrapKind, WrapStep,
};
use tracing::{debug, warn};

use crate::capture::ids::HandleIdAllocator;
use crate::capture::object_table::CaptureObjectTable;
use crate::value::{ChainLink, StructValue, Value, NULL_HANDLE};

/// Replaces virtual ids with real handles before a call reaches the driver.
pub(crate) struct Unwrapper<'a> {
    pub registry: &'a ApiRegistry,
    pub objects: &'a CaptureObjectTable,
}

impl Unwrapper<'_> {
    pub fn unwrap_params(&self, plan: &CallPlan, params: &mut [Value]) {
        for step in &plan.unwrap {
            match step.kind {
                UnwrapKind::Handle | UnwrapKind::HandleArray => {
                    if let Some(value) = params.get_mut(step.param) {
                        self.unwrap_handles(value);
                    }
                }
                UnwrapKind::Struct(id) | UnwrapKind::StructArray(id) => {
                    if let Some(value) = params.get_mut(step.param) {
                        self.unwrap_struct_value(id, value);
                    }
                }
                UnwrapKind::GenericHandle { type_param } => {
                    let object_type = params.get(type_param).and_then(Value::as_scalar);
                    if let Some(value) = params.get_mut(step.param) {
                        self.unwrap_generic(object_type, value);
                    }
                }
            }
        }
    }

    fn unwrap_handles(&self, value: &mut Value) {
        match value {
            Value::Handle(h) => *h = self.real(*h),
            Value::Handles(hs) => hs.iter_mut().for_each(|h| *h = self.real(*h)),
            _ => {}
        }
    }

    fn unwrap_struct_value(&self, id: StructId, value: &mut Value) {
        match value {
            Value::Struct(s) => self.unwrap_struct(id, s),
            Value::Structs(ss) => ss.iter_mut().for_each(|s| self.unwrap_struct(id, s)),
            _ => {}
        }
    }

    pub fn unwrap_struct(&self, id: StructId, value: &mut StructValue) {
        let analysis = self.registry.analysis();
        for m in analysis.relation(id).members() {
            match m {
                RelationMember::Handle { member, .. } => {
                    if let Some(v) = value.members.get_mut(member) {
                        self.unwrap_handles(v);
                    }
                }
                RelationMember::Struct {
                    member, struct_id, ..
                } => {
                    if let Some(v) = value.members.get_mut(member) {
                        self.unwrap_struct_value(*struct_id, v);
                    }
                }
                RelationMember::ExtensionChain { member } => {
                    if let Some(Value::Chain(links)) = value.members.get_mut(member) {
                        self.unwrap_chain(&value.type_name, links);
                    }
                }
                RelationMember::GenericHandle {
                    member,
                    type_member,
                } => {
                    let object_type = value.get(type_member).and_then(Value::as_scalar);
                    if let Some(v) = value.members.get_mut(member) {
                        self.unwrap_generic(object_type, v);
                    }
                }
            }
        }
    }

    fn unwrap_chain(&self, owner: &str, links: &mut [ChainLink]) {
        let analysis = self.registry.analysis();
        for link in links {
            match link {
                ChainLink::Known { type_tag, value } => match analysis.extension_struct(*type_tag) {
                    Some(ext) => self.unwrap_struct(ext, value),
                    None => warn!(
                        owner,
                        type_tag = *type_tag,
                        "unrecognized extension struct type tag"
                    ),
                },
                ChainLink::Unknown { type_tag, .. } => {
                    warn!(owner, type_tag = *type_tag, "unrecognized extension struct type tag")
                }
            }
        }
    }

    fn unwrap_generic(&self, object_type: Option<u64>, value: &mut Value) {
        let Value::Scalar(id) = value else {
            return;
        };
        let handle_type = object_type
            .and_then(|t| u32::try_from(t).ok())
            .and_then(|t| self.registry.schema().object_type_handle(t));
        match handle_type {
            Some(_) => *id = self.real(*id),
            None => debug!(?object_type, "type-erased value is not a known handle type"),
        }
    }

    fn real(&self, id: u64) -> u64 {
        if id == NULL_HANDLE {
            return NULL_HANDLE;
        }
        self.objects.real_handle(id).unwrap_or_else(|| {
            warn!(id, "no real handle for virtual id; passing the null handle");
            NULL_HANDLE
        })
    }
}

/// Assigns virtual ids to the handles a successful call produced.
pub(crate) struct Wrapper<'a> {
    pub registry: &'a ApiRegistry,
    pub objects: &'a CaptureObjectTable,
    pub ids: &'a HandleIdAllocator,
    pub parent: Option<u64>,
    pub co_parent: Option<u64>,
    pub reuse: bool,
}

impl Wrapper<'_> {
    /// Wraps one output parameter in place. `params` must still hold the inputs the length
    /// expressions refer to.
    ///
    /// Arrays are wrapped up to their declared element count; slots past it are left as the
    /// caller passed them and the vector keeps its length.
    pub fn wrap_output(&self, command: &Command, step: &WrapStep, params: &mut [Value]) {
        let declared = match &step.kind {
            WrapKind::HandleArray { length, .. } | WrapKind::StructArray { length, .. } => {
                declared_param_length(command, params, length)
            }
            _ => None,
        };
        let Some(value) = params.get_mut(step.param) else {
            return;
        };
        match &step.kind {
            WrapKind::Handle { handle_type } | WrapKind::HandleArray { handle_type, .. } => {
                self.wrap_handles(handle_type, value, declared)
            }
            WrapKind::Struct(id) => self.wrap_struct_value(*id, value, None),
            WrapKind::StructArray { struct_id, .. } => {
                self.wrap_struct_value(*struct_id, value, declared)
            }
        }
    }

    fn wrap_handles(&self, handle_type: &str, value: &mut Value, declared: Option<usize>) {
        match value {
            Value::Handle(h) => *h = self.wrap_one(handle_type, *h),
            Value::Handles(hs) => hs
                .iter_mut()
                .take(declared.unwrap_or(usize::MAX))
                .for_each(|h| *h = self.wrap_one(handle_type, *h)),
            _ => {}
        }
    }

    fn wrap_one(&self, handle_type: &str, real: u64) -> u64 {
        self.objects
            .wrap(self.ids, handle_type, real, self.parent, self.co_parent, self.reuse)
    }

    fn wrap_struct_value(&self, id: StructId, value: &mut Value, declared: Option<usize>) {
        match value {
            Value::Struct(s) => self.wrap_struct(id, s),
            Value::Structs(ss) => ss
                .iter_mut()
                .take(declared.unwrap_or(usize::MAX))
                .for_each(|s| self.wrap_struct(id, s)),
            _ => {}
        }
    }

    fn wrap_struct(&self, id: StructId, value: &mut StructValue) {
        let analysis = self.registry.analysis();
        for m in analysis.relation(id).members() {
            match m {
                RelationMember::Handle {
                    member,
                    handle_type,
                    shape,
                } => {
                    let declared = declared_member_length(value, shape);
                    if let Some(v) = value.members.get_mut(member) {
                        self.wrap_handles(handle_type, v, declared);
                    }
                }
                RelationMember::Struct {
                    member, struct_id, ..
                } => {
                    if let Some(v) = value.members.get_mut(member) {
                        self.wrap_struct_value(*struct_id, v, None);
                    }
                }
                RelationMember::ExtensionChain { member } => {
                    if let Some(Value::Chain(links)) = value.members.get_mut(member) {
                        for link in links {
                            if let ChainLink::Known { type_tag, value } = link {
                                if let Some(ext) = analysis.extension_struct(*type_tag) {
                                    self.wrap_struct(ext, value);
                                }
                            }
                        }
                    }
                }
                // The concrete type is only known per value; created objects never come back
                // through a type-erased member.
                RelationMember::GenericHandle { .. } => {}
            }
        }
    }
}

/// Parent and co-parent ids for the handles a wrap step produces, read from the caller's
/// virtual ids. Null ids count as absent.
pub(crate) fn step_owners(step: &WrapStep, params: &[Value]) -> (Option<u64>, Option<u64>) {
    let parent = step
        .parent
        .and_then(|i| params.get(i))
        .and_then(Value::as_handle)
        .filter(|h| *h != NULL_HANDLE);
    let co_parent = match &step.co_parent {
        CoParent::None => None,
        CoParent::Param(i) => params.get(*i).and_then(Value::as_handle),
        CoParent::InfoMember { param, member, .. } => params
            .get(*param)
            .and_then(Value::as_struct)
            .and_then(|info| info.get(member))
            .and_then(Value::as_handle),
    }
    .filter(|h| *h != NULL_HANDLE);
    (parent, co_parent)
}

/// Cuts the output arrays of an encoded copy of `params` down to their declared element
/// counts, so slots the driver never filled stay out of the trace.
pub(crate) fn trim_outputs(registry: &ApiRegistry, plan: &CallPlan, params: &mut [Value]) {
    for step in &plan.wrap {
        let declared = match &step.kind {
            WrapKind::HandleArray { length, .. } | WrapKind::StructArray { length, .. } => {
                declared_param_length(&plan.command, params, length)
            }
            _ => None,
        };
        let Some(value) = params.get_mut(step.param) else {
            continue;
        };
        match (&step.kind, value) {
            (WrapKind::HandleArray { .. }, Value::Handles(hs)) => {
                if let Some(n) = declared {
                    hs.truncate(n);
                }
            }
            (WrapKind::Struct(id), Value::Struct(s)) => trim_struct(registry, *id, s),
            (WrapKind::StructArray { struct_id, .. }, Value::Structs(ss)) => {
                if let Some(n) = declared {
                    ss.truncate(n);
                }
                ss.iter_mut().for_each(|s| trim_struct(registry, *struct_id, s));
            }
            _ => {}
        }
    }
}

fn trim_struct(registry: &ApiRegistry, id: StructId, value: &mut StructValue) {
    let analysis = registry.analysis();
    for m in analysis.relation(id).members() {
        match m {
            RelationMember::Handle { member, shape, .. } => {
                let declared = declared_member_length(value, shape);
                if let (Some(n), Some(Value::Handles(hs))) =
                    (declared, value.members.get_mut(member))
                {
                    hs.truncate(n);
                }
            }
            RelationMember::Struct {
                member, struct_id, ..
            } => match value.members.get_mut(member) {
                Some(Value::Struct(s)) => trim_struct(registry, *struct_id, s),
                Some(Value::Structs(ss)) => {
                    ss.iter_mut().for_each(|s| trim_struct(registry, *struct_id, s))
                }
                _ => {}
            },
            RelationMember::ExtensionChain { member } => {
                if let Some(Value::Chain(links)) = value.members.get_mut(member) {
                    for link in links {
                        if let ChainLink::Known { type_tag, value } = link {
                            if let Some(ext) = analysis.extension_struct(*type_tag) {
                                trim_struct(registry, ext, value);
                            }
                        }
                    }
                }
            }
            RelationMember::GenericHandle { .. } => {}
        }
    }
}

fn as_length(value: &Value) -> Option<usize> {
    value.as_scalar().and_then(|n| usize::try_from(n).ok())
}

/// Declared element count of a member array, read from its sibling count member.
fn declared_member_length(value: &StructValue, shape: &ValueShape) -> Option<usize> {
    let ValueShape::Dynamic(path) = shape else {
        return None;
    };
    if path.is_nested() {
        return None;
    }
    value.get(path.root()).and_then(as_length)
}

/// Declared element count of an output array parameter, following nested paths such as
/// `pAllocateInfo->commandBufferCount`.
pub(crate) fn declared_param_length(
    command: &Command,
    params: &[Value],
    shape: &ValueShape,
) -> Option<usize> {
    let ValueShape::Dynamic(path) = shape else {
        return None;
    };
    resolve_length(command, params, path)
}

fn resolve_length(command: &Command, params: &[Value], path: &LengthPath) -> Option<usize> {
    let mut current = params.get(command.param_index(path.root())?)?;
    for segment in &path.segments()[1..] {
        current = current.as_struct()?.get(segment)?;
    }
    as_length(current)
}
