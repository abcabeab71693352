//! Capture-side call wrappers, derived per command.
//!
//! A [`CallPlan`] is the data form of one intercepted entry point: which parameters need their
//! virtual ids unwrapped, which outputs get wrapped, how the trace entry ends, and the fixed
//! order in which the capture session runs those steps.

use crate::analyze::{HandleAnalysis, StructId};
use crate::classify::{CallCategory, Classification, CoParent, CommandTraits, DispatchScope};
use crate::error::SchemaError;
use crate::model::{Command, ReturnKind, ValueShape};

/// One step of an intercepted call, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureStep {
    AcquireSharedLock,
    PreCallHook,
    EncodeParameters,
    UnwrapHandles,
    Dispatch,
    InvokeOverride,
    /// Wrap new handles on success, mark the output as omitted on failure.
    ResolveOutputs,
    RemoveDestroyed,
    PostCallHook,
    ReleaseLock,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnwrapKind {
    Handle,
    HandleArray,
    Struct(StructId),
    StructArray(StructId),
    /// Type-erased handle whose type discriminator is parameter `type_param`.
    GenericHandle { type_param: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnwrapStep {
    pub param: usize,
    pub kind: UnwrapKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WrapKind {
    Handle { handle_type: String },
    HandleArray { handle_type: String, length: ValueShape },
    Struct(StructId),
    StructArray { struct_id: StructId, length: ValueShape },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrapStep {
    pub param: usize,
    pub kind: WrapKind,
    pub parent: Option<usize>,
    pub co_parent: CoParent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPlan {
    pub command: Command,
    pub classification: Classification,
    pub return_kind: ReturnKind,
    pub unwrap: Vec<UnwrapStep>,
    pub wrap: Vec<WrapStep>,
}

impl CallPlan {
    pub fn derive(
        command: &Command,
        classification: Classification,
        analysis: &HandleAnalysis,
    ) -> Result<Self, SchemaError> {
        let mut unwrap = Vec::new();
        let mut wrap = Vec::new();

        for (index, p) in command.params.iter().enumerate() {
            let shape = p.shape().map_err(|bad| SchemaError::MalformedLength {
                entity: command.name.clone(),
                member: p.name.clone(),
                expr: bad.0,
            })?;
            let struct_id = analysis
                .struct_id(&p.base_type)
                .filter(|id| !analysis.relation(*id).is_empty());

            if !p.is_output() {
                let kind = if let Some(type_name) = &p.generic_type_from {
                    command
                        .param_index(type_name)
                        .map(|type_param| UnwrapKind::GenericHandle { type_param })
                } else if p.handle {
                    Some(if shape.is_array() || shape == ValueShape::Pointer {
                        UnwrapKind::HandleArray
                    } else {
                        UnwrapKind::Handle
                    })
                } else {
                    struct_id.map(|id| {
                        if shape.is_array() {
                            UnwrapKind::StructArray(id)
                        } else {
                            UnwrapKind::Struct(id)
                        }
                    })
                };
                if let Some(kind) = kind {
                    unwrap.push(UnwrapStep { param: index, kind });
                }
                continue;
            }

            let Some(create) = classification.category.create_shape() else {
                continue;
            };
            let kind = if p.handle {
                if shape.is_array() {
                    WrapKind::HandleArray {
                        handle_type: p.base_type.clone(),
                        length: shape,
                    }
                } else {
                    WrapKind::Handle {
                        handle_type: p.base_type.clone(),
                    }
                }
            } else if let Some(struct_id) = struct_id {
                if shape.is_array() {
                    WrapKind::StructArray {
                        struct_id,
                        length: shape,
                    }
                } else {
                    WrapKind::Struct(struct_id)
                }
            } else {
                continue;
            };
            wrap.push(WrapStep {
                param: index,
                kind,
                parent: create.parent,
                co_parent: create.co_parent.clone(),
            });
        }

        Ok(Self {
            return_kind: command.return_kind(),
            command: command.clone(),
            classification,
            unwrap,
            wrap,
        })
    }

    pub fn name(&self) -> &str {
        &self.command.name
    }

    pub fn category(&self) -> &CallCategory {
        &self.classification.category
    }

    pub fn scope(&self) -> DispatchScope {
        self.classification.scope
    }

    pub fn traits(&self) -> CommandTraits {
        self.classification.traits
    }

    pub fn is_override(&self) -> bool {
        self.traits().contains(CommandTraits::OVERRIDE)
    }

    /// The ordered steps the capture session executes for this command.
    pub fn sequence(&self) -> Vec<CaptureStep> {
        let traits = self.traits();
        let encode_after = traits.contains(CommandTraits::ENCODE_AFTER);

        let mut steps = vec![CaptureStep::AcquireSharedLock, CaptureStep::PreCallHook];
        if !encode_after {
            steps.push(CaptureStep::EncodeParameters);
        }
        if self.is_override() {
            steps.push(CaptureStep::InvokeOverride);
        } else {
            if !self.unwrap.is_empty() {
                steps.push(CaptureStep::UnwrapHandles);
            }
            steps.push(CaptureStep::Dispatch);
        }
        let wraps = !self.is_override() && !self.wrap.is_empty();
        if wraps || traits.contains(CommandTraits::SUPPRESS_ON_FAILURE) {
            steps.push(CaptureStep::ResolveOutputs);
        }
        if encode_after {
            steps.push(CaptureStep::EncodeParameters);
        }
        if matches!(self.category(), CallCategory::Destroy(_)) {
            steps.push(CaptureStep::RemoveDestroyed);
        }
        steps.push(CaptureStep::PostCallHook);
        steps.push(CaptureStep::ReleaseLock);
        steps
    }
}
