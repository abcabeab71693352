//! Call classification by handle-lifecycle effect.
//!
//! Every command is assigned exactly one [`CallCategory`], checked in priority order
//! create → destroy → retrieve → command-recording → plain. The result is computed once when
//! the registry is built and stored next to the command; nothing downstream re-derives it from
//! name patterns.

use bitflags::bitflags;
use tracing::warn;

use crate::analyze::{HandleAnalysis, RelationMember};
use crate::error::{Diagnostic, SchemaError};
use crate::model::{Command, Parameter, ValueShape};
use crate::options::GeneratorOptions;

/// Where the second owner of a newly created object comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoParent {
    None,
    /// Second input handle parameter (swapchain images, display modes, ...).
    Param(usize),
    /// Pool handle embedded in an allocate-info parameter (command buffers, descriptor sets).
    InfoMember {
        param: usize,
        member: String,
        handle_type: String,
    },
}

/// Object-producing call shape shared by create and retrieve calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateShape {
    /// Parameter receiving the produced handle(s) or handle-bearing struct(s).
    pub output: usize,
    /// First input handle parameter.
    pub parent: Option<usize>,
    pub co_parent: CoParent,
    /// Accompanying create/allocate info parameter, if any.
    pub info: Option<usize>,
    /// Every object shares one allocate-info describing the pool.
    pub pool_allocation: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyKind {
    /// Tears down the top-level owning object passed first.
    WholeScope,
    /// Frees an array of pool allocations passed last.
    PoolFree,
    Single,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyShape {
    pub target: usize,
    pub kind: DestroyKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordShape {
    pub command_buffer: usize,
    /// Other parameters whose handles are referenced by the recorded command.
    pub tracked: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallCategory {
    Create(CreateShape),
    Destroy(DestroyShape),
    Retrieve(CreateShape),
    Record(RecordShape),
    Plain,
}

impl CallCategory {
    pub fn create_shape(&self) -> Option<&CreateShape> {
        match self {
            CallCategory::Create(shape) | CallCategory::Retrieve(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn produces_handles(&self) -> bool {
        self.create_shape().is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchScope {
    Instance,
    Device,
    /// Top-level creation entry points, dispatched outside the generated tables.
    Layer,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CommandTraits: u32 {
        const HAS_OUTPUTS = 1 << 0;
        const HAS_RESULT = 1 << 1;
        const NEEDS_UNWRAP = 1 << 2;
        /// Begins a tracked trace entry (object lifetime or command-buffer state).
        const TRACKED = 1 << 3;
        const OVERRIDE = 1 << 4;
        /// Parameters are encoded after dispatch so outputs carry wrapped ids.
        const ENCODE_AFTER = 1 << 5;
        /// Output encoding is omitted when the call returns a failure code.
        const SUPPRESS_ON_FAILURE = 1 << 6;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub category: CallCategory,
    pub scope: DispatchScope,
    pub traits: CommandTraits,
    pub override_name: Option<String>,
}

pub struct Classifier<'a> {
    analysis: &'a HandleAnalysis,
    options: &'a GeneratorOptions,
}

impl<'a> Classifier<'a> {
    pub fn new(analysis: &'a HandleAnalysis, options: &'a GeneratorOptions) -> Self {
        Self { analysis, options }
    }

    /// Whether a parameter is a handle, carries handles, or is a type-erased handle value.
    pub fn carries_handles(&self, p: &Parameter) -> bool {
        p.handle || p.generic_type_from.is_some() || self.analysis.has_handles(&p.base_type)
    }

    pub fn classify(
        &self,
        cmd: &Command,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Classification, SchemaError> {
        let opts = self.options;
        let name = cmd.name.as_str();

        let category = if opts.is_create_name(name) {
            let output = cmd.params.len().checked_sub(1);
            CallCategory::Create(self.create_shape(cmd, output, diagnostics)?)
        } else if opts.is_destroy_name(name) {
            CallCategory::Destroy(self.destroy_shape(cmd)?)
        } else if let Some(output) = self.retrieved_output(cmd) {
            CallCategory::Retrieve(self.create_shape(cmd, Some(output), diagnostics)?)
        } else if cmd
            .params
            .first()
            .is_some_and(|p| p.handle && p.base_type == opts.command_buffer_handle)
        {
            let tracked = cmd
                .params
                .iter()
                .enumerate()
                .skip(1)
                .filter(|(_, p)| self.carries_handles(p))
                .map(|(i, _)| i)
                .collect();
            CallCategory::Record(RecordShape {
                command_buffer: 0,
                tracked,
            })
        } else {
            CallCategory::Plain
        };

        let scope = self.scope(cmd);

        let mut traits = CommandTraits::empty();
        if cmd.params.iter().any(Parameter::is_output) {
            traits |= CommandTraits::HAS_OUTPUTS;
        }
        if !cmd.return_kind().is_void() {
            traits |= CommandTraits::HAS_RESULT;
        }
        if cmd.params.iter().any(|p| !p.is_output() && self.carries_handles(p)) {
            traits |= CommandTraits::NEEDS_UNWRAP;
        }
        if category != CallCategory::Plain {
            traits |= CommandTraits::TRACKED;
        }
        if traits.intersects(CommandTraits::HAS_OUTPUTS | CommandTraits::HAS_RESULT) {
            traits |= CommandTraits::ENCODE_AFTER;
        }
        if traits.contains(CommandTraits::HAS_OUTPUTS | CommandTraits::HAS_RESULT) {
            traits |= CommandTraits::SUPPRESS_ON_FAILURE;
        }
        let override_name = opts.override_for(name).map(str::to_owned);
        if override_name.is_some() {
            traits |= CommandTraits::OVERRIDE;
        }

        Ok(Classification {
            category,
            scope,
            traits,
            override_name,
        })
    }

    /// Instance table when the first handle parameter is an instance-scope handle (or there is
    /// no handle at all), device table otherwise.
    pub fn scope(&self, cmd: &Command) -> DispatchScope {
        if self.options.is_top_level_entry_point(&cmd.name) {
            return DispatchScope::Layer;
        }
        match cmd.first_handle_param() {
            Some(i) if !self.options.is_instance_scope_handle(&cmd.params[i].base_type) => {
                DispatchScope::Device
            }
            _ => DispatchScope::Instance,
        }
    }

    /// Last output parameter that is a handle or a handle-bearing struct.
    fn retrieved_output(&self, cmd: &Command) -> Option<usize> {
        cmd.params
            .iter()
            .rposition(|p| p.is_output() && (p.handle || self.analysis.has_handles(&p.base_type)))
    }

    fn create_shape(
        &self,
        cmd: &Command,
        output: Option<usize>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<CreateShape, SchemaError> {
        let invalid_output = || SchemaError::InvalidCreateOutput {
            command: cmd.name.clone(),
            param: output
                .and_then(|i| cmd.params.get(i))
                .map(|p| p.name.clone())
                .unwrap_or_default(),
        };
        let output = output.ok_or_else(invalid_output)?;
        let handle = &cmd.params[output];
        if !(handle.handle || self.analysis.has_handles(&handle.base_type)) {
            return Err(invalid_output());
        }

        let mut input_handles = cmd
            .params
            .iter()
            .enumerate()
            .filter(|&(i, p)| i != output && p.handle && !p.is_output())
            .map(|(i, _)| i);
        let parent = input_handles.next();
        let second_handle = input_handles.next();

        let info = cmd
            .params
            .iter()
            .position(|p| !p.is_output() && self.options.is_info_type(&p.base_type));

        if let Some(info_index) = info {
            let info_param = &cmd.params[info_index];
            if info_param.is_array() && info_param.length_expr() != handle.length_expr() {
                let diag = Diagnostic {
                    entity: cmd.name.clone(),
                    message: format!(
                        "separate array counts for create info structures ({}) and handles ({})",
                        info_param.length_expr().unwrap_or("fixed"),
                        handle.length_expr().unwrap_or("fixed"),
                    ),
                };
                warn!(command = %cmd.name, "{}", diag.message);
                diagnostics.push(diag);
            }
        }

        let shape = handle.shape().map_err(|bad| SchemaError::MalformedLength {
            entity: cmd.name.clone(),
            member: handle.name.clone(),
            expr: bad.0,
        })?;
        let pool_allocation = match (&shape, info) {
            (ValueShape::Dynamic(len), Some(info_index)) => {
                len.is_nested() && len.root() == cmd.params[info_index].name
            }
            _ => false,
        };

        let co_parent = match (second_handle, info) {
            (Some(index), _) => CoParent::Param(index),
            (_, Some(info_index)) if pool_allocation => {
                self.pool_co_parent(cmd, info_index, &handle.name)?
            }
            _ => CoParent::None,
        };

        Ok(CreateShape {
            output,
            parent,
            co_parent,
            info,
            pool_allocation,
        })
    }

    fn pool_co_parent(
        &self,
        cmd: &Command,
        info_index: usize,
        output_name: &str,
    ) -> Result<CoParent, SchemaError> {
        let info_param = &cmd.params[info_index];
        let unresolvable = |reason| SchemaError::UnresolvableCoParent {
            command: cmd.name.clone(),
            param: output_name.to_owned(),
            reason,
        };
        let relation = self
            .analysis
            .relation_by_name(&info_param.base_type)
            .ok_or_else(|| unresolvable("allocate info is not a known struct"))?;
        relation
            .members()
            .iter()
            .find_map(|m| match m {
                RelationMember::Handle {
                    member,
                    handle_type,
                    shape: ValueShape::Scalar,
                } => Some(CoParent::InfoMember {
                    param: info_index,
                    member: member.clone(),
                    handle_type: handle_type.clone(),
                }),
                _ => None,
            })
            .ok_or_else(|| unresolvable("allocate info holds no pool handle"))
    }

    fn destroy_shape(&self, cmd: &Command) -> Result<DestroyShape, SchemaError> {
        let opts = self.options;
        let (target, kind) = if opts.is_whole_scope_destroy(&cmd.name) {
            (0, DestroyKind::WholeScope)
        } else if opts.is_pool_free_name(&cmd.name)
            && cmd.params.get(1).is_some_and(|p| p.handle && opts.is_pool_type(&p.base_type))
        {
            (cmd.params.len() - 1, DestroyKind::PoolFree)
        } else {
            (1, DestroyKind::Single)
        };

        match cmd.params.get(target) {
            Some(p) if p.handle => Ok(DestroyShape { target, kind }),
            _ => Err(SchemaError::InvalidDestroyTarget {
                command: cmd.name.clone(),
                index: target,
            }),
        }
    }
}
