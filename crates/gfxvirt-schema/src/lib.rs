//! Handle-virtualization rules for a capture/replay layer.
//!
//! The crate turns an API schema (commands, structs, handle types) into the data the runtime
//! interprets: per-struct handle relations, per-command capture plans, the dispatch table layout
//! and the set of replay struct handlers. [`ApiRegistry::build`] runs every stage; schema defects
//! surface as [`SchemaError`] before anything is produced.

pub mod analyze;
pub mod capture_plan;
pub mod classify;
pub mod dispatch_plan;
pub mod error;
pub mod mapper_plan;
pub mod model;
pub mod options;
pub mod registry;

pub use analyze::{HandleAnalysis, HandleRelation, RelationMember, StructId};
pub use capture_plan::{CallPlan, CaptureStep, UnwrapKind, UnwrapStep, WrapKind, WrapStep};
pub use classify::{
    CallCategory, Classification, Classifier, CoParent, CommandTraits, CreateShape, DestroyKind,
    DestroyShape, DispatchScope, RecordShape,
};
pub use dispatch_plan::{DispatchEntry, DispatchPartition};
pub use error::{Diagnostic, SchemaError};
pub use mapper_plan::{StructHandlers, StructMapperPlan};
pub use model::{
    ArrayShape, Command, Direction, HandleType, LengthPath, Member, ObjectType, Parameter,
    ReturnKind, Schema, StructType, ValueShape,
};
pub use options::{GeneratorOptions, OptionsError};
pub use registry::ApiRegistry;
