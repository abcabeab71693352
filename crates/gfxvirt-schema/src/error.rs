use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Design-time schema defects.
///
/// Every variant is fatal: the registry is not built and the offending entity is named so the
/// schema (or the options feeding it) can be fixed.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("duplicate {kind} record {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("struct {struct_name} can extend a chain but has no type tag")]
    MissingTypeTag { struct_name: String },

    #[error("extension structs {first} and {second} share type tag {tag}")]
    DuplicateTypeTag {
        tag: u32,
        first: String,
        second: String,
    },

    #[error("struct composition cycle through {struct_name}")]
    StructCycle { struct_name: String },

    #[error("{entity}: length expression `{expr}` of {member} is malformed")]
    MalformedLength {
        entity: String,
        member: String,
        expr: String,
    },

    #[error("{command}: co-parent handle for {param} cannot be resolved ({reason})")]
    UnresolvableCoParent {
        command: String,
        param: String,
        reason: &'static str,
    },

    #[error("{command}: output {param} is neither a handle nor a handle-bearing struct")]
    InvalidCreateOutput { command: String, param: String },

    #[error("{command}: destroy target parameter #{index} is missing or not a handle")]
    InvalidDestroyTarget { command: String, index: usize },
}

/// A recoverable shape mismatch found while deriving the rules.
///
/// Diagnostics are logged as warnings and kept on the registry; they never stop generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub entity: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}
