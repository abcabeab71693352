use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    /// Output handle storage was populated or mapped before its length was set.
    #[error("{struct_name}.{member}: handle storage used before its length was set")]
    HandleStorageNotSized { struct_name: String, member: String },

    #[error("{command}: recorded call has {found} parameters, expected {expected}")]
    ParamCount {
        command: String,
        expected: usize,
        found: usize,
    },

    #[error("{entity}.{member}: expected {expected} value")]
    UnexpectedValue {
        entity: String,
        member: String,
        expected: &'static str,
    },
}

/// A recoverable mismatch found while decoding or mapping a recorded call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeWarning {
    /// Extension-chain link with an unregistered type tag; the link is skipped.
    UnknownChainTag { struct_name: String, type_tag: u32 },
    /// Recorded id count and created handle count differ; the shorter length is used.
    HandleCountMismatch {
        entity: String,
        member: String,
        ids: usize,
        handles: usize,
    },
    /// A virtual id with no object table entry; mapped to the null handle.
    UnknownObject { handle_type: String, id: u64 },
}
