//! Runtime half of handle virtualization.
//!
//! [`capture::CaptureSession`] sits between an application and the driver and hands out
//! virtual ids; [`replay::ReplayConsumer`] re-issues the recorded calls and maps those ids to
//! the handles the replay driver creates. Both interpret the plans an
//! [`gfxvirt_schema::ApiRegistry`] derives from the API schema.

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod replay;
pub mod value;

pub use capture::hooks::{CaptureHooks, NoHooks};
pub use capture::trace::{read_json_lines, ApiCallRecord, JsonLinesTrace, MemoryTrace, TraceWriter};
pub use capture::CaptureSession;
pub use config::{CaptureConfig, ReplayConfig};
pub use dispatch::{noop_entry, DispatchTable, EntryPoint, ProcAddrResolver};
pub use error::{DecodeWarning, ReplayError};
pub use replay::decoded::{Decoded, DecodedLink, DecodedStruct, HandlePointer};
pub use replay::mapper::StructHandleMapper;
pub use replay::object_info::{ObjectInfo, ObjectInfoTable};
pub use replay::ReplayConsumer;
pub use value::{ChainLink, ReturnValue, StructValue, Value, NULL_HANDLE};
