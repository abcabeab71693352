use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// First virtual id handed out; ids increase monotonically from here.
    pub first_handle_id: u64,
    /// Record which handles each command buffer references.
    pub track_command_buffer_references: bool,
    /// Give an already-wrapped real handle its existing id when it is retrieved again.
    pub reuse_retrieved_ids: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            first_handle_id: 1,
            track_command_buffer_references: true,
            reuse_retrieved_ids: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Tearing down an instance or device also drops every object created beneath it.
    pub cascade_scope_destroy: bool,
    /// Upper bound on retained decode warnings; older ones are still logged.
    pub max_retained_warnings: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cascade_scope_destroy: true,
            max_retained_warnings: 1024,
        }
    }
}
