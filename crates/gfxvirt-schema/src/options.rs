//! Generator options: capture overrides, deny-lists and the naming conventions the classifier
//! keys on.
//!
//! Override and deny-list files use the same JSON layout the capture layer has always shipped:
//!
//! ```json
//! { "functions": { "vkCreateInstance": "OverrideCreateInstance" } }
//! { "functions": ["vkCmdFoo"], "structures": ["VkFoo"] }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid options JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct OverridesFile {
    #[serde(default)]
    functions: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DenyListFile {
    #[serde(default)]
    functions: Vec<String>,
    #[serde(default)]
    structures: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Native call name -> replacement implementation name.
    pub capture_overrides: BTreeMap<String, String>,
    pub denied_commands: BTreeSet<String>,
    pub denied_structs: BTreeSet<String>,

    pub create_prefixes: Vec<String>,
    pub destroy_prefixes: Vec<String>,
    /// Destroy-class prefixes that free pool allocations in bulk.
    pub pool_free_prefixes: Vec<String>,
    /// Destroy-class calls whose names carry no destroy prefix.
    pub extra_destroy_commands: Vec<String>,
    /// Calls that tear down the top-level owning object passed as their first parameter.
    pub whole_scope_destroy_commands: Vec<String>,
    /// Top-level object-creation entry points dispatched outside the generated tables.
    pub top_level_entry_points: Vec<String>,
    /// Handle types whose calls dispatch through the instance table.
    pub instance_scope_handles: Vec<String>,
    pub command_buffer_handle: String,
    /// Type-name fragments that identify an accompanying "info" parameter.
    pub info_type_markers: Vec<String>,
    /// Type-name fragment identifying a pool handle.
    pub pool_type_marker: String,
    /// Get-proc-address entry points installed straight from the resolver.
    pub proc_addr_commands: Vec<String>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
        Self {
            capture_overrides: BTreeMap::new(),
            denied_commands: BTreeSet::new(),
            denied_structs: BTreeSet::new(),
            create_prefixes: strings(&["vkCreate", "vkAllocate"]),
            destroy_prefixes: strings(&["vkDestroy", "vkFree"]),
            pool_free_prefixes: strings(&["vkFree"]),
            extra_destroy_commands: strings(&["vkReleasePerformanceConfigurationINTEL"]),
            whole_scope_destroy_commands: strings(&["vkDestroyInstance", "vkDestroyDevice"]),
            top_level_entry_points: strings(&["vkCreateInstance", "vkCreateDevice"]),
            instance_scope_handles: strings(&["VkInstance", "VkPhysicalDevice"]),
            command_buffer_handle: "VkCommandBuffer".to_owned(),
            info_type_markers: strings(&["CreateInfo", "AllocateInfo"]),
            pool_type_marker: "Pool".to_owned(),
            proc_addr_commands: strings(&["vkGetInstanceProcAddr", "vkGetDeviceProcAddr"]),
        }
    }
}

impl GeneratorOptions {
    pub fn from_json_str(json: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Merges a `{"functions": {...}}` override map.
    pub fn add_capture_overrides_json(&mut self, json: &str) -> Result<(), OptionsError> {
        let file: OverridesFile = serde_json::from_str(json)?;
        self.capture_overrides.extend(file.functions);
        Ok(())
    }

    /// Merges a `{"functions": [...], "structures": [...]}` deny-list.
    pub fn add_deny_list_json(&mut self, json: &str) -> Result<(), OptionsError> {
        let file: DenyListFile = serde_json::from_str(json)?;
        self.denied_commands.extend(file.functions);
        self.denied_structs.extend(file.structures);
        Ok(())
    }

    pub fn load_capture_overrides(&mut self, path: impl AsRef<Path>) -> Result<(), OptionsError> {
        let json = read_to_string(path.as_ref())?;
        self.add_capture_overrides_json(&json)
    }

    pub fn load_deny_list(&mut self, path: impl AsRef<Path>) -> Result<(), OptionsError> {
        let json = read_to_string(path.as_ref())?;
        self.add_deny_list_json(&json)
    }

    pub fn is_create_name(&self, name: &str) -> bool {
        self.create_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn is_destroy_name(&self, name: &str) -> bool {
        self.destroy_prefixes.iter().any(|p| name.starts_with(p.as_str()))
            || self.extra_destroy_commands.iter().any(|c| c == name)
    }

    pub fn is_pool_free_name(&self, name: &str) -> bool {
        self.pool_free_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn is_whole_scope_destroy(&self, name: &str) -> bool {
        self.whole_scope_destroy_commands.iter().any(|c| c == name)
    }

    pub fn is_top_level_entry_point(&self, name: &str) -> bool {
        self.top_level_entry_points.iter().any(|c| c == name)
    }

    pub fn is_instance_scope_handle(&self, type_name: &str) -> bool {
        self.instance_scope_handles.iter().any(|h| h == type_name)
    }

    pub fn is_info_type(&self, type_name: &str) -> bool {
        self.info_type_markers.iter().any(|m| type_name.contains(m.as_str()))
    }

    pub fn is_pool_type(&self, type_name: &str) -> bool {
        type_name.contains(self.pool_type_marker.as_str())
    }

    pub fn is_proc_addr_command(&self, name: &str) -> bool {
        self.proc_addr_commands.iter().any(|c| c == name)
    }

    pub fn override_for(&self, name: &str) -> Option<&str> {
        self.capture_overrides.get(name).map(String::as_str)
    }
}

fn read_to_string(path: &Path) -> Result<String, OptionsError> {
    fs::read_to_string(path).map_err(|source| OptionsError::Io {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_and_deny_files_merge() {
        let mut opts = GeneratorOptions::default();
        opts.add_capture_overrides_json(
            r#"{"functions": {"vkCreateInstance": "OverrideCreateInstance"}}"#,
        )
        .unwrap();
        opts.add_deny_list_json(
            r#"{"functions": ["vkCmdDebugMarkerEXT"], "structures": ["VkDebugInfo"]}"#,
        )
        .unwrap();

        assert_eq!(opts.override_for("vkCreateInstance"), Some("OverrideCreateInstance"));
        assert!(opts.denied_commands.contains("vkCmdDebugMarkerEXT"));
        assert!(opts.denied_structs.contains("VkDebugInfo"));
    }

    #[test]
    fn partial_options_json_keeps_defaults() {
        let opts =
            GeneratorOptions::from_json_str(r#"{"command_buffer_handle": "XrCommandBuffer"}"#)
                .unwrap();
        assert_eq!(opts.command_buffer_handle, "XrCommandBuffer");
        assert!(opts.is_create_name("vkCreateBuffer"));
        assert!(opts.is_destroy_name("vkReleasePerformanceConfigurationINTEL"));
    }

    #[test]
    fn missing_file_reports_path() {
        let mut opts = GeneratorOptions::default();
        let err = opts.load_deny_list("/nonexistent/deny.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/deny.json"));
    }
}
