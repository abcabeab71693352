//! Schema records describing API commands, structures and handle types.
//!
//! These are the shapes the registry parser must supply. The parser lives outside this crate; the
//! records deserialize from JSON so fixtures and tooling can feed the analyzer directly.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Array shape of a parameter or member, as written in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayShape {
    /// Fixed-capacity inline array (`VkFoo handles[4]`).
    Fixed(u32),
    /// Array whose element count lives in another parameter or member, e.g.
    /// `pAllocateInfo->commandBufferCount`.
    Dynamic { length: String },
}

/// Parsed access path of an array length expression.
///
/// `count` names a sibling; `info->count` (or `info.count`) reaches through a struct parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LengthPath {
    segments: Vec<String>,
}

impl LengthPath {
    /// Parses a length expression. Returns `None` for empty segments or non-identifier text.
    pub fn parse(expr: &str) -> Option<Self> {
        let segments: Vec<String> = expr
            .split("->")
            .flat_map(|part| part.split('.'))
            .map(|s| s.trim().to_owned())
            .collect();
        let valid = segments.iter().all(|s| {
            !s.is_empty()
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !s.starts_with(|c: char| c.is_ascii_digit())
        });
        if segments.is_empty() || !valid {
            return None;
        }
        Some(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The parameter (or member) the path starts from.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Whether the length is read through another struct (`info->count`).
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }
}

impl fmt::Display for LengthPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("->"))
    }
}

/// Resolved shape of a value: how many elements it holds and where the count comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueShape {
    /// Plain by-value scalar or struct.
    Scalar,
    /// Pointer to exactly one element.
    Pointer,
    /// Inline array with a compile-time capacity.
    Fixed(u32),
    /// Pointer to an array whose length is read from `LengthPath`.
    Dynamic(LengthPath),
}

impl ValueShape {
    /// Pointer and dynamic-array storage must be sized before it can be populated at replay.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, ValueShape::Pointer | ValueShape::Dynamic(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ValueShape::Fixed(_) | ValueShape::Dynamic(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// A command parameter or a struct member.
///
/// Struct members share the parameter shape; `extension_chain` only applies to members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub base_type: String,
    #[serde(default)]
    pub pointer: bool,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<ArrayShape>,
    /// Opaque resource handle. Normalized against [`Schema::handle_types`] on load.
    #[serde(default)]
    pub handle: bool,
    /// The open-ended, type-tagged extension chain member (`pNext`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extension_chain: bool,
    /// For type-erased handle values: the sibling holding the object-type discriminator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_type_from: Option<String>,
}

/// Struct members use the same record as parameters.
pub type Member = Parameter;

impl Parameter {
    /// Non-const pointers (and non-const dynamic arrays) are written by the callee.
    pub fn direction(&self) -> Direction {
        let indirect = self.pointer || matches!(self.array, Some(ArrayShape::Dynamic { .. }));
        if indirect && !self.is_const {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    pub fn is_output(&self) -> bool {
        self.direction() == Direction::Output
    }

    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }

    pub fn length_expr(&self) -> Option<&str> {
        match &self.array {
            Some(ArrayShape::Dynamic { length }) => Some(length),
            _ => None,
        }
    }

    /// Resolves the value shape. Fails only on a malformed length expression.
    pub fn shape(&self) -> Result<ValueShape, MalformedLength> {
        match &self.array {
            Some(ArrayShape::Fixed(capacity)) => Ok(ValueShape::Fixed(*capacity)),
            Some(ArrayShape::Dynamic { length }) => LengthPath::parse(length)
                .map(ValueShape::Dynamic)
                .ok_or_else(|| MalformedLength(length.clone())),
            None if self.pointer => Ok(ValueShape::Pointer),
            None => Ok(ValueShape::Scalar),
        }
    }
}

/// A length expression that does not parse as an access path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedLength(pub String);

/// Category of a command's return type, used for failure checks and no-op defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnKind {
    Void,
    /// Integer result code; negative values signal failure.
    Result,
    Bool32,
    FunctionPointer,
    DeviceAddress,
    DeviceSize,
    U32,
    U64,
    /// Unrecognized type; defaults are zero-initialized.
    Other,
}

impl ReturnKind {
    pub fn from_type_name(name: Option<&str>) -> Self {
        match name {
            None | Some("void") => ReturnKind::Void,
            Some("VkResult") => ReturnKind::Result,
            Some("VkBool32") => ReturnKind::Bool32,
            Some("PFN_vkVoidFunction") => ReturnKind::FunctionPointer,
            Some("VkDeviceAddress") => ReturnKind::DeviceAddress,
            Some("VkDeviceSize") => ReturnKind::DeviceSize,
            Some("uint32_t") => ReturnKind::U32,
            Some("uint64_t") => ReturnKind::U64,
            Some(_) => ReturnKind::Other,
        }
    }

    pub fn is_void(self) -> bool {
        self == ReturnKind::Void
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub params: Vec<Parameter>,
}

impl Command {
    pub fn return_kind(&self) -> ReturnKind {
        ReturnKind::from_type_name(self.return_type.as_deref())
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Index of the first handle-typed parameter; it selects the dispatch scope.
    pub fn first_handle_param(&self) -> Option<usize> {
        self.params.iter().position(|p| p.handle)
    }
}

/// A type-erased handle member paired with its object-type discriminator member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericHandleMember {
    pub member: String,
    pub type_member: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
    /// May be linked into another struct's extension chain.
    #[serde(default)]
    pub can_extend: bool,
    /// Chain type tag (`sType` value). Required when `can_extend` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<u32>,
    /// Structs whose chain this struct may join; empty means any chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_handles: Vec<GenericHandleMember>,
}

impl StructType {
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn chain_member(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.extension_chain)
    }

    pub fn is_generic_handle_container(&self) -> bool {
        !self.generic_handles.is_empty()
    }

    /// Whether this extension struct may be linked into `target`'s chain.
    pub fn may_extend(&self, target: &str) -> bool {
        self.can_extend && (self.extends.is_empty() || self.extends.iter().any(|t| t == target))
    }

    pub fn generic_type_member(&self, member: &str) -> Option<&str> {
        self.generic_handles
            .iter()
            .find(|g| g.member == member)
            .map(|g| g.type_member.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleType {
    pub name: String,
    /// Dispatchable handles carry a dispatch key in their first pointer-sized slot.
    #[serde(default)]
    pub dispatchable: bool,
}

/// One entry of the object-type enumeration used by generic handle containers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub value: u32,
    pub handle_type: String,
}

/// The full set of records for one API version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub handle_types: Vec<HandleType>,
    #[serde(default)]
    pub object_types: Vec<ObjectType>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub structs: Vec<StructType>,
}

impl Schema {
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let mut schema: Schema = serde_json::from_str(json)?;
        schema.normalize();
        Ok(schema)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SchemaError> {
        let mut schema: Schema = serde_json::from_reader(reader)?;
        schema.normalize();
        Ok(schema)
    }

    /// Marks every parameter/member whose base type is a declared handle type.
    pub fn normalize(&mut self) {
        let handle_names: Vec<String> = self.handle_types.iter().map(|h| h.name.clone()).collect();
        let is_handle = |p: &Parameter| handle_names.iter().any(|h| *h == p.base_type);
        for cmd in &mut self.commands {
            for p in &mut cmd.params {
                p.handle |= is_handle(p);
            }
        }
        for st in &mut self.structs {
            for m in &mut st.members {
                m.handle |= is_handle(m);
            }
        }
    }

    pub fn is_handle_type(&self, name: &str) -> bool {
        self.handle_types.iter().any(|h| h.name == name)
    }

    pub fn handle_type(&self, name: &str) -> Option<&HandleType> {
        self.handle_types.iter().find(|h| h.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn struct_type(&self, name: &str) -> Option<&StructType> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// Handle type named by an object-type discriminator value.
    pub fn object_type_handle(&self, value: u32) -> Option<&str> {
        self.object_types
            .iter()
            .find(|o| o.value == value)
            .map(|o| o.handle_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_path_accepts_arrow_and_dot() {
        let p = LengthPath::parse("pAllocateInfo->commandBufferCount").unwrap();
        assert_eq!(p.root(), "pAllocateInfo");
        assert!(p.is_nested());
        assert_eq!(p.to_string(), "pAllocateInfo->commandBufferCount");

        let p = LengthPath::parse("info.count").unwrap();
        assert_eq!(p.segments(), ["info", "count"]);
    }

    #[test]
    fn length_path_rejects_expressions() {
        assert!(LengthPath::parse("").is_none());
        assert!(LengthPath::parse("count*2").is_none());
        assert!(LengthPath::parse("info->").is_none());
        assert!(LengthPath::parse("2count").is_none());
    }

    #[test]
    fn non_const_pointer_is_output() {
        let p = Parameter {
            name: "pBuffer".into(),
            base_type: "VkBuffer".into(),
            pointer: true,
            is_const: false,
            array: None,
            handle: true,
            extension_chain: false,
            generic_type_from: None,
        };
        assert_eq!(p.direction(), Direction::Output);
        assert_eq!(p.shape(), Ok(ValueShape::Pointer));

        let p = Parameter {
            is_const: true,
            ..p
        };
        assert_eq!(p.direction(), Direction::Input);
    }

    #[test]
    fn normalize_flags_handle_members() {
        let mut schema: Schema = serde_json::from_str(
            r#"{
                "handle_types": [{"name": "VkBuffer"}],
                "structs": [
                    {"name": "VkInfo", "members": [{"name": "buffer", "base_type": "VkBuffer"}]}
                ]
            }"#,
        )
        .unwrap();
        assert!(!schema.structs[0].members[0].handle);
        schema.normalize();
        assert!(schema.structs[0].members[0].handle);
    }
}
