//! Dynamically typed call arguments.
//!
//! Handles are opaque `u64`s; `0` is the null handle on both sides of the virtualization layer.
//! Pointer outputs are modelled in place: the callee overwrites the parameter's value.

use std::collections::BTreeMap;

use gfxvirt_schema::ReturnKind;
use serde::{Deserialize, Serialize};

pub const NULL_HANDLE: u64 = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Scalar(u64),
    Handle(u64),
    Handles(Vec<u64>),
    Struct(StructValue),
    Structs(Vec<StructValue>),
    /// Flattened extension chain, in link order.
    Chain(Vec<ChainLink>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<u64> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<u64> {
        match self {
            Value::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Every handle value directly or transitively held by this value.
    pub fn collect_handles(&self, out: &mut Vec<u64>) {
        match self {
            Value::Handle(h) if *h != NULL_HANDLE => out.push(*h),
            Value::Handles(hs) => out.extend(hs.iter().copied().filter(|h| *h != NULL_HANDLE)),
            Value::Struct(s) => s.collect_handles(out),
            Value::Structs(ss) => ss.iter().for_each(|s| s.collect_handles(out)),
            Value::Chain(links) => {
                for link in links {
                    if let ChainLink::Known { value, .. } = link {
                        value.collect_handles(out);
                    }
                }
            }
            _ => {}
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructValue {
    pub type_name: String,
    pub members: BTreeMap<String, Value>,
}

impl StructValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn with(mut self, member: impl Into<String>, value: Value) -> Self {
        self.members.insert(member.into(), value);
        self
    }

    pub fn get(&self, member: &str) -> Option<&Value> {
        self.members.get(member)
    }

    pub fn get_mut(&mut self, member: &str) -> Option<&mut Value> {
        self.members.get_mut(member)
    }

    fn collect_handles(&self, out: &mut Vec<u64>) {
        self.members.values().for_each(|v| v.collect_handles(out));
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainLink {
    Known { type_tag: u32, value: StructValue },
    /// A link whose tag this build does not know; carried through untouched.
    Unknown { type_tag: u32, bytes: Vec<u8> },
}

impl ChainLink {
    pub fn type_tag(&self) -> u32 {
        match self {
            ChainLink::Known { type_tag, .. } | ChainLink::Unknown { type_tag, .. } => *type_tag,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnValue {
    #[default]
    Void,
    Result(i32),
    Bool(bool),
    Pointer(u64),
    U32(u32),
    U64(u64),
}

impl ReturnValue {
    pub const SUCCESS: ReturnValue = ReturnValue::Result(0);

    /// The value a no-op stub returns for a command of this kind.
    pub fn neutral(kind: ReturnKind) -> Self {
        match kind {
            ReturnKind::Void => ReturnValue::Void,
            ReturnKind::Result => ReturnValue::SUCCESS,
            ReturnKind::Bool32 => ReturnValue::Bool(true),
            ReturnKind::FunctionPointer => ReturnValue::Pointer(0),
            ReturnKind::U32 => ReturnValue::U32(0),
            ReturnKind::DeviceAddress
            | ReturnKind::DeviceSize
            | ReturnKind::U64
            | ReturnKind::Other => ReturnValue::U64(0),
        }
    }

    /// Neutral value of the same variant, for commands whose declared kind is unknown.
    pub fn neutral_like(&self) -> Self {
        match self {
            ReturnValue::Void => ReturnValue::Void,
            ReturnValue::Result(_) => ReturnValue::SUCCESS,
            ReturnValue::Bool(_) => ReturnValue::Bool(true),
            ReturnValue::Pointer(_) => ReturnValue::Pointer(0),
            ReturnValue::U32(_) => ReturnValue::U32(0),
            ReturnValue::U64(_) => ReturnValue::U64(0),
        }
    }

    /// Negative result codes signal failure; every other value is success.
    pub fn is_failure(&self) -> bool {
        matches!(self, ReturnValue::Result(code) if *code < 0)
    }
}
