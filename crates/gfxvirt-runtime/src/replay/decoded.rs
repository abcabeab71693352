//! Decoded call values: recorded virtual ids next to the storage for their real handles.

use std::collections::BTreeMap;

use gfxvirt_schema::StructId;

use crate::value::{ChainLink, StructValue, Value, NULL_HANDLE};

/// Recorded ids plus the handle storage the replay driver reads or fills.
///
/// Storage for output arrays embedded in structs starts unsized; its length has to be set
/// before the driver can write into it or the mapper can read from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlePointer {
    ids: Vec<u64>,
    handles: Option<Vec<u64>>,
    returned: Option<usize>,
    scalar: bool,
}

impl HandlePointer {
    pub fn sized(ids: Vec<u64>, scalar: bool) -> Self {
        let handles = Some(vec![NULL_HANDLE; ids.len()]);
        Self {
            ids,
            handles,
            returned: None,
            scalar,
        }
    }

    pub fn unsized_output(ids: Vec<u64>, scalar: bool) -> Self {
        Self {
            ids,
            handles: None,
            returned: None,
            scalar,
        }
    }

    /// Splits a recorded handle value. `None` for anything that is not a handle value.
    pub fn ids_of(value: &Value) -> Option<(Vec<u64>, bool)> {
        match value {
            Value::Handle(h) => Some((vec![*h], true)),
            Value::Handles(hs) => Some((hs.clone(), false)),
            _ => None,
        }
    }

    pub fn decoded_ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn is_sized(&self) -> bool {
        self.handles.is_some()
    }

    pub fn set_handle_length(&mut self, len: usize) {
        self.handles = Some(vec![NULL_HANDLE; len]);
    }

    pub fn handles(&self) -> Option<&[u64]> {
        self.handles.as_deref()
    }

    /// Copies the handles the driver wrote into the storage and remembers how many there were.
    ///
    /// The storage keeps its length; handles beyond it are dropped.
    pub fn store_returned(&mut self, written: &[u64]) -> bool {
        let Some(handles) = self.handles.as_mut() else {
            return false;
        };
        for (dst, src) in handles.iter_mut().zip(written) {
            *dst = *src;
        }
        self.returned = Some(written.len());
        true
    }

    /// Number of handles the driver returned, once outputs have been populated.
    pub fn returned_len(&self) -> Option<usize> {
        self.returned
    }

    /// The handles a call created: the populated prefix of the storage.
    pub fn created(&self) -> Option<&[u64]> {
        let handles = self.handles.as_deref()?;
        let len = self.returned.map_or(handles.len(), |n| n.min(handles.len()));
        Some(&handles[..len])
    }

    pub(crate) fn parts_mut(&mut self) -> (&[u64], Option<&mut Vec<u64>>) {
        (&self.ids, self.handles.as_mut())
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    /// The value handed to the driver. Unsized storage is passed as null.
    pub fn to_native(&self) -> Value {
        match (&self.handles, self.scalar) {
            (None, _) => Value::Null,
            (Some(hs), true) => Value::Handle(hs.first().copied().unwrap_or(NULL_HANDLE)),
            (Some(hs), false) => Value::Handles(hs.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Value(Value),
    Handles(HandlePointer),
    Struct(DecodedStruct),
    Structs(Vec<DecodedStruct>),
    Chain(Vec<DecodedLink>),
}

impl Decoded {
    pub fn to_native(&self) -> Value {
        match self {
            Decoded::Value(v) => v.clone(),
            Decoded::Handles(ptr) => ptr.to_native(),
            Decoded::Struct(s) => Value::Struct(s.to_native()),
            Decoded::Structs(ss) => {
                Value::Structs(ss.iter().map(DecodedStruct::to_native).collect())
            }
            Decoded::Chain(links) => Value::Chain(
                links
                    .iter()
                    .map(|l| ChainLink::Known {
                        type_tag: l.type_tag,
                        value: l.value.to_native(),
                    })
                    .collect(),
            ),
        }
    }

    pub fn as_handles(&self) -> Option<&HandlePointer> {
        match self {
            Decoded::Handles(ptr) => Some(ptr),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&DecodedStruct> {
        match self {
            Decoded::Struct(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedStruct {
    pub type_name: String,
    pub struct_id: Option<StructId>,
    pub members: BTreeMap<String, Decoded>,
}

impl DecodedStruct {
    pub fn get(&self, member: &str) -> Option<&Decoded> {
        self.members.get(member)
    }

    pub fn to_native(&self) -> StructValue {
        StructValue {
            type_name: self.type_name.clone(),
            members: self
                .members
                .iter()
                .map(|(name, d)| (name.clone(), d.to_native()))
                .collect(),
        }
    }
}

/// A chain link whose type tag resolved to a registered extension struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedLink {
    pub type_tag: u32,
    pub value: DecodedStruct,
}
