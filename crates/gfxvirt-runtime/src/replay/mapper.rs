//! Struct handle mapping for replay: decode, size, map and register the handles inside
//! recorded struct values.

use std::collections::BTreeMap;

use gfxvirt_schema::{ApiRegistry, Command, Parameter, RelationMember, StructId};
use tracing::warn;

use crate::error::{DecodeWarning, ReplayError};
use crate::replay::decoded::{Decoded, DecodedLink, DecodedStruct, HandlePointer};
use crate::replay::object_info::ObjectInfoTable;
use crate::value::{ChainLink, StructValue, Value, NULL_HANDLE};

fn not_sized(entity: &str, member: &str) -> ReplayError {
    ReplayError::HandleStorageNotSized {
        struct_name: entity.to_owned(),
        member: member.to_owned(),
    }
}

pub struct StructHandleMapper<'a> {
    registry: &'a ApiRegistry,
}

impl<'a> StructHandleMapper<'a> {
    pub fn new(registry: &'a ApiRegistry) -> Self {
        Self { registry }
    }

    /// Decodes one recorded parameter. Top-level handle storage is always sized.
    pub fn decode_param(
        &self,
        param: &Parameter,
        value: &Value,
        warnings: &mut Vec<DecodeWarning>,
    ) -> Decoded {
        if param.handle {
            if let Some((ids, scalar)) = HandlePointer::ids_of(value) {
                return Decoded::Handles(HandlePointer::sized(ids, scalar));
            }
        }
        if let Some(id) = self.registry.analysis().struct_id(&param.base_type) {
            let output = param.is_output();
            match value {
                Value::Struct(s) => {
                    return Decoded::Struct(self.decode_struct(id, s, output, warnings))
                }
                Value::Structs(ss) => {
                    return Decoded::Structs(
                        ss.iter()
                            .map(|s| self.decode_struct(id, s, output, warnings))
                            .collect(),
                    )
                }
                _ => {}
            }
        }
        Decoded::Value(value.clone())
    }

    /// Decodes a struct value. In output structs, pointer and dynamic-array handle members get
    /// unsized storage.
    pub fn decode_struct(
        &self,
        id: StructId,
        value: &StructValue,
        output: bool,
        warnings: &mut Vec<DecodeWarning>,
    ) -> DecodedStruct {
        let relation = self.registry.analysis().relation(id);
        let mut members = BTreeMap::new();
        for (name, v) in &value.members {
            let role = relation.members().iter().find(|m| m.member() == name);
            let decoded = match (role, v) {
                (_, Value::Chain(links)) => {
                    Decoded::Chain(self.decode_chain(&value.type_name, links, output, warnings))
                }
                (Some(RelationMember::Handle { shape, .. }), v) => match HandlePointer::ids_of(v) {
                    Some((ids, scalar)) if output && shape.is_dynamic() => {
                        Decoded::Handles(HandlePointer::unsized_output(ids, scalar))
                    }
                    Some((ids, scalar)) => Decoded::Handles(HandlePointer::sized(ids, scalar)),
                    None => Decoded::Value(v.clone()),
                },
                (Some(RelationMember::Struct { struct_id, .. }), Value::Struct(inner)) => {
                    Decoded::Struct(self.decode_struct(*struct_id, inner, output, warnings))
                }
                (Some(RelationMember::Struct { struct_id, .. }), Value::Structs(inner)) => {
                    Decoded::Structs(
                        inner
                            .iter()
                            .map(|s| self.decode_struct(*struct_id, s, output, warnings))
                            .collect(),
                    )
                }
                _ => Decoded::Value(v.clone()),
            };
            members.insert(name.clone(), decoded);
        }
        DecodedStruct {
            type_name: value.type_name.clone(),
            struct_id: Some(id),
            members,
        }
    }

    /// Decodes chain links; links with unregistered tags are skipped with a warning.
    fn decode_chain(
        &self,
        owner: &str,
        links: &[ChainLink],
        output: bool,
        warnings: &mut Vec<DecodeWarning>,
    ) -> Vec<DecodedLink> {
        let analysis = self.registry.analysis();
        let mut decoded = Vec::with_capacity(links.len());
        for link in links {
            let known = match link {
                ChainLink::Known { type_tag, value } => analysis
                    .extension_struct(*type_tag)
                    .map(|ext| (*type_tag, ext, value)),
                ChainLink::Unknown { .. } => None,
            };
            match known {
                Some((type_tag, ext, value)) => decoded.push(DecodedLink {
                    type_tag,
                    value: self.decode_struct(ext, value, output, warnings),
                }),
                None => {
                    warn!(
                        owner,
                        type_tag = link.type_tag(),
                        "skipping extension struct with unknown type tag"
                    );
                    warnings.push(DecodeWarning::UnknownChainTag {
                        struct_name: owner.to_owned(),
                        type_tag: link.type_tag(),
                    });
                }
            }
        }
        decoded
    }

    /// Sizes every unsized handle slot to its recorded id count.
    pub fn set_struct_handle_lengths(&self, value: &mut DecodedStruct) {
        for member in value.members.values_mut() {
            Self::set_lengths(member);
        }
    }

    fn set_lengths(decoded: &mut Decoded) {
        match decoded {
            Decoded::Handles(ptr) if !ptr.is_sized() => {
                let len = ptr.decoded_ids().len();
                ptr.set_handle_length(len);
            }
            Decoded::Struct(s) => s.members.values_mut().for_each(Self::set_lengths),
            Decoded::Structs(ss) => ss
                .iter_mut()
                .flat_map(|s| s.members.values_mut())
                .for_each(Self::set_lengths),
            Decoded::Chain(links) => links
                .iter_mut()
                .flat_map(|l| l.value.members.values_mut())
                .for_each(Self::set_lengths),
            _ => {}
        }
    }

    /// Maps an input parameter's recorded ids to replay handles.
    pub fn map_param(
        &self,
        command: &Command,
        index: usize,
        decoded: &mut Decoded,
        recorded: &[Value],
        objects: &ObjectInfoTable,
        warnings: &mut Vec<DecodeWarning>,
    ) -> Result<(), ReplayError> {
        let Some(param) = command.params.get(index) else {
            return Ok(());
        };
        if let Some(type_name) = &param.generic_type_from {
            let object_type = command
                .param_index(type_name)
                .and_then(|i| recorded.get(i))
                .and_then(Value::as_scalar);
            if let Decoded::Value(v) = decoded {
                self.map_generic(object_type, v, objects, warnings);
            }
            return Ok(());
        }
        match decoded {
            Decoded::Handles(ptr) => self.map_handles(
                &command.name,
                &param.name,
                &param.base_type,
                ptr,
                objects,
                warnings,
            ),
            Decoded::Struct(s) => self.map_struct_handles(s, objects, warnings),
            Decoded::Structs(ss) => ss
                .iter_mut()
                .try_for_each(|s| self.map_struct_handles(s, objects, warnings)),
            _ => Ok(()),
        }
    }

    /// Rewrites every handle in `value` from its recorded id to the current replay handle.
    pub fn map_struct_handles(
        &self,
        value: &mut DecodedStruct,
        objects: &ObjectInfoTable,
        warnings: &mut Vec<DecodeWarning>,
    ) -> Result<(), ReplayError> {
        let Some(id) = value.struct_id else {
            return Ok(());
        };
        let DecodedStruct {
            type_name, members, ..
        } = value;
        for m in self.registry.analysis().relation(id).members() {
            match m {
                RelationMember::Handle {
                    member,
                    handle_type,
                    ..
                } => {
                    if let Some(Decoded::Handles(ptr)) = members.get_mut(member) {
                        self.map_handles(type_name, member, handle_type, ptr, objects, warnings)?;
                    }
                }
                RelationMember::Struct { member, .. } => match members.get_mut(member) {
                    Some(Decoded::Struct(inner)) => {
                        self.map_struct_handles(inner, objects, warnings)?
                    }
                    Some(Decoded::Structs(inner)) => inner
                        .iter_mut()
                        .try_for_each(|s| self.map_struct_handles(s, objects, warnings))?,
                    _ => {}
                },
                RelationMember::ExtensionChain { member } => {
                    if let Some(Decoded::Chain(links)) = members.get_mut(member) {
                        links.iter_mut().try_for_each(|l| {
                            self.map_struct_handles(&mut l.value, objects, warnings)
                        })?;
                    }
                }
                RelationMember::GenericHandle {
                    member,
                    type_member,
                } => {
                    let object_type = match members.get(type_member) {
                        Some(Decoded::Value(v)) => v.as_scalar(),
                        _ => None,
                    };
                    if let Some(Decoded::Value(v)) = members.get_mut(member) {
                        self.map_generic(object_type, v, objects, warnings);
                    }
                }
            }
        }
        Ok(())
    }

    fn map_handles(
        &self,
        entity: &str,
        member: &str,
        handle_type: &str,
        ptr: &mut HandlePointer,
        objects: &ObjectInfoTable,
        warnings: &mut Vec<DecodeWarning>,
    ) -> Result<(), ReplayError> {
        let (ids, handles) = ptr.parts_mut();
        let handles = handles.ok_or_else(|| not_sized(entity, member))?;
        for (slot, &id) in handles.iter_mut().zip(ids) {
            *slot = lookup(handle_type, id, objects, warnings);
        }
        Ok(())
    }

    fn map_generic(
        &self,
        object_type: Option<u64>,
        value: &mut Value,
        objects: &ObjectInfoTable,
        warnings: &mut Vec<DecodeWarning>,
    ) {
        let Value::Scalar(id) = value else {
            return;
        };
        let handle_type = object_type
            .and_then(|t| u32::try_from(t).ok())
            .and_then(|t| self.registry.schema().object_type_handle(t));
        if let Some(handle_type) = handle_type {
            *id = lookup(handle_type, *id, objects, warnings);
        }
    }

    /// Registers the handles a successful call wrote into `value` under their recorded ids.
    pub fn add_struct_handles(
        &self,
        parent_id: Option<u64>,
        value: &DecodedStruct,
        objects: &mut ObjectInfoTable,
        warnings: &mut Vec<DecodeWarning>,
    ) -> Result<usize, ReplayError> {
        let Some(id) = value.struct_id else {
            return Ok(0);
        };
        let mut added = 0;
        for m in self.registry.analysis().relation(id).members() {
            match m {
                RelationMember::Handle {
                    member,
                    handle_type,
                    ..
                } => {
                    if let Some(Decoded::Handles(ptr)) = value.get(member) {
                        added += add_handles(
                            &value.type_name,
                            member,
                            handle_type,
                            parent_id,
                            None,
                            ptr,
                            objects,
                            warnings,
                        )?;
                    }
                }
                RelationMember::Struct { member, .. } => match value.get(member) {
                    Some(Decoded::Struct(inner)) => {
                        added += self.add_struct_handles(parent_id, inner, objects, warnings)?
                    }
                    Some(Decoded::Structs(inner)) => {
                        for s in inner {
                            added += self.add_struct_handles(parent_id, s, objects, warnings)?;
                        }
                    }
                    _ => {}
                },
                RelationMember::ExtensionChain { member } => {
                    if let Some(Decoded::Chain(links)) = value.get(member) {
                        for l in links {
                            added +=
                                self.add_struct_handles(parent_id, &l.value, objects, warnings)?;
                        }
                    }
                }
                RelationMember::GenericHandle { .. } => {}
            }
        }
        Ok(added)
    }

    /// Copies the driver's written outputs into decoded storage.
    pub fn populate(
        &self,
        entity: &str,
        member: &str,
        decoded: &mut Decoded,
        native: &Value,
    ) -> Result<(), ReplayError> {
        match (decoded, native) {
            (Decoded::Handles(ptr), Value::Handle(_) | Value::Handles(_)) => {
                let written: &[u64] = match native {
                    Value::Handle(h) => std::slice::from_ref(h),
                    Value::Handles(hs) => hs,
                    _ => &[],
                };
                if ptr.store_returned(written) {
                    Ok(())
                } else {
                    Err(not_sized(entity, member))
                }
            }
            (Decoded::Struct(s), Value::Struct(n)) => self.populate_struct(s, n),
            (Decoded::Structs(ss), Value::Structs(ns)) => ss
                .iter_mut()
                .zip(ns)
                .try_for_each(|(s, n)| self.populate_struct(s, n)),
            (Decoded::Chain(links), Value::Chain(ns)) => {
                for (link, n) in links.iter_mut().zip(ns) {
                    if let ChainLink::Known { value, .. } = n {
                        self.populate_struct(&mut link.value, value)?;
                    }
                }
                Ok(())
            }
            (Decoded::Value(v), n) => {
                *v = n.clone();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn populate_struct(
        &self,
        value: &mut DecodedStruct,
        native: &StructValue,
    ) -> Result<(), ReplayError> {
        let DecodedStruct {
            type_name, members, ..
        } = value;
        for (name, decoded) in members.iter_mut() {
            if let Some(n) = native.get(name) {
                self.populate(type_name, name, decoded, n)?;
            }
        }
        Ok(())
    }
}

fn lookup(
    handle_type: &str,
    id: u64,
    objects: &ObjectInfoTable,
    warnings: &mut Vec<DecodeWarning>,
) -> u64 {
    if id == NULL_HANDLE {
        return NULL_HANDLE;
    }
    match objects.get_info(handle_type, id) {
        Some(info) => info.real,
        None => {
            warn!(handle_type, id, "no replay object for recorded id");
            warnings.push(DecodeWarning::UnknownObject {
                handle_type: handle_type.to_owned(),
                id,
            });
            NULL_HANDLE
        }
    }
}

/// Registers `ptr`'s handles under its recorded ids, truncating to the shorter of the two.
#[allow(clippy::too_many_arguments)]
pub fn add_handles(
    entity: &str,
    member: &str,
    handle_type: &str,
    parent_id: Option<u64>,
    co_parent_id: Option<u64>,
    ptr: &HandlePointer,
    objects: &mut ObjectInfoTable,
    warnings: &mut Vec<DecodeWarning>,
) -> Result<usize, ReplayError> {
    let handles = ptr.created().ok_or_else(|| not_sized(entity, member))?;
    let ids = ptr.decoded_ids();
    let returned = ptr.returned_len().unwrap_or(handles.len());
    if ids.len() != returned {
        warn!(
            entity,
            member,
            ids = ids.len(),
            handles = returned,
            "handle count mismatch"
        );
        warnings.push(DecodeWarning::HandleCountMismatch {
            entity: entity.to_owned(),
            member: member.to_owned(),
            ids: ids.len(),
            handles: returned,
        });
    }
    let mut added = 0;
    for (&id, &real) in ids.iter().zip(handles) {
        if id == NULL_HANDLE || real == NULL_HANDLE {
            continue;
        }
        objects.add_info(handle_type, id, parent_id, real).co_parent_id = co_parent_id;
        added += 1;
    }
    Ok(added)
}
