//! Handle relationship analysis.
//!
//! For every struct type this computes the ordered list of members that are handles or lead to
//! handles (nested structs, the extension chain, type-erased handles). The struct composition
//! graph is a DAG, so relations are computed bottom-up over a post-order of that graph and stored
//! in an arena indexed by [`StructId`]; a struct's entry only ever reads entries of structs it
//! embeds, which are already final.
//!
//! Extension chains are not composition edges: a chain member belongs to a relation when some
//! extension struct that may join the chain has handles of its own. That needs the chain-free
//! relations first, so the arena is computed twice.

use std::collections::{BTreeMap, HashMap};

use crate::error::SchemaError;
use crate::model::{Schema, ValueShape};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(u32);

impl StructId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One handle-bearing member of a struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationMember {
    Handle {
        member: String,
        handle_type: String,
        shape: ValueShape,
    },
    Struct {
        member: String,
        struct_id: StructId,
        shape: ValueShape,
    },
    ExtensionChain {
        member: String,
    },
    /// Type-erased handle; the handle type is selected at runtime by `type_member`.
    GenericHandle {
        member: String,
        type_member: String,
    },
}

impl RelationMember {
    pub fn member(&self) -> &str {
        match self {
            RelationMember::Handle { member, .. }
            | RelationMember::Struct { member, .. }
            | RelationMember::ExtensionChain { member }
            | RelationMember::GenericHandle { member, .. } => member,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandleRelation {
    members: Vec<RelationMember>,
}

impl HandleRelation {
    pub fn members(&self) -> &[RelationMember] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Clone, Debug, Default)]
struct ChainInfo {
    extenders: Vec<StructId>,
    dynamic: bool,
}

#[derive(Clone, Debug)]
pub struct HandleAnalysis {
    names: Vec<String>,
    ids: HashMap<String, StructId>,
    relations: Vec<HandleRelation>,
    dynamic: Vec<bool>,
    chains: Vec<ChainInfo>,
    extension_tags: BTreeMap<u32, StructId>,
}

impl HandleAnalysis {
    pub fn analyze(schema: &Schema) -> Result<Self, SchemaError> {
        let mut names = Vec::with_capacity(schema.structs.len());
        let mut ids = HashMap::with_capacity(schema.structs.len());
        for (index, st) in schema.structs.iter().enumerate() {
            let id = StructId(index as u32);
            if ids.insert(st.name.clone(), id).is_some() {
                return Err(SchemaError::Duplicate {
                    kind: "struct",
                    name: st.name.clone(),
                });
            }
            names.push(st.name.clone());
        }

        let mut extension_tags = BTreeMap::new();
        for (index, st) in schema.structs.iter().enumerate() {
            if !st.can_extend {
                continue;
            }
            let tag = st.type_tag.ok_or_else(|| SchemaError::MissingTypeTag {
                struct_name: st.name.clone(),
            })?;
            if let Some(existing) = extension_tags.insert(tag, StructId(index as u32)) {
                return Err(SchemaError::DuplicateTypeTag {
                    tag,
                    first: names[existing.index()].clone(),
                    second: st.name.clone(),
                });
            }
        }

        let order = post_order(schema, &ids, &names)?;

        let no_chains = vec![ChainInfo::default(); names.len()];
        let (own_relations, own_dynamic) = compute_relations(schema, &ids, &order, &no_chains)?;

        let mut chains = vec![ChainInfo::default(); names.len()];
        for (index, st) in schema.structs.iter().enumerate() {
            if st.chain_member().is_none() {
                continue;
            }
            for &ext in extension_tags.values() {
                let ext_struct = &schema.structs[ext.index()];
                if ext_struct.may_extend(&st.name) && !own_relations[ext.index()].is_empty() {
                    chains[index].extenders.push(ext);
                    chains[index].dynamic |= own_dynamic[ext.index()];
                }
            }
        }

        let (relations, dynamic) = compute_relations(schema, &ids, &order, &chains)?;

        Ok(Self {
            names,
            ids,
            relations,
            dynamic,
            chains,
            extension_tags,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn struct_id(&self, name: &str) -> Option<StructId> {
        self.ids.get(name).copied()
    }

    pub fn struct_name(&self, id: StructId) -> &str {
        &self.names[id.index()]
    }

    pub fn relation(&self, id: StructId) -> &HandleRelation {
        &self.relations[id.index()]
    }

    pub fn relation_by_name(&self, name: &str) -> Option<&HandleRelation> {
        self.struct_id(name).map(|id| self.relation(id))
    }

    /// Whether a struct (by name) carries handles anywhere inside it.
    pub fn has_handles(&self, name: &str) -> bool {
        self.relation_by_name(name).is_some_and(|r| !r.is_empty())
    }

    /// Whether a struct has pointer/array handle storage that must be sized before population.
    pub fn has_dynamic_handles(&self, id: StructId) -> bool {
        self.dynamic[id.index()]
    }

    /// Extension struct registered for a chain type tag.
    pub fn extension_struct(&self, tag: u32) -> Option<StructId> {
        self.extension_tags.get(&tag).copied()
    }

    pub fn extension_tags(&self) -> impl Iterator<Item = (u32, StructId)> + '_ {
        self.extension_tags.iter().map(|(tag, id)| (*tag, *id))
    }

    /// Extension structs with handles that may be linked into `id`'s chain.
    pub fn chain_extenders(&self, id: StructId) -> &[StructId] {
        &self.chains[id.index()].extenders
    }

    pub fn ids(&self) -> impl Iterator<Item = StructId> {
        (0..self.names.len() as u32).map(StructId)
    }

    /// Flattened access paths to every handle reachable from `id`, for diagnostics.
    pub fn paths(&self, id: StructId) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(id, "", false, &mut out);
        out
    }

    fn collect_paths(&self, id: StructId, prefix: &str, in_chain: bool, out: &mut Vec<String>) {
        for m in self.relation(id).members() {
            match m {
                RelationMember::Handle { member, shape, .. } => {
                    out.push(format!("{prefix}{member}{}", array_suffix(shape)));
                }
                RelationMember::GenericHandle { member, .. } => {
                    out.push(format!("{prefix}{member}"));
                }
                RelationMember::Struct {
                    member,
                    struct_id,
                    shape,
                } => {
                    let nested = format!("{prefix}{member}{}.", array_suffix(shape));
                    self.collect_paths(*struct_id, &nested, in_chain, out);
                }
                // A chain link's own chain member is the same flat chain.
                RelationMember::ExtensionChain { member } if !in_chain => {
                    for &ext in self.chain_extenders(id) {
                        let nested = format!("{prefix}{member}<{}>.", self.struct_name(ext));
                        self.collect_paths(ext, &nested, true, out);
                    }
                }
                RelationMember::ExtensionChain { .. } => {}
            }
        }
    }
}

fn array_suffix(shape: &ValueShape) -> &'static str {
    if shape.is_array() {
        "[]"
    } else {
        ""
    }
}

/// Orders structs so that every struct comes after the structs it embeds.
fn post_order(
    schema: &Schema,
    ids: &HashMap<String, StructId>,
    names: &[String],
) -> Result<Vec<StructId>, SchemaError> {
    let edges: Vec<Vec<usize>> = schema
        .structs
        .iter()
        .map(|st| {
            st.members
                .iter()
                .filter(|m| !m.extension_chain)
                .filter_map(|m| ids.get(&m.base_type).map(|id| id.index()))
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; edges.len()];
    let mut order = Vec::with_capacity(edges.len());
    for root in 0..edges.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::InProgress;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (node, cursor) = *top;
            if cursor < edges[node].len() {
                top.1 += 1;
                let child = edges[node][cursor];
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::InProgress;
                        stack.push((child, 0));
                    }
                    Mark::InProgress => {
                        return Err(SchemaError::StructCycle {
                            struct_name: names[child].clone(),
                        });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                order.push(StructId(node as u32));
                stack.pop();
            }
        }
    }
    Ok(order)
}

fn compute_relations(
    schema: &Schema,
    ids: &HashMap<String, StructId>,
    order: &[StructId],
    chains: &[ChainInfo],
) -> Result<(Vec<HandleRelation>, Vec<bool>), SchemaError> {
    let mut relations = vec![HandleRelation::default(); schema.structs.len()];
    let mut dynamic = vec![false; schema.structs.len()];

    for &id in order {
        let st = &schema.structs[id.index()];
        let mut members = Vec::new();
        let mut has_dynamic = false;

        for m in &st.members {
            if m.extension_chain {
                let chain = &chains[id.index()];
                if !chain.extenders.is_empty() {
                    has_dynamic |= chain.dynamic;
                    members.push(RelationMember::ExtensionChain {
                        member: m.name.clone(),
                    });
                }
                continue;
            }

            if let Some(type_member) = st.generic_type_member(&m.name) {
                members.push(RelationMember::GenericHandle {
                    member: m.name.clone(),
                    type_member: type_member.to_owned(),
                });
                continue;
            }

            let shape = m.shape().map_err(|bad| SchemaError::MalformedLength {
                entity: st.name.clone(),
                member: m.name.clone(),
                expr: bad.0,
            })?;

            if m.handle {
                has_dynamic |= shape.is_dynamic();
                members.push(RelationMember::Handle {
                    member: m.name.clone(),
                    handle_type: m.base_type.clone(),
                    shape,
                });
            } else if let Some(&child) = ids.get(&m.base_type) {
                if !relations[child.index()].is_empty() {
                    has_dynamic |= dynamic[child.index()];
                    members.push(RelationMember::Struct {
                        member: m.name.clone(),
                        struct_id: child,
                        shape,
                    });
                }
            }
        }

        relations[id.index()] = HandleRelation { members };
        dynamic[id.index()] = has_dynamic;
    }

    Ok((relations, dynamic))
}
