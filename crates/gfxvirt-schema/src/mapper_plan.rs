//! Which replay-side struct handlers exist for each handle-bearing struct.
//!
//! Every struct with a non-empty relation gets a mapping handler. Structs that the API writes
//! back to the caller (output parameters, and anything reachable from them) additionally get an
//! add-handles handler; of those, structs with pointer or array handle storage also get a
//! set-lengths handler so replay can size that storage before the call.

use std::collections::BTreeSet;

use crate::analyze::{HandleAnalysis, RelationMember, StructId};
use crate::model::Schema;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StructHandlers {
    pub map: bool,
    pub add_handles: bool,
    pub set_lengths: bool,
}

#[derive(Clone, Debug, Default)]
pub struct StructMapperPlan {
    handlers: Vec<StructHandlers>,
}

impl StructMapperPlan {
    pub fn derive(schema: &Schema, analysis: &HandleAnalysis) -> Self {
        let mut outputs = BTreeSet::new();
        let mut pending: Vec<StructId> = schema
            .commands
            .iter()
            .flat_map(|c| c.params.iter())
            .filter(|p| p.is_output())
            .filter_map(|p| analysis.struct_id(&p.base_type))
            .filter(|id| !analysis.relation(*id).is_empty())
            .collect();

        while let Some(id) = pending.pop() {
            if !outputs.insert(id) {
                continue;
            }
            for m in analysis.relation(id).members() {
                match m {
                    RelationMember::Struct { struct_id, .. } => pending.push(*struct_id),
                    RelationMember::ExtensionChain { .. } => {
                        pending.extend_from_slice(analysis.chain_extenders(id))
                    }
                    _ => {}
                }
            }
        }

        let handlers = analysis
            .ids()
            .map(|id| {
                let map = !analysis.relation(id).is_empty();
                let add_handles = outputs.contains(&id);
                StructHandlers {
                    map,
                    add_handles,
                    set_lengths: add_handles && analysis.has_dynamic_handles(id),
                }
            })
            .collect();

        Self { handlers }
    }

    pub fn handlers(&self, id: StructId) -> StructHandlers {
        self.handlers.get(id.index()).copied().unwrap_or_default()
    }

    pub fn is_output_struct(&self, id: StructId) -> bool {
        self.handlers(id).add_handles
    }
}
