//! The built rule set: schema, analysis and per-command plans in one place.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, info};

use crate::analyze::{HandleAnalysis, StructId};
use crate::capture_plan::CallPlan;
use crate::classify::Classifier;
use crate::dispatch_plan::{DispatchEntry, DispatchPartition};
use crate::error::{Diagnostic, SchemaError};
use crate::mapper_plan::{StructHandlers, StructMapperPlan};
use crate::model::Schema;
use crate::options::GeneratorOptions;

#[derive(Clone, Debug)]
pub struct ApiRegistry {
    schema: Schema,
    options: GeneratorOptions,
    analysis: HandleAnalysis,
    plans: Vec<CallPlan>,
    by_name: HashMap<String, usize>,
    dispatch: DispatchPartition,
    mappers: StructMapperPlan,
    diagnostics: Vec<Diagnostic>,
}

impl ApiRegistry {
    pub fn build(mut schema: Schema, options: GeneratorOptions) -> Result<Self, SchemaError> {
        schema
            .commands
            .retain(|c| !options.denied_commands.contains(&c.name));
        schema
            .structs
            .retain(|s| !options.denied_structs.contains(&s.name));
        schema.normalize();

        let mut seen = HashSet::new();
        for h in &schema.handle_types {
            if !seen.insert(h.name.as_str()) {
                return Err(SchemaError::Duplicate {
                    kind: "handle type",
                    name: h.name.clone(),
                });
            }
        }

        let analysis = HandleAnalysis::analyze(&schema)?;
        let classifier = Classifier::new(&analysis, &options);

        let mut diagnostics = Vec::new();
        let mut plans = Vec::with_capacity(schema.commands.len());
        let mut by_name = HashMap::with_capacity(schema.commands.len());
        let mut dispatch = DispatchPartition::default();

        for cmd in &schema.commands {
            if by_name.insert(cmd.name.clone(), plans.len()).is_some() {
                return Err(SchemaError::Duplicate {
                    kind: "command",
                    name: cmd.name.clone(),
                });
            }
            let classification = classifier.classify(cmd, &mut diagnostics)?;
            let plan = CallPlan::derive(cmd, classification, &analysis)?;
            debug!(
                command = %cmd.name,
                category = ?plan.category(),
                scope = ?plan.scope(),
                "classified"
            );
            dispatch.push(
                plan.scope(),
                DispatchEntry {
                    name: cmd.name.clone(),
                    return_kind: plan.return_kind,
                },
            );
            plans.push(plan);
        }

        let mappers = StructMapperPlan::derive(&schema, &analysis);

        info!(
            commands = plans.len(),
            structs = analysis.len(),
            diagnostics = diagnostics.len(),
            "api registry built"
        );

        Ok(Self {
            schema,
            options,
            analysis,
            plans,
            by_name,
            dispatch,
            mappers,
            diagnostics,
        })
    }

    pub fn from_json_str(json: &str, options: GeneratorOptions) -> Result<Self, SchemaError> {
        Self::build(Schema::from_json_str(json)?, options)
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        options: GeneratorOptions,
    ) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SchemaError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::build(Schema::from_reader(BufReader::new(file))?, options)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn analysis(&self) -> &HandleAnalysis {
        &self.analysis
    }

    pub fn command(&self, name: &str) -> Option<&CallPlan> {
        self.by_name.get(name).map(|&i| &self.plans[i])
    }

    pub fn commands(&self) -> &[CallPlan] {
        &self.plans
    }

    pub fn dispatch_partition(&self) -> &DispatchPartition {
        &self.dispatch
    }

    pub fn mapper_plan(&self) -> &StructMapperPlan {
        &self.mappers
    }

    pub fn struct_handlers(&self, id: StructId) -> StructHandlers {
        self.mappers.handlers(id)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
