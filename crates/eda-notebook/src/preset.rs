//! Notebook presets and the registry that serves them.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::analysis::Computation;
use crate::descriptor::{self, CellDescriptor};
use crate::error::ConstructionError;
use crate::plugin::PluginRegistry;
use crate::shared_inputs::resolve_shared_inputs;

/// Condition under which a notebook is ready to hand its result to the
/// surrounding search form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReadinessRule {
    /// The first computation of this type has a complete configuration.
    ComputationComplete {
        #[serde(rename = "computationName")]
        computation_name: String,
    },
    /// A WDK parameter holds a real selection rather than its placeholder.
    WdkParamSelected {
        #[serde(rename = "paramName")]
        param_name: String,
        /// Values containing this marker are placeholders.
        #[serde(rename = "placeholderMarker")]
        placeholder_marker: String,
    },
}

impl ReadinessRule {
    pub fn is_ready(
        &self,
        computations: &[std::sync::Arc<Computation>],
        plugins: &PluginRegistry,
        param_values: Option<&BTreeMap<String, String>>,
    ) -> bool {
        match self {
            ReadinessRule::ComputationComplete { computation_name } => {
                let Some(plugin) = plugins.lookup(computation_name) else {
                    return false;
                };
                computations
                    .iter()
                    .find(|c| &c.computation_type == computation_name)
                    .is_some_and(|c| plugin.is_configuration_complete(&c.configuration))
            }
            ReadinessRule::WdkParamSelected {
                param_name,
                placeholder_marker,
            } => param_values
                .and_then(|values| values.get(param_name))
                .is_some_and(|value| !value.is_empty() && !value.contains(placeholder_marker.as_str())),
        }
    }
}

/// A named, immutable notebook template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotebookPreset {
    pub name: String,
    pub display_name: String,
    /// Header text; `{submitButtonText}` and `{step:<cell id>}` are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub applicable_projects: BTreeSet<String>,
    pub cells: Vec<CellDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessRule>,
}

fn header_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(submitButtonText|step:([A-Za-z0-9_\-]+))\}").expect("valid header regex")
    })
}

impl NotebookPreset {
    pub fn is_applicable_to(&self, project_id: &str) -> bool {
        self.applicable_projects.contains(project_id)
    }

    pub fn ensure_applicable(&self, project_id: &str) -> Result<(), ConstructionError> {
        if self.is_applicable_to(project_id) {
            Ok(())
        } else {
            Err(ConstructionError::ProjectNotApplicable {
                preset: self.name.clone(),
                project: project_id.to_string(),
            })
        }
    }

    /// Copy of this preset with shared input names filled in.
    pub fn resolved(&self) -> NotebookPreset {
        NotebookPreset {
            cells: resolve_shared_inputs(&self.cells),
            ..self.clone()
        }
    }

    /// Check the tree invariants: unique cell ids, and every shared inputs
    /// reference pointing at a shared inputs cell.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        let cells = descriptor::flatten(&self.cells);

        let mut seen = HashSet::new();
        for cell in &cells {
            if !seen.insert(cell.id()) {
                return Err(ConstructionError::DuplicateCellId(cell.id().to_string()));
            }
        }

        let shared_ids: HashSet<&str> = cells
            .iter()
            .filter(|c| matches!(c, CellDescriptor::SharedComputeInputs(_)))
            .map(|c| c.id())
            .collect();
        for compute in cells.iter().filter_map(|c| c.as_compute()) {
            if let Some(target) = &compute.shared_inputs_cell_id {
                if !shared_ids.contains(target.as_str()) {
                    return Err(ConstructionError::UnresolvedSharedInputs {
                        cell_id: compute.header.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn step_numbers(&self) -> BTreeMap<String, usize> {
        descriptor::step_numbers(&self.cells)
    }

    /// Header with placeholders filled in.
    pub fn render_header(
        &self,
        submit_button_text: &str,
        step_numbers: &BTreeMap<String, usize>,
    ) -> Option<String> {
        let header = self.header.as_deref()?;
        Some(render_template(header, submit_button_text, step_numbers))
    }
}

/// Fill `{submitButtonText}` and `{step:<cell id>}` placeholders. Unknown
/// step ids render as `?`.
pub fn render_template(
    template: &str,
    submit_button_text: &str,
    step_numbers: &BTreeMap<String, usize>,
) -> String {
    header_placeholder()
        .replace_all(template, |caps: &Captures| match caps.get(2) {
            Some(cell_id) => step_numbers
                .get(cell_id.as_str())
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string()),
            None => submit_button_text.to_string(),
        })
        .into_owned()
}

/// Read-only catalog of presets keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, NotebookPreset>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in notebooks.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for preset in crate::catalog::builtin_presets() {
            registry.insert(preset);
        }
        registry
    }

    /// Add or replace a preset. Returns the replaced preset, if any.
    pub fn insert(&mut self, preset: NotebookPreset) -> Option<NotebookPreset> {
        self.presets.insert(preset.name.clone(), preset)
    }

    pub fn get(&self, name: &str) -> Option<&NotebookPreset> {
        self.presets.get(name)
    }

    /// Fetch a preset for use in `project_id`, enforcing project gating.
    pub fn lookup(&self, name: &str, project_id: &str) -> Result<&NotebookPreset, ConstructionError> {
        let preset = self
            .get(name)
            .ok_or_else(|| ConstructionError::UnknownPreset(name.to_string()))?;
        preset.ensure_applicable(project_id)?;
        Ok(preset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotebookPreset> {
        self.presets.values()
    }

    pub fn for_project<'a>(&'a self, project_id: &'a str) -> impl Iterator<Item = &'a NotebookPreset> + 'a {
        self.presets
            .values()
            .filter(move |preset| preset.is_applicable_to(project_id))
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
