//! Analysis state: computations, visualizations and the update log.
//!
//! The analysis is owned by a single [`AnalysisStore`]. Nothing mutates it
//! directly: callers queue [`AnalysisUpdate`]s, and the store applies them in
//! the order they were queued. Each functional updater receives the snapshot
//! as it is *when the update runs*, not when it was queued, so two updates
//! queued back to back never lose each other's changes.
//!
//! Collections are shared through `Arc`. An updater that has nothing to change
//! hands back the same `Arc`, and consumers compare with [`Arc::ptr_eq`] to
//! skip work when nothing changed.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Opaque configuration object of a computation or visualization.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// The computation list, shared by identity.
pub type Computations = Arc<Vec<Arc<Computation>>>;

pub type ComputationsUpdater = Box<dyn FnOnce(&Computations) -> Computations + Send>;
pub type FiltersUpdater = Box<dyn FnOnce(&[serde_json::Value]) -> Vec<serde_json::Value> + Send>;
pub type UiSettingsUpdater = Box<dyn FnOnce(&Configuration) -> Configuration + Send>;

/// A backend-tracked analytical step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Computation {
    pub computation_id: String,
    /// Computation plugin name, e.g. `differentialexpression`.
    #[serde(rename = "type")]
    pub computation_type: String,
    pub configuration: Configuration,
}

/// A rendering bound to a computation's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visualization {
    pub visualization_id: String,
    pub computation_id: String,
    #[serde(rename = "type")]
    pub visualization_type: String,
    pub configuration: Configuration,
}

/// Snapshot of one analysis.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub study_id: String,
    pub computations: Computations,
    pub visualizations: Vec<Visualization>,
    /// Subset filters; owned by the subsetting UI.
    pub filters: Vec<serde_json::Value>,
    pub variable_ui_settings: Configuration,
}

impl Analysis {
    pub fn new(study_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            ..Default::default()
        }
    }

    pub fn computation(&self, computation_id: &str) -> Option<&Arc<Computation>> {
        self.computations
            .iter()
            .find(|c| c.computation_id == computation_id)
    }

    pub fn visualizations_for<'a>(
        &'a self,
        computation_id: &'a str,
    ) -> impl Iterator<Item = &'a Visualization> + 'a {
        self.visualizations
            .iter()
            .filter(move |v| v.computation_id == computation_id)
    }
}

/// A queued mutation of the analysis.
pub enum AnalysisUpdate {
    Computations(ComputationsUpdater),
    AddVisualization {
        computation_id: String,
        visualization: Visualization,
    },
    Filters(FiltersUpdater),
    VariableUiSettings(UiSettingsUpdater),
}

impl std::fmt::Debug for AnalysisUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisUpdate::Computations(_) => f.write_str("Computations(..)"),
            AnalysisUpdate::AddVisualization {
                computation_id,
                visualization,
            } => f
                .debug_struct("AddVisualization")
                .field("computation_id", computation_id)
                .field("visualization_id", &visualization.visualization_id)
                .finish(),
            AnalysisUpdate::Filters(_) => f.write_str("Filters(..)"),
            AnalysisUpdate::VariableUiSettings(_) => f.write_str("VariableUiSettings(..)"),
        }
    }
}

/// Write access to an analysis, expressed only through functional updates.
pub trait AnalysisState {
    /// Latest applied snapshot.
    fn analysis(&self) -> &Analysis;

    fn set_computations(&mut self, updater: ComputationsUpdater);

    fn add_visualization(&mut self, computation_id: &str, visualization: Visualization);

    fn set_filters(&mut self, updater: FiltersUpdater);

    fn set_variable_ui_settings(&mut self, updater: UiSettingsUpdater);
}

/// In-process owner of an [`Analysis`] with a FIFO update log.
#[derive(Debug, Default)]
pub struct AnalysisStore {
    analysis: Analysis,
    pending: VecDeque<AnalysisUpdate>,
    /// Bumped whenever an applied update changed the analysis.
    revision: u64,
}

impl AnalysisStore {
    pub fn new(analysis: Analysis) -> Self {
        Self {
            analysis,
            pending: VecDeque::new(),
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append an update to the log without applying it.
    pub fn enqueue(&mut self, update: AnalysisUpdate) {
        debug!("[analysis] Queued {:?}", update);
        self.pending.push_back(update);
    }

    /// Apply every queued update in order. Returns how many changed the analysis.
    pub fn flush(&mut self) -> usize {
        let mut changed = 0;
        while let Some(update) = self.pending.pop_front() {
            if self.apply(update) {
                changed += 1;
                self.revision += 1;
            }
        }
        changed
    }

    fn apply(&mut self, update: AnalysisUpdate) -> bool {
        match update {
            AnalysisUpdate::Computations(updater) => {
                let next = updater(&self.analysis.computations);
                if Arc::ptr_eq(&next, &self.analysis.computations) {
                    return false;
                }
                self.analysis.computations = next;
                true
            }
            AnalysisUpdate::AddVisualization {
                computation_id,
                visualization,
            } => {
                if self.analysis.computation(&computation_id).is_none() {
                    warn!(
                        "[analysis] Dropping visualization {} for missing computation {}",
                        visualization.visualization_id, computation_id
                    );
                    return false;
                }
                if self
                    .analysis
                    .visualizations
                    .iter()
                    .any(|v| v.visualization_id == visualization.visualization_id)
                {
                    debug!(
                        "[analysis] Visualization {} already exists",
                        visualization.visualization_id
                    );
                    return false;
                }
                self.analysis.visualizations.push(Visualization {
                    computation_id,
                    ..visualization
                });
                true
            }
            AnalysisUpdate::Filters(updater) => {
                let next = updater(&self.analysis.filters);
                if next == self.analysis.filters {
                    return false;
                }
                self.analysis.filters = next;
                true
            }
            AnalysisUpdate::VariableUiSettings(updater) => {
                let next = updater(&self.analysis.variable_ui_settings);
                if next == self.analysis.variable_ui_settings {
                    return false;
                }
                self.analysis.variable_ui_settings = next;
                true
            }
        }
    }
}

impl AnalysisState for AnalysisStore {
    fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    fn set_computations(&mut self, updater: ComputationsUpdater) {
        self.enqueue(AnalysisUpdate::Computations(updater));
    }

    fn add_visualization(&mut self, computation_id: &str, visualization: Visualization) {
        self.enqueue(AnalysisUpdate::AddVisualization {
            computation_id: computation_id.to_string(),
            visualization,
        });
    }

    fn set_filters(&mut self, updater: FiltersUpdater) {
        self.enqueue(AnalysisUpdate::Filters(updater));
    }

    fn set_variable_ui_settings(&mut self, updater: UiSettingsUpdater) {
        self.enqueue(AnalysisUpdate::VariableUiSettings(updater));
    }
}
