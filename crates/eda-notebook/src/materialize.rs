//! Turning a preset tree into computation and visualization records.
//!
//! Planning is a pure walk over the tree that returns [`MaterializeIntent`]s.
//! [`apply_intents`] then pushes those intents, in order, into an
//! [`AnalysisState`]. Nothing is written unless the whole plan succeeds.

use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::analysis::{Analysis, AnalysisState, Computation, Computations, Visualization};
use crate::descriptor::CellDescriptor;
use crate::error::ConstructionError;
use crate::plugin::PluginRegistry;

/// One record to create.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "intent", content = "record", rename_all = "camelCase")]
pub enum MaterializeIntent {
    CreateComputation(Computation),
    CreateVisualization(Visualization),
}

/// Nearest compute ancestor during the walk.
#[derive(Clone, Copy)]
struct ParentComputation<'a> {
    name: &'a str,
    id: &'a str,
}

/// Plan the records for `cells`.
///
/// Returns an empty plan when the analysis already has any computation: the
/// guard is checked once for the whole tree, not per cell.
pub fn plan_materialization(
    cells: &[CellDescriptor],
    analysis: &Analysis,
    plugins: &PluginRegistry,
) -> Result<Vec<MaterializeIntent>, ConstructionError> {
    if !analysis.computations.is_empty() {
        debug!(
            "[materialize] Analysis already has {} computations, nothing to do",
            analysis.computations.len()
        );
        return Ok(Vec::new());
    }

    let mut intents = Vec::new();
    plan_cells(cells, None, plugins, &mut intents)?;
    Ok(intents)
}

fn plan_cells(
    cells: &[CellDescriptor],
    parent: Option<ParentComputation<'_>>,
    plugins: &PluginRegistry,
    intents: &mut Vec<MaterializeIntent>,
) -> Result<(), ConstructionError> {
    for cell in cells {
        match cell {
            CellDescriptor::Compute(compute) => {
                let plugin = plugins.lookup(&compute.computation_name).ok_or_else(|| {
                    ConstructionError::MissingComputationPlugin(compute.computation_name.clone())
                })?;
                intents.push(MaterializeIntent::CreateComputation(Computation {
                    computation_id: compute.computation_id.clone(),
                    computation_type: compute.computation_name.clone(),
                    configuration: plugin.default_configuration(),
                }));
                let parent = ParentComputation {
                    name: &compute.computation_name,
                    id: &compute.computation_id,
                };
                plan_cells(&compute.cells, Some(parent), plugins, intents)?;
            }
            CellDescriptor::Visualization(viz) => {
                let parent = parent
                    .ok_or_else(|| ConstructionError::OrphanVisualization(viz.header.id.clone()))?;
                let missing = || ConstructionError::MissingVisualizationPlugin {
                    computation: parent.name.to_string(),
                    visualization: viz.visualization_name.clone(),
                };
                let viz_plugin = plugins
                    .lookup(parent.name)
                    .and_then(|plugin| plugin.visualization(&viz.visualization_name))
                    .ok_or_else(missing)?;
                intents.push(MaterializeIntent::CreateVisualization(Visualization {
                    visualization_id: viz.visualization_id.clone(),
                    computation_id: parent.id.to_string(),
                    visualization_type: viz.visualization_name.clone(),
                    configuration: viz_plugin.default_configuration().unwrap_or_default(),
                }));
            }
            CellDescriptor::Subset(_)
            | CellDescriptor::Text(_)
            | CellDescriptor::WdkParam(_)
            | CellDescriptor::SharedComputeInputs(_) => {
                plan_cells(cell.children(), parent, plugins, intents)?;
            }
        }
    }
    Ok(())
}

/// Queue `intents` on `state` in order.
///
/// Each computation updater re-checks the latest snapshot and skips ids that
/// already exist, so a computation id never maps to two records.
pub fn apply_intents<S: AnalysisState + ?Sized>(state: &mut S, intents: Vec<MaterializeIntent>) {
    for intent in intents {
        match intent {
            MaterializeIntent::CreateComputation(computation) => {
                state.set_computations(Box::new(move |prev: &Computations| {
                    if prev
                        .iter()
                        .any(|c| c.computation_id == computation.computation_id)
                    {
                        return prev.clone();
                    }
                    let mut next = prev.as_ref().clone();
                    next.push(Arc::new(computation));
                    Arc::new(next)
                }));
            }
            MaterializeIntent::CreateVisualization(visualization) => {
                let computation_id = visualization.computation_id.clone();
                state.add_visualization(&computation_id, visualization);
            }
        }
    }
}

/// Plan and queue the records for `cells`. Returns the number of intents queued.
pub fn materialize<S: AnalysisState + ?Sized>(
    cells: &[CellDescriptor],
    state: &mut S,
    plugins: &PluginRegistry,
) -> Result<usize, ConstructionError> {
    let intents = plan_materialization(cells, state.analysis(), plugins)?;
    let count = intents.len();
    if count > 0 {
        info!("[materialize] Queuing {} records", count);
    }
    apply_intents(state, intents);
    Ok(count)
}
