//! Which cells the UI may present as interactive.
//!
//! A cell is disabled while any compute ancestor's job has not completed.
//! Text cells are always enabled. Everything here is recomputed from the
//! current job statuses on each call; nothing is cached.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use ts_rs::TS;

use crate::descriptor::{self, CellDescriptor, CellKind};
use crate::job::JobStatus;

/// Source of job statuses keyed by computation id.
pub trait JobStatusLookup {
    fn job_status(&self, computation_id: &str) -> JobStatus;
}

impl JobStatusLookup for BTreeMap<String, JobStatus> {
    fn job_status(&self, computation_id: &str) -> JobStatus {
        self.get(computation_id).copied().unwrap_or_default()
    }
}

impl JobStatusLookup for HashMap<String, JobStatus> {
    fn job_status(&self, computation_id: &str) -> JobStatus {
        self.get(computation_id).copied().unwrap_or_default()
    }
}

/// Whether the last cell of `path` is enabled. `path` runs from the tree
/// root to the cell, inclusive.
pub fn is_enabled<L>(path: &[&CellDescriptor], statuses: &L) -> bool
where
    L: JobStatusLookup + ?Sized,
{
    let Some((cell, ancestors)) = path.split_last() else {
        return true;
    };
    if matches!(cell, CellDescriptor::Text(_)) {
        return true;
    }
    ancestors
        .iter()
        .filter_map(|ancestor| ancestor.as_compute())
        .all(|compute| statuses.job_status(&compute.computation_id) == JobStatus::Complete)
}

/// Enablement of every cell in the tree, keyed by cell id.
pub fn enablement_map<L>(cells: &[CellDescriptor], statuses: &L) -> BTreeMap<String, bool>
where
    L: JobStatusLookup + ?Sized,
{
    let mut map = BTreeMap::new();
    descriptor::visit_paths(cells, &mut |path| {
        if let Some(cell) = path.last() {
            map.insert(cell.id().to_string(), is_enabled(path, statuses));
        }
    });
    map
}

/// Per-cell view state handed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct CellState {
    pub cell_id: String,
    pub kind: CellKind,
    pub enabled: bool,
    /// Depth in the tree, 0 for top-level cells.
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    /// Set for compute cells only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,
}

/// Fresh view state for every cell, in depth-first order.
pub fn cell_states<L>(cells: &[CellDescriptor], statuses: &L) -> Vec<CellState>
where
    L: JobStatusLookup + ?Sized,
{
    let steps = descriptor::step_numbers(cells);
    let mut states = Vec::new();
    descriptor::visit_paths(cells, &mut |path| {
        let Some(cell) = path.last() else {
            return;
        };
        states.push(CellState {
            cell_id: cell.id().to_string(),
            kind: cell.kind(),
            enabled: is_enabled(path, statuses),
            depth: path.len() - 1,
            step: steps.get(cell.id()).copied(),
            job_status: cell
                .as_compute()
                .map(|compute| statuses.job_status(&compute.computation_id)),
        });
    });
    states
}
