//! Error types for notebook construction and job control.
//!
//! Job *failures* are not errors: a failed backend job is reported as
//! [`JobStatus::Failed`](crate::job::JobStatus::Failed). The types here cover
//! problems that abort building a cell subtree, and misuse of a job controller.

use crate::job::JobStatus;

/// Fatal error raised while validating or materializing a preset tree.
///
/// These are never retried. The caller is expected to stop rendering the
/// affected subtree and show a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    #[error("Unknown notebook preset: {0}")]
    UnknownPreset(String),

    #[error("Notebook preset '{preset}' is not available in project '{project}'")]
    ProjectNotApplicable { preset: String, project: String },

    #[error("Duplicate cell id '{0}' in notebook tree")]
    DuplicateCellId(String),

    #[error("Compute cell '{cell_id}' references missing shared inputs cell '{target}'")]
    UnresolvedSharedInputs { cell_id: String, target: String },

    #[error("No computation plugin registered for '{0}'")]
    MissingComputationPlugin(String),

    #[error("No visualization plugin '{visualization}' registered under computation '{computation}'")]
    MissingVisualizationPlugin {
        computation: String,
        visualization: String,
    },

    #[error("Visualization cell '{0}' has no compute ancestor")]
    OrphanVisualization(String),
}

/// Error returned when a job controller is asked to do something its current
/// state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("A job for computation '{computation_id}' is already {status}")]
    Outstanding {
        computation_id: String,
        status: JobStatus,
    },

    #[error("Computation '{0}' does not exist in the analysis")]
    MissingComputation(String),

    #[error("Configuration for computation '{0}' is incomplete")]
    IncompleteConfiguration(String),

    #[error("No compute cell '{0}' in this notebook")]
    UnknownComputeCell(String),

    #[error("No computation plugin registered for '{0}'")]
    MissingPlugin(String),
}
