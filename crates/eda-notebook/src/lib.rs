//! eda-notebook - Orchestration engine for EDA analysis notebooks.
//!
//! A notebook is a tree of typed cells (subset, text, WDK parameter, compute,
//! visualization and shared compute inputs) taken from a named preset. This
//! crate turns a preset into computation and visualization records on an
//! analysis, keeps computation configuration consistent under concurrent
//! edits, runs each compute cell's backend job through a small state machine,
//! and decides which cells are usable given the jobs' progress.
//!
//! [`session::NotebookSession`] ties the pieces together for one analysis.

pub mod analysis;
pub mod catalog;
pub mod config_store;
pub mod descriptor;
pub mod enablement;
pub mod error;
pub mod job;
pub mod materialize;
pub mod plugin;
pub mod preset;
pub mod session;
pub mod settings;
pub mod shared_inputs;
pub mod watcher;
pub mod wdk;

pub use analysis::{Analysis, AnalysisState, AnalysisStore, Computation, Visualization};
pub use descriptor::{CellDescriptor, CellKind};
pub use enablement::{is_enabled, CellState};
pub use error::{ConstructionError, JobError};
pub use job::{ComputeJobService, JobEvent, JobLifecycleController, JobStatus};
pub use plugin::PluginRegistry;
pub use preset::{NotebookPreset, PresetRegistry};
pub use session::NotebookSession;
pub use settings::EngineSettings;
pub use watcher::PollingJobService;
