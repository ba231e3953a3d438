//! Compute job lifecycle for a single compute cell.
//!
//! ```text
//! NoSuchJob ──create──▶ Pending ──▶ Running ──▶ Complete
//!                          │           │
//!                          └─────┬─────┘
//!                                ▼
//!                             Failed
//! ```
//!
//! Status changes come from the job service; the controller only reacts to
//! them. The one transition it makes itself is `NoSuchJob → Pending` when it
//! issues `create_job`, which is what keeps repeated auto-run checks from
//! submitting a second job while the first is outstanding.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use ts_rs::TS;

use crate::analysis::{Analysis, Computation};
use crate::descriptor::ComputeCell;
use crate::error::JobError;
use crate::plugin::ComputationPlugin;

/// Status of the backend job behind a compute cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum JobStatus {
    #[default]
    NoSuchJob,
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Transitions of the state machine. A terminal job goes back to
    /// `NoSuchJob` when a new submission replaces it.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (NoSuchJob, Pending)
                | (Pending, Running)
                | (Running, Complete)
                | (Pending, Failed)
                | (Running, Failed)
                | (Complete, NoSuchJob)
                | (Failed, NoSuchJob)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::NoSuchJob => "no-such-job",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The backend job service.
pub trait ComputeJobService: Send + Sync {
    /// Fire-and-forget job submission.
    fn create_job(&self, analysis: &Analysis, computation: &Computation, compute_app_name: &str);

    /// Status stream for a computation's job. The receiver starts at the
    /// job's current status, so subscribing again re-attaches to an existing job.
    fn subscribe(&self, computation_id: &str) -> watch::Receiver<JobStatus>;
}

/// Something a controller did that the UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    StatusChanged {
        cell_id: String,
        computation_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    JobRequested {
        cell_id: String,
        computation_id: String,
    },
    FailureDialogOpened {
        cell_id: String,
        computation_id: String,
    },
}

/// Job state machine for one compute cell.
#[derive(Debug, Clone)]
pub struct JobLifecycleController {
    cell_id: String,
    computation_id: String,
    compute_app_name: String,
    hidden: bool,
    status: JobStatus,
    /// Set by a local submission until the service reports something other
    /// than `NoSuchJob` for it.
    awaiting_first_status: bool,
    failure_dialog_open: bool,
}

impl JobLifecycleController {
    pub fn new(cell: &ComputeCell) -> Self {
        Self {
            cell_id: cell.header.id.clone(),
            computation_id: cell.computation_id.clone(),
            compute_app_name: cell.computation_name.clone(),
            hidden: cell.hidden,
            status: JobStatus::NoSuchJob,
            awaiting_first_status: false,
            failure_dialog_open: false,
        }
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    pub fn computation_id(&self) -> &str {
        &self.computation_id
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure_dialog_open(&self) -> bool {
        self.failure_dialog_open
    }

    pub fn dismiss_failure_dialog(&mut self) {
        self.failure_dialog_open = false;
    }

    /// Children of this cell are usable only once the job has completed.
    pub fn descendants_enabled(&self) -> bool {
        self.status == JobStatus::Complete
    }

    /// React to a status reported by the job service.
    ///
    /// Re-reporting the current status is a no-op. Between a local submission
    /// and the service's first report of it, `NoSuchJob` is a poll that raced
    /// the submission and is ignored. Once the service has reported the job,
    /// `NoSuchJob` means the job is gone.
    pub fn observe(&mut self, status: JobStatus) -> Vec<JobEvent> {
        if status == JobStatus::NoSuchJob {
            if self.awaiting_first_status {
                debug!(
                    "[job] Ignoring stale no-such-job for {} before its first report",
                    self.computation_id
                );
                return Vec::new();
            }
        } else {
            self.awaiting_first_status = false;
        }
        let from = self.status;
        if from == status {
            return Vec::new();
        }
        if from.can_transition_to(status) {
            info!("[job] {}: {} -> {}", self.computation_id, from, status);
        } else {
            // The service is the source of truth; polls can skip states.
            warn!(
                "[job] {}: unexpected transition {} -> {}",
                self.computation_id, from, status
            );
        }
        self.status = status;

        let mut events = vec![JobEvent::StatusChanged {
            cell_id: self.cell_id.clone(),
            computation_id: self.computation_id.clone(),
            from,
            to: status,
        }];
        if status == JobStatus::Failed && self.hidden {
            self.failure_dialog_open = true;
            events.push(JobEvent::FailureDialogOpened {
                cell_id: self.cell_id.clone(),
                computation_id: self.computation_id.clone(),
            });
        }
        events
    }

    /// Whether a hidden cell should start its job now.
    pub fn should_auto_start(&self, configuration_complete: bool) -> bool {
        self.hidden && configuration_complete && self.status == JobStatus::NoSuchJob
    }

    /// Start the job of a hidden cell if its configuration is complete and no
    /// job exists. Safe to call any number of times.
    pub fn maybe_auto_start(
        &mut self,
        analysis: &Analysis,
        plugin: &dyn ComputationPlugin,
        service: &dyn ComputeJobService,
    ) -> Option<JobEvent> {
        if !self.hidden || self.status != JobStatus::NoSuchJob {
            return None;
        }
        let Some(computation) = analysis.computation(&self.computation_id) else {
            debug!("[job] No computation {} to auto-start", self.computation_id);
            return None;
        };
        if !self.should_auto_start(plugin.is_configuration_complete(&computation.configuration)) {
            return None;
        }
        info!("[job] Auto-starting {} for hidden cell {}", self.computation_id, self.cell_id);
        Some(self.submit(analysis, computation, service))
    }

    /// User-initiated start.
    pub fn start(
        &mut self,
        analysis: &Analysis,
        plugin: &dyn ComputationPlugin,
        service: &dyn ComputeJobService,
    ) -> Result<JobEvent, JobError> {
        if self.status != JobStatus::NoSuchJob {
            return Err(JobError::Outstanding {
                computation_id: self.computation_id.clone(),
                status: self.status,
            });
        }
        let computation = analysis
            .computation(&self.computation_id)
            .ok_or_else(|| JobError::MissingComputation(self.computation_id.clone()))?;
        if !plugin.is_configuration_complete(&computation.configuration) {
            return Err(JobError::IncompleteConfiguration(self.computation_id.clone()));
        }
        Ok(self.submit(analysis, computation, service))
    }

    fn submit(
        &mut self,
        analysis: &Analysis,
        computation: &Computation,
        service: &dyn ComputeJobService,
    ) -> JobEvent {
        service.create_job(analysis, computation, &self.compute_app_name);
        self.status = JobStatus::Pending;
        self.awaiting_first_status = true;
        JobEvent::JobRequested {
            cell_id: self.cell_id.clone(),
            computation_id: self.computation_id.clone(),
        }
    }
}
