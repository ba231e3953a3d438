//! Background tasks that feed job status into controllers.
//!
//! Each mounted compute cell gets one task that follows the job service's
//! status channel for its computation and forwards the resulting
//! [`JobEvent`]s. Controllers outlive their watch tasks: unmounting a cell
//! aborts the task but keeps the controller, so remounting re-attaches to the
//! same job instead of creating a new one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analysis::{Analysis, Computation};
use crate::descriptor::ComputeCell;
use crate::job::{ComputeJobService, JobEvent, JobLifecycleController, JobStatus};
use crate::settings::EngineSettings;

pub type SharedJobController = Arc<Mutex<JobLifecycleController>>;

/// Lock a controller, recovering the state if a previous holder panicked.
pub fn lock_controller(controller: &SharedJobController) -> MutexGuard<'_, JobLifecycleController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a running watch task. Dropping it stops the task.
#[derive(Debug)]
pub struct JobWatch {
    computation_id: String,
    task: Option<JoinHandle<()>>,
}

impl JobWatch {
    pub fn computation_id(&self) -> &str {
        &self.computation_id
    }

    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("[watcher] Detaching from {}", self.computation_id);
            task.abort();
        }
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Follow `status_rx` and apply every status it reports to `controller`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_job_watcher(
    controller: SharedJobController,
    mut status_rx: watch::Receiver<JobStatus>,
    events: mpsc::UnboundedSender<JobEvent>,
) -> JobWatch {
    let computation_id = lock_controller(&controller).computation_id().to_string();
    let task_id = computation_id.clone();

    let task = tokio::spawn(async move {
        loop {
            let status = *status_rx.borrow_and_update();
            let emitted = lock_controller(&controller).observe(status);
            for event in emitted {
                if events.send(event).is_err() {
                    debug!("[watcher] Event receiver gone, stopping {}", task_id);
                    return;
                }
            }
            if status_rx.changed().await.is_err() {
                debug!("[watcher] Status channel closed for {}", task_id);
                return;
            }
        }
    });

    JobWatch {
        computation_id,
        task: Some(task),
    }
}

/// Turn a one-shot status lookup into a status channel.
///
/// `fetch` is called every `interval`; only changes are published. Polling
/// stops after a terminal status or once every receiver has been dropped.
pub fn spawn_status_poller<F, Fut>(
    computation_id: impl Into<String>,
    interval: Duration,
    fetch: F,
) -> (watch::Receiver<JobStatus>, JoinHandle<()>)
where
    F: Fn(String) -> Fut + Send + 'static,
    Fut: Future<Output = JobStatus> + Send + 'static,
{
    let (status_tx, status_rx) = watch::channel(JobStatus::NoSuchJob);
    let task = poll_into(status_tx, computation_id.into(), interval, fetch);
    (status_rx, task)
}

fn poll_into<F, Fut>(
    status_tx: watch::Sender<JobStatus>,
    computation_id: String,
    interval: Duration,
    fetch: F,
) -> JoinHandle<()>
where
    F: Fn(String) -> Fut + Send + 'static,
    Fut: Future<Output = JobStatus> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if status_tx.is_closed() {
                debug!("[watcher] No subscribers left for {}", computation_id);
                return;
            }
            let status = fetch(computation_id.clone()).await;
            status_tx.send_if_modified(|current| {
                if *current == status {
                    return false;
                }
                *current = status;
                true
            });
            if status.is_terminal() {
                debug!("[watcher] {} is {}, polling stopped", computation_id, status);
                return;
            }
        }
    })
}

struct Poller {
    status_tx: watch::Sender<JobStatus>,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// A [`ComputeJobService`] for backends that can only be asked for a job's
/// current status.
///
/// `submit` issues the job; `fetch` looks up its status and is polled every
/// [`EngineSettings::poll_interval`]. Each computation has one status channel
/// that survives its poller, so a resubscription starts from the last status
/// seen rather than from `NoSuchJob`.
pub struct PollingJobService<S, F> {
    submit: S,
    fetch: F,
    interval: Duration,
    pollers: Mutex<BTreeMap<String, Poller>>,
}

impl<S, F> PollingJobService<S, F> {
    pub fn new(settings: &EngineSettings, submit: S, fetch: F) -> Self {
        Self {
            submit,
            fetch,
            interval: settings.poll_interval(),
            pollers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<S, F, Fut> PollingJobService<S, F>
where
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = JobStatus> + Send + 'static,
{
    /// Subscribe to `computation_id`, starting its poller if none is running.
    fn ensure_polling(&self, computation_id: &str) -> watch::Receiver<JobStatus> {
        let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        let poller = pollers
            .entry(computation_id.to_string())
            .or_insert_with(|| Poller {
                status_tx: watch::channel(JobStatus::NoSuchJob).0,
                task: None,
            });
        let status_rx = poller.status_tx.subscribe();
        if !poller.is_running() {
            debug!(
                "[watcher] Polling {} every {:?}",
                computation_id, self.interval
            );
            poller.task = Some(poll_into(
                poller.status_tx.clone(),
                computation_id.to_string(),
                self.interval,
                self.fetch.clone(),
            ));
        }
        status_rx
    }
}

impl<S, F, Fut> ComputeJobService for PollingJobService<S, F>
where
    S: Fn(&Analysis, &Computation, &str) + Send + Sync,
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = JobStatus> + Send + 'static,
{
    fn create_job(&self, analysis: &Analysis, computation: &Computation, compute_app_name: &str) {
        (self.submit)(analysis, computation, compute_app_name);
    }

    /// Must be called from within a Tokio runtime.
    fn subscribe(&self, computation_id: &str) -> watch::Receiver<JobStatus> {
        self.ensure_polling(computation_id)
    }
}

/// Controllers and watch tasks of the compute cells in one notebook, keyed by
/// computation id.
#[derive(Debug)]
pub struct JobAttachments {
    controllers: BTreeMap<String, SharedJobController>,
    watches: BTreeMap<String, JobWatch>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobAttachments {
    pub fn new(events: mpsc::UnboundedSender<JobEvent>) -> Self {
        Self {
            controllers: BTreeMap::new(),
            watches: BTreeMap::new(),
            events,
        }
    }

    /// The controller for `cell`, created on first use.
    pub fn controller(&mut self, cell: &ComputeCell) -> SharedJobController {
        self.controllers
            .entry(cell.computation_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(JobLifecycleController::new(cell))))
            .clone()
    }

    pub fn get(&self, computation_id: &str) -> Option<SharedJobController> {
        self.controllers.get(computation_id).cloned()
    }

    /// Attach a watch task for `cell`. Mounting an already-mounted cell is a
    /// no-op; mounting after an unmount re-subscribes to the existing job.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&mut self, cell: &ComputeCell, service: &dyn ComputeJobService) -> SharedJobController {
        let controller = self.controller(cell);
        let id = &cell.computation_id;
        if self.watches.get(id).is_some_and(JobWatch::is_attached) {
            debug!("[watcher] {} already mounted", id);
            return controller;
        }

        let status_rx = service.subscribe(id);
        let watch = spawn_job_watcher(controller.clone(), status_rx, self.events.clone());
        self.watches.insert(id.clone(), watch);
        info!("[watcher] Mounted compute cell {} ({})", cell.header.id, id);
        controller
    }

    /// Stop watching `computation_id`. The controller and its state are kept.
    pub fn unmount(&mut self, computation_id: &str) -> bool {
        match self.watches.remove(computation_id) {
            Some(_watch) => {
                info!("[watcher] Unmounted {}", computation_id);
                true
            }
            None => false,
        }
    }

    pub fn is_mounted(&self, computation_id: &str) -> bool {
        self.watches
            .get(computation_id)
            .is_some_and(JobWatch::is_attached)
    }

    /// Last status seen by each controller.
    pub fn statuses(&self) -> BTreeMap<String, JobStatus> {
        self.controllers
            .iter()
            .map(|(id, controller)| (id.clone(), lock_controller(controller).status()))
            .collect()
    }
}
