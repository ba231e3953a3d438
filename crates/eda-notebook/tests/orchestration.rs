//! End-to-end notebook sessions against an in-memory job service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use eda_notebook::config_store::update_configuration;
use eda_notebook::descriptor::find;
use eda_notebook::shared_inputs::resolve_shared_inputs;
use eda_notebook::{
    Analysis, CellDescriptor, Computation, ComputeJobService, ConstructionError, EngineSettings,
    JobEvent, JobStatus, NotebookPreset, NotebookSession, PluginRegistry, PresetRegistry,
};

#[derive(Default)]
struct FakeJobService {
    senders: Mutex<HashMap<String, watch::Sender<JobStatus>>>,
    created: Mutex<Vec<(String, String)>>,
}

impl FakeJobService {
    fn sender(&self, computation_id: &str) -> watch::Sender<JobStatus> {
        self.senders
            .lock()
            .unwrap()
            .entry(computation_id.to_string())
            .or_insert_with(|| watch::channel(JobStatus::NoSuchJob).0)
            .clone()
    }

    fn report(&self, computation_id: &str, status: JobStatus) {
        self.sender(computation_id).send_replace(status);
    }

    fn created(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }
}

impl ComputeJobService for FakeJobService {
    fn create_job(&self, _analysis: &Analysis, computation: &Computation, compute_app_name: &str) {
        self.created.lock().unwrap().push((
            computation.computation_id.clone(),
            compute_app_name.to_string(),
        ));
    }

    fn subscribe(&self, computation_id: &str) -> watch::Receiver<JobStatus> {
        self.sender(computation_id).subscribe()
    }
}

fn hidden_correlation_preset() -> NotebookPreset {
    serde_json::from_value(json!({
        "name": "hiddencorrelation",
        "displayName": "Hidden Correlation",
        "applicableProjects": ["PlasmoDB"],
        "cells": [{
            "type": "compute",
            "id": "corr",
            "title": "Correlation",
            "computationName": "correlation",
            "computationId": "corr_1",
            "hidden": true,
            "cells": [
                {
                    "type": "visualization",
                    "id": "net",
                    "title": "Network",
                    "visualizationName": "bipartitenetwork",
                    "visualizationId": "net_1"
                },
                { "type": "text", "id": "note", "title": "Note", "text": "Results appear above." }
            ]
        }]
    }))
    .unwrap()
}

fn registry() -> PresetRegistry {
    let mut registry = PresetRegistry::builtin();
    registry.insert(hidden_correlation_preset());
    registry
}

fn open_with(
    preset: &str,
    analysis: Analysis,
    service: Arc<FakeJobService>,
) -> (NotebookSession, mpsc::UnboundedReceiver<JobEvent>) {
    NotebookSession::open(
        &registry(),
        preset,
        "PlasmoDB",
        analysis,
        Arc::new(PluginRegistry::builtin()),
        service,
        EngineSettings::default(),
    )
    .unwrap()
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for job event")
        .expect("event channel closed")
}

/// Skip events until the status change to `status`.
async fn wait_for_status(events: &mut mpsc::UnboundedReceiver<JobEvent>, status: JobStatus) {
    loop {
        if let JobEvent::StatusChanged { to, .. } = next_event(events).await {
            if to == status {
                return;
            }
        }
    }
}

fn collection(collection_id: &str) -> Value {
    json!({ "collectionSpec": { "entityId": "genes", "collectionId": collection_id } })
}

fn complete_correlation_config(session: &mut NotebookSession) {
    session.update_configuration("corr_1", "correlationMethod", json!("spearman"));
    session.update_configuration(
        "corr_1",
        "prefilterThresholds",
        json!({ "proportionNonZero": 0.05 }),
    );
    session.update_configuration("corr_1", "data1", collection("eigengenes"));
    session.update_configuration("corr_1", "data2", collection("phenotypes"));
}

#[test]
fn test_opening_twice_creates_nothing_new() {
    let service = Arc::new(FakeJobService::default());
    let (first, _events) = open_with("differentialexpression", Analysis::new("study"), service.clone());
    let analysis = first.analysis().clone();
    assert_eq!(analysis.computations.len(), 2);
    assert_eq!(analysis.visualizations.len(), 2);

    let (second, _events) = open_with("differentialexpression", analysis, service);
    assert_eq!(second.analysis().computations.len(), 2);
    assert_eq!(second.analysis().visualizations.len(), 2);
}

#[test]
fn test_duplicate_cell_ids_are_rejected() {
    let mut preset = PresetRegistry::builtin()
        .get("wgcnacorrelation")
        .unwrap()
        .clone();
    let duplicate = find(&preset.cells, "wgcna_params").unwrap().clone();
    preset.cells.push(duplicate);
    preset.name = "duplicated".into();

    let mut presets = PresetRegistry::builtin();
    presets.insert(preset);
    let err = NotebookSession::open(
        &presets,
        "duplicated",
        "PlasmoDB",
        Analysis::new("study"),
        Arc::new(PluginRegistry::builtin()),
        Arc::new(FakeJobService::default()),
        EngineSettings::default(),
    )
    .unwrap_err();
    assert_eq!(err, ConstructionError::DuplicateCellId("wgcna_params".into()));
}

#[test]
fn test_configuration_updates_preserve_identity() {
    let computations = Arc::new(vec![
        Arc::new(Computation {
            computation_id: "target".into(),
            computation_type: "differentialexpression".into(),
            configuration: json!({ "a": 1, "b": 2 }).as_object().unwrap().clone(),
        }),
        Arc::new(Computation {
            computation_id: "bystander".into(),
            computation_type: "correlation".into(),
            configuration: Default::default(),
        }),
    ]);

    let unchanged = update_configuration(&computations, "target", "a", json!(1));
    assert!(Arc::ptr_eq(&computations, &unchanged));

    let changed = update_configuration(&computations, "target", "a", json!(5));
    assert_eq!(
        Value::Object(changed[0].configuration.clone()),
        json!({ "a": 5, "b": 2 })
    );
    assert!(Arc::ptr_eq(&computations[1], &changed[1]));
}

#[test]
fn test_explicit_shared_input_names_win() {
    let cells: Vec<CellDescriptor> = serde_json::from_value(json!([
        {
            "type": "sharedcomputeinputs",
            "id": "shared",
            "title": "Shared",
            "inputNames": ["y", "z"]
        },
        {
            "type": "compute",
            "id": "explicit",
            "title": "Explicit",
            "computationName": "correlation",
            "computationId": "c1",
            "sharedInputsCellId": "shared",
            "sharedInputNames": ["x"]
        },
        {
            "type": "compute",
            "id": "inherited",
            "title": "Inherited",
            "computationName": "correlation",
            "computationId": "c2",
            "sharedInputsCellId": "shared"
        }
    ]))
    .unwrap();

    let resolved = resolve_shared_inputs(&cells);
    let names = |id: &str| {
        find(&resolved, id)
            .and_then(CellDescriptor::as_compute)
            .and_then(|c| c.shared_input_names.clone())
    };
    assert_eq!(names("explicit"), Some(vec!["x".to_string()]));
    assert_eq!(names("inherited"), Some(vec!["y".to_string(), "z".to_string()]));
}

#[tokio::test]
async fn test_visualization_enabled_only_after_job_completes() {
    let service = Arc::new(FakeJobService::default());
    let (mut session, mut events) =
        open_with("differentialexpression", Analysis::new("study"), service.clone());
    session.mount_compute_cell("de_deseq2_compute").unwrap();

    service.report("de_1", JobStatus::Pending);
    wait_for_status(&mut events, JobStatus::Pending).await;
    assert_eq!(session.is_enabled("de_volcano"), Some(false));
    assert_eq!(session.is_enabled("de_review"), Some(true));
    assert_eq!(session.is_enabled("de_deseq2_compute"), Some(true));

    service.report("de_1", JobStatus::Running);
    wait_for_status(&mut events, JobStatus::Running).await;
    service.report("de_1", JobStatus::Complete);
    wait_for_status(&mut events, JobStatus::Complete).await;
    assert_eq!(session.is_enabled("de_volcano"), Some(true));
    // The PCA job is independent.
    assert_eq!(session.is_enabled("de_pca_plot"), Some(false));
}

#[tokio::test]
async fn test_hidden_cell_runs_once_and_reports_failure_once() {
    let service = Arc::new(FakeJobService::default());
    let (mut session, mut events) =
        open_with("hiddencorrelation", Analysis::new("study"), service.clone());
    let controller = session.mount_compute_cell("corr").unwrap();
    assert!(service.created().is_empty());

    complete_correlation_config(&mut session);
    assert!(matches!(next_event(&mut events).await, JobEvent::JobRequested { .. }));
    for _ in 0..3 {
        assert_eq!(session.evaluate_auto_run(), 0);
    }
    assert_eq!(
        service.created(),
        vec![("corr_1".to_string(), "correlation".to_string())]
    );

    service.report("corr_1", JobStatus::Running);
    wait_for_status(&mut events, JobStatus::Running).await;
    service.report("corr_1", JobStatus::Failed);
    wait_for_status(&mut events, JobStatus::Failed).await;
    assert!(matches!(
        next_event(&mut events).await,
        JobEvent::FailureDialogOpened { .. }
    ));
    assert!(controller.lock().unwrap().failure_dialog_open());

    // Further edits re-run the auto-run check but neither resubmit nor reopen.
    session.update_configuration("corr_1", "correlationMethod", json!("pearson"));
    assert_eq!(session.evaluate_auto_run(), 0);
    assert_eq!(service.created().len(), 1);
    assert!(events.try_recv().is_err());

    assert!(session.dismiss_failure_dialog("corr"));
    assert!(!controller.lock().unwrap().failure_dialog_open());
    assert_eq!(session.is_enabled("net"), Some(false));
    assert_eq!(session.is_enabled("note"), Some(true));
}

#[tokio::test]
async fn test_remount_reattaches_to_running_job() {
    let service = Arc::new(FakeJobService::default());
    let (mut session, mut events) =
        open_with("hiddencorrelation", Analysis::new("study"), service.clone());
    session.mount_compute_cell("corr").unwrap();
    complete_correlation_config(&mut session);
    service.report("corr_1", JobStatus::Running);
    wait_for_status(&mut events, JobStatus::Running).await;

    assert!(session.unmount_compute_cell("corr"));
    service.report("corr_1", JobStatus::Complete);
    tokio::task::yield_now().await;
    assert_eq!(session.job_statuses()["corr_1"], JobStatus::Running);

    session.mount_compute_cell("corr").unwrap();
    wait_for_status(&mut events, JobStatus::Complete).await;
    assert_eq!(service.created().len(), 1);
    assert_eq!(session.is_enabled("net"), Some(true));
}

#[tokio::test]
async fn test_auto_run_can_be_disabled() {
    let service = Arc::new(FakeJobService::default());
    let (mut session, _events) = NotebookSession::open(
        &registry(),
        "hiddencorrelation",
        "PlasmoDB",
        Analysis::new("study"),
        Arc::new(PluginRegistry::builtin()),
        service.clone(),
        EngineSettings {
            auto_run_hidden_cells: false,
            ..Default::default()
        },
    )
    .unwrap();
    session.mount_compute_cell("corr").unwrap();
    complete_correlation_config(&mut session);
    assert!(service.created().is_empty());

    session.start_job("corr").unwrap();
    assert_eq!(service.created().len(), 1);
}

#[tokio::test]
async fn test_dropped_job_is_resubmitted() {
    let service = Arc::new(FakeJobService::default());
    let (mut session, mut events) =
        open_with("hiddencorrelation", Analysis::new("study"), service.clone());
    session.mount_compute_cell("corr").unwrap();
    complete_correlation_config(&mut session);
    assert!(matches!(next_event(&mut events).await, JobEvent::JobRequested { .. }));

    service.report("corr_1", JobStatus::Running);
    wait_for_status(&mut events, JobStatus::Running).await;

    // The service forgets the job it had confirmed.
    service.report("corr_1", JobStatus::NoSuchJob);
    wait_for_status(&mut events, JobStatus::NoSuchJob).await;
    assert_eq!(session.is_enabled("net"), Some(false));

    assert_eq!(session.evaluate_auto_run(), 1);
    assert_eq!(service.created().len(), 2);
    assert_eq!(session.job_statuses()["corr_1"], JobStatus::Pending);
}
