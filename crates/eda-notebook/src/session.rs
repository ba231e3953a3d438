//! A notebook opened against one analysis.
//!
//! [`NotebookSession`] is the single owner of the analysis store and the job
//! controllers of one preset instance. Opening a session gates the preset by
//! project, resolves shared inputs, validates the tree and materializes any
//! missing records. Afterwards the host drives it with configuration edits,
//! mount/unmount of compute cells, node clicks and explicit job starts, and
//! reads back per-cell state.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::analysis::{Analysis, AnalysisState, AnalysisStore, Configuration};
use crate::config_store::ComputationConfigStore;
use crate::descriptor::{self, CellDescriptor, CollectionPredicate, ComputeCell, PanelState};
use crate::enablement::{self, CellState};
use crate::error::{ConstructionError, JobError};
use crate::job::{ComputeJobService, JobEvent, JobStatus};
use crate::materialize::materialize;
use crate::plugin::PluginRegistry;
use crate::preset::{render_template, NotebookPreset, PresetRegistry};
use crate::settings::EngineSettings;
use crate::wdk::{apply_node_click, ParamUpdateNotice, ParameterStore};
use crate::watcher::{lock_controller, JobAttachments, SharedJobController};

pub struct NotebookSession {
    preset: NotebookPreset,
    project_id: String,
    plugins: Arc<PluginRegistry>,
    service: Arc<dyn ComputeJobService>,
    store: AnalysisStore,
    attachments: JobAttachments,
    events: mpsc::UnboundedSender<JobEvent>,
    settings: EngineSettings,
    steps: BTreeMap<String, usize>,
}

impl std::fmt::Debug for NotebookSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookSession")
            .field("preset", &self.preset.name)
            .field("project_id", &self.project_id)
            .field("study_id", &self.store.analysis().study_id)
            .field("revision", &self.store.revision())
            .finish_non_exhaustive()
    }
}

impl NotebookSession {
    /// Open `preset_name` for `project_id` on top of `analysis`.
    ///
    /// Returns the session and the receiving end of its job event stream.
    pub fn open(
        registry: &PresetRegistry,
        preset_name: &str,
        project_id: &str,
        analysis: Analysis,
        plugins: Arc<PluginRegistry>,
        service: Arc<dyn ComputeJobService>,
        settings: EngineSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<JobEvent>), ConstructionError> {
        let preset = registry.lookup(preset_name, project_id)?.resolved();
        preset.validate()?;

        let mut store = AnalysisStore::new(analysis);
        let queued = materialize(&preset.cells, &mut store, &plugins)?;
        let changed = store.flush();
        info!(
            "[session] Opened {} for {} ({} records queued, {} applied)",
            preset.name, project_id, queued, changed
        );

        let (events, events_rx) = mpsc::unbounded_channel();
        let steps = preset.step_numbers();
        let session = Self {
            attachments: JobAttachments::new(events.clone()),
            preset,
            project_id: project_id.to_string(),
            plugins,
            service,
            store,
            events,
            settings,
            steps,
        };
        Ok((session, events_rx))
    }

    pub fn preset(&self) -> &NotebookPreset {
        &self.preset
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn analysis(&self) -> &Analysis {
        self.store.analysis()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn step_numbers(&self) -> &BTreeMap<String, usize> {
        &self.steps
    }

    /// Direct access to the update log, for edits the session does not model
    /// (filters, variable UI settings). Call [`flush`](Self::flush) afterwards.
    pub fn store_mut(&mut self) -> &mut AnalysisStore {
        &mut self.store
    }

    /// Apply queued updates, then re-check auto-run. Returns the number of
    /// updates that changed the analysis.
    pub fn flush(&mut self) -> usize {
        let changed = self.store.flush();
        if changed > 0 {
            self.evaluate_auto_run();
        }
        changed
    }

    pub fn configuration(&self, computation_id: &str) -> Option<&Configuration> {
        self.store
            .analysis()
            .computation(computation_id)
            .map(|c| &c.configuration)
    }

    /// Set one configuration key and apply it. Returns whether the analysis
    /// changed.
    pub fn update_configuration(&mut self, computation_id: &str, key: &str, value: Value) -> bool {
        ComputationConfigStore::new(&mut self.store).update(computation_id, key, value);
        self.flush() > 0
    }

    fn compute_cell(&self, cell_id: &str) -> Option<&ComputeCell> {
        descriptor::find(&self.preset.cells, cell_id).and_then(CellDescriptor::as_compute)
    }

    fn compute_cells(&self) -> impl Iterator<Item = &ComputeCell> {
        descriptor::flatten(&self.preset.cells)
            .into_iter()
            .filter_map(CellDescriptor::as_compute)
    }

    /// Attach the job watcher of a compute cell and give a hidden cell the
    /// chance to start its job. Remounting reuses the existing controller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount_compute_cell(&mut self, cell_id: &str) -> Result<SharedJobController, JobError> {
        let cell = self
            .compute_cell(cell_id)
            .ok_or_else(|| JobError::UnknownComputeCell(cell_id.to_string()))?
            .clone();
        let controller = self.attachments.mount(&cell, self.service.as_ref());
        if self.settings.auto_run_hidden_cells {
            self.auto_start(&cell, &controller);
        }
        Ok(controller)
    }

    pub fn unmount_compute_cell(&mut self, cell_id: &str) -> bool {
        match self.compute_cell(cell_id) {
            Some(cell) => {
                let computation_id = cell.computation_id.clone();
                self.attachments.unmount(&computation_id)
            }
            None => false,
        }
    }

    fn auto_start(&self, cell: &ComputeCell, controller: &SharedJobController) -> bool {
        let Some(plugin) = self.plugins.lookup(&cell.computation_name) else {
            return false;
        };
        let event = lock_controller(controller).maybe_auto_start(
            self.store.analysis(),
            plugin,
            self.service.as_ref(),
        );
        match event {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: JobEvent) {
        if self.events.send(event).is_err() {
            debug!("[session] Event receiver gone for {}", self.preset.name);
        }
    }

    /// Start the jobs of mounted hidden cells whose configuration is now
    /// complete. Returns the number of jobs requested.
    pub fn evaluate_auto_run(&self) -> usize {
        if !self.settings.auto_run_hidden_cells {
            return 0;
        }
        let mut started = 0;
        for cell in self.compute_cells().filter(|cell| cell.hidden) {
            if !self.attachments.is_mounted(&cell.computation_id) {
                continue;
            }
            let Some(controller) = self.attachments.get(&cell.computation_id) else {
                continue;
            };
            if self.auto_start(cell, &controller) {
                started += 1;
            }
        }
        if started > 0 {
            debug!("[session] Auto-run requested {} jobs", started);
        }
        started
    }

    /// User-initiated job start for a compute cell.
    pub fn start_job(&mut self, cell_id: &str) -> Result<(), JobError> {
        let cell = self
            .compute_cell(cell_id)
            .ok_or_else(|| JobError::UnknownComputeCell(cell_id.to_string()))?
            .clone();
        let plugin = self
            .plugins
            .lookup(&cell.computation_name)
            .ok_or_else(|| JobError::MissingPlugin(cell.computation_name.clone()))?;
        let controller = self.attachments.controller(&cell);
        let event = lock_controller(&controller).start(
            self.store.analysis(),
            plugin,
            self.service.as_ref(),
        )?;
        self.emit(event);
        Ok(())
    }

    pub fn dismiss_failure_dialog(&mut self, cell_id: &str) -> bool {
        let Some(computation_id) = self.compute_cell(cell_id).map(|c| c.computation_id.clone())
        else {
            return false;
        };
        match self.attachments.get(&computation_id) {
            Some(controller) => {
                lock_controller(&controller).dismiss_failure_dialog();
                true
            }
            None => false,
        }
    }

    pub fn job_statuses(&self) -> BTreeMap<String, JobStatus> {
        self.attachments.statuses()
    }

    /// Fresh per-cell view state.
    pub fn cell_states(&self) -> Vec<CellState> {
        enablement::cell_states(&self.preset.cells, &self.job_statuses())
    }

    pub fn is_enabled(&self, cell_id: &str) -> Option<bool> {
        let path = descriptor::path_to(&self.preset.cells, cell_id)?;
        Some(enablement::is_enabled(&path, &self.job_statuses()))
    }

    /// Required parameters of the notebook's `wdkparam` cells that have no
    /// value yet.
    pub fn missing_required_params<'a>(
        &'a self,
        param_values: Option<&BTreeMap<String, String>>,
    ) -> Vec<&'a str> {
        descriptor::flatten(&self.preset.cells)
            .into_iter()
            .filter_map(|cell| match cell {
                CellDescriptor::WdkParam(params) => Some(params),
                _ => None,
            })
            .flat_map(|params| params.required_param_names.iter())
            .filter(|name| {
                !param_values
                    .and_then(|values| values.get(name.as_str()))
                    .is_some_and(|value| !value.is_empty())
            })
            .map(String::as_str)
            .collect()
    }

    /// Whether the notebook's result can be submitted: every required
    /// parameter has a value and the preset's readiness rule holds. A preset
    /// without a readiness rule only needs its required parameters.
    pub fn is_ready(&self, param_values: Option<&BTreeMap<String, String>>) -> bool {
        if !self.missing_required_params(param_values).is_empty() {
            return false;
        }
        self.preset.readiness.as_ref().map_or(true, |rule| {
            rule.is_ready(&self.store.analysis().computations, &self.plugins, param_values)
        })
    }

    /// Panel state of a subset or text cell for the notebook's current
    /// readiness.
    pub fn panel_state(
        &self,
        cell_id: &str,
        param_values: Option<&BTreeMap<String, String>>,
    ) -> Option<PanelState> {
        let state = match descriptor::find(&self.preset.cells, cell_id)? {
            CellDescriptor::Subset(subset) => subset.initial_panel_state,
            CellDescriptor::Text(text) => text.panel_state,
            _ => return None,
        };
        Some(state.resolve(self.is_ready(param_values)))
    }

    pub fn header(&self) -> Option<String> {
        self.preset
            .render_header(&self.settings.submit_button_text, &self.steps)
    }

    /// Rendered body of a text cell. The cell's ready text is included only
    /// once the notebook is ready.
    pub fn text(
        &self,
        cell_id: &str,
        param_values: Option<&BTreeMap<String, String>>,
    ) -> Option<String> {
        let CellDescriptor::Text(text) = descriptor::find(&self.preset.cells, cell_id)? else {
            return None;
        };
        let render = |template: &str| {
            render_template(template, &self.settings.submit_button_text, &self.steps)
        };
        let mut body = render(&text.text);
        if let Some(ready_text) = &text.ready_text {
            if self.is_ready(param_values) {
                if !body.is_empty() {
                    body.push_str("\n\n");
                }
                body.push_str(&render(ready_text));
            }
        }
        Some(body)
    }

    /// Variable-collection filter for a compute cell in this session's project.
    pub fn collection_predicate(&self, cell_id: &str) -> Option<CollectionPredicate> {
        let cell = self.compute_cell(cell_id)?;
        let predicate = match &cell.additional_collection_predicate {
            Some(factory) => factory.for_project(Some(&self.project_id)),
            None => CollectionPredicate::All,
        };
        Some(predicate)
    }

    /// Forward a network node click on a visualization cell to the search form.
    pub fn handle_node_click<P: ParameterStore + ?Sized>(
        &self,
        visualization_cell_id: &str,
        node_label: &str,
        params: &mut P,
    ) -> Option<ParamUpdateNotice> {
        let CellDescriptor::Visualization(viz) =
            descriptor::find(&self.preset.cells, visualization_cell_id)?
        else {
            return None;
        };
        let update = viz.update_param_on_node_click.as_ref()?;
        apply_node_click(params, update, node_label, &self.steps)
    }
}
