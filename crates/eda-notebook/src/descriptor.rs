//! Cell descriptors: the declarative nodes of a notebook preset tree.
//!
//! A preset is a tree of [`CellDescriptor`]s. The enum is closed, so every
//! place that dispatches on the kind of a cell is an exhaustive `match` and a
//! new kind of cell is a compile error until it is handled everywhere.
//!
//! The serialized form uses the front-end's field names (`type` tag,
//! camelCase fields) so presets can be exchanged with the browser as JSON.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Whether a collapsible cell panel starts open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PanelState {
    Open,
    #[default]
    Closed,
    /// Open once the notebook is ready, closed before.
    OpenWhenReady,
}

impl PanelState {
    /// The concrete state for a notebook that is or isn't ready.
    pub fn resolve(self, ready: bool) -> PanelState {
        match self {
            PanelState::OpenWhenReady if ready => PanelState::Open,
            PanelState::OpenWhenReady => PanelState::Closed,
            state => state,
        }
    }
}

/// Fields shared by every kind of cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellHeader {
    /// Unique across the whole tree.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_text: Option<String>,
    /// Numbered cells get a step number in depth-first order.
    #[serde(default)]
    pub numbered_header: bool,
}

impl CellHeader {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            helper_text: None,
            numbered_header: false,
        }
    }

    pub fn numbered(mut self) -> Self {
        self.numbered_header = true;
        self
    }

    pub fn with_helper_text(mut self, text: impl Into<String>) -> Self {
        self.helper_text = Some(text.into());
        self
    }
}

/// Sample subsetting panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubsetCell {
    #[serde(flatten)]
    pub header: CellHeader,
    #[serde(default)]
    pub initial_panel_state: PanelState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellDescriptor>,
}

/// Static text block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextCell {
    #[serde(flatten)]
    pub header: CellHeader,
    #[serde(default)]
    pub text: String,
    /// Appended to `text` only once the notebook is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_text: Option<String>,
    #[serde(default)]
    pub panel_state: PanelState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellDescriptor>,
}

/// Controls for parameters owned by the WDK parameter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WdkParamCell {
    #[serde(flatten)]
    pub header: CellHeader,
    pub param_names: Vec<String>,
    #[serde(default)]
    pub required_param_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellDescriptor>,
}

/// A backend computation step. Children are only usable once the
/// computation's job has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComputeCell {
    #[serde(flatten)]
    pub header: CellHeader,
    /// Name of the computation plugin (and backend compute app).
    pub computation_name: String,
    pub computation_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellDescriptor>,
    /// Id of a [`SharedComputeInputsCell`] whose input names this cell uses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_inputs_cell_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_input_names: Option<Vec<String>>,
    /// Hidden cells have no configuration UI and run automatically.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_collection_predicate: Option<CollectionPredicateFactory>,
}

/// A rendering bound to the nearest compute ancestor's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationCell {
    #[serde(flatten)]
    pub header: CellHeader,
    pub visualization_name: String,
    pub visualization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_param_on_node_click: Option<NodeClickParamUpdate>,
}

/// Declares input names shared by several compute cells. Never materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SharedComputeInputsCell {
    #[serde(flatten)]
    pub header: CellHeader,
    pub input_names: Vec<String>,
    #[serde(default)]
    pub computation_ids: Vec<String>,
}

/// Network visualizations can push the clicked node into a WDK parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClickParamUpdate {
    pub param_name: String,
    /// Cell whose step number is quoted in the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_cell_id: Option<String>,
}

/// Builds a variable-collection filter for the project a notebook runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CollectionPredicateFactory {
    /// Listed projects keep only their collection; other projects keep all.
    CollectionPerProject {
        collections: BTreeMap<String, String>,
    },
}

impl CollectionPredicateFactory {
    pub fn for_project(&self, project_id: Option<&str>) -> CollectionPredicate {
        match self {
            CollectionPredicateFactory::CollectionPerProject { collections } => project_id
                .and_then(|project| collections.get(project))
                .map(|id| CollectionPredicate::Only(id.clone()))
                .unwrap_or(CollectionPredicate::All),
        }
    }
}

/// Filter over variable collection ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionPredicate {
    All,
    Only(String),
}

impl CollectionPredicate {
    pub fn accepts(&self, collection_id: &str) -> bool {
        match self {
            CollectionPredicate::All => true,
            CollectionPredicate::Only(id) => id == collection_id,
        }
    }
}

/// A node of a notebook preset tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CellDescriptor {
    Subset(SubsetCell),
    Text(TextCell),
    WdkParam(WdkParamCell),
    Compute(ComputeCell),
    Visualization(VisualizationCell),
    SharedComputeInputs(SharedComputeInputsCell),
}

/// The kind of a cell, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum CellKind {
    Subset,
    Text,
    WdkParam,
    Compute,
    Visualization,
    SharedComputeInputs,
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CellKind::Subset => "subset",
            CellKind::Text => "text",
            CellKind::WdkParam => "wdkparam",
            CellKind::Compute => "compute",
            CellKind::Visualization => "visualization",
            CellKind::SharedComputeInputs => "sharedcomputeinputs",
        };
        f.write_str(name)
    }
}

impl CellDescriptor {
    pub fn kind(&self) -> CellKind {
        match self {
            CellDescriptor::Subset(_) => CellKind::Subset,
            CellDescriptor::Text(_) => CellKind::Text,
            CellDescriptor::WdkParam(_) => CellKind::WdkParam,
            CellDescriptor::Compute(_) => CellKind::Compute,
            CellDescriptor::Visualization(_) => CellKind::Visualization,
            CellDescriptor::SharedComputeInputs(_) => CellKind::SharedComputeInputs,
        }
    }

    pub fn header(&self) -> &CellHeader {
        match self {
            CellDescriptor::Subset(cell) => &cell.header,
            CellDescriptor::Text(cell) => &cell.header,
            CellDescriptor::WdkParam(cell) => &cell.header,
            CellDescriptor::Compute(cell) => &cell.header,
            CellDescriptor::Visualization(cell) => &cell.header,
            CellDescriptor::SharedComputeInputs(cell) => &cell.header,
        }
    }

    pub fn id(&self) -> &str {
        &self.header().id
    }

    pub fn title(&self) -> &str {
        &self.header().title
    }

    /// Nested cells. Visualization and shared-input cells never have any.
    pub fn children(&self) -> &[CellDescriptor] {
        match self {
            CellDescriptor::Subset(cell) => &cell.cells,
            CellDescriptor::Text(cell) => &cell.cells,
            CellDescriptor::WdkParam(cell) => &cell.cells,
            CellDescriptor::Compute(cell) => &cell.cells,
            CellDescriptor::Visualization(_) | CellDescriptor::SharedComputeInputs(_) => &[],
        }
    }

    pub fn as_compute(&self) -> Option<&ComputeCell> {
        match self {
            CellDescriptor::Compute(cell) => Some(cell),
            _ => None,
        }
    }
}

/// Depth-first pre-order listing of every cell in the tree.
pub fn flatten(cells: &[CellDescriptor]) -> Vec<&CellDescriptor> {
    let mut out = Vec::new();
    visit_paths(cells, &mut |path| {
        if let Some(cell) = path.last() {
            out.push(*cell);
        }
    });
    out
}

/// Call `visit` for every cell with its path from the root (the cell itself
/// is the last element).
pub fn visit_paths<'a, F>(cells: &'a [CellDescriptor], visit: &mut F)
where
    F: FnMut(&[&'a CellDescriptor]),
{
    fn walk<'a, F>(cells: &'a [CellDescriptor], path: &mut Vec<&'a CellDescriptor>, visit: &mut F)
    where
        F: FnMut(&[&'a CellDescriptor]),
    {
        for cell in cells {
            path.push(cell);
            visit(path.as_slice());
            walk(cell.children(), path, visit);
            path.pop();
        }
    }

    let mut path = Vec::new();
    walk(cells, &mut path, visit);
}

/// Path from the root to the cell with `id`, inclusive.
pub fn path_to<'a>(cells: &'a [CellDescriptor], id: &str) -> Option<Vec<&'a CellDescriptor>> {
    let mut found = None;
    visit_paths(cells, &mut |path| {
        if found.is_none() && path.last().map(|c| c.id()) == Some(id) {
            found = Some(path.to_vec());
        }
    });
    found
}

pub fn find<'a>(cells: &'a [CellDescriptor], id: &str) -> Option<&'a CellDescriptor> {
    flatten(cells).into_iter().find(|cell| cell.id() == id)
}

/// Step numbers for cells with a numbered header, in depth-first order
/// starting at 1.
pub fn step_numbers(cells: &[CellDescriptor]) -> BTreeMap<String, usize> {
    flatten(cells)
        .into_iter()
        .filter(|cell| cell.header().numbered_header)
        .enumerate()
        .map(|(index, cell)| (cell.id().to_string(), index + 1))
        .collect()
}
