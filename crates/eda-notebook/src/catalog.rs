//! Built-in notebook presets.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::{
    CellDescriptor, CellHeader, CollectionPredicateFactory, ComputeCell, NodeClickParamUpdate,
    PanelState, SharedComputeInputsCell, SubsetCell, TextCell, VisualizationCell, WdkParamCell,
};
use crate::preset::{NotebookPreset, ReadinessRule};

/// VEuPathDB genomics sites.
pub const GENOMICS_PROJECTS: &[&str] = &[
    "AmoebaDB",
    "CryptoDB",
    "FungiDB",
    "GiardiaDB",
    "HostDB",
    "MicrosporidiaDB",
    "PiroplasmaDB",
    "PlasmoDB",
    "ToxoDB",
    "TrichDB",
    "TriTrypDB",
    "VectorBase",
];

pub fn builtin_presets() -> Vec<NotebookPreset> {
    vec![differential_expression(), wgcna_correlation()]
}

fn projects(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn compute(header: CellHeader, name: &str, id: &str, cells: Vec<CellDescriptor>) -> ComputeCell {
    ComputeCell {
        header,
        computation_name: name.to_string(),
        computation_id: id.to_string(),
        cells,
        shared_inputs_cell_id: None,
        shared_input_names: None,
        hidden: false,
        additional_collection_predicate: None,
    }
}

fn visualization(header: CellHeader, name: &str, id: &str) -> VisualizationCell {
    VisualizationCell {
        header,
        visualization_name: name.to_string(),
        visualization_id: id.to_string(),
        update_param_on_node_click: None,
    }
}

/// PCA and DESeq2 over shared expression inputs, ending in a review step.
pub fn differential_expression() -> NotebookPreset {
    let mut applicable_projects = projects(GENOMICS_PROJECTS);
    applicable_projects.insert("UniDB".to_string());

    let pca = ComputeCell {
        shared_inputs_cell_id: Some("de_shared_inputs".into()),
        ..compute(
            CellHeader::new("de_pca_compute", "Set up PCA Computation")
                .numbered()
                .with_helper_text(
                    "Configure and run a PCA to explore sources of variation across samples.",
                ),
            "dimensionalityreduction",
            "pca_1",
            vec![CellDescriptor::Visualization(visualization(
                CellHeader::new("de_pca_plot", "PCA Plot")
                    .numbered()
                    .with_helper_text(
                        "Color samples by metadata variables to explore batch effects and other sources of variation.",
                    ),
                "scatterplot",
                "pca_1",
            ))],
        )
    };

    let deseq2 = ComputeCell {
        shared_inputs_cell_id: Some("de_shared_inputs".into()),
        ..compute(
            CellHeader::new("de_deseq2_compute", "Set up DESeq2 Computation")
                .numbered()
                .with_helper_text(
                    "Configure and run DESeq2 to test for differential expression between two groups of samples.",
                ),
            "differentialexpression",
            "de_1",
            vec![
                CellDescriptor::Visualization(visualization(
                    CellHeader::new("de_volcano", "Examine DESeq2 Results with Volcano Plot")
                        .numbered()
                        .with_helper_text(
                            "Use the threshold lines to highlight genes by significance and fold change.",
                        ),
                    "volcanoplot",
                    "volcano_1",
                )),
                CellDescriptor::Text(TextCell {
                    header: CellHeader::new("de_review", "Review and Run Search")
                        .numbered()
                        .with_helper_text("Review your thresholds and run the gene search."),
                    text: "Check the expression data from step {step:de_shared_inputs}, the comparison set up in step {step:de_deseq2_compute} and the thresholds from step {step:de_volcano}."
                        .into(),
                    ready_text: Some(
                        "Click \"{submitButtonText}\" below to retrieve genes matching the criteria above."
                            .into(),
                    ),
                    panel_state: PanelState::OpenWhenReady,
                    cells: vec![],
                }),
            ],
        )
    };

    NotebookPreset {
        name: "differentialexpression".into(),
        display_name: "Differential Expression Notebook".into(),
        header: None,
        applicable_projects,
        cells: vec![
            CellDescriptor::Subset(SubsetCell {
                header: CellHeader::new("de_subset", "Select Samples (optional)")
                    .numbered()
                    .with_helper_text(
                        "Optionally remove samples, e.g. outliers identified in the PCA step below.",
                    ),
                initial_panel_state: PanelState::Closed,
                cells: vec![],
            }),
            CellDescriptor::SharedComputeInputs(SharedComputeInputsCell {
                header: CellHeader::new("de_shared_inputs", "Select Expression Data")
                    .numbered()
                    .with_helper_text("Select the gene expression data for this analysis."),
                input_names: vec!["identifierVariable".into(), "valueVariable".into()],
                computation_ids: vec!["pca_1".into(), "de_1".into()],
            }),
            CellDescriptor::Compute(pca),
            CellDescriptor::Compute(deseq2),
        ],
        readiness: Some(ReadinessRule::ComputationComplete {
            computation_name: "differentialexpression".into(),
        }),
    }
}

/// Correlation of WGCNA module eigengenes with a gene search parameter.
pub fn wgcna_correlation() -> NotebookPreset {
    let network = VisualizationCell {
        update_param_on_node_click: Some(NodeClickParamUpdate {
            param_name: "wgcnaParam".into(),
            step_cell_id: Some("wgcna_params".into()),
        }),
        ..visualization(
            CellHeader::new(
                "wgcna_bipartite",
                "Network visualization of correlation results",
            )
            .numbered()
            .with_helper_text(
                "Visualize the correlation results between the two groups in the network. Click on nodes to highlight them in the network.",
            ),
            "bipartitenetwork",
            "bipartite_1",
        )
    };

    let correlation = ComputeCell {
        additional_collection_predicate: Some(CollectionPredicateFactory::CollectionPerProject {
            collections: BTreeMap::from([
                ("PlasmoDB".to_string(), "EUPATH_0005051".to_string()),
                ("HostDB".to_string(), "EUPATH_0005050".to_string()),
            ]),
        }),
        ..compute(
            CellHeader::new("wgcna_correlation_compute", "Correlation computation")
                .numbered()
                .with_helper_text(
                    "Configure and run a correlation computation between WGCNA module eigengene expression and other features of interest.",
                ),
            "correlation",
            "correlation_1",
            vec![CellDescriptor::Visualization(network)],
        )
    };

    NotebookPreset {
        name: "wgcnacorrelation".into(),
        display_name: "WGCNA Correlation Notebook".into(),
        header: Some(
            "Use steps 1-{step:wgcna_params} to find a module of interest, then click '{submitButtonText}' to retrieve a list of genes."
                .into(),
        ),
        applicable_projects: projects(&["PlasmoDB", "HostDB", "UniDB"]),
        cells: vec![
            CellDescriptor::Compute(correlation),
            CellDescriptor::WdkParam(WdkParamCell {
                header: CellHeader::new("wgcna_params", "Run gene search")
                    .numbered()
                    .with_helper_text(
                        "Find genes within a particular module that are strongly correlated with the module's eigengene.",
                    ),
                param_names: vec!["wgcnaParam".into(), "wgcna_correlation_cutoff".into()],
                required_param_names: vec!["wgcnaParam".into()],
                cells: vec![],
            }),
        ],
        readiness: Some(ReadinessRule::WdkParamSelected {
            param_name: "wgcnaParam".into(),
            placeholder_marker: "choose_module".into(),
        }),
    }
}
