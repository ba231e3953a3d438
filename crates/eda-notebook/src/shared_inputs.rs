//! Resolution of `sharedInputsCellId` references.
//!
//! Several compute cells can draw their input variables from one
//! [`SharedComputeInputsCell`](crate::descriptor::SharedComputeInputsCell).
//! Before a tree is used, each compute cell that points at such a cell and
//! does not already list its shared input names gets them copied in.

use std::collections::HashMap;

use crate::descriptor::{flatten, CellDescriptor};

/// Fill in `shared_input_names` for compute cells that reference a shared
/// inputs cell.
///
/// Explicit names are never overwritten. A reference to an id that is not a
/// shared inputs cell in this tree leaves the names unset; preset validation
/// reports that case. The function is pure, so resolving an already resolved
/// tree returns an equal tree.
pub fn resolve_shared_inputs(cells: &[CellDescriptor]) -> Vec<CellDescriptor> {
    let shared: HashMap<&str, &[String]> = flatten(cells)
        .into_iter()
        .filter_map(|cell| match cell {
            CellDescriptor::SharedComputeInputs(shared) => {
                Some((shared.header.id.as_str(), shared.input_names.as_slice()))
            }
            _ => None,
        })
        .collect();

    let mut resolved = cells.to_vec();
    fill(&mut resolved, &shared);
    resolved
}

fn fill(cells: &mut [CellDescriptor], shared: &HashMap<&str, &[String]>) {
    for cell in cells.iter_mut() {
        match cell {
            CellDescriptor::Compute(compute) => {
                if compute.shared_input_names.is_none() {
                    if let Some(names) = compute
                        .shared_inputs_cell_id
                        .as_deref()
                        .and_then(|id| shared.get(id))
                    {
                        compute.shared_input_names = Some(names.to_vec());
                    }
                }
                fill(&mut compute.cells, shared);
            }
            CellDescriptor::Subset(subset) => fill(&mut subset.cells, shared),
            CellDescriptor::Text(text) => fill(&mut text.cells, shared),
            CellDescriptor::WdkParam(param) => fill(&mut param.cells, shared),
            CellDescriptor::Visualization(_) | CellDescriptor::SharedComputeInputs(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{CellHeader, ComputeCell, SharedComputeInputsCell, SubsetCell};

    fn shared(id: &str, names: &[&str]) -> CellDescriptor {
        CellDescriptor::SharedComputeInputs(SharedComputeInputsCell {
            header: CellHeader::new(id, "Shared inputs"),
            input_names: names.iter().map(|n| n.to_string()).collect(),
            computation_ids: vec![],
        })
    }

    fn compute(id: &str, shared_id: Option<&str>, explicit: Option<&[&str]>) -> CellDescriptor {
        CellDescriptor::Compute(ComputeCell {
            header: CellHeader::new(id, "Compute"),
            computation_name: "differentialexpression".into(),
            computation_id: format!("{id}_1"),
            cells: vec![],
            shared_inputs_cell_id: shared_id.map(String::from),
            shared_input_names: explicit.map(|names| names.iter().map(|n| n.to_string()).collect()),
            hidden: false,
            additional_collection_predicate: None,
        })
    }

    fn names_of(cells: &[CellDescriptor], id: &str) -> Option<Vec<String>> {
        crate::descriptor::find(cells, id)
            .and_then(|c| c.as_compute())
            .and_then(|c| c.shared_input_names.clone())
    }

    #[test]
    fn test_fills_names_from_shared_cell() {
        let cells = vec![
            shared("inputs", &["identifierVariable", "valueVariable"]),
            compute("de", Some("inputs"), None),
        ];
        let resolved = resolve_shared_inputs(&cells);
        assert_eq!(
            names_of(&resolved, "de"),
            Some(vec!["identifierVariable".to_string(), "valueVariable".to_string()])
        );
    }

    #[test]
    fn test_explicit_names_win() {
        let cells = vec![
            shared("inputs", &["y", "z"]),
            compute("de", Some("inputs"), Some(&["x"])),
        ];
        let resolved = resolve_shared_inputs(&cells);
        assert_eq!(names_of(&resolved, "de"), Some(vec!["x".to_string()]));
    }

    #[test]
    fn test_missing_reference_stays_unset() {
        let cells = vec![compute("de", Some("nowhere"), None)];
        let resolved = resolve_shared_inputs(&cells);
        assert_eq!(names_of(&resolved, "de"), None);
    }

    #[test]
    fn test_reference_to_non_shared_cell_stays_unset() {
        let cells = vec![compute("pca", None, None), compute("de", Some("pca"), None)];
        let resolved = resolve_shared_inputs(&cells);
        assert_eq!(names_of(&resolved, "de"), None);
    }

    #[test]
    fn test_resolves_nested_cells() {
        let cells = vec![
            shared("inputs", &["a"]),
            CellDescriptor::Subset(SubsetCell {
                header: CellHeader::new("subset", "Subset"),
                initial_panel_state: Default::default(),
                cells: vec![compute("nested", Some("inputs"), None)],
            }),
        ];
        let resolved = resolve_shared_inputs(&cells);
        assert_eq!(names_of(&resolved, "nested"), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let cells = vec![shared("inputs", &["a", "b"]), compute("de", Some("inputs"), None)];
        let once = resolve_shared_inputs(&cells);
        let twice = resolve_shared_inputs(&once);
        assert_eq!(once, twice);
        assert_ne!(once, cells);
    }
}
