//! The slice of WDK search-parameter state the notebook touches.
//!
//! Notebooks can sit inside a WDK search form. A visualization cell may then
//! push a clicked network node into one of the form's parameters; see
//! [`apply_node_click`].

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::NodeClickParamUpdate;

pub const SINGLE_PICK_VOCABULARY: &str = "single-pick-vocabulary";
pub const TREE_BOX_DISPLAY: &str = "treeBox";

/// A WDK search parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    /// Vocabulary entries as sent by WDK, normally `[term, display, null]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<Vec<Value>>,
}

/// Parameter definitions and current values of the enclosing search form.
pub trait ParameterStore {
    fn parameters(&self) -> &[Parameter];

    fn param_values(&self) -> &BTreeMap<String, String>;

    fn update_param_value(&mut self, parameter: &Parameter, value: String);
}

/// Plain in-memory parameter store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryParameterStore {
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub param_values: BTreeMap<String, String>,
}

impl ParameterStore for InMemoryParameterStore {
    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn param_values(&self) -> &BTreeMap<String, String> {
        &self.param_values
    }

    fn update_param_value(&mut self, parameter: &Parameter, value: String) {
        self.param_values.insert(parameter.name.clone(), value);
    }
}

/// What a node click changed, for the user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamUpdateNotice {
    pub param_name: String,
    pub value: String,
    pub step: Option<usize>,
}

impl fmt::Display for ParamUpdateNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = self
            .step
            .map_or_else(|| "?".to_string(), |step| step.to_string());
        write!(
            f,
            "Updated {} search parameter in step {} to: {}",
            self.param_name, step, self.value
        )
    }
}

/// Terms of the well-formed `[term, display, null]` vocabulary entries.
fn vocabulary_terms(vocabulary: &[Value]) -> impl Iterator<Item = &str> {
    vocabulary.iter().filter_map(|entry| match entry.as_array() {
        Some(items) if items.len() == 3 => items[0].as_str(),
        _ => None,
    })
}

/// Find the vocabulary term for a clicked node label.
///
/// Case-insensitive. A term matches when it equals the label or ends with
/// `_<label>`, since WDK terms may carry a data-side prefix. The term is
/// returned as WDK spells it.
pub fn match_vocabulary_entry<'v>(vocabulary: &'v [Value], label: &str) -> Option<&'v str> {
    let label = label.to_lowercase();
    let suffix = format!("_{label}");
    vocabulary_terms(vocabulary).find(|term| {
        let term = term.to_lowercase();
        term == label || term.ends_with(&suffix)
    })
}

/// Push a clicked node into the parameter named by `update`.
///
/// Returns `None` and leaves the store untouched whenever the click cannot be
/// mapped: unknown parameter, not a flat single-pick vocabulary, no matching
/// term, or the node is already selected.
pub fn apply_node_click<P: ParameterStore + ?Sized>(
    store: &mut P,
    update: &NodeClickParamUpdate,
    node_label: &str,
    step_numbers: &BTreeMap<String, usize>,
) -> Option<ParamUpdateNotice> {
    let parameter = store
        .parameters()
        .iter()
        .find(|p| p.name == update.param_name)?;
    if parameter.param_type != SINGLE_PICK_VOCABULARY
        || parameter.display_type.as_deref() == Some(TREE_BOX_DISPLAY)
    {
        debug!("[wdk] {} is not a flat vocabulary param", parameter.name);
        return None;
    }
    let vocabulary = parameter.vocabulary.as_deref()?;
    let Some(term) = match_vocabulary_entry(vocabulary, node_label) else {
        debug!("[wdk] No {} term for node {:?}", parameter.name, node_label);
        return None;
    };

    let label = node_label.to_lowercase();
    if store
        .param_values()
        .get(&parameter.name)
        .is_some_and(|current| current.to_lowercase() == label)
    {
        return None;
    }

    let parameter = parameter.clone();
    let term = term.to_string();
    store.update_param_value(&parameter, term.clone());
    info!("[wdk] Set {} to {}", parameter.name, term);

    Some(ParamUpdateNotice {
        param_name: parameter.name,
        value: term,
        step: update
            .step_cell_id
            .as_ref()
            .and_then(|id| step_numbers.get(id).copied()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module_param(display_type: Option<&str>) -> Parameter {
        Parameter {
            name: "wgcnaParam".into(),
            param_type: SINGLE_PICK_VOCABULARY.into(),
            display_type: display_type.map(String::from),
            vocabulary: Some(vec![
                json!(["choose_module", "Choose a module", null]),
                json!(["p_module_4_17nov2025_pfal3d7", "Module 4", null]),
                json!(["module_7", "Module 7", null]),
                json!("malformed"),
            ]),
        }
    }

    fn store(display_type: Option<&str>) -> InMemoryParameterStore {
        InMemoryParameterStore {
            parameters: vec![module_param(display_type)],
            param_values: BTreeMap::from([("wgcnaParam".into(), "choose_module".into())]),
        }
    }

    fn update() -> NodeClickParamUpdate {
        NodeClickParamUpdate {
            param_name: "wgcnaParam".into(),
            step_cell_id: Some("wgcna_params".into()),
        }
    }

    fn steps() -> BTreeMap<String, usize> {
        BTreeMap::from([("wgcna_params".into(), 3)])
    }

    #[test]
    fn test_suffix_match_keeps_vocabulary_spelling() {
        let mut store = store(None);
        let notice =
            apply_node_click(&mut store, &update(), "MODULE_4_17nov2025_pfal3d7", &steps()).unwrap();
        assert_eq!(notice.value, "p_module_4_17nov2025_pfal3d7");
        assert_eq!(notice.step, Some(3));
        assert_eq!(
            notice.to_string(),
            "Updated wgcnaParam search parameter in step 3 to: p_module_4_17nov2025_pfal3d7"
        );
        assert_eq!(store.param_values["wgcnaParam"], "p_module_4_17nov2025_pfal3d7");
    }

    #[test]
    fn test_exact_match() {
        let mut store = store(None);
        let notice = apply_node_click(&mut store, &update(), "Module_7", &steps()).unwrap();
        assert_eq!(notice.value, "module_7");
    }

    #[test]
    fn test_suffix_requires_separator() {
        let vocabulary = vec![json!(["xmodule_7", "x", null])];
        assert_eq!(match_vocabulary_entry(&vocabulary, "module_7"), None);
    }

    #[test]
    fn test_unmatched_label_is_a_no_op() {
        let mut store = store(None);
        assert!(apply_node_click(&mut store, &update(), "module_99", &steps()).is_none());
        assert_eq!(store.param_values["wgcnaParam"], "choose_module");
    }

    #[test]
    fn test_tree_box_param_is_ignored() {
        let mut store = store(Some(TREE_BOX_DISPLAY));
        assert!(apply_node_click(&mut store, &update(), "module_7", &steps()).is_none());
    }

    #[test]
    fn test_non_vocabulary_param_is_ignored() {
        let mut store = store(None);
        store.parameters[0].param_type = "string".into();
        assert!(apply_node_click(&mut store, &update(), "module_7", &steps()).is_none());
    }

    #[test]
    fn test_missing_param_is_ignored() {
        let mut store = InMemoryParameterStore::default();
        assert!(apply_node_click(&mut store, &update(), "module_7", &steps()).is_none());
    }

    #[test]
    fn test_already_selected_is_a_no_op() {
        let mut store = store(None);
        store
            .param_values
            .insert("wgcnaParam".into(), "MODULE_7".into());
        assert!(apply_node_click(&mut store, &update(), "module_7", &steps()).is_none());
        assert_eq!(store.param_values["wgcnaParam"], "MODULE_7");
    }

    #[test]
    fn test_unknown_step_renders_question_mark() {
        let mut store = store(None);
        let notice = apply_node_click(&mut store, &update(), "module_7", &BTreeMap::new()).unwrap();
        assert_eq!(notice.step, None);
        assert!(notice.to_string().contains("in step ? to"));
    }

    #[test]
    fn test_parameter_deserializes_from_wdk_json() {
        let parameter: Parameter = serde_json::from_value(json!({
            "name": "wgcnaParam",
            "type": "single-pick-vocabulary",
            "displayType": "select",
            "vocabulary": [["module_1", "Module 1", null]]
        }))
        .unwrap();
        assert_eq!(parameter.display_type.as_deref(), Some("select"));
        assert_eq!(parameter.vocabulary.unwrap().len(), 1);
    }
}
