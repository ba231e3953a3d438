//! Race-safe configuration updates for a single computation.
//!
//! An edit is expressed as a functional updater over the computation list.
//! The updater only reads the list when the store runs it, so it always works
//! on the latest snapshot: two edits queued back to back, or an edit racing a
//! WDK parameter round-trip, both land.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::analysis::{AnalysisState, Computations, ComputationsUpdater, Configuration};

/// Set `key` to `value` in one computation's configuration.
///
/// Returns `computations` itself (same `Arc`) when the computation is gone or
/// when the new configuration deep-equals the current one. Otherwise returns a
/// new list in which only the target entry is replaced.
pub fn update_configuration(
    computations: &Computations,
    computation_id: &str,
    key: &str,
    value: Value,
) -> Computations {
    let Some(index) = computations
        .iter()
        .position(|c| c.computation_id == computation_id)
    else {
        debug!(
            "[config] Computation {} no longer exists, ignoring update of {}",
            computation_id, key
        );
        return computations.clone();
    };

    let current = &computations[index];
    if current
        .configuration
        .get(key)
        .is_some_and(|existing| deep_equal(existing, &value))
    {
        return computations.clone();
    }

    let mut configuration = current.configuration.clone();
    configuration.insert(key.to_string(), value);

    let mut next = computations.as_ref().clone();
    next[index] = Arc::new(crate::analysis::Computation {
        configuration,
        ..current.as_ref().clone()
    });
    Arc::new(next)
}

/// Structural equality where numbers compare by value, so `1` and `1.0` are
/// the same setting.
fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Boxed updater for [`AnalysisState::set_computations`].
pub fn configuration_updater(
    computation_id: impl Into<String>,
    key: impl Into<String>,
    value: Value,
) -> ComputationsUpdater {
    let computation_id = computation_id.into();
    let key = key.into();
    Box::new(move |prev: &Computations| update_configuration(prev, &computation_id, &key, value))
}

/// Configuration access for the computations of one analysis.
///
/// Reads come from the latest applied snapshot; writes are queued as
/// functional updates and take effect when the store flushes.
pub struct ComputationConfigStore<'s, S: AnalysisState + ?Sized> {
    state: &'s mut S,
}

impl<'s, S: AnalysisState + ?Sized> ComputationConfigStore<'s, S> {
    pub fn new(state: &'s mut S) -> Self {
        Self { state }
    }

    pub fn configuration(&self, computation_id: &str) -> Option<&Configuration> {
        self.state
            .analysis()
            .computation(computation_id)
            .map(|c| &c.configuration)
    }

    pub fn update(&mut self, computation_id: &str, key: &str, value: Value) {
        self.state
            .set_computations(configuration_updater(computation_id, key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, AnalysisStore, Computation};
    use serde_json::json;

    fn computations() -> Computations {
        let make = |id: &str, config: Value| {
            Arc::new(Computation {
                computation_id: id.to_string(),
                computation_type: "differentialexpression".to_string(),
                configuration: match config {
                    Value::Object(map) => map,
                    _ => Configuration::new(),
                },
            })
        };
        Arc::new(vec![
            make("target", json!({ "a": 1, "b": 2 })),
            make("other", json!({ "a": 1 })),
        ])
    }

    #[test]
    fn test_equal_value_keeps_identity() {
        let before = computations();
        let after = update_configuration(&before, "target", "a", json!(1));
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_numerically_equal_value_keeps_identity() {
        let before = computations();
        let float: Value = serde_json::from_str("1.0").unwrap();
        assert!(Arc::ptr_eq(
            &before,
            &update_configuration(&before, "target", "a", float)
        ));

        let nested = Arc::new(vec![Arc::new(Computation {
            computation_id: "target".into(),
            computation_type: "correlation".into(),
            configuration: json!({ "prefilterThresholds": { "proportionNonZero": 1, "variance": [0, 0.5] } })
                .as_object()
                .unwrap()
                .clone(),
        })]);
        let same = json!({ "variance": [0.0, 0.5], "proportionNonZero": 1.0 });
        assert!(Arc::ptr_eq(
            &nested,
            &update_configuration(&nested, "target", "prefilterThresholds", same)
        ));
        let different = json!({ "variance": [0.0, 0.5], "proportionNonZero": 2 });
        assert!(!Arc::ptr_eq(
            &nested,
            &update_configuration(&nested, "target", "prefilterThresholds", different)
        ));
    }

    #[test]
    fn test_change_replaces_only_target() {
        let before = computations();
        let after = update_configuration(&before, "target", "a", json!(5));

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            Value::Object(after[0].configuration.clone()),
            json!({ "a": 5, "b": 2 })
        );
        assert!(Arc::ptr_eq(&before[1], &after[1]));
        // The original snapshot is untouched.
        assert_eq!(before[0].configuration["a"], 1);
    }

    #[test]
    fn test_missing_computation_is_a_no_op() {
        let before = computations();
        let after = update_configuration(&before, "removed", "a", json!(5));
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_new_key_is_a_change() {
        let before = computations();
        let after = update_configuration(&before, "other", "b", json!(null));
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after[1].configuration.contains_key("b"));
    }

    #[test]
    fn test_queued_updates_do_not_lose_each_other() {
        let mut store = AnalysisStore::new(Analysis {
            computations: computations(),
            ..Analysis::new("study")
        });
        {
            let mut configs = ComputationConfigStore::new(&mut store);
            configs.update("target", "a", json!(10));
            configs.update("target", "b", json!(20));
        }
        assert_eq!(store.flush(), 2);

        let configs = ComputationConfigStore::new(&mut store);
        let config = configs.configuration("target").unwrap();
        assert_eq!(config["a"], 10);
        assert_eq!(config["b"], 20);
    }

    #[test]
    fn test_no_op_update_does_not_bump_revision() {
        let mut store = AnalysisStore::new(Analysis {
            computations: computations(),
            ..Analysis::new("study")
        });
        ComputationConfigStore::new(&mut store).update("target", "b", json!(2));
        assert_eq!(store.flush(), 0);
        assert_eq!(store.revision(), 0);
    }
}
