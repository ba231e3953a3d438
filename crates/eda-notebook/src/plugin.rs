//! Computation and visualization plugins.
//!
//! A [`PluginRegistry`] is built once at startup and passed by reference to
//! everything that needs to look a plugin up. Plugins only supply default
//! configurations and a completeness check; they hold no state.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::analysis::Configuration;

/// Defaults for one visualization type.
pub trait VisualizationPlugin: Send + Sync {
    /// `None` means the visualization starts from an empty configuration.
    fn default_configuration(&self) -> Option<Configuration>;
}

/// Behaviour of one computation type.
pub trait ComputationPlugin: Send + Sync {
    fn default_configuration(&self) -> Configuration;

    /// Whether `configuration` has everything the backend needs to run.
    fn is_configuration_complete(&self, configuration: &Configuration) -> bool;

    fn visualization(&self, name: &str) -> Option<&dyn VisualizationPlugin>;

    fn visualization_names(&self) -> Vec<&str>;
}

/// Visualization plugin that only carries a fixed default configuration.
pub struct VisualizationDefaults(Option<Configuration>);

impl VisualizationDefaults {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(Some(map)),
            _ => Self(None),
        }
    }
}

impl VisualizationPlugin for VisualizationDefaults {
    fn default_configuration(&self) -> Option<Configuration> {
        self.0.clone()
    }
}

type CompletenessCheck = fn(&Configuration) -> bool;

/// Table-driven computation plugin used for the built-in computation types.
pub struct StaticComputationPlugin {
    defaults: Configuration,
    is_complete: CompletenessCheck,
    visualizations: BTreeMap<String, Box<dyn VisualizationPlugin>>,
}

impl StaticComputationPlugin {
    pub fn new(defaults: Value, is_complete: CompletenessCheck) -> Self {
        let defaults = match defaults {
            Value::Object(map) => map,
            _ => Configuration::new(),
        };
        Self {
            defaults,
            is_complete,
            visualizations: BTreeMap::new(),
        }
    }

    pub fn with_visualization(
        mut self,
        name: impl Into<String>,
        plugin: impl VisualizationPlugin + 'static,
    ) -> Self {
        self.visualizations.insert(name.into(), Box::new(plugin));
        self
    }
}

impl ComputationPlugin for StaticComputationPlugin {
    fn default_configuration(&self) -> Configuration {
        self.defaults.clone()
    }

    fn is_configuration_complete(&self, configuration: &Configuration) -> bool {
        (self.is_complete)(configuration)
    }

    fn visualization(&self, name: &str) -> Option<&dyn VisualizationPlugin> {
        self.visualizations.get(name).map(|p| p.as_ref())
    }

    fn visualization_names(&self) -> Vec<&str> {
        self.visualizations.keys().map(String::as_str).collect()
    }
}

/// Lookup table from computation name to plugin.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn ComputationPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in computation types.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "dimensionalityreduction",
            StaticComputationPlugin::new(json!({}), dimensionality_reduction_complete)
                .with_visualization(
                    "scatterplot",
                    VisualizationDefaults::from_json(json!({
                        "enableOverlay": true,
                        "valueSpecConfig": "raw",
                    })),
                ),
        );
        registry.register(
            "differentialexpression",
            StaticComputationPlugin::new(
                json!({
                    "pValueFloor": "1e-200",
                    "differentialExpressionMethod": "DESeq",
                }),
                differential_expression_complete,
            )
            .with_visualization(
                "volcanoplot",
                VisualizationDefaults::from_json(json!({
                    "effectSizeThreshold": 1,
                    "significanceThreshold": 0.05,
                    "markerBodyOpacity": 0.8,
                })),
            ),
        );
        registry.register(
            "correlation",
            StaticComputationPlugin::new(json!({}), correlation_complete).with_visualization(
                "bipartitenetwork",
                VisualizationDefaults::from_json(json!({ "edgeThreshold": 0.9 })),
            ),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: impl ComputationPlugin + 'static) {
        self.plugins.insert(name.into(), Box::new(plugin));
    }

    pub fn lookup(&self, computation_name: &str) -> Option<&dyn ComputationPlugin> {
        self.plugins.get(computation_name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn is_present(configuration: &Configuration, key: &str) -> bool {
    configuration.get(key).is_some_and(|v| !v.is_null())
}

fn is_collection_descriptor(value: Option<&Value>) -> bool {
    value.is_some_and(|v| {
        v.get("entityId").is_some_and(Value::is_string)
            && v.get("collectionId").is_some_and(Value::is_string)
    })
}

fn dimensionality_reduction_complete(configuration: &Configuration) -> bool {
    is_collection_descriptor(configuration.get("collectionVariable"))
}

fn differential_expression_complete(configuration: &Configuration) -> bool {
    let comparator = configuration.get("comparator");
    let has = |key: &str| comparator.and_then(|c| c.get(key)).is_some_and(|v| !v.is_null());

    is_present(configuration, "identifierVariable")
        && is_present(configuration, "valueVariable")
        && has("variable")
        && has("groupA")
        && has("groupB")
}

fn correlation_complete(configuration: &Configuration) -> bool {
    let spec = |key: &str| configuration.get(key).and_then(|d| d.get("collectionSpec"));
    let (data1, data2) = (spec("data1"), spec("data2"));

    is_present(configuration, "correlationMethod")
        && is_present(configuration, "prefilterThresholds")
        && is_collection_descriptor(data1)
        && is_collection_descriptor(data2)
        && data1 != data2
}
