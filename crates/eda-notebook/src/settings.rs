//! Engine settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/eda-notebook/settings.json
//! - Linux: ~/.config/eda-notebook/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\eda-notebook\settings.json
//!
//! `EDA_NOTEBOOK_PROJECT` overrides the stored project id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const PROJECT_ENV_VAR: &str = "EDA_NOTEBOOK_PROJECT";

const DEFAULT_SUBMIT_BUTTON_TEXT: &str = "Get Answer";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Site the notebooks run in, e.g. `PlasmoDB`
    pub project_id: Option<String>,

    /// Label of the search form's submit button, quoted in notebook headers
    pub submit_button_text: String,

    /// How often job status is polled
    pub poll_interval_ms: u64,

    /// Start jobs of hidden compute cells once their configuration is complete
    pub auto_run_hidden_cells: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            submit_button_text: DEFAULT_SUBMIT_BUTTON_TEXT.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            auto_run_hidden_cells: true,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Apply `EDA_NOTEBOOK_PROJECT` if it is set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(project) = std::env::var(PROJECT_ENV_VAR) {
            self.apply_project_override(&project);
        }
        self
    }

    fn apply_project_override(&mut self, project: &str) {
        let project = project.trim();
        if !project.is_empty() {
            debug!("[settings] Project overridden to {}", project);
            self.project_id = Some(project.to_string());
        }
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eda-notebook")
        .join("settings.json")
}

/// Load settings from the default location, with environment overrides.
pub fn load_settings() -> EngineSettings {
    load_settings_from(&settings_path()).with_env_overrides()
}

/// Load settings from `path`, returning defaults if the file doesn't exist or
/// can't be parsed.
pub fn load_settings_from(path: &Path) -> EngineSettings {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return EngineSettings::default(),
        Err(e) => {
            warn!("[settings] Failed to read {}: {}", path.display(), e);
            return EngineSettings::default();
        }
    };
    serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!("[settings] Ignoring malformed {}: {}", path.display(), e);
        EngineSettings::default()
    })
}

/// Save settings to `path`, creating parent directories.
pub fn save_settings_to(path: &Path, settings: &EngineSettings) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json).map_err(io_err)
}
