//! eda-notebook CLI entry point.
//!
//! Inspects the built-in notebook presets: which are available where, what
//! their cell trees look like, and which records opening one would create.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;

use eda_notebook::descriptor;
use eda_notebook::materialize::{plan_materialization, MaterializeIntent};
use eda_notebook::preset::NotebookPreset;
use eda_notebook::settings::load_settings;
use eda_notebook::{Analysis, PluginRegistry, PresetRegistry};

#[derive(Parser, Debug)]
#[command(name = "eda-notebook")]
#[command(about = "Inspect EDA notebook presets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List presets
    List {
        /// Only presets available in this project (default: from settings)
        #[arg(long)]
        project: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a preset's cell tree
    Show {
        preset: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List computation plugins and the visualizations each one supports
    Plugins {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate every preset against the registered plugins
    Validate,

    /// Show the records opening a preset on an empty analysis would create
    Plan {
        preset: String,

        /// Project the notebook runs in (default: from settings)
        #[arg(long)]
        project: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the JSON schema of notebook presets
    Schema,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let presets = PresetRegistry::builtin();
    let plugins = PluginRegistry::builtin();

    match cli.command {
        Commands::List { project, json } => list(&presets, project, json),
        Commands::Show { preset, json } => show(&presets, &preset, json),
        Commands::Plugins { json } => list_plugins(&plugins, json),
        Commands::Validate => validate(&presets, &plugins),
        Commands::Plan {
            preset,
            project,
            json,
        } => plan(&presets, &plugins, &preset, project, json),
        Commands::Schema => {
            let schema = schemars::schema_for!(NotebookPreset);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn project_or_default(project: Option<String>) -> Option<String> {
    project.or_else(|| load_settings().project_id)
}

fn list(presets: &PresetRegistry, project: Option<String>, json: bool) -> anyhow::Result<()> {
    let project = project_or_default(project);
    let selected: Vec<&NotebookPreset> = match project.as_deref() {
        Some(project) => presets.for_project(project).collect(),
        None => presets.iter().collect(),
    };

    if json {
        let output: Vec<_> = selected
            .iter()
            .map(|preset| {
                serde_json::json!({
                    "name": preset.name,
                    "displayName": preset.display_name,
                    "applicableProjects": preset.applicable_projects,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if selected.is_empty() {
        println!("No notebook presets available.");
        return Ok(());
    }
    for preset in selected {
        println!("{:<28} {}", preset.name, preset.display_name);
    }
    Ok(())
}

fn show(presets: &PresetRegistry, name: &str, json: bool) -> anyhow::Result<()> {
    let preset = presets
        .get(name)
        .with_context(|| format!("Unknown notebook preset: {name}"))?
        .resolved();

    if json {
        println!("{}", serde_json::to_string_pretty(&preset)?);
        return Ok(());
    }

    println!("{} ({})", preset.display_name, preset.name);
    let steps = preset.step_numbers();
    if let Some(header) = preset.render_header(&load_settings().submit_button_text, &steps) {
        println!("{header}");
    }
    println!();
    descriptor::visit_paths(&preset.cells, &mut |path| {
        let Some(cell) = path.last() else {
            return;
        };
        let indent = "  ".repeat(path.len() - 1);
        let step = steps
            .get(cell.id())
            .map(|n| format!("{n}. "))
            .unwrap_or_default();
        println!("{indent}{step}{} [{}] {}", cell.title(), cell.kind(), cell.id());
    });
    Ok(())
}

fn list_plugins(plugins: &PluginRegistry, json: bool) -> anyhow::Result<()> {
    let table: Vec<(&str, Vec<&str>)> = plugins
        .names()
        .filter_map(|name| Some((name, plugins.lookup(name)?.visualization_names())))
        .collect();

    if json {
        let output: serde_json::Map<String, serde_json::Value> = table
            .iter()
            .map(|(name, visualizations)| (name.to_string(), serde_json::json!(visualizations)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    for (name, visualizations) in table {
        println!("{:<28} {}", name, visualizations.join(", "));
    }
    Ok(())
}

fn validate(presets: &PresetRegistry, plugins: &PluginRegistry) -> anyhow::Result<()> {
    let mut failures = 0;
    for preset in presets.iter() {
        let resolved = preset.resolved();
        let result = resolved.validate().and_then(|()| {
            plan_materialization(&resolved.cells, &Analysis::new("validate"), plugins).map(|_| ())
        });
        match result {
            Ok(()) => println!("ok     {}", preset.name),
            Err(e) => {
                failures += 1;
                println!("FAILED {}: {}", preset.name, e);
            }
        }
    }
    if failures > 0 {
        bail!("{failures} preset(s) failed validation");
    }
    info!("All {} presets valid", presets.len());
    Ok(())
}

fn plan(
    presets: &PresetRegistry,
    plugins: &PluginRegistry,
    name: &str,
    project: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let project = project_or_default(project)
        .context("No project given; pass --project or set project_id in settings")?;
    let preset = presets.lookup(name, &project)?.resolved();
    preset.validate()?;
    let intents = plan_materialization(&preset.cells, &Analysis::new("plan"), plugins)
        .with_context(|| format!("Failed to plan notebook {name}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&intents)?);
        return Ok(());
    }
    for intent in &intents {
        match intent {
            MaterializeIntent::CreateComputation(c) => {
                println!("computation   {:<16} {}", c.computation_id, c.computation_type)
            }
            MaterializeIntent::CreateVisualization(v) => println!(
                "visualization {:<16} {} (on {})",
                v.visualization_id, v.visualization_type, v.computation_id
            ),
        }
    }
    Ok(())
}
