use crate::config::settings::SandboxConfig;
use crate::core::lifecycle::{LifecycleController, TransitionOutcome};
use crate::host::import::ModuleHost;
use crate::observability::events::{LifecycleEvent, TransitionReport};
use crate::patch::registry::PolicySummary;
use crate::testing::well_known::{well_known_resolver, WELL_KNOWN_MODULES};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the registered per-module policies as JSON
    Policies {
        /// Config file (defaults to $SEEDBOX_CONFIG, then ./seedbox.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Import simulated modules under the sandbox, then run the first-request transition
    Simulate {
        /// Config file (defaults to $SEEDBOX_CONFIG, then ./seedbox.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Module to import (repeatable; defaults to every simulated module)
        #[arg(long = "module")]
        modules: Vec<String>,
        /// Include the lifecycle event log in the output
        #[arg(long)]
        events: bool,
    },
}

#[derive(Serialize)]
struct PoliciesOutput {
    config: SandboxConfig,
    policies: Vec<PolicySummary>,
}

#[derive(Serialize)]
struct ImportOutcome {
    module: String,
    ok: bool,
    blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct SimulateOutput {
    imports: Vec<ImportOutcome>,
    transition: Option<TransitionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<LifecycleEvent>>,
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Policies { config } => run_policies(config),
        Commands::Simulate {
            config,
            modules,
            events,
        } => run_simulate(config, modules, events),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SandboxConfig> {
    let config = SandboxConfig::load(path.as_deref()).context("failed to load seedbox config")?;
    log::debug!("Loaded config: {:?}", config);
    Ok(config)
}

fn run_policies(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let controller = LifecycleController::from_config(&config, Arc::new(ModuleHost::new()), |_| {})?;

    let output = PoliciesOutput {
        policies: controller.registry().describe(),
        config,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_simulate(config: Option<PathBuf>, modules: Vec<String>, events: bool) -> Result<()> {
    let config = load_config(config)?;
    let host = Arc::new(ModuleHost::new());
    let controller = LifecycleController::from_config(&config, Arc::clone(&host), |_| {})?;
    host.push_resolver(Arc::new(well_known_resolver(controller.state())));

    let modules = if modules.is_empty() {
        WELL_KNOWN_MODULES.iter().map(|m| m.to_string()).collect()
    } else {
        modules
    };

    controller.before_top_level()?;

    let mut imports = Vec::with_capacity(modules.len());
    for module in modules {
        let outcome = match host.import(&module) {
            Ok(slot) => ImportOutcome {
                module,
                ok: true,
                blocked: slot.is_blocked(),
                error: None,
            },
            Err(e) => {
                log::error!("Import of '{}' failed under the sandbox: {}", module, e);
                ImportOutcome {
                    module,
                    ok: false,
                    blocked: false,
                    error: Some(e.to_string()),
                }
            }
        };
        imports.push(outcome);
    }

    let transition = controller.before_first_request();
    let transition_error = match &transition {
        Ok(TransitionOutcome::Completed(_)) => None,
        Ok(TransitionOutcome::AlreadyUnsandboxed) => {
            Some("transition already performed".to_string())
        }
        Err(e) => Some(e.to_string()),
    };
    let failed = transition_error.is_some() || imports.iter().any(|i| !i.ok);

    let output = SimulateOutput {
        imports,
        transition: controller.last_transition(),
        transition_error,
        events: events.then(|| controller.state().events().snapshot()),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if failed {
        anyhow::bail!("simulation finished with failures");
    }
    Ok(())
}
