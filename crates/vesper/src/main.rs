//! `vesper` — the command-line driver front-end.
//!
//! This binary is the only place in the workspace that decides what a
//! nonzero exit code means; every library crate just returns `Result`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vesper_astro::AstroScheduler;
use vesper_plugin::{CommandDispatcher, PluginManager, RecordingRouteRegistry};
use vesper_runtime::{DispatcherAdapter, SequenceEngine};

#[derive(Parser)]
#[command(name = "vesper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Astrophotography imaging-session sequencer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads a persisted sequence and runs it to completion.
    Run(RunArgs),
    /// Loads a persisted sequence and reports whether it parses and its
    /// dependency graph is acyclic, without executing anything.
    Validate(ValidateArgs),
    /// Plugin management.
    Plugins(PluginsArgs),
    /// Configuration inspection.
    Config(ConfigArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to a persisted sequence JSON file.
    sequence: PathBuf,
}

#[derive(clap::Args)]
struct ValidateArgs {
    sequence: PathBuf,
}

#[derive(clap::Args)]
struct PluginsArgs {
    #[command(subcommand)]
    action: PluginsAction,
}

#[derive(Subcommand)]
enum PluginsAction {
    /// Lists plugins discovered under the default plugin directory.
    List {
        #[arg(long, default_value = "plugins")]
        dir: PathBuf,
    },
    /// Loads and enables a single plugin from a shared library path.
    Load { path: PathBuf },
    /// Unloads a previously loaded plugin by name.
    Unload { name: String },
}

#[derive(clap::Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Prints the value at a config key (`/`-separated path).
    Get { key: String },
    /// Sets a config key to a JSON value and persists the active file.
    Set { key: String, value: String },
}

fn main() -> ExitCode {
    vesper_runtime::init_vesper();
    let cli = Cli::parse();

    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => run_sequence(args),
        Commands::Validate(args) => validate_sequence(args),
        Commands::Plugins(args) => plugins(args),
        Commands::Config(args) => config(args),
    }
}

fn run_sequence(args: RunArgs) -> Result<ExitCode> {
    let config_store = vesper_runtime::load_config().context("loading configuration")?;

    let sequence = Arc::new(vesper_core::Sequence::new());
    vesper_runtime::load_sequence(&sequence, &args.sequence)
        .with_context(|| format!("loading sequence from {}", args.sequence.display()))?;

    let dispatcher = Arc::new(CommandDispatcher::new());
    let routes = Arc::new(RecordingRouteRegistry::new());
    let plugin_manager = PluginManager::new(dispatcher.clone(), routes);
    let plugin_dir = PathBuf::from("plugins");
    if plugin_dir.exists() {
        if let Err(err) = plugin_manager.load_all_discovered(&plugin_dir) {
            tracing::error!(error = %err, "plugin startup failed");
            return Ok(ExitCode::from(2));
        }
    }

    let dispatch = Arc::new(DispatcherAdapter::new(dispatcher));
    let mut engine = SequenceEngine::new(sequence.clone(), vesper_runtime::builtin_registry(), dispatch);
    if let Some(location) = vesper_runtime::observer_location_from_config(&config_store) {
        engine = engine.with_astro_scheduler(AstroScheduler::new(location));
    }
    let running = engine.start();

    match running.join() {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(vesper_runtime::EngineError::GlobalTimeoutElapsed { .. }) => Ok(ExitCode::from(3)),
        Err(err) => Err(err.into()),
    }
}

fn validate_sequence(args: ValidateArgs) -> Result<ExitCode> {
    let sequence = Arc::new(vesper_core::Sequence::new());
    vesper_runtime::load_sequence(&sequence, &args.sequence)
        .with_context(|| format!("loading sequence from {}", args.sequence.display()))?;
    println!(
        "ok: {} target(s), state={:?}",
        sequence.targets().len(),
        sequence.state()
    );
    Ok(ExitCode::SUCCESS)
}

fn plugins(args: PluginsArgs) -> Result<ExitCode> {
    let dispatcher = Arc::new(CommandDispatcher::new());
    let routes = Arc::new(RecordingRouteRegistry::new());
    let manager = PluginManager::new(dispatcher, routes);

    match args.action {
        PluginsAction::List { dir } => {
            for path in manager.discover_plugins(&dir).context("discovering plugins")? {
                println!("{}", path.display());
            }
        }
        PluginsAction::Load { path } => {
            let name = manager
                .load_plugin(&path, serde_json::json!({}))
                .context("loading plugin")?;
            manager.enable_plugin(&name).context("enabling plugin")?;
            println!("loaded and enabled: {name}");
        }
        PluginsAction::Unload { name } => {
            manager.unload_plugin(&name).context("unloading plugin")?;
            println!("unloaded: {name}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn config(args: ConfigArgs) -> Result<ExitCode> {
    let store = vesper_runtime::load_config().context("loading configuration")?;
    match args.action {
        ConfigAction::Get { key } => match store.get(&key) {
            Some(value) => println!("{value}"),
            None => println!("null"),
        },
        ConfigAction::Set { key, value } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&value).with_context(|| format!("parsing value '{value}' as JSON"))?;
            store.set(&key, parsed).context("setting config value")?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
