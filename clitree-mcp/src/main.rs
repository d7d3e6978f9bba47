//! # clitree-mcp
//!
//! Exposes this binary's own clap command tree over MCP and runs its commands
//! as cancellable jobs. The same commands also run locally.
//!
//! ## Usage
//!
//! ```bash
//! # Serve the command tree on stdio
//! clitree-mcp
//!
//! # Run the demo command locally (Ctrl+C cancels at the next tick)
//! clitree-mcp run --attempts 3 --max-duration 10s
//! clitree-mcp run subrun --debug --price 2.5
//!
//! # Arguments also come from CLITREE_* variables and a plain config file
//! CLITREE_ATTEMPTS=2 clitree-mcp run --config ./run.conf
//! ```

mod server;

use std::collections::HashMap;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::parser::ValueSource;
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use rmcp::ServiceExt;
use tracing::{debug, info};

use clitree::{
    Behavior, Behaviors, BoundArgs, Command, CommandPath, EnvOverrides, ExecutorConfig, JobEvent,
    JobManager, JobOutcome, Plan, TickBehavior, bind, load_plain_config, parse_duration,
    resolve_arguments,
};
use futures::future::{BoxFuture, FutureExt};

use crate::server::ClitreeServer;

/// Prefix for environment overrides (`CLITREE_ATTEMPTS`, `CLITREE_MAX_DURATION`).
const ENV_PREFIX: &str = "CLITREE";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "clitree-mcp")]
#[command(about = "Serve this command tree over MCP, or run its commands locally")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// print version
    Version,
    /// clitree-mcp run command
    #[command(long_about = "Tick once per second for --attempts units, printing 'tick N'.")]
    Run(RunArgs),
    /// Print the translated command tree as JSON
    #[command(hide = true)]
    Schema,
}

/// Flags shared by `run` and everything below it.
///
/// Values are read back from the matches so their source is known; the typed
/// fields only drive parsing and help.
#[derive(Args, Debug)]
#[allow(dead_code)]
struct RunArgs {
    /// config file (optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// duration
    #[arg(long, global = true, default_value = "0s", value_parser = parse_duration)]
    max_duration: Duration,

    /// int
    #[arg(long, global = true, default_value_t = TickBehavior::DEFAULT_ATTEMPTS as i64)]
    attempts: i64,

    /// bool
    #[arg(long, global = true)]
    debug: bool,

    /// float64
    #[arg(long, global = true, default_value_t = 0.0)]
    price: f64,

    #[command(subcommand)]
    command: Option<RunCommands>,
}

#[derive(Subcommand, Debug)]
enum RunCommands {
    /// clitree-mcp run subrun command
    Subrun,
}

// ============================================================================
// Command tree
// ============================================================================

/// The translated tree for this binary. Hidden commands are not part of it.
fn command_tree() -> Vec<Command> {
    clitree::translate_clap(&Cli::command())
}

/// `version` as a job: one unit reporting the version line.
struct VersionBehavior;

impl Behavior for VersionBehavior {
    fn plan(&self, _args: &BoundArgs) -> Result<Plan> {
        Ok(Plan {
            units: 1,
            interval: Duration::from_millis(1),
        })
    }

    fn step<'a>(&'a self, _unit: u64, _args: &'a BoundArgs) -> BoxFuture<'a, Result<Option<String>>> {
        async { Ok(Some(version_line())) }.boxed()
    }
}

fn behaviors(config: &ExecutorConfig) -> Behaviors {
    let tick: Arc<TickBehavior> = Arc::new(TickBehavior::new(config.tick_interval));
    Behaviors::new()
        .with(CommandPath::parse("version"), Arc::new(VersionBehavior))
        .with(CommandPath::parse("run"), tick.clone())
        .with(CommandPath::parse("run subrun"), tick)
}

fn job_manager() -> JobManager {
    let config = ExecutorConfig::default();
    let behaviors = behaviors(&config);
    JobManager::new(command_tree(), behaviors, config)
}

// ============================================================================
// Local run
// ============================================================================

/// Values given on the command line, keyed by field name.
///
/// Only arguments the leaf's matches know about are queried: the leaf's own
/// and the globals propagated from its ancestors.
fn explicit_arguments(chain: &[&clap::Command], matches: &ArgMatches) -> HashMap<String, String> {
    let (leaf, ancestors) = match chain.split_last() {
        Some(split) => split,
        None => return HashMap::new(),
    };
    let known = leaf.get_arguments().chain(
        ancestors
            .iter()
            .rev()
            .flat_map(|cmd| cmd.get_arguments().filter(|a| a.is_global_set())),
    );

    let mut explicit = HashMap::new();
    for arg in known.filter(|a| !a.is_positional()) {
        let id = arg.get_id().as_str();
        if matches.value_source(id) != Some(ValueSource::CommandLine) {
            continue;
        }
        let raw = match matches.try_get_raw(id) {
            Ok(Some(values)) => values
                .map(|v| v.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(","),
            _ => continue,
        };
        let name = arg.get_long().unwrap_or(id).to_string();
        explicit.entry(name).or_insert(raw);
    }
    explicit
}

/// Where a resolved argument came from, following the precedence order.
fn value_origin(
    name: &str,
    explicit: &HashMap<String, String>,
    env: &EnvOverrides,
    config_path: Option<&str>,
) -> String {
    if explicit.contains_key(name) {
        format!("--{}", name)
    } else if env.get(name).is_some() {
        env.var_name(name)
    } else if let Some(path) = config_path {
        format!("config file {}", path)
    } else {
        "default".to_string()
    }
}

/// Walk `run [subrun]` in both the clap tree and the matches.
fn run_selection<'a>(
    root: &'a clap::Command,
    matches: &'a ArgMatches,
) -> Result<(CommandPath, Vec<&'a clap::Command>, &'a ArgMatches)> {
    let mut path = CommandPath::default();
    let mut chain = vec![root];
    let mut current = matches;
    while let Some((name, sub_matches)) = current.subcommand() {
        let cmd = chain
            .last()
            .and_then(|parent| parent.find_subcommand(name))
            .ok_or_else(|| anyhow!("unknown subcommand '{}'", name))?;
        path = path.child(name);
        chain.push(cmd);
        current = sub_matches;
    }
    Ok((path, chain, current))
}

async fn run_local(matches: &ArgMatches) -> Result<ExitCode> {
    let root = Cli::command();
    let (path, chain, leaf_matches) = run_selection(&root, matches)?;
    let manager = job_manager();
    let command = clitree::resolve(manager.tree(), path.segments())
        .cloned()
        .with_context(|| format!("no command at path '{}'", path))?;

    let explicit = explicit_arguments(&chain[1..], leaf_matches);
    let env = EnvOverrides::from_env(ENV_PREFIX);
    let config_path = explicit
        .get("config")
        .map(String::as_str)
        .or_else(|| env.get("config"))
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let file = match config_path {
        Some(p) => Some(
            load_plain_config(Path::new(p))
                .with_context(|| format!("Failed to load config file {}", p))?,
        ),
        None => None,
    };
    let arguments = resolve_arguments(&command.fields, &explicit, &env, file.as_ref());
    debug!(command = %path, ?arguments, "resolved arguments");

    // invalid values surface as a failed job below; only the deadline is read here
    let deadline = match bind(&command.fields, &arguments) {
        Ok(bound) => bound.duration("max-duration").with_context(|| {
            format!(
                "Invalid max-duration from {}",
                value_origin("max-duration", &explicit, &env, config_path)
            )
        })?,
        Err(_) => None,
    };

    let handle = manager
        .invoke(path, arguments, Some(deadline.unwrap_or(Duration::ZERO)))
        .await?;
    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling at the next tick");
            interrupt.cancel();
        }
    });

    let mut events = manager.subscribe(&handle.id).await?;
    let mut outcome = None;
    while let Some(event) = events.next().await {
        match event {
            JobEvent::Started { .. } => {}
            JobEvent::Progress(progress) => match progress.message {
                Some(message) => println!("{}", message),
                None => println!("tick {}", progress.seq),
            },
            JobEvent::Finished { outcome: done, .. } => outcome = Some(done),
        }
    }

    match outcome {
        Some(JobOutcome::Failed { message }) => {
            eprintln!("[clitree-mcp] Error: {}", message);
            Ok(ExitCode::FAILURE)
        }
        Some(_) => Ok(ExitCode::SUCCESS),
        None => Err(anyhow!("job ended without a finished event")),
    }
}

// ============================================================================
// Version / schema
// ============================================================================

fn version_line() -> String {
    let mut fields = vec![env!("CARGO_PKG_VERSION")];
    if let Some(commit) = option_env!("CLITREE_COMMIT").filter(|s| !s.is_empty()) {
        fields.push(commit);
    }
    if let Some(date) = option_env!("CLITREE_DATE").filter(|s| !s.is_empty()) {
        fields.push(date);
    }
    fields.join(" ")
}

fn print_schema() -> Result<()> {
    let json = serde_json::to_string_pretty(&command_tree()).context("Failed to encode schema")?;
    println!("{}", json);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Install a panic hook that logs to stderr.
///
/// A broken pipe means the client went away: exit cleanly. Anything else keeps
/// unwinding so a panicking job is caught and reported as failed.
fn install_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        if msg.contains("Broken pipe") || msg.contains("os error 32") {
            eprintln!("[clitree-mcp] Client disconnected (broken pipe), shutting down");
            std::process::exit(1);
        }
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        eprintln!("[clitree-mcp] Panic{}: {}", location, msg);
    }));
}

/// Let writes to a closed pipe fail with EPIPE instead of killing the process.
#[cfg(unix)]
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}

async fn serve() -> Result<()> {
    info!("Starting clitree-mcp v{}", env!("CARGO_PKG_VERSION"));

    let server = ClitreeServer::new(job_manager());
    let manager = server.manager().clone();

    info!("Server ready. Listening on stdio...");

    let result = async {
        server
            .serve(rmcp::transport::stdio())
            .await?
            .waiting()
            .await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    manager.shutdown();
    result
}

async fn run() -> Result<ExitCode> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    // Logging MUST go to stderr, stdout carries MCP JSON-RPC and command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.parse().unwrap_or_default()),
        )
        .init();

    match cli.command {
        None => serve().await.map(|()| ExitCode::SUCCESS),
        Some(Commands::Version) => {
            println!("{}", version_line());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Schema) => print_schema().map(|()| ExitCode::SUCCESS),
        Some(Commands::Run(_)) => run_local(&matches).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    ignore_sigpipe();
    install_panic_hook();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            let err_str = format!("{:?}", e);
            if err_str.contains("Broken pipe") || err_str.contains("os error 32") {
                eprintln!("[clitree-mcp] Client disconnected, shutting down");
                ExitCode::SUCCESS
            } else {
                eprintln!("[clitree-mcp] Error: {:#}", e);
                ExitCode::FAILURE
            }
        }
    }
}
