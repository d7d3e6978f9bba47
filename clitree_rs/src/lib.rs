//! # clitree
//!
//! Expose a clap command tree to remote callers and run its commands as
//! cancellable jobs.
//!
//! ## Features
//!
//! - **Tree translation** - Turn a native command tree into serializable
//!   [`Command`]/[`Field`] models; hidden commands disappear with their subtree
//! - **Scoped flags** - Local, then effective, then persistent flags; the first
//!   occurrence of a name wins
//! - **Typed fields** - Every flag maps to `boolean`, `number` or `text`
//! - **Jobs** - Tick-driven execution with progress events, started/finished
//!   markers, Ctrl+C style cancellation and deadlines
//!
//! ## Translating a clap tree
//!
//! ```rust,no_run
//! use clap::{Arg, ArgAction, Command};
//!
//! let cli = Command::new("app")
//!     .subcommand(
//!         Command::new("run")
//!             .about("run command")
//!             .arg(Arg::new("debug").long("debug").action(ArgAction::SetTrue)),
//!     )
//!     .subcommand(Command::new("internal").hide(true));
//!
//! let tree = clitree::translate_clap(&cli);
//! println!("{}", serde_json::to_string_pretty(&tree).unwrap());
//! ```
//!
//! ## Running a job
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use clitree::{Behaviors, CommandPath, ExecutorConfig, JobEvent, JobManager, TickBehavior};
//!
//! # async fn demo(tree: Vec<clitree::Command>) -> anyhow::Result<()> {
//! let config = ExecutorConfig::default();
//! let behaviors = Behaviors::new().with(
//!     CommandPath::parse("run"),
//!     Arc::new(TickBehavior::new(config.tick_interval)),
//! );
//! let manager = JobManager::new(tree, behaviors, config);
//!
//! let args = HashMap::from([("attempts".to_string(), "3".to_string())]);
//! let handle = manager.invoke(CommandPath::parse("run"), args, None).await?;
//! let mut events = manager.subscribe(&handle.id).await?;
//! while let Some(event) = events.next().await {
//!     if let JobEvent::Progress(p) = event {
//!         println!("{}", p.message.unwrap_or_default());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Public modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod config;
pub mod duration;
pub mod job;
pub mod model;
pub mod translate;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use config::{
    ConfigError, EnvOverrides, ExecutorConfig, PlainConfig, load_plain_config, resolve_arguments,
};
pub use duration::{DurationError, format_duration, parse_duration};
pub use job::{
    Behavior, Behaviors, BindError, BoundArgs, CancelReason, InvokeError, Job, JobContext,
    JobEvent, JobHandle, JobId, JobManager, JobOutcome, JobPoll, JobSnapshot, JobState,
    JobSubscription, Plan, ProgressEvent, TickBehavior, TransitionError, bind, execute,
};
pub use model::{Command, CommandPath, Field, FieldType, resolve};
pub use translate::{
    FlagScope, NativeFlag, NativeNode, ScopeKind, clap_forest, clap_node, translate, translate_clap,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
