//! MCP surface over a [`JobManager`].
//!
//! Every tool returns a JSON string; failures come back as `Error: ...` text
//! so the client sees them without a protocol-level error.

use std::collections::HashMap;
use std::time::Duration;

use rmcp::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::ServerInfo;
use rmcp::{tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use clitree::{CommandPath, DurationError, JobId, JobManager, parse_duration};

// ============================================================================
// Tool Parameter Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DescribeParams {
    /// Command path, names separated by spaces or '/' (e.g. 'run subrun')
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InvokeParams {
    /// Command path, names separated by spaces or '/' (e.g. 'run subrun')
    pub path: String,
    /// Field values keyed by field name; non-string values are converted to text
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,
    /// Deadline as duration text ('30s', '1m30s'); '0' means unbounded.
    /// When absent, a 'max-duration' argument bounds the job instead.
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PollParams {
    /// Job id returned by invoke
    pub job_id: String,
    /// Event cursor; pass back `next_cursor` from the previous poll (default: 0)
    #[serde(default)]
    pub since: usize,
    /// How long to wait for new events in milliseconds (default: 0, max: 30000)
    #[serde(default)]
    pub wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct JobParams {
    /// Job id returned by invoke
    pub job_id: String,
}

const MAX_POLL_WAIT: Duration = Duration::from_secs(30);

/// Field that doubles as the job deadline when `deadline` is not given.
const MAX_DURATION_FIELD: &str = "max-duration";

// ============================================================================
// Server
// ============================================================================

#[derive(Clone)]
pub struct ClitreeServer {
    manager: JobManager,
    /// Tool router (generated by macro)
    tool_router: rmcp::handler::server::router::tool::ToolRouter<Self>,
}

impl ClitreeServer {
    pub fn new(manager: JobManager) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("Serialization error: {}", e))
    }
}

fn argument_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The job deadline: the explicit `deadline` parameter, else the command's
/// own `max-duration` argument, else `None` (server default).
fn requested_deadline(
    deadline: Option<&str>,
    arguments: &HashMap<String, String>,
) -> Result<Option<Duration>, DurationError> {
    let text = deadline
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            arguments
                .get(MAX_DURATION_FIELD)
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
        });
    text.map(parse_duration).transpose()
}

// ============================================================================
// MCP Tool Implementations
// ============================================================================

#[tool_router]
impl ClitreeServer {
    #[tool(
        name = "list_commands",
        description = "List the invocable command tree: every command with its typed fields (boolean, number, text), defaults and subcommands. Use this first to discover what can be invoked."
    )]
    async fn list_commands(&self) -> String {
        Self::to_json(&self.manager.tree())
    }

    #[tool(
        name = "describe_command",
        description = "Describe one command by path: its fields and subcommands, and whether it can be invoked."
    )]
    async fn describe_command(&self, Parameters(params): Parameters<DescribeParams>) -> String {
        let path = CommandPath::parse(&params.path);
        match clitree::resolve(self.manager.tree(), path.segments()) {
            Some(command) => Self::to_json(&serde_json::json!({
                "path": path,
                "runnable": self.manager.is_runnable(&path),
                "command": command,
            })),
            None => format!("Error: no command at path '{}'", path),
        }
    }

    #[tool(
        name = "invoke",
        description = "Start a command as a background job. Returns a job_id; follow it with poll_job, stop it with cancel_job. Arguments are validated against the command's field types. The job is bounded by 'deadline', or by its 'max-duration' argument when no deadline is given."
    )]
    async fn invoke(&self, Parameters(params): Parameters<InvokeParams>) -> String {
        let path = CommandPath::parse(&params.path);
        let arguments: HashMap<String, String> = params
            .arguments
            .into_iter()
            .map(|(name, value)| (name, argument_text(value)))
            .collect();
        let deadline = match requested_deadline(params.deadline.as_deref(), &arguments) {
            Ok(d) => d,
            Err(e) => return format!("Error: invalid deadline: {}", e),
        };

        match self.manager.invoke(path.clone(), arguments, deadline).await {
            Ok(handle) => serde_json::json!({
                "job_id": handle.id,
                "path": path,
                "state": "pending",
                "message": "Job started. Use poll_job(job_id) to follow progress."
            })
            .to_string(),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(
        name = "poll_job",
        description = "Fetch a job's events after a cursor (started, progress, finished). Optionally waits up to wait_ms for new events. Keep polling with next_cursor until finished is true."
    )]
    async fn poll_job(&self, Parameters(params): Parameters<PollParams>) -> String {
        let id = JobId::from(params.job_id.as_str());
        let wait = Duration::from_millis(params.wait_ms).min(MAX_POLL_WAIT);
        debug!(job = %id, since = params.since, ?wait, "poll");
        match self.manager.poll(&id, params.since, wait).await {
            Ok(poll) => Self::to_json(&poll),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(
        name = "job_status",
        description = "Current snapshot of a job: state, progress count, last message, outcome and timestamps."
    )]
    async fn job_status(&self, Parameters(params): Parameters<JobParams>) -> String {
        match self.manager.status(&JobId::from(params.job_id.as_str())).await {
            Ok(snapshot) => Self::to_json(&snapshot),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(
        name = "cancel_job",
        description = "Cancel a pending or running job. The job stops at its next tick and finishes as cancelled."
    )]
    async fn cancel_job(&self, Parameters(params): Parameters<JobParams>) -> String {
        let id = JobId::from(params.job_id.as_str());
        match self.manager.cancel(&id).await {
            Ok(()) => serde_json::json!({
                "job_id": id,
                "status": "cancel_requested"
            })
            .to_string(),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(
        name = "list_jobs",
        description = "Snapshots of all retained jobs, oldest first."
    )]
    async fn list_jobs(&self) -> String {
        Self::to_json(&self.manager.list().await)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ClitreeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: rmcp::model::ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                ..Default::default()
            },
            server_info: rmcp::model::Implementation {
                name: "clitree".to_string(),
                title: Some("clitree MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Run this program's commands remotely.\n\n\
                 DISCOVERY:\n\
                 - list_commands() - The command tree with typed fields.\n\
                 - describe_command(path) - One command, plus whether it is runnable.\n\n\
                 JOBS:\n\
                 - invoke(path, arguments, deadline) - Start a job, returns job_id.\n\
                 - poll_job(job_id, since, wait_ms) - Events after a cursor.\n\
                 - job_status(job_id) - Snapshot of one job.\n\
                 - cancel_job(job_id) - Stop a job at its next tick.\n\
                 - list_jobs() - All retained jobs.\n\n\
                 Argument values are text; booleans accept true/false, numbers any decimal."
                    .into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_arguments_become_text() {
        assert_eq!(argument_text(serde_json::json!("2s")), "2s");
        assert_eq!(argument_text(serde_json::json!(3)), "3");
        assert_eq!(argument_text(serde_json::json!(true)), "true");
        assert_eq!(argument_text(serde_json::Value::Null), "");
    }

    #[test]
    fn max_duration_argument_bounds_the_job_without_deadline() {
        let args = HashMap::from([("max-duration".to_string(), "2s".to_string())]);
        assert_eq!(
            requested_deadline(None, &args).unwrap(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            requested_deadline(Some("500ms"), &args).unwrap(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            requested_deadline(Some(" "), &args).unwrap(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(requested_deadline(None, &HashMap::new()).unwrap(), None);
        assert!(requested_deadline(None, &HashMap::from([(
            "max-duration".to_string(),
            "soon".to_string()
        )]))
        .is_err());
    }
}
