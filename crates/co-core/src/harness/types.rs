//! Supporting types shared by every [`super::Harness`] implementation.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::process::ChildStdin;

/// A task materialized into everything an agent needs to run: its prompt
/// text, its working directory (a dedicated worktree), and the environment
/// variables the supervisor wants injected (tokens, task id, work id).
#[derive(Debug)]
pub struct MaterializedTask {
    pub task_id: String,
    pub name: String,
    pub description: String,
    /// Shell commands the agent may run to self-check its work (e.g.
    /// `cargo test`), surfaced to the agent as guidance, not enforced here.
    pub invariant_commands: Vec<String>,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
}

/// A handle to a running agent process.
#[derive(Debug)]
pub struct AgentHandle {
    pub pid: u32,
    /// The process's stdin, if the harness kept it open for `send()`.
    pub stdin: Option<ChildStdin>,
    pub task_id: String,
    pub attempt: u32,
    pub harness_name: String,
}

/// A single event emitted by a running agent, parsed from its native wire
/// format into a harness-independent shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Message {
        role: String,
        content: String,
    },
    ToolCall {
        tool: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool: String,
        output: serde_json::Value,
    },
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    Error {
        message: String,
    },
    /// The agent process has exited; no further events will be emitted on
    /// this stream.
    Completed,
}
