// Core data structures for the code interpreter subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sandbox-requiring command names.
pub const SANDBOX_COMMANDS: &[&str] = &["run_code", "restart_session", "sandbox_shell"];

/// Commands executed directly against the host.
pub const LOCAL_COMMANDS: &[&str] = &["run_file", "read_output", "clear_output", "render_html"];

/// A single command request from the assistant's command stream.
/// Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    /// Set when the request originated from a trusted internal tool;
    /// forces asynchronous dispatch.
    #[serde(default)]
    pub force: bool,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Map::new(),
            force: false,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// String parameter accessor; missing or non-string params read as None.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Outcome of one command. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub name: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(name: impl Into<String>, result: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Mutable accumulator for one batch invocation. Created per dispatch,
/// consumed by the caller when the worker run completes.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub batch: Vec<CommandRequest>,
    pub results: Vec<CommandResult>,
    /// Originating conversation turn, if the embedder tracks one.
    pub turn_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Vec::new(), None)
    }
}

impl ExecutionContext {
    pub fn new(batch: Vec<CommandRequest>, turn_id: Option<String>) -> Self {
        Self {
            batch,
            results: Vec::new(),
            turn_id,
            created_at: Utc::now(),
        }
    }

    /// True once every request in the batch has a result.
    pub fn is_complete(&self) -> bool {
        self.results.len() == self.batch.len()
    }
}

/// Readiness of the sandbox environment, derived by probing before every
/// batch that needs it. `ImageBuilding` is in-process knowledge of the
/// builder; the rest come from the container runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SandboxState {
    RuntimeMissing,
    ImageMissing,
    ImageBuilding,
    Ready,
}

/// Per-invocation execution policy from the embedder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchPolicy {
    /// Run the batch on a background task instead of blocking the caller.
    pub asynchronous: bool,
    /// Suppress status emissions ("preparing…"); execution semantics unchanged.
    pub silent: bool,
}

/// Advisory syntax descriptor appended on the "declare syntax" event,
/// consumed by the command-generation component outside this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub instruction: String,
    pub examples: Vec<String>,
}

/// The fixed set of command names this core is permitted to execute,
/// validated at construction time.
#[derive(Debug, Clone)]
pub struct AllowList {
    names: Vec<String>,
}

impl AllowList {
    /// Build an allow-list from a subset of the known command names.
    /// Unknown names are rejected so a typo cannot silently widen routing.
    pub fn new(names: Vec<String>) -> Result<Self, String> {
        for name in &names {
            if !SANDBOX_COMMANDS.contains(&name.as_str())
                && !LOCAL_COMMANDS.contains(&name.as_str())
            {
                return Err(format!("unknown command name in allow-list: {name}"));
            }
        }
        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Whether a command must run inside the sandbox container.
    pub fn needs_sandbox(name: &str) -> bool {
        SANDBOX_COMMANDS.contains(&name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self {
            names: SANDBOX_COMMANDS
                .iter()
                .chain(LOCAL_COMMANDS.iter())
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
