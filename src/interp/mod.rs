// Code Interpreter Module
//
// This module provides the sandboxed code-execution subsystem: allow-listed
// command batches are routed to a persistent interactive interpreter inside
// an isolated container or to direct host execution, with environment
// lifecycle management (runtime probe → image build → session readiness)
// and multiplexed output streaming.

pub mod types;
pub mod error;
pub mod probe;
pub mod builder;
pub mod runtime_trait;
pub mod session;
pub mod local;
pub mod router;
pub mod worker;

// Re-export commonly used types
pub use error::{InterpreterError, Result};
pub use types::*;
pub use probe::{DockerProbe, EnvironmentProbe};
pub use builder::{BuildCompleter, BuildHandle, BuildOutcome, DockerImageBuilder, ImageBuilder};
pub use runtime_trait::CodeRuntime;
pub use session::{InteractiveSession, SessionState};
pub use local::LocalExecutor;
pub use router::{CommandRouter, Dispatch};
pub use worker::{ExecHandle, ExecutionWorker};
