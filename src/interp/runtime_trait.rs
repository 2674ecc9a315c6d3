// Code runtime trait: the seam between the worker and the sandbox backend.

use super::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A persistent interactive execution backend bound to one sandbox.
///
/// Implementations process one call at a time; the session is not re-entrant.
/// The router's batch-in-flight token serializes callers, and implementations
/// additionally guard their transport internally.
#[async_trait]
pub trait CodeRuntime: Send + Sync {
    /// Execute a code cell in the persistent session and return its
    /// aggregated output. Partial output is streamed to the output sink
    /// incrementally while the cell runs.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The session transport fails and one reconnect attempt also fails
    /// - Execution exceeds `timeout` (the session is restarted defensively)
    async fn execute(&self, code: &str, timeout: Duration) -> Result<String>;

    /// Run a shell command inside the sandbox container.
    async fn shell(&self, command: &str, timeout: Duration) -> Result<String>;

    /// Tear down and re-establish the session. Valid from any state; always
    /// leaves the session ready and emits exactly one cleared event so the
    /// display resets consistently with the fresh session.
    async fn restart(&self) -> Result<()>;
}
