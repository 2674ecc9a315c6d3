// Batch execution worker: strict ordering, per-command failure capture.

use super::error::{InterpreterError, Result};
use super::local::LocalExecutor;
use super::runtime_trait::CodeRuntime;
use super::types::{CommandRequest, CommandResult, ExecutionContext};
use crate::bus::OutputRouter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

/// Handle to a background batch run. Completion is also announced on the
/// status channel; cancelling restarts the session so it lands in a clean
/// ready state instead of an indeterminate executing one.
pub struct ExecHandle {
    join: JoinHandle<ExecutionContext>,
    cancel: CancellationToken,
}

impl ExecHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> ExecutionContext {
        self.join.await.unwrap_or_default()
    }
}

/// Executes one validated batch. Requests run strictly in original order;
/// a single request's failure becomes that request's `error` and does not
/// abort the rest of the batch.
#[derive(Clone)]
pub struct ExecutionWorker {
    runtime: Arc<dyn CodeRuntime>,
    local: Arc<LocalExecutor>,
    router: OutputRouter,
    timeout: Duration,
}

impl ExecutionWorker {
    pub fn new(
        runtime: Arc<dyn CodeRuntime>,
        local: Arc<LocalExecutor>,
        router: OutputRouter,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            local,
            router,
            timeout,
        }
    }

    /// Run the batch inline; the caller blocks until completion.
    pub async fn run(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        for req in ctx.batch.clone() {
            let result = self.run_one(&req).await;
            ctx.results.push(result);
        }
        self.report(&ctx).await;
        ctx
    }

    /// Run the batch on a background task; the permit (batch-in-flight token)
    /// is released when the run completes or is cancelled.
    pub fn run_async(&self, ctx: ExecutionContext, permit: OwnedSemaphorePermit) -> ExecHandle {
        let worker = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let _permit = permit;
            let mut ctx = ctx;
            for req in ctx.batch.clone() {
                tokio::select! {
                    result = worker.run_one(&req) => ctx.results.push(result),
                    _ = token.cancelled() => {
                        warn!(command = %req.name, "Batch cancelled mid-run");
                        worker.runtime.restart().await.ok();
                        ctx.results.push(CommandResult::failed(&req.name, "cancelled"));
                        break;
                    }
                }
            }
            worker.report(&ctx).await;
            ctx
        });
        ExecHandle { join, cancel }
    }

    async fn report(&self, ctx: &ExecutionContext) {
        let failed = ctx.results.iter().filter(|r| !r.is_ok()).count();
        info!(
            total = ctx.results.len(),
            failed,
            "Batch execution completed"
        );
        self.router
            .status(format!(
                "executed {} command(s), {} failed",
                ctx.results.len(),
                failed
            ))
            .await;
    }

    /// Execute one request; every fault is captured into the result.
    async fn run_one(&self, req: &CommandRequest) -> CommandResult {
        let span = tracing::info_span!("command_execution", command = %req.name);
        let start = std::time::Instant::now();

        let outcome = self.dispatch(req).instrument(span).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                info!(command = %req.name, duration_ms, status = "success", "Command completed");
                CommandResult {
                    name: req.name.clone(),
                    result: Some(value),
                    error: None,
                }
            }
            Err(e) => {
                let e = match e {
                    InterpreterError::Timeout(_) => InterpreterError::Timeout(req.name.clone()),
                    other => other.into_command_failure(&req.name),
                };
                warn!(command = %req.name, duration_ms, error = %e, "Command failed");
                CommandResult::failed(&req.name, e.to_string())
            }
        }
    }

    async fn dispatch(&self, req: &CommandRequest) -> Result<Value> {
        match req.name.as_str() {
            "run_code" => {
                let code = require_param(req, "code")?;
                let output = self.runtime.execute(code, self.timeout).await?;
                self.local.append_transcript(&output).await.ok();
                Ok(Value::String(output))
            }
            "restart_session" => {
                self.runtime.restart().await?;
                Ok(Value::String("session restarted".to_string()))
            }
            "sandbox_shell" => {
                let command = require_param(req, "command")?;
                let output = self.runtime.shell(command, self.timeout).await?;
                self.local.append_transcript(&output).await.ok();
                Ok(Value::String(output))
            }
            "run_file" => {
                let path = require_param(req, "path")?;
                let output = self.local.run_file(path, self.timeout).await?;
                Ok(Value::String(output))
            }
            "read_output" => {
                let transcript = self.local.read_output().await?;
                Ok(Value::String(transcript))
            }
            "clear_output" => {
                self.local.clear_output().await?;
                Ok(Value::String("output cleared".to_string()))
            }
            "render_html" => {
                let html = require_param(req, "html")?;
                self.local.render_html(html).await?;
                Ok(Value::String("rendered".to_string()))
            }
            other => Err(InterpreterError::CommandFailed {
                name: other.to_string(),
                reason: "command is not routable".to_string(),
            }),
        }
    }
}

fn require_param<'a>(req: &'a CommandRequest, key: &str) -> Result<&'a str> {
    req.str_param(key)
        .ok_or_else(|| InterpreterError::CommandFailed {
            name: req.name.clone(),
            reason: format!("missing required param '{key}'"),
        })
}
