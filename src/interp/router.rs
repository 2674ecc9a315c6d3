// Command router: allow-list validation, environment preparation, dispatch.

use super::builder::{BuildHandle, ImageBuilder};
use super::probe::EnvironmentProbe;
use super::types::{
    AllowList, CommandRequest, CommandSpec, DispatchPolicy, ExecutionContext, SandboxState,
};
use super::worker::{ExecHandle, ExecutionWorker};
use crate::bus::OutputRouter;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Outcome of one dispatch call. Result delivery for accepted batches is
/// out-of-band: inline for `Completed`, via the handle and the output
/// channels for `Background`.
pub enum Dispatch {
    /// No request survived the allow-list filter; nothing ran.
    Ignored,
    /// Container runtime not installed; no build attempted. User-actionable.
    RuntimeMissing,
    /// The environment query itself faulted (e.g. socket permission denied).
    ProbeFailed(String),
    /// Image build started (or already running); the batch is deferred and
    /// must be resubmitted once the environment is ready.
    BuildStarted(BuildHandle),
    /// A batch is already in flight; the session is not re-entrant.
    Busy,
    /// Synchronous run finished.
    Completed(ExecutionContext),
    /// Asynchronous run accepted.
    Background(ExecHandle),
}

/// Front door of the interpreter core. Validates batches, prepares the
/// sandbox environment, and hands work to the execution worker under the
/// single-slot batch token.
pub struct CommandRouter {
    allow: AllowList,
    probe: Arc<dyn EnvironmentProbe>,
    builder: Arc<dyn ImageBuilder>,
    worker: ExecutionWorker,
    output: OutputRouter,
    slot: Arc<Semaphore>,
    host_workdir: String,
    container_workdir: String,
    auto_cwd: bool,
}

impl CommandRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        allow: AllowList,
        probe: Arc<dyn EnvironmentProbe>,
        builder: Arc<dyn ImageBuilder>,
        worker: ExecutionWorker,
        output: OutputRouter,
        host_workdir: String,
        container_workdir: String,
        auto_cwd: bool,
    ) -> Self {
        Self {
            allow,
            probe,
            builder,
            worker,
            output,
            slot: Arc::new(Semaphore::new(1)),
            host_workdir,
            container_workdir,
            auto_cwd,
        }
    }

    /// Current environment readiness. `ImageBuilding` is in-process knowledge
    /// of the builder; the rest is re-probed on every call.
    pub async fn sandbox_state(&self) -> Result<SandboxState, String> {
        if self.builder.in_progress() {
            return Ok(SandboxState::ImageBuilding);
        }
        match self.probe.runtime_installed().await {
            Ok(false) => return Ok(SandboxState::RuntimeMissing),
            Err(e) => return Err(e.to_string()),
            Ok(true) => {}
        }
        match self.probe.image_exists().await {
            Ok(false) => Ok(SandboxState::ImageMissing),
            Err(e) => Err(e.to_string()),
            Ok(true) => Ok(SandboxState::Ready),
        }
    }

    /// Validate and execute one batch of command requests.
    ///
    /// Unrecognized batches are ignored, not errored. When the sandbox is
    /// needed but not ready, environment preparation runs instead and the
    /// batch is deferred; the caller resubmits after observing readiness.
    pub async fn dispatch(
        &self,
        requests: Vec<CommandRequest>,
        turn_id: Option<String>,
        policy: DispatchPolicy,
    ) -> Dispatch {
        let accepted: Vec<CommandRequest> = requests
            .into_iter()
            .filter(|r| self.allow.contains(&r.name))
            .collect();
        if accepted.is_empty() {
            debug!("Batch contains no allow-listed command; ignoring");
            return Dispatch::Ignored;
        }

        let force = accepted.iter().any(|r| r.force);
        let needs_sandbox = accepted.iter().any(|r| AllowList::needs_sandbox(&r.name));

        if needs_sandbox {
            match self.sandbox_state().await {
                Err(reason) => {
                    warn!(reason = %reason, "Environment probe faulted");
                    self.output
                        .status(format!("cannot query container runtime: {reason}"))
                        .await;
                    return Dispatch::ProbeFailed(reason);
                }
                Ok(SandboxState::RuntimeMissing) => {
                    warn!("Container runtime not installed; batch rejected");
                    self.output
                        .status(
                            "container runtime is not installed; install Docker to run sandboxed code"
                                .to_string(),
                        )
                        .await;
                    return Dispatch::RuntimeMissing;
                }
                Ok(SandboxState::ImageMissing) | Ok(SandboxState::ImageBuilding) => {
                    info!("Sandbox image not ready; starting build and deferring batch");
                    self.output
                        .status("building sandbox image; resubmit the command once ready".to_string())
                        .await;
                    return Dispatch::BuildStarted(self.builder.build());
                }
                Ok(SandboxState::Ready) => {}
            }
        }

        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Batch rejected; another batch is in flight");
                return Dispatch::Busy;
            }
        };

        if !policy.silent {
            self.output
                .status(format!("executing {} command(s)…", accepted.len()))
                .await;
        }

        let ctx = ExecutionContext::new(accepted, turn_id);
        if force || policy.asynchronous {
            Dispatch::Background(self.worker.run_async(ctx, permit))
        } else {
            let ctx = self.worker.run(ctx).await;
            drop(permit);
            Dispatch::Completed(ctx)
        }
    }

    /// Explicitly start (or join) the sandbox image build.
    pub fn start_build(&self) -> BuildHandle {
        self.builder.build()
    }

    /// Append a syntax descriptor for every supported command; consumed by
    /// the command-generation component outside this core.
    pub fn command_syntax(&self) -> Vec<CommandSpec> {
        let mut specs = Vec::new();
        for name in self.allow.names() {
            let spec = match name.as_str() {
                "run_code" => CommandSpec {
                    name: name.clone(),
                    instruction: format!(
                        "Execute Python code in the persistent interactive session. \
                         Interpreter state is retained between calls. The session runs in a \
                         sandbox container; {} is the container's working directory, bound on \
                         the host to: {}",
                        self.container_workdir, self.host_workdir
                    ),
                    examples: vec![r#"{"name":"run_code","params":{"code":"print(2 + 2)"}}"#.into()],
                },
                "restart_session" => CommandSpec {
                    name: name.clone(),
                    instruction: "Restart the interactive session, discarding all interpreter state."
                        .to_string(),
                    examples: vec![r#"{"name":"restart_session"}"#.into()],
                },
                "sandbox_shell" => {
                    let mut instruction =
                        "Run a shell command inside the sandbox container.".to_string();
                    if self.auto_cwd {
                        instruction.push_str(&format!(
                            " ALWAYS use absolute paths. Current working directory is: {}",
                            self.container_workdir
                        ));
                    }
                    CommandSpec {
                        name: name.clone(),
                        instruction,
                        examples: vec![
                            r#"{"name":"sandbox_shell","params":{"command":"ls -la /data"}}"#.into(),
                        ],
                    }
                }
                "run_file" => CommandSpec {
                    name: name.clone(),
                    instruction: format!(
                        "Execute a previously generated file from the working directory ({}) \
                         on the host.",
                        self.host_workdir
                    ),
                    examples: vec![r#"{"name":"run_file","params":{"path":"script.py"}}"#.into()],
                },
                "read_output" => CommandSpec {
                    name: name.clone(),
                    instruction: "Read the accumulated execution output.".to_string(),
                    examples: vec![r#"{"name":"read_output"}"#.into()],
                },
                "clear_output" => CommandSpec {
                    name: name.clone(),
                    instruction: "Clear the accumulated execution output.".to_string(),
                    examples: vec![r#"{"name":"clear_output"}"#.into()],
                },
                "render_html" => CommandSpec {
                    name: name.clone(),
                    instruction: "Render HTML/JS markup on the canvas surface.".to_string(),
                    examples: vec![
                        r#"{"name":"render_html","params":{"html":"<h1>hello</h1>"}}"#.into(),
                    ],
                },
                _ => continue,
            };
            specs.push(spec);
        }
        specs
    }
}
