// Persistent interactive interpreter session inside the sandbox container.

use super::error::{InterpreterError, Result};
use super::runtime_trait::CodeRuntime;
use crate::bus::{OutputEvent, OutputRouter};
use async_trait::async_trait;
use base64::Engine;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RestartContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use regex::Regex;
use std::pin::Pin;
use std::sync::{Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of the interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Executing,
    Restarting,
}

type OutputStream = Pin<Box<dyn Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Send>>;
type InputSink = Pin<Box<dyn tokio::io::AsyncWrite + Send>>;

/// Live attachment to the interpreter process inside the container.
struct Transport {
    docker: Docker,
    input: InputSink,
    output: OutputStream,
}

/// A single long-lived Python session bound to one sandbox container.
///
/// The session process retains interpreter state across `execute` calls until
/// explicitly restarted. One call is processed at a time; the transport mutex
/// enforces that even if the caller-side batch token is bypassed.
pub struct InteractiveSession {
    image_tag: String,
    container_name: String,
    /// Host directory bound into the container.
    data_dir: String,
    container_workdir: String,
    router: OutputRouter,
    state: StdMutex<SessionState>,
    transport: Mutex<Option<Transport>>,
}

impl InteractiveSession {
    pub fn new(
        image_tag: impl Into<String>,
        container_name: impl Into<String>,
        data_dir: impl Into<String>,
        container_workdir: impl Into<String>,
        router: OutputRouter,
    ) -> Self {
        Self {
            image_tag: image_tag.into(),
            container_name: container_name.into(),
            data_dir: data_dir.into(),
            container_workdir: container_workdir.into(),
            router,
            state: StdMutex::new(SessionState::Disconnected),
            transport: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state poisoned")
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().expect("session state poisoned") = next;
    }

    /// Ensure the sandbox container exists and is running.
    async fn ensure_container(&self, docker: &Docker) -> Result<()> {
        let running = match docker.inspect_container(&self.container_name, None).await {
            Ok(info) => info.state.and_then(|s| s.running).unwrap_or(false),
            Err(_) => {
                let options = CreateContainerOptions {
                    name: self.container_name.clone(),
                    platform: None,
                };
                let host_config = HostConfig {
                    binds: Some(vec![format!(
                        "{}:{}",
                        self.data_dir, self.container_workdir
                    )]),
                    security_opt: Some(vec!["no-new-privileges".to_string()]),
                    ..Default::default()
                };
                let config = Config {
                    image: Some(self.image_tag.clone()),
                    host_config: Some(host_config),
                    working_dir: Some(self.container_workdir.clone()),
                    cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                    ..Default::default()
                };
                docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| {
                        if e.to_string().contains("No such image") {
                            InterpreterError::ImageNotReady
                        } else {
                            InterpreterError::SessionTransport(format!(
                                "failed to create container: {e}"
                            ))
                        }
                    })?;
                false
            }
        };

        if !running {
            docker
                .start_container(&self.container_name, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| {
                    InterpreterError::SessionTransport(format!("failed to start container: {e}"))
                })?;
        }
        Ok(())
    }

    /// Establish the attached interpreter process and store the transport.
    async fn connect(&self, slot: &mut Option<Transport>) -> Result<()> {
        self.set_state(SessionState::Connecting);
        let result = self.connect_inner(slot).await;
        match &result {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                info!(container = %self.container_name, "Interpreter session ready");
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                warn!(container = %self.container_name, error = %e, "Interpreter session connect failed");
            }
        }
        result
    }

    async fn connect_inner(&self, slot: &mut Option<Transport>) -> Result<()> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            InterpreterError::SessionTransport(format!("failed to connect to Docker: {e}"))
        })?;

        self.ensure_container(&docker).await?;

        let exec_config = CreateExecOptions {
            cmd: Some(vec!["python3", "-q", "-u", "-i"]),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(self.container_workdir.as_str()),
            ..Default::default()
        };
        let exec = docker
            .create_exec(&self.container_name, exec_config)
            .await
            .map_err(|e| {
                InterpreterError::SessionTransport(format!("failed to create exec: {e}"))
            })?;

        let attached = docker.start_exec(&exec.id, None).await.map_err(|e| {
            InterpreterError::SessionTransport(format!("failed to attach exec: {e}"))
        })?;

        let (output, mut input) = match attached {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                return Err(InterpreterError::SessionTransport(
                    "exec started detached; expected attached session".to_string(),
                ))
            }
        };

        // Silence prompts so the stream carries program output only.
        input
            .write_all(b"import base64, sys\nsys.ps1 = ''\nsys.ps2 = ''\n")
            .await
            .map_err(|e| {
                InterpreterError::SessionTransport(format!("failed to prime session: {e}"))
            })?;
        input.flush().await.map_err(|e| {
            InterpreterError::SessionTransport(format!("failed to prime session: {e}"))
        })?;

        *slot = Some(Transport {
            docker,
            input,
            output,
        });
        Ok(())
    }

    /// Tear down and re-establish the session while the transport lock is held.
    async fn restart_locked(&self, slot: &mut Option<Transport>) -> Result<()> {
        self.set_state(SessionState::Restarting);

        let docker = match slot.take() {
            Some(transport) => transport.docker,
            None => Docker::connect_with_local_defaults().map_err(|e| {
                InterpreterError::SessionTransport(format!("failed to connect to Docker: {e}"))
            })?,
        };

        // Superseded output dies with the old interpreter process.
        docker
            .restart_container(&self.container_name, None::<RestartContainerOptions>)
            .await
            .ok();

        // The display resets consistently with the fresh session.
        self.router.route(OutputEvent::Cleared).await;

        self.connect(slot).await
    }

    /// Read until the sentinel line, stripping control sequences and
    /// streaming each chunk to the transcript as it arrives.
    async fn read_until_marker(
        &self,
        transport: &mut Transport,
        marker: &str,
        deadline: Instant,
    ) -> Result<String> {
        let mut aggregated = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(InterpreterError::Timeout("execute".to_string()));
            }
            let chunk = match tokio::time::timeout(remaining, transport.output.next()).await {
                Err(_) => return Err(InterpreterError::Timeout("execute".to_string())),
                Ok(None) => {
                    return Err(InterpreterError::SessionTransport(
                        "session stream closed".to_string(),
                    ))
                }
                Ok(Some(Err(e))) => {
                    return Err(InterpreterError::SessionTransport(format!(
                        "session read failed: {e}"
                    )))
                }
                Ok(Some(Ok(output))) => match output {
                    LogOutput::StdOut { message }
                    | LogOutput::StdErr { message }
                    | LogOutput::Console { message } => message,
                    LogOutput::StdIn { .. } => continue,
                },
            };

            let text = strip_control_sequences(&String::from_utf8_lossy(&chunk));
            if let Some(pos) = text.find(marker) {
                let head = &text[..pos];
                if !head.trim().is_empty() {
                    aggregated.push_str(head);
                    self.router
                        .route(OutputEvent::Text {
                            payload: head.to_string(),
                        })
                        .await;
                }
                return Ok(aggregated);
            }
            if !text.is_empty() {
                aggregated.push_str(&text);
                self.router
                    .route(OutputEvent::Text {
                        payload: text,
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl CodeRuntime for InteractiveSession {
    async fn execute(&self, code: &str, timeout: Duration) -> Result<String> {
        let mut slot = self.transport.lock().await;
        if slot.is_none() {
            // One transparent reconnect attempt before surfacing an error.
            self.connect(&mut slot).await?;
        }
        self.set_state(SessionState::Executing);

        let marker = format!("__codebox_done_{}__", Uuid::new_v4().simple());
        let encoded = base64::engine::general_purpose::STANDARD.encode(code);
        let cell = format!(
            "exec(compile(base64.b64decode('{encoded}').decode('utf-8'), '<cell>', 'exec'))\nprint('{marker}')\n"
        );

        let write_result: std::io::Result<()> = {
            let transport = slot.as_mut().expect("transport present after connect");
            async {
                transport.input.write_all(cell.as_bytes()).await?;
                transport.input.flush().await
            }
            .await
        };
        if let Err(e) = write_result {
            *slot = None;
            self.set_state(SessionState::Disconnected);
            return Err(InterpreterError::SessionTransport(format!(
                "session write failed: {e}"
            )));
        }

        let deadline = Instant::now() + timeout;
        let transport = slot.as_mut().expect("transport present after connect");
        match self.read_until_marker(transport, &marker, deadline).await {
            Ok(output) => {
                self.set_state(SessionState::Ready);
                debug!(bytes = output.len(), "Cell execution completed");
                Ok(output)
            }
            Err(InterpreterError::Timeout(op)) => {
                // A runaway cell must not keep consuming the container.
                warn!(container = %self.container_name, "Cell timed out; restarting session");
                self.restart_locked(&mut slot).await.ok();
                Err(InterpreterError::Timeout(op))
            }
            Err(e) => {
                *slot = None;
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn shell(&self, command: &str, timeout: Duration) -> Result<String> {
        let mut slot = self.transport.lock().await;
        if slot.is_none() {
            self.connect(&mut slot).await?;
        }
        let docker = slot
            .as_ref()
            .map(|t| t.docker.clone())
            .expect("transport present after connect");
        self.set_state(SessionState::Executing);

        let exec_config = CreateExecOptions {
            cmd: Some(vec!["sh", "-c", command]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(self.container_workdir.as_str()),
            ..Default::default()
        };
        let exec = docker
            .create_exec(&self.container_name, exec_config)
            .await
            .map_err(|e| {
                InterpreterError::SessionTransport(format!("failed to create exec: {e}"))
            })?;

        let collected = tokio::time::timeout(timeout, async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            match docker.start_exec(&exec.id, None).await {
                Ok(StartExecResults::Attached { mut output, .. }) => {
                    while let Some(chunk) = output.next().await {
                        match chunk {
                            Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                            Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                            _ => {}
                        }
                    }
                    Ok((stdout, stderr))
                }
                Ok(StartExecResults::Detached) => Ok((stdout, stderr)),
                Err(e) => Err(InterpreterError::SessionTransport(format!(
                    "exec failed: {e}"
                ))),
            }
        })
        .await;

        match collected {
            Err(_) => {
                self.restart_locked(&mut slot).await.ok();
                Err(InterpreterError::Timeout("shell".to_string()))
            }
            Ok(Err(e)) => {
                self.set_state(SessionState::Ready);
                Err(e)
            }
            Ok(Ok((stdout, stderr))) => {
                let inspect = docker.inspect_exec(&exec.id).await.map_err(|e| {
                    InterpreterError::SessionTransport(format!("failed to inspect exec: {e}"))
                })?;
                let exit_code = inspect.exit_code.unwrap_or(-1);

                let mut result = format!("exit code: {exit_code}\n");
                result.push_str(&strip_control_sequences(&String::from_utf8_lossy(&stdout)));
                if !stderr.is_empty() {
                    result.push_str("\n[stderr]\n");
                    result.push_str(&strip_control_sequences(&String::from_utf8_lossy(&stderr)));
                }
                self.router
                    .route(OutputEvent::Text {
                        payload: result.clone(),
                    })
                    .await;
                self.set_state(SessionState::Ready);
                Ok(result)
            }
        }
    }

    async fn restart(&self) -> Result<()> {
        let mut slot = self.transport.lock().await;
        self.restart_locked(&mut slot).await
    }
}

static ANSI_RE: OnceLock<Regex> = OnceLock::new();

/// Strip terminal control sequences (CSI, OSC, lone escapes) so consumers
/// never need protocol knowledge of the underlying console.
pub(crate) fn strip_control_sequences(s: &str) -> String {
    let re = ANSI_RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("ansi pattern")
    });
    re.replace_all(s, "").into_owned()
}
