// Host-side execution: generated files, transcript file, markup hand-off.

use super::error::{InterpreterError, Result};
use crate::bus::{OutputEvent, OutputRouter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const MAX_OUTPUT: usize = 10_000;

/// Transcript file kept in the working directory; backs `read_output` and
/// `clear_output` and survives process restarts.
const TRANSCRIPT_FILE: &str = ".interpreter.output";

/// Executes commands entirely outside the sandbox. Only commands explicitly
/// not requiring isolation are routed here; timeout discipline matches the
/// sandboxed path.
pub struct LocalExecutor {
    data_dir: PathBuf,
    python_bin: String,
    restrict_to_workspace: bool,
    router: OutputRouter,
}

impl LocalExecutor {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        python_bin: impl Into<String>,
        restrict_to_workspace: bool,
        router: OutputRouter,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            python_bin: python_bin.into(),
            restrict_to_workspace,
            router,
        }
    }

    fn transcript_path(&self) -> PathBuf {
        self.data_dir.join(TRANSCRIPT_FILE)
    }

    /// Resolve a file path against the working directory, refusing escapes
    /// when workspace restriction is on.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.data_dir.join(path)
        };
        if self.restrict_to_workspace {
            let canonical = candidate.canonicalize().map_err(|e| {
                InterpreterError::CommandFailed {
                    name: "run_file".to_string(),
                    reason: format!("cannot resolve {path}: {e}"),
                }
            })?;
            let root = self
                .data_dir
                .canonicalize()
                .unwrap_or_else(|_| self.data_dir.clone());
            if !canonical.starts_with(&root) {
                return Err(InterpreterError::CommandFailed {
                    name: "run_file".to_string(),
                    reason: format!("path escapes the working directory: {path}"),
                });
            }
            return Ok(canonical);
        }
        Ok(candidate)
    }

    /// Execute a generated file with the configured interpreter binary.
    /// Never blocks past the timeout on a hung child.
    pub async fn run_file(&self, path: &str, timeout: Duration) -> Result<String> {
        let file = self.resolve(path)?;
        debug!(file = %file.display(), "Running file on host");

        let output = tokio::time::timeout(
            timeout,
            Command::new(&self.python_bin)
                .arg(&file)
                .current_dir(&self.data_dir)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| InterpreterError::Timeout("run_file".to_string()))?
        .map_err(|e| InterpreterError::CommandFailed {
            name: "run_file".to_string(),
            reason: format!("failed to spawn {}: {e}", self.python_bin),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        let mut result = format!("exit code: {exit_code}\n");
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            result.push_str("\n[stderr]\n");
            result.push_str(&stderr);
        }
        if result.len() > MAX_OUTPUT {
            result.truncate(MAX_OUTPUT);
            result.push_str("\n...[truncated]");
        }

        self.append_transcript(&result).await?;
        self.router
            .route(OutputEvent::Text {
                payload: result.clone(),
            })
            .await;

        if exit_code != 0 {
            return Err(InterpreterError::CommandFailed {
                name: "run_file".to_string(),
                reason: result,
            });
        }
        Ok(result)
    }

    /// Append one execution's output to the transcript file.
    pub async fn append_transcript(&self, text: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.transcript_path();
        let mut existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        existing.push_str(text);
        if !text.ends_with('\n') {
            existing.push('\n');
        }
        tokio::fs::write(&path, existing).await?;
        Ok(())
    }

    /// Current transcript contents; empty when nothing has run yet.
    pub async fn read_output(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.transcript_path())
            .await
            .unwrap_or_default())
    }

    /// Truncate the transcript and signal the display to reset.
    pub async fn clear_output(&self) -> Result<()> {
        let path = self.transcript_path();
        if path.exists() {
            tokio::fs::write(&path, "").await?;
        }
        self.router.route(OutputEvent::Cleared).await;
        Ok(())
    }

    /// Hand markup to the render surface.
    pub async fn render_html(&self, html: &str) -> Result<()> {
        self.router
            .route(OutputEvent::Markup {
                payload: html.to_string(),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutputRouter;

    fn executor(dir: &Path) -> (LocalExecutor, crate::bus::OutputSinks) {
        let (router, sinks) = OutputRouter::channel(true);
        (
            LocalExecutor::new(dir, "python3", true, router),
            sinks,
        )
    }

    #[tokio::test]
    async fn test_transcript_append_read_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (local, mut sinks) = executor(dir.path());

        local.append_transcript("first run").await.unwrap();
        local.append_transcript("second run").await.unwrap();
        let transcript = local.read_output().await.unwrap();
        assert_eq!(transcript, "first run\nsecond run\n");

        local.clear_output().await.unwrap();
        assert_eq!(local.read_output().await.unwrap(), "");
        assert!(sinks.clear_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_read_output_empty_without_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let (local, _sinks) = executor(dir.path());
        assert_eq!(local.read_output().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_run_file_missing_path_is_command_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (local, _sinks) = executor(dir.path());
        let err = local
            .run_file("nope.py", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InterpreterError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_run_file_rejects_workspace_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let (local, _sinks) = executor(dir.path());
        let err = local
            .run_file(outside.path().to_str().unwrap(), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            InterpreterError::CommandFailed { reason, .. } => {
                assert!(reason.contains("escapes"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_render_html_reaches_markup_sink() {
        let dir = tempfile::tempdir().unwrap();
        let (local, mut sinks) = executor(dir.path());
        local.render_html("<canvas/>").await.unwrap();
        assert_eq!(sinks.markup_rx.recv().await.unwrap(), "<canvas/>");
    }
}
