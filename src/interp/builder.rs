// Sandbox image builder: at most one build job process-wide, streamed progress.

use crate::bus::OutputRouter;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Dockerfile for the interpreter image. The container idles and the
/// session layer attaches a Python process to it on demand.
const DOCKERFILE: &str = "\
FROM python:3.11-slim
RUN pip install --no-cache-dir ipython
WORKDIR /data
CMD [\"sleep\", \"infinity\"]
";

/// Terminal state of a build job.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Succeeded,
    Failed(String),
}

/// Handle to an in-flight (or finished) build. Cloning observes the same job;
/// two `build()` calls during one build yield handles with the same id.
#[derive(Debug, Clone)]
pub struct BuildHandle {
    id: Uuid,
    outcome: watch::Receiver<Option<BuildOutcome>>,
    cancel: CancellationToken,
}

/// Write half of a build job; held by the task driving the build.
pub struct BuildCompleter {
    tx: watch::Sender<Option<BuildOutcome>>,
    cancel: CancellationToken,
}

impl BuildCompleter {
    /// Record the terminal outcome. Waiters observe it immediately.
    pub fn finish(&self, outcome: BuildOutcome) {
        let _ = self.tx.send(Some(outcome));
    }

    /// Resolves when a handle requested cancellation.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl BuildHandle {
    /// Create a not-yet-finished build job: the handle for observers and the
    /// completer for the task driving the build.
    pub fn pending() -> (Self, BuildCompleter) {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        (
            Self {
                id: Uuid::new_v4(),
                outcome: rx,
                cancel: cancel.clone(),
            },
            BuildCompleter { tx, cancel },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Abort the build. The derived sandbox state falls back to image-missing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&mut self) -> BuildOutcome {
        loop {
            if let Some(outcome) = self.outcome.borrow().clone() {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                return BuildOutcome::Failed("build task dropped".to_string());
            }
        }
    }
}

/// Builds the sandbox image when absent. Starting a build while one is in
/// progress returns the existing handle; no second build process is spawned.
pub trait ImageBuilder: Send + Sync {
    fn build(&self) -> BuildHandle;
    fn in_progress(&self) -> bool;
}

/// Docker implementation streaming `docker build` progress to the build-log sink.
pub struct DockerImageBuilder {
    image_tag: String,
    build_timeout: Duration,
    router: OutputRouter,
    active: Mutex<Option<BuildHandle>>,
}

impl DockerImageBuilder {
    pub fn new(image_tag: impl Into<String>, build_timeout: Duration, router: OutputRouter) -> Self {
        Self {
            image_tag: image_tag.into(),
            build_timeout,
            router,
            active: Mutex::new(None),
        }
    }

    /// In-memory tar archive holding the Dockerfile as the build context.
    fn build_context() -> std::io::Result<Vec<u8>> {
        let mut archive = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("Dockerfile")?;
        header.set_size(DOCKERFILE.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append(&header, DOCKERFILE.as_bytes())?;
        archive.into_inner()
    }
}

impl ImageBuilder for DockerImageBuilder {
    fn build(&self) -> BuildHandle {
        let mut active = self.active.lock().expect("builder slot poisoned");
        if let Some(handle) = active.as_ref() {
            if !handle.is_done() {
                return handle.clone();
            }
        }

        let (handle, completer) = BuildHandle::pending();
        *active = Some(handle.clone());

        let tag = self.image_tag.clone();
        let timeout = self.build_timeout;
        let router = self.router.clone();
        tokio::spawn(async move {
            let outcome = run_build(&tag, timeout, &router, &completer).await;
            match &outcome {
                BuildOutcome::Succeeded => info!(image = %tag, "Sandbox image built"),
                BuildOutcome::Failed(reason) => {
                    warn!(image = %tag, reason = %reason, "Sandbox image build failed");
                    router
                        .status(format!("sandbox image build failed: {reason}"))
                        .await;
                }
            }
            completer.finish(outcome);
        });

        handle
    }

    fn in_progress(&self) -> bool {
        self.active
            .lock()
            .expect("builder slot poisoned")
            .as_ref()
            .map(|h| !h.is_done())
            .unwrap_or(false)
    }
}

async fn run_build(
    tag: &str,
    timeout: Duration,
    router: &OutputRouter,
    completer: &BuildCompleter,
) -> BuildOutcome {
    let docker = match Docker::connect_with_local_defaults() {
        Ok(d) => d,
        Err(e) => return BuildOutcome::Failed(format!("Docker connection failed: {e}")),
    };
    let context = match DockerImageBuilder::build_context() {
        Ok(c) => c,
        Err(e) => return BuildOutcome::Failed(format!("build context archive failed: {e}")),
    };

    let options = BuildImageOptions {
        dockerfile: "Dockerfile".to_string(),
        t: tag.to_string(),
        rm: true,
        ..Default::default()
    };

    let mut stream = docker.build_image(
        options,
        None,
        Some(bytes::Bytes::from(context)),
    );

    let streamed = async {
        while let Some(item) = stream.next().await {
            match item {
                Ok(progress) => {
                    if let Some(line) = progress.stream {
                        let line = line.trim_end();
                        if !line.is_empty() {
                            router.build_log(line.to_string()).await;
                        }
                    }
                    if let Some(error) = progress.error {
                        return BuildOutcome::Failed(error);
                    }
                }
                Err(e) => return BuildOutcome::Failed(e.to_string()),
            }
        }
        BuildOutcome::Succeeded
    };

    tokio::select! {
        outcome = async { tokio::time::timeout(timeout, streamed).await } => match outcome {
            Ok(outcome) => outcome,
            Err(_) => BuildOutcome::Failed(format!("build timed out after {}s", timeout.as_secs())),
        },
        _ = completer.cancelled() => BuildOutcome::Failed("build cancelled".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_builder() -> DockerImageBuilder {
        let (router, _sinks) = OutputRouter::channel(true);
        DockerImageBuilder::new("codebox-test:latest", Duration::from_secs(5), router)
    }

    #[test]
    fn test_build_context_contains_dockerfile() {
        let bytes = DockerImageBuilder::build_context().unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut entries = archive.entries().unwrap();
        let entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str().unwrap(), "Dockerfile");
    }

    #[tokio::test]
    async fn test_second_build_returns_same_handle() {
        let builder = test_builder();
        let first = builder.build();
        let second = builder.build();
        // Same job: the second call must not spawn another build.
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_build_without_runtime_reports_failure_and_clears_slot() {
        let builder = test_builder();
        let mut handle = builder.build();
        // Without a reachable Docker daemon the job terminates in Failed.
        match handle.wait().await {
            BuildOutcome::Failed(_) => {}
            BuildOutcome::Succeeded => {
                // Machine with a real daemon: the tiny image may actually build.
            }
        }
        assert!(!builder.in_progress());
    }

    #[tokio::test]
    async fn test_cancel_terminates_build() {
        let builder = test_builder();
        let mut handle = builder.build();
        handle.cancel();
        let outcome = handle.wait().await;
        // Either the cancel won the race or the missing daemon failed it first.
        assert!(matches!(outcome, BuildOutcome::Failed(_)));
        assert!(!builder.in_progress());
    }
}
