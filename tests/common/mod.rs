//! Common test utilities and helpers for integration tests.
//!
//! Provides stub backends for the interpreter core (probe, builder, runtime)
//! so dispatch scenarios run without a container runtime, plus proptest
//! configuration presets.

#![allow(dead_code)]

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codebox::bus::{OutputEvent, OutputRouter, OutputSinks};
use codebox::interp::{
    AllowList, BuildHandle, BuildOutcome, CodeRuntime, CommandRouter, EnvironmentProbe,
    ExecutionWorker, ImageBuilder, InterpreterError, LocalExecutor, Result,
};

/// Standard proptest configuration with 100 iterations.
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Stub backends
// ---------------------------------------------------------------------------

/// Probe with switchable runtime/image answers.
pub struct StubProbe {
    installed: AtomicBool,
    image: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl StubProbe {
    pub fn new(installed: bool, image: bool) -> Self {
        Self {
            installed: AtomicBool::new(installed),
            image: AtomicBool::new(image),
            fault: Mutex::new(None),
        }
    }

    pub fn set_image_exists(&self, exists: bool) {
        self.image.store(exists, Ordering::SeqCst);
    }

    pub fn set_fault(&self, reason: &str) {
        *self.fault.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl EnvironmentProbe for StubProbe {
    async fn runtime_installed(&self) -> Result<bool> {
        if let Some(reason) = self.fault.lock().unwrap().clone() {
            return Err(InterpreterError::ProbeFault(reason));
        }
        Ok(self.installed.load(Ordering::SeqCst))
    }

    async fn image_exists(&self) -> Result<bool> {
        Ok(self.image.load(Ordering::SeqCst))
    }
}

/// Builder that counts jobs. By default each job finishes `Succeeded`
/// immediately; `manual()` leaves jobs pending so idempotence is observable.
pub struct StubBuilder {
    pub builds: AtomicUsize,
    auto_outcome: Option<BuildOutcome>,
    active: Mutex<Option<BuildHandle>>,
    pending: Mutex<Vec<codebox::interp::BuildCompleter>>,
}

impl StubBuilder {
    pub fn new() -> Self {
        Self {
            builds: AtomicUsize::new(0),
            auto_outcome: Some(BuildOutcome::Succeeded),
            active: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn manual() -> Self {
        Self {
            auto_outcome: None,
            ..Self::new()
        }
    }

    /// Finish all pending manual jobs.
    pub fn finish_all(&self, outcome: BuildOutcome) {
        for completer in self.pending.lock().unwrap().drain(..) {
            completer.finish(outcome.clone());
        }
    }
}

impl ImageBuilder for StubBuilder {
    fn build(&self) -> BuildHandle {
        let mut active = self.active.lock().unwrap();
        if let Some(handle) = active.as_ref() {
            if !handle.is_done() {
                return handle.clone();
            }
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        let (handle, completer) = BuildHandle::pending();
        match &self.auto_outcome {
            Some(outcome) => completer.finish(outcome.clone()),
            None => self.pending.lock().unwrap().push(completer),
        }
        *active = Some(handle.clone());
        handle
    }

    fn in_progress(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_done())
            .unwrap_or(false)
    }
}

/// In-memory interactive runtime. Code containing `1/0` produces an error
/// trace as normal output; code containing `hang` sleeps past the timeout.
pub struct StubRuntime {
    router: OutputRouter,
    pub executed: Mutex<Vec<String>>,
    pub restarts: AtomicUsize,
}

impl StubRuntime {
    pub fn new(router: OutputRouter) -> Self {
        Self {
            router,
            executed: Mutex::new(Vec::new()),
            restarts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CodeRuntime for StubRuntime {
    async fn execute(&self, code: &str, timeout: Duration) -> Result<String> {
        self.executed.lock().unwrap().push(code.to_string());
        if code.contains("hang") {
            tokio::time::sleep(timeout).await;
            self.restarts.fetch_add(1, Ordering::SeqCst);
            return Err(InterpreterError::Timeout("execute".to_string()));
        }
        let output = if code.contains("1/0") {
            "Traceback (most recent call last):\n  File \"<cell>\", line 1, in <module>\nZeroDivisionError: division by zero\n".to_string()
        } else {
            format!("ok: {code}\n")
        };
        self.router
            .route(OutputEvent::Text {
                payload: output.clone(),
            })
            .await;
        Ok(output)
    }

    async fn shell(&self, command: &str, _timeout: Duration) -> Result<String> {
        let output = format!("exit code: 0\n{command}\n");
        self.router
            .route(OutputEvent::Text {
                payload: output.clone(),
            })
            .await;
        Ok(output)
    }

    async fn restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.router.route(OutputEvent::Cleared).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core fixture
// ---------------------------------------------------------------------------

pub struct TestCore {
    pub router: CommandRouter,
    pub sinks: OutputSinks,
    pub runtime: Arc<StubRuntime>,
    pub probe: Arc<StubProbe>,
    pub builder: Arc<StubBuilder>,
    pub dir: tempfile::TempDir,
}

pub fn core(runtime_installed: bool, image_exists: bool) -> TestCore {
    core_with(runtime_installed, image_exists, Duration::from_secs(5), false)
}

pub fn core_with(
    runtime_installed: bool,
    image_exists: bool,
    timeout: Duration,
    manual_builder: bool,
) -> TestCore {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, sinks) = OutputRouter::channel(true);

    let probe = Arc::new(StubProbe::new(runtime_installed, image_exists));
    let builder = Arc::new(if manual_builder {
        StubBuilder::manual()
    } else {
        StubBuilder::new()
    });
    let runtime = Arc::new(StubRuntime::new(output.clone()));
    // Host files run through `sh` so the tests carry no Python dependency.
    let local = Arc::new(LocalExecutor::new(dir.path(), "sh", true, output.clone()));
    let worker = ExecutionWorker::new(runtime.clone(), local, output.clone(), timeout);

    let router = CommandRouter::new(
        AllowList::default(),
        probe.clone(),
        builder.clone(),
        worker,
        output,
        dir.path().to_string_lossy().into_owned(),
        "/data".to_string(),
        true,
    );

    TestCore {
        router,
        sinks,
        runtime,
        probe,
        builder,
        dir,
    }
}

/// Drain every status line currently queued.
pub fn drain_status(sinks: &mut OutputSinks) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = sinks.status_rx.try_recv() {
        lines.push(line);
    }
    lines
}

/// Drain every transcript line currently queued.
pub fn drain_transcript(sinks: &mut OutputSinks) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = sinks.transcript_rx.try_recv() {
        lines.push(line);
    }
    lines
}
