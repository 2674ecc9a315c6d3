//! # Codebox - Sandboxed Code Interpreter Core
//!
//! Codebox is the code-execution subsystem of an AI assistant, written in
//! Rust: it accepts structured command batches from an assistant's command
//! stream and executes them either in a persistent interactive Python session
//! inside an isolated Docker container or directly on the host.
//!
//! ## Features
//!
//! - **Environment lifecycle**: runtime presence probe, on-demand sandbox
//!   image build with streamed progress, session readiness checks
//! - **Persistent interactive session**: interpreter state retained across
//!   calls until explicitly restarted
//! - **Dual dispatch modes**: synchronous (caller blocks) and background
//!   execution with cancellation
//! - **Partial-failure batches**: each command gets an independent,
//!   order-preserving outcome
//! - **Multiplexed output**: transcript text, rendered markup, clear signals,
//!   build logs and status lines on separate channels
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use codebox::bus::OutputRouter;
//! use codebox::interp::{
//!     AllowList, CommandRequest, CommandRouter, DispatchPolicy, DockerImageBuilder,
//!     DockerProbe, ExecutionWorker, InteractiveSession, LocalExecutor,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let (output, _sinks) = OutputRouter::channel(true);
//!     let probe = Arc::new(DockerProbe::new("codebox-ipython:latest"));
//!     let builder = Arc::new(DockerImageBuilder::new(
//!         "codebox-ipython:latest",
//!         Duration::from_secs(600),
//!         output.clone(),
//!     ));
//!     let session = Arc::new(InteractiveSession::new(
//!         "codebox-ipython:latest",
//!         "codebox-interpreter",
//!         "/tmp/codebox-data",
//!         "/data",
//!         output.clone(),
//!     ));
//!     let local = Arc::new(LocalExecutor::new(
//!         "/tmp/codebox-data",
//!         "python3",
//!         true,
//!         output.clone(),
//!     ));
//!     let worker = ExecutionWorker::new(session, local, output.clone(), Duration::from_secs(60));
//!     let router = CommandRouter::new(
//!         AllowList::default(),
//!         probe,
//!         builder,
//!         worker,
//!         output,
//!         "/tmp/codebox-data".into(),
//!         "/data".into(),
//!         true,
//!     );
//!
//!     let batch = vec![CommandRequest::new("run_code").with_param("code", "print(2 + 2)")];
//!     let _outcome = router.dispatch(batch, None, DispatchPolicy::default()).await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`interp`] - Sandboxed code-execution subsystem
//! - [`bus`] - Output event routing to consumer sinks
//! - [`config`] - Configuration management
//! - [`logging`] - Logging initialization

pub mod bus;
pub mod cli;
pub mod config;
pub mod interp;
pub mod logging;
