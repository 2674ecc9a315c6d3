//! Shared wiring for CLI commands: config, logging, core construction.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::OutputRouter;
use crate::config::{self, Config};
use crate::interp::{
    AllowList, CommandRouter, DockerImageBuilder, DockerProbe, ExecutionWorker,
    InteractiveSession, LocalExecutor,
};

/// Build the full interpreter core from configuration and attach simple
/// terminal printers to every sink channel.
pub fn build_core(cfg: &Config) -> Result<CommandRouter> {
    let data_dir = config::data_dir_path(cfg);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let host_workdir = data_dir.to_string_lossy().into_owned();
    let ic = &cfg.interpreter;

    let (output, mut sinks) = OutputRouter::channel(ic.attach_output);

    // Terminal printers; each channel keeps its own stream.
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(line) = sinks.transcript_rx.recv() => print!("{line}"),
                Some(html) = sinks.markup_rx.recv() => println!("[html] {html}"),
                Some(()) = sinks.clear_rx.recv() => eprintln!("[codebox] output cleared"),
                Some(line) = sinks.build_rx.recv() => eprintln!("[build] {line}"),
                Some(msg) = sinks.status_rx.recv() => eprintln!("[codebox] {msg}"),
                else => break,
            }
        }
    });

    let probe = Arc::new(DockerProbe::new(&ic.image_tag));
    let builder = Arc::new(DockerImageBuilder::new(
        &ic.image_tag,
        Duration::from_secs(ic.build_timeout_secs),
        output.clone(),
    ));
    let session = Arc::new(InteractiveSession::new(
        &ic.image_tag,
        &ic.container_name,
        host_workdir.clone(),
        &ic.container_workdir,
        output.clone(),
    ));
    let local = Arc::new(LocalExecutor::new(
        data_dir,
        &ic.local_python,
        ic.restrict_to_workspace,
        output.clone(),
    ));
    let worker = ExecutionWorker::new(
        session,
        local,
        output.clone(),
        Duration::from_secs(ic.cmd_timeout_secs),
    );

    Ok(CommandRouter::new(
        AllowList::default(),
        probe,
        builder,
        worker,
        output,
        host_workdir,
        ic.container_workdir.clone(),
        ic.auto_cwd,
    ))
}

/// Load config and initialize logging for a CLI invocation.
pub fn init() -> Result<Config> {
    let cfg = config::load_config(None).context("Load config")?;
    crate::logging::init_logging(&cfg)?;
    Ok(cfg)
}
