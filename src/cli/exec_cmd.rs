//! Execution commands: run code or files, sandbox shell, session restart.

use anyhow::Result;

use super::helpers;
use crate::interp::{CommandRequest, Dispatch, DispatchPolicy};

async fn dispatch_batch(batch: Vec<CommandRequest>, detach: bool) -> Result<()> {
    let cfg = helpers::init()?;
    let core = helpers::build_core(&cfg)?;

    let policy = DispatchPolicy {
        asynchronous: detach,
        silent: false,
    };

    match core.dispatch(batch, None, policy).await {
        Dispatch::Completed(ctx) => {
            for result in &ctx.results {
                match (&result.result, &result.error) {
                    (Some(value), _) => {
                        if let Some(text) = value.as_str() {
                            println!("{}: {}", result.name, text.trim_end());
                        } else {
                            println!("{}: {}", result.name, value);
                        }
                    }
                    (None, Some(error)) => eprintln!("{}: error: {}", result.name, error),
                    (None, None) => {}
                }
            }
            Ok(())
        }
        Dispatch::Background(handle) => {
            let ctx = handle.join().await;
            let failed = ctx.results.iter().filter(|r| !r.is_ok()).count();
            println!("background run finished: {} result(s), {} failed", ctx.results.len(), failed);
            Ok(())
        }
        Dispatch::BuildStarted(mut handle) => {
            eprintln!("sandbox image build started; waiting…");
            handle.wait().await;
            anyhow::bail!("environment was not ready; resubmit the command");
        }
        Dispatch::RuntimeMissing => anyhow::bail!("container runtime is not installed"),
        Dispatch::ProbeFailed(reason) => anyhow::bail!("environment probe failed: {reason}"),
        Dispatch::Busy => anyhow::bail!("another batch is already running"),
        Dispatch::Ignored => anyhow::bail!("no recognized command in batch"),
    }
}

/// Execute code in the session or a generated file on the host.
pub async fn cmd_run(code: Option<String>, file: Option<String>, detach: bool) -> Result<()> {
    let request = match (code, file) {
        (Some(code), None) => CommandRequest::new("run_code").with_param("code", code),
        (None, Some(path)) => CommandRequest::new("run_file").with_param("path", path),
        _ => anyhow::bail!("pass exactly one of --code or --file"),
    };
    dispatch_batch(vec![request], detach).await
}

/// Run a shell command inside the sandbox container.
pub async fn cmd_shell(command: String) -> Result<()> {
    let request = CommandRequest::new("sandbox_shell").with_param("command", command);
    dispatch_batch(vec![request], false).await
}

/// Restart the interactive session.
pub async fn cmd_restart() -> Result<()> {
    dispatch_batch(vec![CommandRequest::new("restart_session")], false).await
}

/// Print the declared command syntax as JSON.
pub async fn cmd_syntax() -> Result<()> {
    let cfg = helpers::init()?;
    let core = helpers::build_core(&cfg)?;
    let specs = core.command_syntax();
    println!("{}", serde_json::to_string_pretty(&specs)?);
    Ok(())
}
