//! Environment commands: probe the runtime, build the sandbox image.

use anyhow::Result;

use super::helpers;
use crate::interp::{BuildOutcome, SandboxState};

/// Report the sandbox environment state.
pub async fn cmd_probe() -> Result<()> {
    let cfg = helpers::init()?;
    let core = helpers::build_core(&cfg)?;

    match core.sandbox_state().await {
        Ok(SandboxState::Ready) => println!("ready: runtime installed, image present"),
        Ok(SandboxState::ImageMissing) => {
            println!("runtime installed, image missing (run `codebox build`)")
        }
        Ok(SandboxState::ImageBuilding) => println!("image build in progress"),
        Ok(SandboxState::RuntimeMissing) => {
            println!("container runtime not installed");
        }
        Err(reason) => anyhow::bail!("environment probe failed: {reason}"),
    }
    Ok(())
}

/// Build the sandbox image and wait for the outcome.
pub async fn cmd_build() -> Result<()> {
    let cfg = helpers::init()?;
    let core = helpers::build_core(&cfg)?;

    match core.sandbox_state().await {
        Ok(SandboxState::Ready) => {
            println!("image already present: {}", cfg.interpreter.image_tag);
            return Ok(());
        }
        Ok(SandboxState::RuntimeMissing) => {
            anyhow::bail!("container runtime is not installed");
        }
        Err(reason) => anyhow::bail!("environment probe failed: {reason}"),
        Ok(_) => {}
    }

    let mut handle = core.start_build();
    match handle.wait().await {
        BuildOutcome::Succeeded => {
            println!("image built: {}", cfg.interpreter.image_tag);
            Ok(())
        }
        BuildOutcome::Failed(reason) => anyhow::bail!("image build failed: {reason}"),
    }
}
