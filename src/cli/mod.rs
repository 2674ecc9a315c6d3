//! CLI commands module.

mod env_cmd;
mod exec_cmd;
mod helpers;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use env_cmd::{cmd_build, cmd_probe};
pub use exec_cmd::{cmd_restart, cmd_run, cmd_shell, cmd_syntax};

#[derive(Parser)]
#[command(name = "codebox", about = "codebox — sandboxed code interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the sandbox environment state (runtime, image).
    Probe,

    /// Build the sandbox image, streaming build output.
    Build,

    /// Execute code in the sandbox session, or a generated file on the host.
    Run {
        /// Code to execute in the interactive session.
        #[arg(short, long)]
        code: Option<String>,

        /// File in the working directory to execute on the host.
        #[arg(short, long)]
        file: Option<String>,

        /// Dispatch on a background task instead of blocking.
        #[arg(long)]
        detach: bool,
    },

    /// Run a shell command inside the sandbox container.
    Shell {
        /// Command line passed to the container shell.
        command: String,
    },

    /// Restart the interactive session, discarding interpreter state.
    Restart,

    /// Print the declared command syntax as JSON.
    Syntax,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe => cmd_probe().await,
        Commands::Build => cmd_build().await,
        Commands::Run { code, file, detach } => cmd_run(code, file, detach).await,
        Commands::Shell { command } => cmd_shell(command).await,
        Commands::Restart => cmd_restart().await,
        Commands::Syntax => cmd_syntax().await,
    }
}
