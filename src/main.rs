use anyhow::Result;

mod bus;
mod cli;
mod config;
mod interp;
mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
