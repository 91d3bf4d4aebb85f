//! cranforge - mirror a pinned CRAN snapshot and republish it

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cranforge_cli::cmd;
use cranforge_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let home = cli
        .home
        .clone()
        .unwrap_or_else(cranforge_core::paths::cranforge_home);

    let code = match &cli.command {
        Commands::Plan { list, repo_url } => {
            cmd::plan::plan(list, repo_url).await?;
            0
        }
        Commands::Build(args) => cmd::build::build(args, &home, cli.json).await?,
        Commands::Publish(args) => cmd::publish::publish(args, &home, cli.json).await?,
        Commands::Mirror { build, publish } => {
            cmd::mirror::mirror(build, publish, &home, cli.json).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
