use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use kforge::config::resolve_config;
use kforge::{BuildLogger, Pipeline, Workspace};

/// Android kernel build pipeline: provision toolchains, sync the kernel
/// fork, build, and package a flashable zip.
#[derive(Parser, Debug)]
#[command(name = "kforge", version, about)]
struct Cli {
    /// Remove the previous build output tree before configuring.
    #[arg(short, long)]
    clean: bool,

    /// Working root holding toolchains, sources, and outputs.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Explicit config file (defaults to <root>/kforge.json, then
    /// ~/.config/kforge/config.json, then built-in defaults).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logger first: every later failure must reach the same sink.
    let logger = BuildLogger::new();
    logger
        .install()
        .context("failed to install global logger")?;

    let workspace = Workspace::at(&cli.root)
        .with_context(|| format!("failed to anchor workspace at {}", cli.root.display()))?;

    let config = resolve_config(workspace.root(), cli.config.as_deref())
        .context("failed to load configuration")?;

    log::info!(
        "kforge starting (root: {}, device: {}, branch: {}, clean: {})",
        workspace.root().display(),
        config.device,
        config.kernel_branch,
        cli.clean
    );

    let mut pipeline = Pipeline::new(config, workspace, logger, cli.clean);
    pipeline.run().await?;

    Ok(())
}
