//! sl CLI Binary
//!
//! Resolves a tree of units from sources on disk and executes it, exports
//! it as one bundle, or prints its shape.
//!
//! ```bash
//! sl run main.js --root app/
//! sl run main.js --env background
//! sl export main.js -o dist/bundle.js
//! sl tree main.js --json
//! ```

use clap::{Parser, Subcommand};
use sl_cli::{
    Result,
    cli::CliConfig,
    commands::{self, export::ExportArgs, run::RunArgs, tree::TreeArgs},
    diagnostics::{render_cli_error, setup_error_reporting},
};
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sl",
    version = env!("CARGO_PKG_VERSION"),
    about = "sl: dependency-resolving module loader",
    long_about = r#"
sl builds a unit's dependency tree as the units declare their imports,
then runs every unit after all of its dependencies.

Log output goes to stderr and honours RUST_LOG; stdout only carries
transcripts, bundles and trees.
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log loader progress (-v for fetches and skipped blocks, -vv for everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (defaults to ./sl.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Change to this directory before doing anything else
    #[arg(short = 'C', long, global = true)]
    directory: Option<PathBuf>,
}

impl Cli {
    fn log_filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        EnvFilter::new(match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn,sl_core=info",
            (false, 1) => "info,sl_core=debug",
            (false, _) => "trace",
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and execute a unit tree
    Run(RunArgs),

    /// Resolve a unit tree and write it as one bundle
    Export(ExportArgs),

    /// Resolve a unit tree and print it
    Tree(TreeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_error_reporting()?;

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        if !render_cli_error(&e) {
            error!("{}", e);
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(dir) = &cli.directory {
        std::env::set_current_dir(dir)?;
        debug!("working directory {}", dir.display());
    }
    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run_command(args, &config).await,
        Commands::Export(args) => commands::export_command(args, &config).await,
        Commands::Tree(args) => commands::tree_command(args, &config).await,
    }
}
