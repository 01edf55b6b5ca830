//! Export command implementation.

use crate::commands::common::{resolve, unexpected_outcome, SourceArgs};
use crate::{cli::CliConfig, CliError, Result};
use clap::Args;
use sl_core::{Mode, SessionOutcome};
use std::path::PathBuf;
use tracing::info;

/// Arguments for the export command
#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Resolves the entry unit and writes the whole tree as one bundle.
pub async fn export_command(args: ExportArgs, config: &CliConfig) -> Result<()> {
    info!("Exporting '{}'", args.source.entry);

    let (outcome, _) = resolve(&args.source, config, Mode::Export).await?;
    let SessionOutcome::Exported(bundle) = outcome else {
        return Err(unexpected_outcome(Mode::Export));
    };

    match args.output.or_else(|| config.export.output.clone()) {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &bundle.code).map_err(|e| {
                CliError::InvalidInput(format!("Failed to write {}: {}", path.display(), e))
            })?;
            info!("Wrote {} bytes to {}", bundle.code.len(), path.display());
        }
        None => print!("{}", bundle.code),
    }
    Ok(())
}
