//! Tree command implementation.

use crate::commands::common::{resolve, unexpected_outcome, SourceArgs};
use crate::{cli::CliConfig, CliError, Result};
use clap::Args;
use sl_core::{Mode, SessionOutcome};

/// Arguments for the tree command
#[derive(Debug, Clone, Args)]
pub struct TreeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Print the tree as JSON
    #[arg(long)]
    pub json: bool,
}

/// Resolves the entry unit without executing anything and prints the
/// dependency tree.
pub async fn tree_command(args: TreeArgs, config: &CliConfig) -> Result<()> {
    let (outcome, _) = resolve(&args.source, config, Mode::Export).await?;
    let SessionOutcome::Exported(bundle) = outcome else {
        return Err(unexpected_outcome(Mode::Export));
    };

    if args.json {
        let json = serde_json::to_string_pretty(&bundle.tree)
            .map_err(|e| CliError::InvalidInput(format!("Failed to serialize tree: {}", e)))?;
        println!("{}", json);
    } else {
        print!("{}", bundle.tree);
    }
    Ok(())
}
