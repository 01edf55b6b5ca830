//! Run command implementation.

use crate::commands::common::{resolve, unexpected_outcome, SourceArgs};
use crate::{cli::CliConfig, Result};
use clap::Args;
use sl_core::{Mode, SessionOutcome};
use tracing::{debug, info, warn};

/// Arguments for the run command
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Resolves and executes the entry unit, printing each rendered block.
pub async fn run_command(args: RunArgs, config: &CliConfig) -> Result<()> {
    info!("Running '{}'", args.source.entry);

    let (outcome, host) = resolve(&args.source, config, Mode::Run).await?;
    let SessionOutcome::Executed(report) = outcome else {
        return Err(unexpected_outcome(Mode::Run));
    };

    for evaluation in host.transcript().entries() {
        println!("{}", evaluation.output);
    }

    let order: Vec<String> = report.order.iter().map(|key| key.to_string()).collect();
    debug!("execution order: {}", order.join(" -> "));
    for skipped in &report.skipped {
        debug!("skipped block {} of {}: {:?}", skipped.index, skipped.unit, skipped.reason);
    }
    for failed in &report.failed {
        warn!("block {} of {} failed: {}", failed.index, failed.unit, failed.error);
    }
    info!(
        "Executed {} blocks across {} units",
        report.blocks_run,
        report.order.len()
    );
    Ok(())
}
