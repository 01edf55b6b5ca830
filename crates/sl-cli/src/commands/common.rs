//! Common reusable helpers for CLI commands to avoid duplication.

use crate::cli::CliConfig;
use crate::{CliError, Result};
use clap::Args;
use sl_core::config::{cache_bust_override, environment_override};
use sl_core::vfs::NativeFileSystem;
use sl_core::{
    Delivery, Environment, GlobalScope, Loader, LoaderConfig, Mode, ScriptHost, SessionOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Arguments shared by every command that resolves a unit tree
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Entry unit, relative to the root directory
    pub entry: String,

    /// Directory unit keys are resolved under
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Hosting environment (foreground/window or background/worker)
    #[arg(long = "env")]
    pub environment: Option<Environment>,

    /// Fetch units without a cache-busting token
    #[arg(long)]
    pub no_cache_bust: bool,
}

impl SourceArgs {
    pub fn root(&self, config: &CliConfig) -> PathBuf {
        self.root.clone().unwrap_or_else(|| config.loader.root.clone())
    }

    pub fn loader_config(&self, config: &CliConfig, mode: Mode) -> LoaderConfig {
        let environment = self
            .environment
            .or_else(environment_override)
            .unwrap_or(config.loader.environment);
        let cache_bust =
            !self.no_cache_bust && cache_bust_override().unwrap_or(config.loader.cache_bust);
        LoaderConfig::new(environment)
            .with_mode(mode)
            .with_cache_bust(cache_bust)
    }
}

/// Validate that all provided paths exist (and optionally are files).
pub fn validate_paths_exist(inputs: &[PathBuf], must_be_files: bool) -> Result<()> {
    for input in inputs {
        if !input.exists() {
            return Err(CliError::InvalidInput(format!(
                "Input path does not exist: {}",
                input.display()
            )));
        }
        if must_be_files && !input.is_file() {
            return Err(CliError::InvalidInput(format!(
                "Input path is not a file: {}",
                input.display()
            )));
        }
    }
    Ok(())
}

/// Resolves `args.entry` from disk and runs the pass `mode` selects.
///
/// Foreground sessions await completions delivered from the blocking pool;
/// background sessions fetch synchronously on the calling thread.
pub async fn resolve(
    args: &SourceArgs,
    config: &CliConfig,
    mode: Mode,
) -> Result<(SessionOutcome, ScriptHost)> {
    let root = args.root(config);
    validate_paths_exist(&[root.clone()], false)?;
    validate_paths_exist(&[root.join(args.entry.trim_start_matches('/'))], true)?;

    let loader_config = args.loader_config(config, mode);
    debug!("resolving {} under {} with {:?}", args.entry, root.display(), loader_config);

    let global = GlobalScope::new();
    let host = ScriptHost::new(Arc::new(NativeFileSystem::new(root)), global.clone());
    let outcome = match loader_config.environment {
        Environment::Foreground => {
            let mut loader = Loader::new(loader_config, host.clone().with_delivery(Delivery::Deferred))
                .with_global(global);
            loader.resolve(&args.entry).await?
        }
        Environment::Background => {
            let mut loader = Loader::new(loader_config, host.clone()).with_global(global);
            loader.resolve_blocking(&args.entry)?
        }
    };
    Ok((outcome, host))
}

/// Reports a session that finished in the wrong pass.
pub fn unexpected_outcome(expected: Mode) -> CliError {
    CliError::InvalidInput(format!("session did not finish in {} mode", expected.as_str()))
}
