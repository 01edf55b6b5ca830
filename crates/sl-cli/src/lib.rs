//! `sl` CLI Library
//!
//! Command-line front end for the sl module loader: resolves a unit tree from
//! sources on disk, then executes it, exports it as one bundle, or prints it.

pub mod cli;
pub mod commands;
pub mod diagnostics;

// Re-export core types for convenience
pub use sl_core::*;

// CLI-specific error handling
pub mod error {
    use miette::Diagnostic;
    use sl_core::error::LoaderError;
    use thiserror::Error;

    #[derive(Error, Debug, Diagnostic)]
    pub enum CliError {
        #[error("IO error: {0}")]
        #[diagnostic(code(sl::io))]
        Io(#[from] std::io::Error),

        #[error("Configuration error: {0}")]
        #[diagnostic(code(sl::config), help("check sl.toml or the file passed with --config"))]
        Config(String),

        #[error("Invalid input: {0}")]
        #[diagnostic(code(sl::invalid_input))]
        InvalidInput(String),

        #[error(transparent)]
        #[diagnostic(
            code(sl::load),
            help("nothing was executed; fix the unit named above and run again")
        )]
        Load(#[from] LoaderError),
    }

    pub type Result<T> = std::result::Result<T, CliError>;
}

pub use error::{CliError, Result};
