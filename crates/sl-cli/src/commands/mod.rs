//! Command implementations for the sl CLI

pub mod common;
pub mod export;
pub mod run;
pub mod tree;

// Re-export command functions
pub use export::export_command;
pub use run::run_command;
pub use tree::tree_command;
