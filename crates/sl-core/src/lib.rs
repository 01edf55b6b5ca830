pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod export;
pub mod host;
pub mod loader;
pub mod namespace;
pub mod path;
pub mod session;
pub mod tree;
pub mod unit;
pub mod vfs;

// Re-export commonly used items for convenience
pub use tracing;

pub use config::{Environment, LoaderConfig, Mode};
pub use context::{Discovery, ImportOptions, UnitContext};
pub use export::ExportBundle;
pub use host::{Delivery, FetchCompletion, FetchRequest, MemoryHost, ScriptHost, Transcript, UnitHost};
pub use loader::Loader;
pub use namespace::{GlobalScope, NamespaceTree};
pub use path::VirtualPath;
pub use session::{ExecutionReport, Phase, Session, SessionOutcome};
pub use unit::CodeBlock;

// Alias for error types
pub type Error = crate::error::LoaderError;
pub type Result<T> = crate::error::Result<T>;
