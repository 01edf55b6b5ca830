use std::result;

use thiserror::Error;

use crate::path::{PathError, VirtualPath};
use crate::vfs::FsError;

/// Failure reported by a host while retrieving or running a unit's source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unit source not found")]
    NotFound,
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
    #[error("declaration rejected: {0}")]
    Declaration(Box<LoaderError>),
    #[error("host dropped the fetch without completing it")]
    Abandoned,
    #[error("host did not complete the fetch synchronously")]
    Incomplete,
    #[error("{0}")]
    Host(String),
}

impl From<LoaderError> for FetchError {
    fn from(err: LoaderError) -> Self {
        FetchError::Declaration(Box::new(err))
    }
}

/// Failure raised by a code block's guard or body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BlockError(pub String);

impl BlockError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("failed to load unit {key}: {source}")]
    FetchFailure {
        key: VirtualPath,
        #[source]
        source: FetchError,
    },
    #[error("declaration made outside of an active unit fetch")]
    DeclarationOutsideContext { key: Option<VirtualPath> },
    #[error("guard of block {index} in {key} failed: {source}")]
    GuardEvaluationFailure {
        key: VirtualPath,
        index: usize,
        #[source]
        source: BlockError,
    },
    #[error("invalid namespace name {0:?}: empty segment")]
    InvalidNamespaceName(String),
    #[error("invalid reference {reference:?}: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: PathError,
    },
    #[error("session is {actual}, expected {expected}")]
    InvalidPhase {
        expected: &'static str,
        actual: &'static str,
    },
}

impl LoaderError {
    /// Key of the unit a fetch failure is attributed to.
    pub fn failing_key(&self) -> Option<&VirtualPath> {
        match self {
            LoaderError::FetchFailure { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, LoaderError>;
