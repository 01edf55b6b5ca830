//! Platform side of a unit fetch.
//!
//! Both hosting environments go through [`UnitHost::fetch_unit`]. A
//! background host finishes the unit, including its declarative body,
//! before returning and completes synchronously; a foreground host may
//! complete from any task at any later time. The session never has more
//! than one fetch outstanding.

use tokio::sync::oneshot;

use crate::context::UnitContext;
use crate::error::FetchError;
use crate::path::VirtualPath;
use crate::unit::UnitId;

pub mod memory;
pub mod script;

pub use memory::MemoryHost;
pub use script::{ScriptHost, Transcript};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub unit: UnitId,
    /// Registry key of the unit.
    pub key: VirtualPath,
    /// What the host should actually retrieve; differs from `key` only
    /// by a cache-busting token.
    pub location: String,
}

pub type FetchOutcome = Result<(), FetchError>;

/// One-shot completion for a fetch. Dropping it without calling
/// [`succeed`](Self::succeed) or [`fail`](Self::fail) aborts the session
/// with [`FetchError::Abandoned`].
#[derive(Debug)]
pub struct FetchCompletion {
    sender: oneshot::Sender<FetchOutcome>,
}

impl FetchCompletion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<FetchOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, err: FetchError) {
        self.complete(Err(err));
    }

    pub fn complete(self, outcome: FetchOutcome) {
        if self.sender.send(outcome).is_err() {
            tracing::debug!("fetch completed after the session went away");
        }
    }
}

pub trait UnitHost: Send + Sync {
    /// Retrieves the unit at `request.location` and runs its declarative
    /// body against `cx`, then reports through `completion`.
    fn fetch_unit(&self, request: FetchRequest, cx: UnitContext, completion: FetchCompletion);
}

/// How a bundled host delivers completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Complete before `fetch_unit` returns.
    #[default]
    Immediate,
    /// Complete later from a spawned tokio task.
    Deferred,
}
