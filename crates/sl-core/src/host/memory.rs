//! Host whose units are Rust closures registered up front.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use crate::context::UnitContext;
use crate::error::FetchError;
use crate::host::{Delivery, FetchCompletion, FetchOutcome, FetchRequest, UnitHost};
use crate::path::VirtualPath;

/// Declarative body of an in-memory unit.
pub type Prologue = Arc<dyn Fn(&UnitContext) -> Result<(), FetchError> + Send + Sync>;

#[derive(Clone)]
enum Entry {
    Unit(Prologue),
    Failing(String),
}

/// Serves units from a fixed table of prologues.
///
/// ```ignore
/// let host = MemoryHost::new()
///     .unit("/main.js", |cx| {
///         cx.import("./lib.js")?;
///         Ok(())
///     })
///     .unit("/lib.js", |_| Ok(()));
/// ```
#[derive(Clone, Default)]
pub struct MemoryHost {
    entries: HashMap<VirtualPath, Entry>,
    delivery: Delivery,
    requests: Arc<Mutex<Vec<FetchRequest>>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn unit<F>(mut self, key: &str, prologue: F) -> Self
    where
        F: Fn(&UnitContext) -> Result<(), FetchError> + Send + Sync + 'static,
    {
        self.entries
            .insert(VirtualPath::from(key), Entry::Unit(Arc::new(prologue)));
        self
    }

    /// Registers a unit whose fetch always fails with `message`.
    pub fn failing(mut self, key: &str, message: impl Into<String>) -> Self {
        self.entries
            .insert(VirtualPath::from(key), Entry::Failing(message.into()));
        self
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        match self.requests.lock() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn record(&self, request: &FetchRequest) {
        let mut guard = match self.requests.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        guard.push(request.clone());
    }
}

fn run_entry(entry: Option<Entry>, cx: &UnitContext) -> FetchOutcome {
    match entry {
        None => Err(FetchError::NotFound),
        Some(Entry::Failing(message)) => Err(FetchError::Host(message)),
        Some(Entry::Unit(prologue)) => prologue(cx),
    }
}

impl UnitHost for MemoryHost {
    fn fetch_unit(&self, request: FetchRequest, cx: UnitContext, completion: FetchCompletion) {
        self.record(&request);
        let entry = self.entries.get(&request.key).cloned();
        match self.delivery {
            Delivery::Immediate => completion.complete(run_entry(entry, &cx)),
            Delivery::Deferred => match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        tokio::task::yield_now().await;
                        completion.complete(run_entry(entry, &cx));
                    });
                }
                Err(_) => {
                    tracing::warn!("no tokio runtime, completing {} immediately", request.key);
                    completion.complete(run_entry(entry, &cx));
                }
            },
        }
    }
}
