//! Resolution state machine for one load.
//!
//! The session performs no I/O. It hands out [`FetchRequest`]s one at a
//! time and is told what each fetched unit declared, growing the unit tree
//! depth-first until nothing is pending. Then it runs the execution pass
//! (or writes an export bundle) and reports the outcome.
//!
//! ```text
//! BeforeLoad -> Loading -> AfterLoad -> Executed | Exported
//!                  \-> Failed
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{LoaderConfig, Mode};
use crate::constants::ConstantSource;
use crate::context::{Discovery, UnitContext};
use crate::error::{BlockError, FetchError, LoaderError, Result};
use crate::export::{write_bundle, ExportBundle};
use crate::host::FetchRequest;
use crate::namespace::{GlobalScope, NamespaceTree};
use crate::path::{resolve_reference, VirtualPath};
use crate::tree::{TreeSnapshot, UnitTree};
use crate::unit::{UnitId, UnitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    BeforeLoad,
    Loading,
    AfterLoad,
    Executed,
    Exported,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeLoad => "before-load",
            Phase::Loading => "loading",
            Phase::AfterLoad => "after-load",
            Phase::Executed => "executed",
            Phase::Exported => "exported",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Executed | Phase::Exported | Phase::Failed)
    }
}

#[derive(Debug)]
pub enum Progress {
    /// Fetch this unit next.
    Fetch(FetchRequest),
    Finished(SessionOutcome),
}

#[derive(Debug)]
pub enum SessionOutcome {
    Executed(ExecutionReport),
    Exported(ExportBundle),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum SkipReason {
    Environment,
    GuardFalse,
    GuardFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBlock {
    pub unit: VirtualPath,
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBlock {
    pub unit: VirtualPath,
    pub index: usize,
    pub error: String,
}

/// What the execution pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Unit keys in execution order.
    pub order: Vec<VirtualPath>,
    pub blocks_run: usize,
    pub skipped: Vec<SkippedBlock>,
    pub failed: Vec<FailedBlock>,
    pub tree: TreeSnapshot,
}

pub type ReadyCallback = Box<dyn FnOnce() + Send>;
pub type ErrorCallback = Box<dyn FnMut(&LoaderError) + Send>;

static FETCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn cache_bust_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let sequence = FETCH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}{}", millis, sequence)
}

/// Appends `_sl_t<token>` as a query parameter.
pub fn decorate_location(location: &str, token: &str) -> String {
    let separator = if location.contains('?') { '&' } else { '?' };
    format!("{}{}_sl_t{}", location, separator, token)
}

pub struct Session {
    config: LoaderConfig,
    phase: Phase,
    tree: UnitTree,
    /// Unit the next advance starts walking from.
    frontier: Option<UnitId>,
    in_flight: Option<UnitId>,
    namespaces: NamespaceTree,
    global: GlobalScope,
    ready: Vec<ReadyCallback>,
    errors: Vec<ErrorCallback>,
}

impl Session {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            phase: Phase::BeforeLoad,
            tree: UnitTree::new(),
            frontier: None,
            in_flight: None,
            namespaces: NamespaceTree::new(),
            global: GlobalScope::new(),
            ready: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_global(mut self, global: GlobalScope) -> Self {
        self.global = global;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tree(&self) -> &UnitTree {
        &self.tree
    }

    pub fn namespaces(&self) -> &NamespaceTree {
        &self.namespaces
    }

    pub fn global(&self) -> &GlobalScope {
        &self.global
    }

    pub fn frontier(&self) -> Option<UnitId> {
        self.frontier
    }

    /// Queues `callback` for after the execution pass. Runs it right away
    /// when the session has already executed; drops it if the session
    /// failed or exported.
    pub fn on_ready<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.phase {
            Phase::Executed => callback(),
            Phase::Failed | Phase::Exported => {
                tracing::debug!("ready callback dropped, session is {}", self.phase.as_str());
            }
            _ => self.ready.push(Box::new(callback)),
        }
    }

    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(&LoaderError) + Send + 'static,
    {
        self.errors.push(Box::new(callback));
    }

    fn expect_phase(&self, expected: Phase) -> Result<()> {
        if self.phase != expected {
            return Err(LoaderError::InvalidPhase {
                expected: expected.as_str(),
                actual: self.phase.as_str(),
            });
        }
        Ok(())
    }

    /// Starts a run-mode load of `entry`.
    pub fn begin(&mut self, entry: &str) -> Result<FetchRequest> {
        self.start(entry, Mode::Run)
    }

    /// Starts an export of `entry`.
    pub fn begin_export(&mut self, entry: &str) -> Result<FetchRequest> {
        self.start(entry, Mode::Export)
    }

    /// Resolves `entry` against the configured root directory, creates the
    /// root unit and returns its fetch.
    pub fn start(&mut self, entry: &str, mode: Mode) -> Result<FetchRequest> {
        self.expect_phase(Phase::BeforeLoad)?;
        let key = resolve_reference(&self.config.root_directory, entry).map_err(|source| {
            LoaderError::InvalidReference {
                reference: entry.to_string(),
                source,
            }
        })?;
        self.config.mode = mode;
        let root = self.tree.insert_root(key);
        self.frontier = Some(root);
        self.phase = Phase::Loading;
        tracing::info!("loading {} ({:?}, {})", self.tree[root].key, mode, self.config.environment);
        Ok(self.fetch(root))
    }

    fn fetch(&mut self, id: UnitId) -> FetchRequest {
        let unit = &mut self.tree[id];
        unit.state = UnitState::Fetching;
        let key = unit.key.clone();
        let location = if self.config.cache_bust {
            decorate_location(&key.to_string(), &cache_bust_token())
        } else {
            key.to_string()
        };
        tracing::debug!("fetching {} as {}", key, location);
        self.in_flight = Some(id);
        FetchRequest {
            unit: id,
            key,
            location,
        }
    }

    /// Declaration context for the fetch described by `request`.
    pub fn open_context(&self, request: &FetchRequest) -> UnitContext {
        UnitContext::open(
            request.key.clone(),
            request.key.directory(),
            self.config.environment,
        )
    }

    fn check_in_flight(&self, id: UnitId) -> Result<()> {
        if self.phase != Phase::Loading || self.in_flight != Some(id) {
            tracing::warn!(
                "ignoring completion for unit {} while session is {}",
                id,
                self.phase.as_str()
            );
            return Err(LoaderError::InvalidPhase {
                expected: Phase::Loading.as_str(),
                actual: self.phase.as_str(),
            });
        }
        Ok(())
    }

    /// Records what unit `id` declared and moves on to the next pending
    /// unit, or runs the terminal pass once none is left.
    pub fn on_unit_loaded(&mut self, id: UnitId, discovery: Discovery) -> Result<Progress> {
        self.check_in_flight(id)?;
        self.in_flight = None;
        let Discovery {
            imports,
            blocks,
            namespaces,
        } = discovery;

        let directory = self.tree[id].directory.clone();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for reference in &imports {
            match resolve_reference(&directory, reference) {
                Ok(key) => {
                    if seen.insert(key.clone()) {
                        keys.push(key);
                    }
                }
                Err(source) => {
                    let err = LoaderError::InvalidReference {
                        reference: reference.clone(),
                        source,
                    };
                    let key = self.tree[id].key.clone();
                    return Err(self.fail(key, FetchError::from(err)));
                }
            }
        }

        let mut declared = Vec::with_capacity(namespaces.len());
        for name in namespaces {
            match self.namespaces.declare(&name) {
                Ok(()) => declared.push(name),
                Err(err) => tracing::warn!("{}: {}", self.tree[id].key, err),
            }
        }

        for key in keys {
            self.attach(id, key);
        }

        let unit = &mut self.tree[id];
        unit.imports = imports;
        unit.blocks = blocks;
        unit.namespaces = declared;
        unit.state = UnitState::Loaded;
        tracing::debug!(
            "loaded {} ({} children, {} blocks)",
            unit.key,
            unit.children.len(),
            unit.blocks.len()
        );
        self.frontier = Some(id);
        self.advance()
    }

    fn attach(&mut self, parent: UnitId, key: VirtualPath) {
        let Some(existing) = self.tree.lookup(&key) else {
            let child = self.tree.insert_child(parent, key);
            tracing::debug!("attached {} under {}", self.tree[child].key, self.tree[parent].key);
            return;
        };
        let unit = &self.tree[existing];
        if unit.state.is_fetched() {
            tracing::debug!("{} already {:?}, not attached again", unit.key, unit.state);
            return;
        }
        if unit.parent == Some(parent) {
            return;
        }
        tracing::debug!(
            "moving pending {} under {}",
            self.tree[existing].key,
            self.tree[parent].key
        );
        self.tree.reparent(existing, parent);
    }

    /// Walks up from the frontier to the first unit with an unvisited
    /// child and fetches that child.
    fn advance(&mut self) -> Result<Progress> {
        let mut current = self.frontier;
        while let Some(id) = current {
            let unit = &mut self.tree[id];
            if unit.has_unvisited_children() {
                let child = unit.children[unit.cursor];
                unit.cursor += 1;
                if self.tree[child].state == UnitState::Pending {
                    self.frontier = Some(id);
                    return Ok(Progress::Fetch(self.fetch(child)));
                }
                continue;
            }
            current = unit.parent;
        }
        self.frontier = None;
        self.finish().map(Progress::Finished)
    }

    fn finish(&mut self) -> Result<SessionOutcome> {
        self.phase = Phase::AfterLoad;
        tracing::info!("resolved {} units", self.tree.len());
        let root = self.tree.root().ok_or(LoaderError::InvalidPhase {
            expected: Phase::Loading.as_str(),
            actual: Phase::AfterLoad.as_str(),
        })?;
        match self.config.mode {
            Mode::Run => {
                let report = self.execute(root);
                self.phase = Phase::Executed;
                tracing::info!(
                    "executed {} blocks ({} skipped, {} failed)",
                    report.blocks_run,
                    report.skipped.len(),
                    report.failed.len()
                );
                for callback in std::mem::take(&mut self.ready) {
                    callback();
                }
                Ok(SessionOutcome::Executed(report))
            }
            Mode::Export => {
                let tree = self.tree.snapshot_of(root);
                let bundle =
                    write_bundle(&self.tree, &self.namespaces, self.config.environment, tree);
                self.phase = Phase::Exported;
                self.ready.clear();
                tracing::info!("exported {} bytes", bundle.code.len());
                Ok(SessionOutcome::Exported(bundle))
            }
        }
    }

    fn execute(&mut self, root: UnitId) -> ExecutionReport {
        self.namespaces.materialize(&self.global);
        let environment = self.config.environment;
        let mut order = Vec::new();
        let mut blocks_run = 0;
        let mut skipped = Vec::new();
        let mut failed = Vec::new();

        for id in self.tree.post_order() {
            let mut blocks = std::mem::take(&mut self.tree[id].blocks);
            let unit = &self.tree[id];
            for (index, block) in blocks.iter_mut().enumerate() {
                let skip = |reason| SkippedBlock {
                    unit: unit.key.clone(),
                    index,
                    reason,
                };
                if !block.admits(environment) {
                    skipped.push(skip(SkipReason::Environment));
                    continue;
                }
                if let Some(guard) = &block.guard {
                    match guard() {
                        Ok(true) => {}
                        Ok(false) => {
                            skipped.push(skip(SkipReason::GuardFalse));
                            continue;
                        }
                        Err(source) => {
                            let err = LoaderError::GuardEvaluationFailure {
                                key: unit.key.clone(),
                                index,
                                source,
                            };
                            tracing::warn!("{}", err);
                            skipped.push(skip(SkipReason::GuardFailed(err.to_string())));
                            continue;
                        }
                    }
                }
                let Some(body) = block.body.take() else {
                    continue;
                };
                let bindings = ConstantSource {
                    unit,
                    environment,
                    global: &self.global,
                }
                .bind(&block.constants);
                match body(&bindings) {
                    Ok(()) => blocks_run += 1,
                    Err(BlockError(message)) => {
                        tracing::error!("block {} of {} failed: {}", index, unit.key, message);
                        failed.push(FailedBlock {
                            unit: unit.key.clone(),
                            index,
                            error: message,
                        });
                    }
                }
            }
            order.push(unit.key.clone());
            let unit = &mut self.tree[id];
            unit.blocks = blocks;
            unit.state = UnitState::Executed;
        }
        ExecutionReport {
            order,
            blocks_run,
            skipped,
            failed,
            tree: self.tree.snapshot_of(root),
        }
    }

    /// Aborts the session because unit `id` could not be fetched.
    pub fn on_unit_failed(&mut self, id: UnitId, error: FetchError) -> LoaderError {
        if let Err(err) = self.check_in_flight(id) {
            return err;
        }
        let key = self.tree[id].key.clone();
        self.fail(key, error)
    }

    fn fail(&mut self, key: VirtualPath, source: FetchError) -> LoaderError {
        let err = LoaderError::FetchFailure { key, source };
        tracing::error!("{}", err);
        self.tree.clear();
        self.namespaces = NamespaceTree::new();
        self.ready.clear();
        self.frontier = None;
        self.in_flight = None;
        self.phase = Phase::Failed;
        for callback in &mut self.errors {
            callback(&err);
        }
        err
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("units", &self.tree.len())
            .field("frontier", &self.frontier)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
