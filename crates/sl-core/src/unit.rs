use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Environment;
use crate::constants::Bindings;
use crate::error::BlockError;
use crate::path::VirtualPath;

/// Index of a unit in its session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub(crate) usize);

impl UnitId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Discovered, not yet fetched. May still be re-parented.
    Pending,
    Fetching,
    /// Declarative body has run; position in the tree is final.
    Loaded,
    Executed,
}

impl UnitState {
    /// Whether the unit's source has been handed to the host already.
    pub fn is_fetched(&self) -> bool {
        *self >= UnitState::Fetching
    }
}

/// One loadable source file.
#[derive(Debug)]
pub struct Unit {
    pub key: VirtualPath,
    pub directory: VirtualPath,
    pub state: UnitState,
    pub imports: Vec<String>,
    pub blocks: Vec<CodeBlock>,
    pub namespaces: Vec<String>,
    pub parent: Option<UnitId>,
    pub children: Vec<UnitId>,
    /// Next child to fetch.
    pub cursor: usize,
}

impl Unit {
    pub fn new(key: VirtualPath) -> Self {
        let directory = key.directory();
        Self {
            key,
            directory,
            state: UnitState::Pending,
            imports: Vec::new(),
            blocks: Vec::new(),
            namespaces: Vec::new(),
            parent: None,
            children: Vec::new(),
            cursor: 0,
        }
    }

    pub fn has_unvisited_children(&self) -> bool {
        self.cursor < self.children.len()
    }
}

pub type Guard = Box<dyn Fn() -> Result<bool, BlockError> + Send>;
pub type BlockBody = Box<dyn FnOnce(&Bindings) -> Result<(), BlockError> + Send>;

/// Executable fragment declared by a unit.
///
/// `source` is the text written into exported bundles; `body` is what runs
/// in the execution pass. A block runs at most once.
pub struct CodeBlock {
    pub source: String,
    pub(crate) body: Option<BlockBody>,
    /// `None` admits every environment.
    pub environments: Option<Vec<Environment>>,
    pub(crate) guard: Option<Guard>,
    pub constants: Vec<String>,
}

impl CodeBlock {
    pub fn new<F>(source: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&Bindings) -> Result<(), BlockError> + Send + 'static,
    {
        Self {
            source: source.into(),
            body: Some(Box::new(body)),
            environments: None,
            guard: None,
            constants: Vec::new(),
        }
    }

    pub fn in_environments<I>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = Environment>,
    {
        self.environments = Some(environments.into_iter().collect());
        self
    }

    pub fn guarded<G>(mut self, guard: G) -> Self
    where
        G: Fn() -> Result<bool, BlockError> + Send + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    pub fn with_constants<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constants = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn admits(&self, environment: Environment) -> bool {
        self.environments
            .as_ref()
            .map_or(true, |envs| envs.contains(&environment))
    }
}

impl fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBlock")
            .field("source", &self.source)
            .field("environments", &self.environments)
            .field("guard", &self.guard.is_some())
            .field("constants", &self.constants)
            .field("spent", &self.body.is_none())
            .finish()
    }
}
