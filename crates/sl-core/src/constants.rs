//! Environment-derived values injected into code blocks by name.

use std::fmt;

use crate::config::Environment;
use crate::namespace::GlobalScope;
use crate::unit::Unit;

pub const DIRECTORY: &str = "SL_DIRECTORY";
pub const GLOBAL: &str = "SL_GLOBAL";
pub const ENVIRONMENT: &str = "SL_ENVIRONMENT";
pub const FOREGROUND: &str = "SL_FOREGROUND";
pub const BACKGROUND: &str = "SL_BACKGROUND";
pub const WINDOW: &str = "SL_WINDOW";
pub const WORKER: &str = "SL_WORKER";

#[derive(Clone, Debug)]
pub enum ConstantValue {
    Text(String),
    Flag(bool),
    Global(GlobalScope),
}

impl ConstantValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConstantValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ConstantValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<&GlobalScope> {
        match self {
            ConstantValue::Global(scope) => Some(scope),
            _ => None,
        }
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Text(text) => f.write_str(text),
            ConstantValue::Flag(flag) => write!(f, "{}", flag),
            ConstantValue::Global(scope) => write!(f, "{}", scope.snapshot()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConstantLookup {
    pub exists: bool,
    pub value: Option<ConstantValue>,
}

impl ConstantLookup {
    fn found(value: ConstantValue) -> Self {
        Self {
            exists: true,
            value: Some(value),
        }
    }

    fn missing() -> Self {
        Self {
            exists: false,
            value: None,
        }
    }
}

/// Everything a constant can be derived from.
pub struct ConstantSource<'a> {
    pub unit: &'a Unit,
    pub environment: Environment,
    pub global: &'a GlobalScope,
}

impl ConstantSource<'_> {
    pub fn lookup(&self, name: &str) -> ConstantLookup {
        match name {
            DIRECTORY => ConstantLookup::found(ConstantValue::Text(directory_text(self.unit))),
            GLOBAL => ConstantLookup::found(ConstantValue::Global(self.global.clone())),
            ENVIRONMENT => {
                ConstantLookup::found(ConstantValue::Text(self.environment.to_string()))
            }
            FOREGROUND | WINDOW => ConstantLookup::found(ConstantValue::Flag(
                self.environment == Environment::Foreground,
            )),
            BACKGROUND | WORKER => ConstantLookup::found(ConstantValue::Flag(
                self.environment == Environment::Background,
            )),
            _ => ConstantLookup::missing(),
        }
    }

    /// Binds every requested name, in order. Unknown names bind to `None`.
    pub fn bind(&self, names: &[String]) -> Bindings {
        Bindings {
            entries: names
                .iter()
                .map(|name| (name.clone(), self.lookup(name).value))
                .collect(),
        }
    }
}

fn directory_text(unit: &Unit) -> String {
    let dir = unit.directory.to_string();
    if dir.ends_with('/') {
        dir
    } else {
        format!("{}/", dir)
    }
}

/// Values handed to a code block body, keyed by the names it requested.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    entries: Vec<(String, Option<ConstantValue>)>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&ConstantValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Whether `name` was requested, bound or not.
    pub fn requested(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn directory(&self) -> Option<&str> {
        self.get(DIRECTORY).and_then(ConstantValue::as_text)
    }

    pub fn global(&self) -> Option<&GlobalScope> {
        self.get(GLOBAL).and_then(ConstantValue::as_global)
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ConstantValue::as_flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ConstantValue>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }
}
