//! Dotted namespace declarations and the shared global object they are
//! materialized into.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::error::{LoaderError, Result};

/// Splits a dotted name, rejecting empty segments.
pub fn split_dotted(dotted: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = dotted.split('.').collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(LoaderError::InvalidNamespaceName(dotted.to_string()));
    }
    Ok(segments)
}

/// Merged tree of every namespace name declared in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceTree {
    children: BTreeMap<String, NamespaceTree>,
}

impl NamespaceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn declare(&mut self, dotted: &str) -> Result<()> {
        let mut node = self;
        for segment in split_dotted(dotted)? {
            node = node.children.entry(segment.to_string()).or_default();
        }
        Ok(())
    }

    pub fn contains(&self, dotted: &str) -> bool {
        let mut node = self;
        for segment in dotted.split('.') {
            match node.children.get(segment) {
                Some(next) => node = next,
                None => return false,
            }
        }
        true
    }

    /// Ensures every declared path exists as a nested object in `scope`.
    /// Values already present are never replaced.
    pub fn materialize(&self, scope: &GlobalScope) {
        let mut guard = scope.lock();
        self.materialize_into(&mut guard);
    }

    fn materialize_into(&self, target: &mut Map<String, Value>) {
        for (name, subtree) in &self.children {
            let slot = target
                .entry(name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = slot {
                subtree.materialize_into(inner);
            }
        }
    }

    fn to_value(&self) -> Value {
        Value::Object(
            self.children
                .iter()
                .map(|(name, subtree)| (name.clone(), subtree.to_value()))
                .collect(),
        )
    }

    /// Declaration statement for exported bundles, e.g.
    /// `var app={"util":{}},lib={};`. Empty when nothing was declared.
    pub fn preamble(&self) -> String {
        if self.children.is_empty() {
            return String::new();
        }
        let bindings = self
            .children
            .iter()
            .map(|(name, subtree)| format!("{}={}", name, subtree.to_value()))
            .join(",");
        format!("var {};", bindings)
    }
}

/// The process-wide object shared by every unit of a session.
#[derive(Clone, Default)]
pub struct GlobalScope {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn get(&self, dotted: &str) -> Option<Value> {
        let guard = self.lock();
        let mut segments = dotted.split('.');
        let mut current = guard.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    pub fn contains(&self, dotted: &str) -> bool {
        self.get(dotted).is_some()
    }

    /// Stores `value` at `dotted`, creating intermediate objects. A
    /// non-object value on the way is replaced by an object.
    pub fn set(&self, dotted: &str, value: Value) -> Result<()> {
        let segments = split_dotted(dotted)?;
        let Some((last, path)) = segments.split_last() else {
            return Err(LoaderError::InvalidNamespaceName(dotted.to_string()));
        };
        let mut guard = self.lock();
        let mut current: &mut Map<String, Value> = &mut *guard;
        for segment in path {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return Err(LoaderError::InvalidNamespaceName(dotted.to_string()));
            };
            current = map;
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.lock().clone())
    }
}

impl std::fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GlobalScope").field(&self.snapshot()).finish()
    }
}
