//! Arena of units plus the key registry used for deduplication.
//!
//! Units are addressed by [`UnitId`]; the parent link is a plain index, so
//! moving a pending unit under a new importer is a pointer update plus a
//! removal from the old parent's child list.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::path::VirtualPath;
use crate::unit::{Unit, UnitId, UnitState};

#[derive(Debug, Default)]
pub struct UnitTree {
    units: Vec<Unit>,
    registry: HashMap<VirtualPath, UnitId>,
    root: Option<UnitId>,
}

impl UnitTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<UnitId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn lookup(&self, key: &VirtualPath) -> Option<UnitId> {
        self.registry.get(key).copied()
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id.0)
    }

    fn push(&mut self, key: VirtualPath) -> UnitId {
        let id = UnitId(self.units.len());
        self.registry.insert(key.clone(), id);
        self.units.push(Unit::new(key));
        id
    }

    /// Replaces any previous content with a single root unit.
    pub fn insert_root(&mut self, key: VirtualPath) -> UnitId {
        self.clear();
        let id = self.push(key);
        self.root = Some(id);
        id
    }

    /// Registers a new unit and appends it to `parent`'s children.
    ///
    /// The key must not be registered yet.
    pub fn insert_child(&mut self, parent: UnitId, key: VirtualPath) -> UnitId {
        debug_assert!(!self.registry.contains_key(&key), "duplicate unit {key}");
        let id = self.push(key);
        self.attach(parent, id);
        id
    }

    /// Moves a not-yet-fetched unit under `new_parent`, at the end of its
    /// children.
    pub fn reparent(&mut self, child: UnitId, new_parent: UnitId) {
        debug_assert_eq!(self[child].state, UnitState::Pending);
        self.detach(child);
        self.attach(new_parent, child);
    }

    fn attach(&mut self, parent: UnitId, child: UnitId) {
        self[parent].children.push(child);
        self[child].parent = Some(parent);
    }

    fn detach(&mut self, child: UnitId) {
        let Some(parent) = self[child].parent.take() else {
            return;
        };
        let siblings = &mut self[parent].children;
        if let Some(pos) = siblings.iter().position(|&c| c == child) {
            siblings.remove(pos);
        }
    }

    /// Every unit reachable from the root, children before their parent.
    pub fn post_order(&self) -> Vec<UnitId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        let mut order = Vec::with_capacity(self.units.len());
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in self[id].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    pub fn snapshot(&self) -> Option<TreeSnapshot> {
        self.root.map(|root| self.snapshot_of(root))
    }

    pub fn snapshot_of(&self, id: UnitId) -> TreeSnapshot {
        let unit = &self[id];
        TreeSnapshot {
            key: unit.key.clone(),
            state: unit.state,
            children: unit
                .children
                .iter()
                .map(|&child| self.snapshot_of(child))
                .collect(),
        }
    }

    pub fn clear(&mut self) {
        self.units.clear();
        self.registry.clear();
        self.root = None;
    }
}

impl Index<UnitId> for UnitTree {
    type Output = Unit;

    fn index(&self, id: UnitId) -> &Unit {
        &self.units[id.0]
    }
}

impl IndexMut<UnitId> for UnitTree {
    fn index_mut(&mut self, id: UnitId) -> &mut Unit {
        &mut self.units[id.0]
    }
}

/// Owned copy of the resolved tree's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub key: VirtualPath,
    pub state: UnitState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeSnapshot>,
}

impl TreeSnapshot {
    pub fn find(&self, key: &VirtualPath) -> Option<&TreeSnapshot> {
        if &self.key == key {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(key))
    }

    pub fn child_keys(&self) -> Vec<&VirtualPath> {
        self.children.iter().map(|c| &c.key).collect()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.key, indent = depth * 2)?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for TreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
