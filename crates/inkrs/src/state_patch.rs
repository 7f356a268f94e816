//! A scratch overlay of pending global-variable and visit-count writes made
//! while evaluating inside a temporary context (a choice's condition, or
//! speculative content that may be torn down by a snapshot/rewind).
//!
//! Grounded on `inkpy/runtime/state_patch.py`.

use std::collections::{HashMap, HashSet};

use crate::arena::NodeId;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub globals: HashMap<String, Value>,
    pub changed_variables: HashSet<String>,
    pub visit_counts: HashMap<NodeId, i32>,
    pub turn_indices: HashMap<NodeId, i32>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the overlay forward into a fresh patch, used when a patch is
    /// kept alive across an evaluation boundary instead of applied.
    pub fn carry_forward(&self) -> Self {
        self.clone()
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.changed_variables.insert(name.clone());
        self.globals.insert(name, value);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_visit_count(&mut self, container: NodeId, count: i32) {
        self.visit_counts.insert(container, count);
    }

    pub fn visit_count(&self, container: NodeId) -> Option<i32> {
        self.visit_counts.get(&container).copied()
    }

    pub fn set_turn_index(&mut self, container: NodeId, index: i32) {
        self.turn_indices.insert(container, index);
    }

    pub fn turn_index(&self, container: NodeId) -> Option<i32> {
        self.turn_indices.get(&container).copied()
    }
}
