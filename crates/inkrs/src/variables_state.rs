//! Global and temporary variable storage, with a three-tier read order: an
//! in-flight [`StatePatch`] overlay, then committed globals, then the
//! snapshot of default values taken at load time.
//!
//! Grounded on `inkpy/runtime/variables_state.py`.

use std::collections::{HashMap, HashSet};

use crate::call_stack::CallStack;
use crate::error::{Error, Result, Warning};
use crate::state_patch::StatePatch;
use crate::value::Value;

/// Invoked whenever a global variable's value changes, observed or batched
/// per [`VariablesState::batch_observing_variable_changes`].
pub type Observer = Box<dyn FnMut(&str, &Value) + Send>;

#[derive(Default)]
pub struct VariablesState {
    globals: HashMap<String, Value>,
    default_globals: HashMap<String, Value>,
    pub patch: Option<StatePatch>,
    batch_observing: bool,
    changed_variables_for_batch: HashSet<String>,
    observers: HashMap<String, Vec<Observer>>,
}

impl std::fmt::Debug for VariablesState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariablesState")
            .field("globals", &self.globals)
            .field("patch", &self.patch)
            .finish_non_exhaustive()
    }
}

impl Clone for VariablesState {
    fn clone(&self) -> Self {
        Self {
            globals: self.globals.clone(),
            default_globals: self.default_globals.clone(),
            patch: self.patch.clone(),
            batch_observing: self.batch_observing,
            changed_variables_for_batch: self.changed_variables_for_batch.clone(),
            observers: HashMap::new(),
        }
    }
}

impl VariablesState {
    pub fn new(globals: HashMap<String, Value>) -> Self {
        let default_globals = globals.clone();
        Self { globals, default_globals, ..Default::default() }
    }

    pub fn global_variable_exists(&self, name: &str) -> bool {
        self.default_globals.contains_key(name)
    }

    pub fn snapshot_default_globals(&mut self) {
        self.default_globals = self.globals.clone();
    }

    pub fn clone_default_globals(&self) -> HashMap<String, Value> {
        self.default_globals.clone()
    }

    /// A copy of the currently committed globals, used to re-seed a fresh
    /// [`VariablesState`] after running global declarations once at load
    /// time (see `Story::from_json`).
    pub fn clone_globals_for_restart(&self) -> HashMap<String, Value> {
        self.globals.clone()
    }

    /// Replace committed globals wholesale from a loaded save, discarding
    /// any in-flight patch (a save is only ever taken at a settled point).
    pub fn restore_globals(&mut self, globals: HashMap<String, Value>) {
        self.globals = globals;
        self.patch = None;
    }

    /// Read a global variable honoring patch > globals > default-globals
    /// resolution order. Falling back to the default snapshot only happens
    /// if a variable was never committed, which shouldn't occur for a
    /// well-formed story and is surfaced as a warning upstream.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        if let Some(patch) = &self.patch {
            if let Some(v) = patch.global(name) {
                return Some(v.clone());
            }
        }
        self.globals.get(name).cloned().or_else(|| self.default_globals.get(name).cloned())
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let old = self.get_global(&name);
        if let Some(patch) = &mut self.patch {
            patch.set_global(name.clone(), value.clone());
        } else {
            self.globals.insert(name.clone(), value.clone());
        }
        if old.as_ref() != Some(&value) {
            self.notify_observers(&name, &value);
        }
    }

    /// Apply a patch's globals into committed storage and drop it, called
    /// when a speculative evaluation (e.g. a choice condition) commits.
    pub fn apply_patch(&mut self) {
        if let Some(patch) = self.patch.take() {
            for (name, value) in patch.globals {
                self.globals.insert(name, value);
            }
        }
    }

    pub fn start_patch(&mut self) {
        self.patch = Some(StatePatch::new());
    }

    pub fn discard_patch(&mut self) {
        self.patch = None;
    }

    /// Assign to either a global or the innermost temporary variable scope,
    /// mirroring ink's rule that assignment targets whichever kind of
    /// variable already exists, defaulting to a new temporary declaration.
    pub fn assign(
        &mut self,
        name: &str,
        value: Value,
        is_new_declaration: bool,
        is_global: bool,
        call_stack: &mut CallStack,
    ) -> Result<()> {
        if is_global || (!is_new_declaration && self.global_variable_exists(name)) {
            self.set_global(name.to_string(), value);
            return Ok(());
        }
        call_stack.set_temporary_variable(name.to_string(), value, is_new_declaration, 0)
    }

    /// Full variable read used by `VariableReference` evaluation: checks
    /// temporaries in the current call-stack context first, then globals.
    pub fn get_variable(&self, name: &str, call_stack: &CallStack) -> Result<Value> {
        if let Some(value) = call_stack.temporary_variable(name, 0) {
            return Ok(value.clone());
        }
        if let Some(value) = self.get_global(name) {
            return Ok(value);
        }
        Err(Error::Story(format!("variable not found: '{name}'")))
    }

    pub fn set_batch_observing(&mut self, enabled: bool) {
        self.batch_observing = enabled;
        if !enabled {
            self.changed_variables_for_batch.clear();
        }
    }

    pub fn observe_variable(&mut self, name: impl Into<String>, observer: Observer) {
        self.observers.entry(name.into()).or_default().push(observer);
    }

    fn notify_observers(&mut self, name: &str, value: &Value) {
        if self.batch_observing {
            self.changed_variables_for_batch.insert(name.to_string());
            return;
        }
        self.dispatch(name, value);
    }

    fn dispatch(&mut self, name: &str, value: &Value) {
        if let Some(callbacks) = self.observers.get_mut(name) {
            for callback in callbacks {
                callback(name, value);
            }
        }
    }

    /// Flush any variable changes accumulated while batch-observing was
    /// enabled, called once evaluation reaches a stable point.
    pub fn flush_batched_observers(&mut self) {
        let names: Vec<String> = self.changed_variables_for_batch.drain().collect();
        for name in names {
            if let Some(value) = self.get_global(&name) {
                self.dispatch(&name, &value);
            }
        }
    }

    pub fn warning_for_missing_global(name: &str) -> Warning {
        Warning::new(format!("variable '{name}' was never declared and has no value"))
    }
}
