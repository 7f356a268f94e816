//! The full mutable state of a running story: variables, the active flow(s),
//! container visit bookkeeping, the evaluation stack, and the deterministic
//! PRNG used by the `RANDOM` native function.
//!
//! Grounded on `inkpy/runtime/state.py`.

use std::collections::HashMap;

use crate::arena::NodeId;
use crate::choice::Choice;
use crate::error::{Error, Result, Warning};
use crate::flow::{Flow, DEFAULT_FLOW_NAME};
use crate::pointer::Pointer;
use crate::value::Value;
use crate::variables_state::VariablesState;

/// Save-state format version. Bumped whenever the persisted JSON shape
/// changes in a way old saves can't be read back into.
pub const SAVE_STATE_VERSION: u32 = 9;
pub const MIN_COMPATIBLE_SAVE_STATE_VERSION: u32 = 8;

#[derive(Debug, Clone)]
pub struct State {
    pub current_flow: Flow,
    pub named_flows: HashMap<String, Flow>,
    pub variables_state: VariablesState,
    pub visit_counts: HashMap<NodeId, i32>,
    pub turn_indices: HashMap<NodeId, i32>,
    pub current_turn_index: i32,
    pub story_seed: i32,
    pub previous_random: i32,
    pub did_safe_exit: bool,
    pub diverted_pointer: Pointer,
    pub current_errors: Vec<String>,
    pub current_warnings: Vec<Warning>,
    pub evaluation_stack: Vec<Value>,
    /// Function calls evaluated purely for their return value (e.g. the
    /// host API's `evaluate_function`) redirect narrative output here
    /// instead of the visible output stream.
    pub in_expression_evaluation: bool,
}

impl State {
    pub fn new(start: Pointer, globals: HashMap<String, Value>, seed: i32) -> Self {
        Self {
            current_flow: Flow::new(DEFAULT_FLOW_NAME, start),
            named_flows: HashMap::new(),
            variables_state: VariablesState::new(globals),
            visit_counts: HashMap::new(),
            turn_indices: HashMap::new(),
            current_turn_index: -1,
            story_seed: seed,
            previous_random: seed,
            did_safe_exit: false,
            diverted_pointer: Pointer::NULL,
            current_errors: Vec::new(),
            current_warnings: Vec::new(),
            evaluation_stack: Vec::new(),
            in_expression_evaluation: false,
        }
    }

    pub fn call_stack(&self) -> &crate::call_stack::CallStack {
        &self.current_flow.call_stack
    }

    pub fn call_stack_mut(&mut self) -> &mut crate::call_stack::CallStack {
        &mut self.current_flow.call_stack
    }

    pub fn output_stream(&self) -> &crate::output_stream::OutputStream {
        &self.current_flow.output_stream
    }

    pub fn output_stream_mut(&mut self) -> &mut crate::output_stream::OutputStream {
        &mut self.current_flow.output_stream
    }

    pub fn current_choices_mut(&mut self) -> &mut Vec<Choice> {
        &mut self.current_flow.current_choices
    }

    pub fn current_choices(&self) -> &[Choice] {
        &self.current_flow.current_choices
    }

    pub fn push_eval(&mut self, value: Value) {
        self.evaluation_stack.push(value);
    }

    pub fn pop_eval(&mut self) -> Result<Value> {
        self.evaluation_stack.pop().ok_or_else(|| Error::Assertion("evaluation stack underflow".into()))
    }

    pub fn peek_eval(&self) -> Option<&Value> {
        self.evaluation_stack.last()
    }

    pub fn visit_count(&self, container: NodeId) -> i32 {
        if let Some(patch) = &self.variables_state.patch {
            if let Some(v) = patch.visit_count(container) {
                return v;
            }
        }
        self.visit_counts.get(&container).copied().unwrap_or(0)
    }

    pub fn increment_visit_count(&mut self, container: NodeId) {
        let next = self.visit_count(container) + 1;
        if let Some(patch) = &mut self.variables_state.patch {
            patch.set_visit_count(container, next);
        } else {
            self.visit_counts.insert(container, next);
        }
    }

    pub fn record_turn_index(&mut self, container: NodeId) {
        let turn = self.current_turn_index;
        if let Some(patch) = &mut self.variables_state.patch {
            patch.set_turn_index(container, turn);
        } else {
            self.turn_indices.insert(container, turn);
        }
    }

    /// Turns elapsed since `container` was last visited, or `-1` if never
    /// visited.
    pub fn turns_since(&self, container: NodeId) -> i32 {
        let recorded = self
            .variables_state
            .patch
            .as_ref()
            .and_then(|p| p.turn_index(container))
            .or_else(|| self.turn_indices.get(&container).copied());
        match recorded {
            Some(turn) => self.current_turn_index - turn,
            None => -1,
        }
    }

    /// Advance the engine-owned deterministic PRNG one step and return the
    /// new value. A simple linear congruential generator, not `rand`'s
    /// thread-local generator, so the same seed always reproduces the same
    /// sequence across platforms.
    pub fn next_random(&mut self) -> i32 {
        let next = (self.previous_random as i64)
            .wrapping_mul(1_103_515_245)
            .wrapping_add(12_345)
            & 0x7fff_ffff;
        self.previous_random = next as i32;
        self.previous_random
    }

    pub fn random_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = (max - min) as i64;
        min + (self.next_random() as i64).rem_euclid(span)
    }

    pub fn switch_to_flow_named(&mut self, name: &str, start: Pointer) {
        if self.current_flow.name == name {
            return;
        }
        let previous = std::mem::replace(&mut self.current_flow, Flow::new(name, start));
        let next = self.named_flows.remove(name).unwrap_or_else(|| Flow::new(name, start));
        self.named_flows.insert(previous.name.clone(), previous);
        self.current_flow = next;
    }

    pub fn remove_flow_named(&mut self, name: &str) {
        self.named_flows.remove(name);
    }

    /// A full structural copy, taken before speculating past a newline that
    /// might turn out not to be the end of the line after all (glue may
    /// still absorb it). [`Self::restore`] rewinds to it if the speculation
    /// doesn't pan out.
    pub fn snapshot(&self) -> State {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: State) {
        *self = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_restore_discards_changes_made_after_it() {
        let mut state = State::new(Pointer::NULL, HashMap::new(), 0);
        state.variables_state.set_global("x", Value::Int(1));
        let snapshot = state.snapshot();

        state.variables_state.set_global("x", Value::Int(2));
        state.output_stream_mut().push_text("hello");
        assert_eq!(state.variables_state.get_global("x"), Some(Value::Int(2)));

        state.restore(snapshot);
        assert_eq!(state.variables_state.get_global("x"), Some(Value::Int(1)));
        assert!(!state.output_stream().has_content());
    }
}
