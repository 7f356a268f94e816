//! The runtime choice type surfaced to the host once a line has finished
//! evaluating.
//!
//! Grounded on `inkpy/runtime/choice.py`.

use crate::arena::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// The text presented to the player (start content + choice-only
    /// content, with the square-bracket-only portion stripped).
    pub text: String,
    /// Where execution resumes if this choice is picked, already resolved
    /// against the choice point's own context.
    pub target: NodeId,
    /// Tags attached to the choice line itself.
    pub tags: Vec<String>,
    /// The index of the thread this choice's call-stack context was forked
    /// from, so a pick can restore the right calling context.
    pub original_thread_index: u32,
    /// `true` for an invisible default choice auto-selected when it's the
    /// only one left.
    pub is_invisible_default: bool,
}

impl Choice {
    pub fn new(text: String, target: NodeId, tags: Vec<String>, thread_index: u32) -> Self {
        Self { text, target, tags, original_thread_index: thread_index, is_invisible_default: false }
    }
}
