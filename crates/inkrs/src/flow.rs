//! A "flow" bundles everything specific to one independently-resumable
//! thread of narrative: its call stack, accumulated output, and pending
//! choices. The default story always has exactly one; `SWITCH_FLOW`-style
//! host calls (not reachable from ink source, only the host API) can
//! maintain named alternates.
//!
//! Grounded on `inkpy/runtime/flow.py`.

use crate::call_stack::CallStack;
use crate::choice::Choice;
use crate::output_stream::OutputStream;
use crate::pointer::Pointer;

pub const DEFAULT_FLOW_NAME: &str = "DEFAULT_FLOW";

#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub call_stack: CallStack,
    pub output_stream: OutputStream,
    pub current_choices: Vec<Choice>,
}

impl Flow {
    pub fn new(name: impl Into<String>, start: Pointer) -> Self {
        Self {
            name: name.into(),
            call_stack: CallStack::new(start),
            output_stream: OutputStream::new(),
            current_choices: Vec::new(),
        }
    }
}
