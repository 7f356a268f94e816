//! The evaluator: a tree-walking stack machine that steps through a loaded
//! story's node graph, producing narrative text and choices.
//!
//! Grounded on `vm.rs`'s overall fetch/execute loop shape (a `step` that
//! dispatches on the current instruction, a call stack of frames, an
//! explicit evaluation stack) adapted to ink's content model per
//! `inkpy/runtime/story.py` and `state.py`.

use std::collections::HashMap;

use crate::arena::{Arena, NodeId};
use crate::call_stack::PushPopType;
use crate::choice::Choice;
use crate::error::{Error, Result, Warning};
use crate::list::{InkListItem, ListDefinitions};
use crate::loader::{self, LoadedStory};
use crate::native_functions;
use crate::node::{ControlCommandKind, NodeKind};
use crate::path::{Component, Path};
use crate::pointer::Pointer;
use crate::profiler::Profiler;
use crate::state::State;
use crate::value::Value;

/// A host-bound function invoked by an `EXTERNAL` declaration.
pub type ExternalFunction = Box<dyn FnMut(&[Value]) -> Result<Value> + Send>;

/// A bound external plus whether it's safe to call while the evaluator is
/// speculatively stepping past a not-yet-committed newline (see
/// [`Story::cont`]). A function with side effects the host can't undo
/// (writing a file, mutating other game state) should be registered unsafe
/// so it only ever runs once execution is certain.
struct ExternalBinding {
    function: ExternalFunction,
    lookahead_unsafe: bool,
}

/// Budget on the number of steps a single [`Story::continue_maximally`] call
/// (or `EvaluateFunction`) may take before it's assumed to be stuck in a
/// loop with no narrative progress.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_steps_per_continue: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_steps_per_continue: 1_000_000 }
    }
}

pub struct Story {
    arena: Arena,
    root: NodeId,
    list_definitions: ListDefinitions,
    state: State,
    externals: HashMap<String, ExternalBinding>,
    has_validated_externals: bool,
    allow_external_function_fallbacks: bool,
    profiler: Option<Profiler>,
    limits: Limits,
    eval_depth: i32,
    string_capture_marks: Vec<usize>,
}

impl Story {
    /// Load a compiled ink JSON document and run its global variable
    /// declarations once to establish default values.
    pub fn from_json(json_text: &str) -> Result<Self> {
        let LoadedStory { arena, root, list_definitions } = loader::load(json_text)?;

        let mut story = Self {
            arena,
            root,
            list_definitions,
            state: State::new(Pointer::start_of(root), HashMap::new(), 0),
            externals: HashMap::new(),
            has_validated_externals: false,
            allow_external_function_fallbacks: true,
            profiler: None,
            limits: Limits::default(),
            eval_depth: 0,
            string_capture_marks: Vec::new(),
        };
        story.run_global_decls()?;
        story.state = State::new(Pointer::start_of(root), story.state.variables_state.clone_globals_for_restart(), 0);
        story.state.variables_state.snapshot_default_globals();
        Ok(story)
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Execute the `"global decl"` knot, if present, so default global
    /// values are established once before the story proper starts.
    fn run_global_decls(&mut self) -> Result<()> {
        let Some(decl) = self.arena.get(self.root).as_container().and_then(|c| c.named_content("global decl")) else {
            return Ok(());
        };
        self.state.call_stack_mut().set_current_pointer(Pointer::start_of(decl));
        while self.single_step()? {}
        self.state.output_stream_mut().clear();
        self.state.call_stack_mut().reset_to_single_thread(Pointer::start_of(self.root));
        Ok(())
    }

    /// Bind a host function to an `EXTERNAL` declaration. `lookahead_unsafe`
    /// should be `true` for a function with side effects the engine can't
    /// safely perform twice or speculatively; such a binding is deferred
    /// until [`Story::cont`]'s end-of-line lookahead has committed to the
    /// line it's being called from.
    pub fn bind_external_function(&mut self, name: impl Into<String>, lookahead_unsafe: bool, f: ExternalFunction) {
        self.externals.insert(name.into(), ExternalBinding { function: f, lookahead_unsafe });
        self.has_validated_externals = false;
    }

    /// Whether a missing external binding is tolerated when the story
    /// provides a same-named ink knot as a fallback implementation.
    /// Defaults to `true`, matching ink's own default.
    pub fn set_allow_external_function_fallbacks(&mut self, allow: bool) {
        self.allow_external_function_fallbacks = allow;
        self.has_validated_externals = false;
    }

    pub fn observe_variable(&mut self, name: impl Into<String>, observer: crate::variables_state::Observer) {
        self.state.variables_state.observe_variable(name, observer);
    }

    pub fn start_profiling(&mut self) {
        self.profiler = Some(Profiler::new());
    }

    pub fn end_profiling(&mut self) -> Option<crate::profiler::Report> {
        self.profiler.take().map(|p| p.report())
    }

    pub fn has_error(&self) -> bool {
        !self.state.current_errors.is_empty()
    }

    pub fn has_warning(&self) -> bool {
        !self.state.current_warnings.is_empty()
    }

    pub fn current_errors(&self) -> &[String] {
        &self.state.current_errors
    }

    pub fn current_warnings(&self) -> &[Warning] {
        &self.state.current_warnings
    }

    pub fn current_tags(&self) -> Vec<String> {
        self.state.output_stream().current_tags()
    }

    pub fn current_choices(&self) -> &[Choice] {
        self.state.current_choices()
    }

    pub fn can_continue(&self) -> bool {
        !self.state.call_stack().current_pointer().is_null()
    }

    /// Advance until one line of narrative text (or the story's natural
    /// end) has been produced, returning that line.
    ///
    /// A newline doesn't necessarily mean the line is over: glue immediately
    /// after it can join it to what follows. So once the stream ends in a
    /// newline, a [`State`] snapshot is taken and stepping continues
    /// speculatively; [`classify_newline_output_change`] then decides
    /// whether to rewind to that snapshot (the newline really was the end)
    /// or discard it and keep going (glue ate it).
    pub fn cont(&mut self) -> Result<String> {
        if !self.has_validated_externals {
            self.validate_external_bindings()?;
        }
        self.state.output_stream_mut().clear();
        self.state.current_choices_mut().clear();
        self.state.current_turn_index += 1;
        self.state.variables_state.set_batch_observing(true);

        let mut steps = 0u64;
        'outer: loop {
            let mut lookahead: Option<NewlineLookahead> = None;
            loop {
                if lookahead.is_some() && self.next_step_is_unsafe_external_call() {
                    self.state.restore(lookahead.take().unwrap().state);
                    break;
                }
                if !self.single_step()? {
                    if let Some(la) = lookahead.take() {
                        self.state.restore(la.state);
                    }
                    break;
                }
                steps += 1;
                if steps > self.limits.max_steps_per_continue {
                    return Err(Error::Story("exceeded step budget without producing a line (possible infinite loop)".into()));
                }

                if self.string_capture_marks.is_empty() {
                    if let Some(la) = lookahead.take() {
                        if !self.can_continue() {
                            // The step since the snapshot (e.g. the story's
                            // closing `end`) produced no text of its own;
                            // the newline already captured is final.
                        } else {
                            let change = classify_newline_output_change(
                                &la.text_at_snapshot,
                                &self.state.output_stream().raw_text(),
                                la.tag_count_at_snapshot,
                                self.state.output_stream().current_tags().len(),
                            );
                            if matches!(change, NewlineOutputChange::ExtendedBeyondNewline) || self.state.output_stream().ends_with_newline() {
                                self.state.restore(la.state);
                                break;
                            } else if !matches!(change, NewlineOutputChange::NewlineRemoved) {
                                lookahead = Some(la);
                            }
                        }
                    } else if self.state.output_stream().has_content() && self.state.output_stream().ends_with_newline() {
                        if self.can_continue() {
                            lookahead = Some(NewlineLookahead::take(&self.state));
                        } else {
                            break;
                        }
                    }
                }

                if !self.state.current_choices().is_empty() && self.at_line_boundary() {
                    if let Some(la) = lookahead.take() {
                        self.state.restore(la.state);
                    }
                    break;
                }
            }
            if self.resolve_invisible_default_choice()? {
                continue 'outer;
            }
            break;
        }

        self.state.variables_state.set_batch_observing(false);
        self.state.variables_state.flush_batched_observers();
        Ok(self.state.output_stream().current_text())
    }

    /// Whether the current pointer is null or sitting at the start of a
    /// choice-bearing gather, meaning it's safe to stop producing output
    /// and hand control back to the host for a choice.
    fn at_line_boundary(&self) -> bool {
        !self.can_continue()
    }

    /// When every surfaced choice is an invisible default and nothing else
    /// is pending, auto-select it rather than surfacing an empty choice
    /// list to the host. Returns whether a choice was resolved, so the
    /// caller knows to keep stepping within the same `continue()`.
    fn resolve_invisible_default_choice(&mut self) -> Result<bool> {
        if !self.can_continue() && self.state.current_choices().len() == 1 && self.state.current_choices()[0].is_invisible_default {
            let choice = self.state.current_choices()[0].clone();
            self.state.current_choices_mut().clear();
            self.enter_node_as_divert_target(choice.target)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn continue_maximally(&mut self) -> Result<String> {
        let mut out = String::new();
        while self.can_continue() {
            out.push_str(&self.cont()?);
        }
        Ok(out)
    }

    pub fn choose_choice_index(&mut self, index: usize) -> Result<()> {
        let choice = self
            .state
            .current_choices()
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Story(format!("choice index {index} out of range")))?;
        self.state.current_choices_mut().clear();
        self.enter_node_as_divert_target(choice.target)?;
        Ok(())
    }

    /// Walk the graph for every name referenced by an `EXTERNAL` divert and
    /// make sure it's either bound or has an ink-side fallback (a knot of
    /// the same name), raising if `allow_external_function_fallbacks` is
    /// off or no fallback exists.
    fn validate_external_bindings(&mut self) -> Result<()> {
        self.has_validated_externals = true;

        let mut missing: Vec<String> = Vec::new();
        for name in self.external_divert_names() {
            if self.externals.contains_key(&name) {
                continue;
            }
            if self.allow_external_function_fallbacks && self.resolve_path(&Path::parse(&name), None).is_ok() {
                continue;
            }
            missing.push(name);
        }

        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        let names = missing.join("', '");
        let reason = if self.allow_external_function_fallbacks {
            "and no fallback ink function(s) found"
        } else {
            "(ink fallbacks disabled)"
        };
        Err(Error::Story(format!("missing function binding(s) for external(s): '{names}', {reason}")))
    }

    /// Every distinct name targeted by an external (`x()`) divert anywhere
    /// in the story graph.
    fn external_divert_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for id in self.arena.node_ids() {
            let Some(divert) = self.arena.get(id).as_divert() else { continue };
            if !divert.is_external {
                continue;
            }
            if let Some(name) = divert.target_path.as_ref().and_then(|p| p.last_component()).map(|c| c.to_string()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Run exactly one content step, returning `false` once the story has
    /// reached its natural end (or an explicit `END`/`DONE`).
    fn single_step(&mut self) -> Result<bool> {
        let pointer = self.state.call_stack().current_pointer();
        if pointer.is_null() {
            return Ok(false);
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_step("step");
        }

        match pointer.resolve(&self.arena) {
            None => {
                let container = pointer.container.expect("non-null pointer always has a container");
                self.advance_past_container_end(container)
            }
            Some(id) => {
                let auto_advance = self.execute_node(id)?;
                if auto_advance {
                    let current = self.state.call_stack().current_pointer();
                    self.state.call_stack_mut().set_current_pointer(Pointer { container: current.container, index: current.index + 1 });
                }
                Ok(true)
            }
        }
    }

    /// Walk up from an exhausted container toward the root, resuming at the
    /// next sibling of the first ancestor that has one. Falling off the
    /// true root while the call stack still has pushed frames is treated as
    /// an implicit return, mirroring ink's tolerance for knots that end
    /// without an explicit `->->`/`~ret`.
    fn advance_past_container_end(&mut self, mut container: NodeId) -> Result<bool> {
        loop {
            match self.arena.parent_of(container) {
                None => {
                    if self.state.call_stack().can_pop() {
                        self.state.call_stack_mut().pop(None)?;
                        return Ok(true);
                    }
                    self.state.call_stack_mut().set_current_pointer(Pointer::NULL);
                    return Ok(false);
                }
                Some(parent_id) => {
                    let parent = self.arena.get(parent_id).as_container().expect("parent link always points at a container");
                    let index = parent
                        .content
                        .iter()
                        .position(|&c| c == container)
                        .ok_or_else(|| Error::Assertion("child missing from parent's content".into()))?;
                    let next = index + 1;
                    if next < parent.content.len() {
                        self.state.call_stack_mut().set_current_pointer(Pointer { container: Some(parent_id), index: next as i32 });
                        return Ok(true);
                    }
                    container = parent_id;
                }
            }
        }
    }

    fn in_eval(&self) -> bool {
        self.eval_depth > 0
    }

    /// Execute one node; returns whether the caller should advance the
    /// pointer to the next sibling afterward (`false` when this node already
    /// repositioned the pointer itself: entering a container, diverting, or
    /// popping a call frame).
    fn execute_node(&mut self, id: NodeId) -> Result<bool> {
        let kind = self.arena.get(id).kind.clone_shallow();
        match kind {
            ShallowKind::Container => {
                self.enter_container(id)?;
                self.state.call_stack_mut().set_current_pointer(Pointer::start_of(id));
                Ok(false)
            }
            ShallowKind::Value(v) => {
                if self.in_eval() {
                    self.state.push_eval(v);
                } else {
                    self.state.output_stream_mut().push_text(&v.as_string());
                }
                Ok(true)
            }
            ShallowKind::Glue => {
                self.state.output_stream_mut().push_glue();
                Ok(true)
            }
            ShallowKind::Tag(text) => {
                self.state.output_stream_mut().push_begin_tag();
                self.state.output_stream_mut().push_text(&text);
                self.state.output_stream_mut().push_end_tag();
                Ok(true)
            }
            ShallowKind::Void => Ok(true),
            ShallowKind::ControlCommand(cmd) => self.execute_control_command(cmd),
            ShallowKind::NativeFunctionCall(f) => self.execute_native_function(f),
            ShallowKind::Divert(divert) => self.execute_divert(id, divert),
            ShallowKind::ChoicePoint(cp) => self.execute_choice_point(id, cp),
            ShallowKind::VariableReference(v) => self.execute_variable_reference(v),
            ShallowKind::VariableAssignment(v) => self.execute_variable_assignment(v),
            ShallowKind::Placeholder => Err(Error::Assertion("encountered an unfilled arena placeholder".into())),
        }
    }

    fn execute_control_command(&mut self, cmd: ControlCommandKind) -> Result<bool> {
        use ControlCommandKind::*;
        match cmd {
            EvalStart => self.eval_depth += 1,
            EvalEnd => self.eval_depth = (self.eval_depth - 1).max(0),
            EvalOutput => {
                let v = self.state.pop_eval()?;
                self.state.output_stream_mut().push_text(&v.as_string());
            }
            Duplicate => {
                let v = self.state.peek_eval().cloned().ok_or_else(|| Error::Assertion("duplicate on empty evaluation stack".into()))?;
                self.state.push_eval(v);
            }
            PopEvaluatedValue => {
                self.state.pop_eval()?;
            }
            PopFunction => {
                self.state.call_stack_mut().pop(Some(PushPopType::Function))?;
                return Ok(false);
            }
            PopTunnel => {
                self.state.call_stack_mut().pop(Some(PushPopType::Tunnel))?;
                return Ok(false);
            }
            BeginString => {
                self.string_capture_marks.push(self.state.output_stream().items().len());
            }
            EndString => {
                let mark = self.string_capture_marks.pop().ok_or_else(|| Error::Assertion("EndString without matching BeginString".into()))?;
                let captured = self.state.output_stream_mut().drain_since(mark);
                let text = crate::output_stream::OutputStream::render_text(&captured);
                self.state.push_eval(Value::String(text));
            }
            NoOp => {}
            ChoiceCount => {
                self.state.push_eval(Value::Int(self.state.current_choices().len() as i64));
            }
            Turns => {
                self.state.push_eval(Value::Int(self.state.current_turn_index as i64));
            }
            TurnsSince => {
                let target = self.pop_eval_target()?;
                self.state.push_eval(Value::Int(self.state.turns_since(target) as i64));
            }
            ReadCount => {
                let target = self.pop_eval_target()?;
                self.state.push_eval(Value::Int(self.state.visit_count(target) as i64));
            }
            Random => {
                let max = self.state.pop_eval()?.as_int()?;
                let min = self.state.pop_eval()?.as_int()?;
                let value = self.state.random_range(min, max + 1);
                self.state.push_eval(Value::Int(value));
            }
            SeedRandom => {
                let seed = self.state.pop_eval()?.as_int()?;
                self.state.story_seed = seed as i32;
                self.state.previous_random = 0;
            }
            VisitIndex => {
                let container = self.current_container_id();
                let v = (self.state.visit_count(container) - 1).max(0);
                self.state.push_eval(Value::Int(v as i64));
            }
            SequenceShuffleIndex => {
                let count = self.state.pop_eval()?.as_int()?.max(1);
                let index = self.state.random_range(0, count);
                self.state.push_eval(Value::Int(index));
            }
            StartThread => {
                self.state.call_stack_mut().fork_thread();
            }
            Done => {
                self.state.call_stack_mut().set_current_pointer(Pointer::NULL);
                return Ok(false);
            }
            End => {
                self.state.did_safe_exit = true;
                self.state.call_stack_mut().set_current_pointer(Pointer::NULL);
                return Ok(false);
            }
            ListFromInt => {
                let n = self.state.pop_eval()?.as_int()?;
                let list_name = self.state.pop_eval()?.as_string();
                let value = self.list_from_int(&list_name, n as i32);
                self.state.push_eval(value);
            }
            ListRange => {
                let max = self.state.pop_eval()?.as_int()?;
                let min = self.state.pop_eval()?.as_int()?;
                let list = self.pop_eval_list()?;
                self.state.push_eval(Value::List(list.list_with_sub_range(min as i32, max as i32)));
            }
            ListRandom => {
                let list = self.pop_eval_list()?;
                let ordered = list.ordered();
                if ordered.is_empty() {
                    self.state.push_eval(Value::List(list));
                } else {
                    let idx = self.state.random_range(0, ordered.len() as i64) as usize;
                    let (item, value) = ordered[idx].clone();
                    let mut picked = crate::list::InkList::new();
                    picked.set_initial_origin_names(list.origin_names.clone());
                    picked.set(item, value);
                    self.state.push_eval(Value::List(picked));
                }
            }
            BeginTag => self.state.output_stream_mut().push_begin_tag(),
            EndTag => self.state.output_stream_mut().push_end_tag(),
        }
        Ok(true)
    }

    fn pop_eval_target(&mut self) -> Result<NodeId> {
        match self.state.pop_eval()? {
            Value::DivertTarget(path) => self.resolve_path(&path, None),
            other => Err(Error::Type { expected: "DivertTarget".into(), got: other.type_name().into() }),
        }
    }

    fn pop_eval_list(&mut self) -> Result<crate::list::InkList> {
        match self.state.pop_eval()? {
            Value::List(l) => Ok(l),
            other => Err(Error::Type { expected: "List".into(), got: other.type_name().into() }),
        }
    }

    fn list_from_int(&self, list_name: &str, n: i32) -> Value {
        if let Some(def) = self.list_definitions.lists.get(list_name) {
            for (item_name, value) in &def.items {
                if *value == n {
                    let mut list = crate::list::InkList::new();
                    list.set_initial_origin_names(vec![list_name.to_string()]);
                    list.set(InkListItem::new(list_name.to_string(), item_name.clone()), n);
                    return Value::List(list);
                }
            }
        }
        Value::List(crate::list::InkList::new())
    }

    fn current_container_id(&self) -> NodeId {
        let pointer = self.state.call_stack().current_pointer();
        pointer.container.unwrap_or(self.root)
    }

    fn execute_native_function(&mut self, f: crate::node::NativeFunction) -> Result<bool> {
        let arity = native_functions::arity(f);
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            args.push(self.state.pop_eval()?);
        }
        args.reverse();

        let result = match f {
            crate::node::NativeFunction::ListAll => {
                if let Value::List(l) = &args[0] {
                    Value::List(l.all(&self.list_definitions))
                } else {
                    native_functions::call(f, args)?
                }
            }
            crate::node::NativeFunction::ListInvert => {
                if let Value::List(l) = &args[0] {
                    Value::List(l.inverse(&self.list_definitions))
                } else {
                    native_functions::call(f, args)?
                }
            }
            _ => native_functions::call(f, args)?,
        };
        self.state.push_eval(result);
        Ok(true)
    }

    fn execute_divert(&mut self, id: NodeId, divert: crate::node::Divert) -> Result<bool> {
        if divert.is_conditional {
            let cond = self.state.pop_eval()?;
            if !cond.is_truthy()? {
                return Ok(true);
            }
        }

        if divert.is_external {
            return self.call_external_divert(&divert);
        }

        let own_parent = self.arena.parent_of(id);
        let target_path = match &divert.variable_divert_name {
            Some(name) => match self.state.variables_state.get_variable(name, self.state.call_stack())? {
                Value::DivertTarget(p) => p,
                other => return Err(Error::Type { expected: "DivertTarget".into(), got: other.type_name().into() }),
            },
            None => divert.target_path.clone().ok_or_else(|| Error::Assertion("divert missing target path".into()))?,
        };
        let target = self.resolve_path(&target_path, own_parent)?;

        let pointer_now = self.state.call_stack().current_pointer();
        let resume = Pointer { container: pointer_now.container, index: pointer_now.index + 1 };
        self.state.call_stack_mut().set_current_pointer(resume);

        if divert.pushes_to_stack {
            let eval_height = self.state.evaluation_stack.len();
            let out_height = self.state.output_stream().items().len();
            self.state.call_stack_mut().push(divert.stack_push_type, eval_height, Some(out_height));
        }

        self.enter_node_as_divert_target(target)?;
        Ok(false)
    }

    fn call_external_divert(&mut self, divert: &crate::node::Divert) -> Result<bool> {
        let name = divert
            .target_path
            .as_ref()
            .and_then(|p| p.last_component())
            .map(|c| c.to_string())
            .ok_or_else(|| Error::Assertion("external divert missing a name".into()))?;

        let mut args = Vec::with_capacity(divert.external_args as usize);
        for _ in 0..divert.external_args {
            args.push(self.state.pop_eval()?);
        }
        args.reverse();

        let binding = self
            .externals
            .get_mut(&name)
            .ok_or_else(|| Error::Story(format!("missing function binding for external '{name}'")))?;
        let result = (binding.function)(&args)?;
        self.state.push_eval(result);
        Ok(true)
    }

    /// Whether the node the pointer is currently sitting on is an external
    /// divert bound to a lookahead-unsafe function, so the end-of-line
    /// lookahead in [`Story::cont`]/[`Story::continue_async`] knows to stop
    /// speculating rather than risk calling it twice.
    fn next_step_is_unsafe_external_call(&self) -> bool {
        let pointer = self.state.call_stack().current_pointer();
        let Some(id) = pointer.resolve(&self.arena) else { return false };
        let Some(divert) = self.arena.get(id).as_divert() else { return false };
        if !divert.is_external {
            return false;
        }
        let Some(name) = divert.target_path.as_ref().and_then(|p| p.last_component()).map(|c| c.to_string()) else { return false };
        self.externals.get(&name).is_some_and(|b| b.lookahead_unsafe)
    }

    fn enter_node_as_divert_target(&mut self, target: NodeId) -> Result<()> {
        if matches!(self.arena.get(target).kind, NodeKind::Container(_)) {
            self.enter_container(target)?;
            self.state.call_stack_mut().set_current_pointer(Pointer::start_of(target));
        } else {
            let parent = self.arena.parent_of(target).ok_or_else(|| Error::Assertion("divert target has no parent".into()))?;
            let parent_container = self.arena.get(parent).as_container().expect("parent link always points at a container");
            let index = parent_container
                .content
                .iter()
                .position(|&c| c == target)
                .ok_or_else(|| Error::Assertion("divert target missing from its parent's content".into()))?;
            self.state.call_stack_mut().set_current_pointer(Pointer { container: Some(parent), index: index as i32 });
        }
        Ok(())
    }

    fn enter_container(&mut self, id: NodeId) -> Result<()> {
        let flags = self.arena.get(id).as_container().map(|c| c.count_flags).unwrap_or_default();
        if flags.visits {
            self.state.increment_visit_count(id);
        }
        if flags.turns {
            self.state.record_turn_index(id);
        }
        Ok(())
    }

    fn execute_choice_point(&mut self, id: NodeId, cp: crate::node::ChoicePoint) -> Result<bool> {
        if cp.has_condition {
            let cond = self.state.pop_eval()?;
            if !cond.is_truthy()? {
                return Ok(true);
            }
        }

        let text = self.state.output_stream_mut().take_trailing_since_newline();
        let own_parent = self.arena.parent_of(id);
        let target = self.resolve_path(&cp.path_on_choice, own_parent)?;

        if cp.once_only && self.choice_target_already_visited(target) {
            return Ok(true);
        }

        let thread_index = self.state.call_stack().thread_index();
        let mut choice = Choice::new(text, target, Vec::new(), thread_index);
        choice.is_invisible_default = cp.is_invisible_default;
        self.state.current_choices_mut().push(choice);
        Ok(true)
    }

    fn choice_target_already_visited(&self, target: NodeId) -> bool {
        let container = match self.arena.get(target).kind {
            NodeKind::Container(_) => target,
            _ => match self.arena.parent_of(target) {
                Some(p) => p,
                None => return false,
            },
        };
        self.state.visit_count(container) > 0
    }

    fn execute_variable_reference(&mut self, v: crate::node::VariableReference) -> Result<bool> {
        let value = if let Some(path) = &v.path_for_count {
            let target = self.resolve_path(path, None)?;
            Value::Int(self.state.visit_count(target) as i64)
        } else {
            let name = v.name.as_deref().unwrap_or_default();
            match self.state.variables_state.get_variable(name, self.state.call_stack()) {
                Ok(value) => value,
                Err(_) => {
                    self.state.current_warnings.push(crate::variables_state::VariablesState::warning_for_missing_global(name));
                    Value::Int(0)
                }
            }
        };
        self.state.push_eval(value);
        Ok(true)
    }

    fn execute_variable_assignment(&mut self, v: crate::node::VariableAssignment) -> Result<bool> {
        let value = self.state.pop_eval()?;
        let State { variables_state, current_flow, .. } = &mut self.state;
        variables_state.assign(&v.name, value, v.is_new_declaration, v.is_global, &mut current_flow.call_stack)?;
        Ok(true)
    }

    /// Resolve a [`Path`] to a node id. Absolute paths start from the story
    /// root; relative paths start from `relative_to`.
    fn resolve_path(&self, path: &Path, relative_to: Option<NodeId>) -> Result<NodeId> {
        resolve_path_in(&self.arena, self.root, path, relative_to)
    }

    /// Global `# tag` lines authored at the very top of the story, before
    /// any content.
    pub fn global_tags(&self) -> Vec<String> {
        self.tags_at_start_of(self.root)
    }

    /// Tags authored at the start of the knot/stitch `path` points to.
    pub fn tags_for_content_at_path(&self, path: &str) -> Result<Vec<String>> {
        let target = self.resolve_path(&Path::parse(path), None)?;
        Ok(self.tags_at_start_of(target))
    }

    fn tags_at_start_of(&self, id: NodeId) -> Vec<String> {
        let Some(container) = self.arena.get(id).as_container() else { return Vec::new() };
        let mut tags = Vec::new();
        for &child in &container.content {
            match &self.arena.get(child).kind {
                NodeKind::Tag(text) => tags.push(text.clone()),
                _ => break,
            }
        }
        tags
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.state.variables_state.get_global(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.state.variables_state.set_global(name, value);
    }

    /// Register a shared observer under several variable names at once, the
    /// way a host typically wants to watch a small group of related globals.
    pub fn observe_variables<F>(&mut self, names: &[&str], observer: F)
    where
        F: FnMut(&str, &Value) + Clone + Send + 'static,
    {
        for name in names {
            self.observe_variable(name.to_string(), Box::new(observer.clone()));
        }
    }

    pub fn unbind_external_function(&mut self, name: &str) {
        self.externals.remove(name);
    }

    /// Divert to `path` directly, optionally resetting the call stack first
    /// and pushing `args` for the target knot/function to consume.
    pub fn choose_path_string(&mut self, path: &str, reset_callstack: bool, args: &[Value]) -> Result<()> {
        if reset_callstack {
            self.state.call_stack_mut().reset_to_single_thread(Pointer::start_of(self.root));
        }
        for arg in args {
            self.state.push_eval(arg.clone());
        }
        let target = self.resolve_path(&Path::parse(path), None)?;
        self.state.current_choices_mut().clear();
        self.enter_node_as_divert_target(target)
    }

    pub fn switch_flow(&mut self, name: &str) {
        self.state.switch_to_flow_named(name, Pointer::start_of(self.root));
    }

    pub fn switch_to_default_flow(&mut self) {
        self.switch_flow(crate::flow::DEFAULT_FLOW_NAME);
    }

    pub fn remove_flow(&mut self, name: &str) {
        self.state.remove_flow_named(name);
    }

    pub fn alive_flow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.named_flows.keys().cloned().collect();
        names.push(self.state.current_flow.name.clone());
        names
    }

    pub fn reset_errors(&mut self) {
        self.state.current_errors.clear();
        self.state.current_warnings.clear();
    }

    /// Reset runtime state back to the defaults captured right after load,
    /// keeping the loaded story graph and any bound external functions.
    pub fn reset_state(&mut self) {
        let globals = self.state.variables_state.clone_default_globals();
        self.state = State::new(Pointer::start_of(self.root), globals, 0);
        self.state.variables_state.snapshot_default_globals();
        self.has_validated_externals = false;
    }

    /// Advance up to `step_budget` steps, stopping early at a line boundary
    /// or a fresh set of choices. Returns whether the story can still
    /// produce more content (`true`) or has ended (`false`).
    pub fn continue_async(&mut self, step_budget: u64) -> Result<bool> {
        if !self.has_validated_externals {
            self.validate_external_bindings()?;
        }
        self.state.output_stream_mut().clear();
        self.state.current_choices_mut().clear();
        self.state.current_turn_index += 1;
        self.state.variables_state.set_batch_observing(true);

        let mut steps = 0u64;
        let mut more = true;
        'outer: loop {
            let mut lookahead: Option<NewlineLookahead> = None;
            loop {
                if lookahead.is_some() && self.next_step_is_unsafe_external_call() {
                    self.state.restore(lookahead.take().unwrap().state);
                    break;
                }
                if !self.single_step()? {
                    if let Some(la) = lookahead.take() {
                        self.state.restore(la.state);
                    }
                    more = false;
                    break;
                }
                steps += 1;

                if self.string_capture_marks.is_empty() {
                    if let Some(la) = lookahead.take() {
                        if !self.can_continue() {
                            // The step since the snapshot (e.g. the story's
                            // closing `end`) produced no text of its own;
                            // the newline already captured is final.
                        } else {
                            let change = classify_newline_output_change(
                                &la.text_at_snapshot,
                                &self.state.output_stream().raw_text(),
                                la.tag_count_at_snapshot,
                                self.state.output_stream().current_tags().len(),
                            );
                            if matches!(change, NewlineOutputChange::ExtendedBeyondNewline) || self.state.output_stream().ends_with_newline() {
                                self.state.restore(la.state);
                                break;
                            } else if !matches!(change, NewlineOutputChange::NewlineRemoved) {
                                lookahead = Some(la);
                            }
                        }
                    } else if self.state.output_stream().has_content() && self.state.output_stream().ends_with_newline() {
                        if self.can_continue() {
                            lookahead = Some(NewlineLookahead::take(&self.state));
                        } else {
                            break;
                        }
                    }
                }

                if !self.state.current_choices().is_empty() && self.at_line_boundary() {
                    if let Some(la) = lookahead.take() {
                        self.state.restore(la.state);
                    }
                    break;
                }
                if steps >= step_budget {
                    if let Some(la) = lookahead.take() {
                        self.state.restore(la.state);
                    }
                    break 'outer;
                }
            }
            if self.resolve_invisible_default_choice()? {
                more = true;
                continue 'outer;
            }
            break;
        }

        self.state.variables_state.set_batch_observing(false);
        self.state.variables_state.flush_batched_observers();
        Ok(more)
    }

    /// Serialize the running state to a save-game JSON document (distinct
    /// from the compiled story JSON [`Story::from_json`] loads).
    pub fn to_save_json(&self) -> Result<String> {
        crate::saver::to_save_json(&self.state, &self.arena)
    }

    /// Restore runtime state from a save-game document produced by
    /// [`Story::to_save_json`] against this same loaded story.
    pub fn load_save_json(&mut self, json_text: &str) -> Result<()> {
        let Story { arena, root, state, .. } = self;
        crate::saver::restore_save_json(json_text, state, arena, *root, |p, a, r| resolve_path_in(a, r, p, None))
    }
}

/// Free-standing form of [`Story::resolve_path`], usable from [`crate::saver`]
/// without borrowing a whole `Story`.
fn resolve_path_in(arena: &Arena, root: NodeId, path: &Path, relative_to: Option<NodeId>) -> Result<NodeId> {
    let mut current = if path.is_relative {
        relative_to.ok_or_else(|| Error::Assertion("relative path used without a context".into()))?
    } else {
        root
    };

    for component in &path.components {
        current = match component {
            Component::Parent => arena.parent_of(current).ok_or_else(|| Error::Story("path '^' stepped above the story root".into()))?,
            Component::Index(i) => {
                let container = arena.get(current).as_container().ok_or_else(|| Error::Story("path index used on a non-container".into()))?;
                *container.content.get(*i as usize).ok_or_else(|| Error::Story(format!("path index {i} out of range")))?
            }
            Component::Name(name) => {
                let container =
                    arena.get(current).as_container().ok_or_else(|| Error::Story(format!("path name '{name}' used on a non-container")))?;
                container.named_content(name).ok_or_else(|| Error::Story(format!("content '{name}' not found")))?
            }
        };
    }
    Ok(current)
}

/// A [`State`] copy taken the moment the output stream first ends in a
/// newline, plus the raw text/tag counts at that instant, so later steps can
/// be compared against it to tell whether the newline survived.
struct NewlineLookahead {
    state: State,
    text_at_snapshot: String,
    tag_count_at_snapshot: usize,
}

impl NewlineLookahead {
    fn take(state: &State) -> Self {
        Self {
            text_at_snapshot: state.output_stream().raw_text(),
            tag_count_at_snapshot: state.output_stream().current_tags().len(),
            state: state.snapshot(),
        }
    }
}

/// How the output stream changed across a speculative post-newline step,
/// relative to the text/tags captured at the [`NewlineLookahead`].
enum NewlineOutputChange {
    /// Nothing was added; the line is still exactly as it was at the snapshot.
    NoChange,
    /// Real new text or tags appeared beyond the newline, so it really was
    /// the end of a line and whatever followed belongs to the next one.
    ExtendedBeyondNewline,
    /// The trailing newline present at the snapshot is gone from the current
    /// text, meaning glue absorbed it.
    NewlineRemoved,
}

/// Classify a step taken after a [`NewlineLookahead`] snapshot. `before`/
/// `after` are the stream's untrimmed [`crate::output_stream::OutputStream::raw_text`]
/// before and after the step; the stream only ever has items appended to it,
/// so `after` is always `before` extended by whatever the step produced.
fn classify_newline_output_change(before: &str, after: &str, tags_before: usize, tags_after: usize) -> NewlineOutputChange {
    if tags_after > tags_before {
        return NewlineOutputChange::ExtendedBeyondNewline;
    }
    if after.len() > before.len() {
        return NewlineOutputChange::ExtendedBeyondNewline;
    }
    if before.ends_with('\n') && !after.ends_with('\n') {
        return NewlineOutputChange::NewlineRemoved;
    }
    NewlineOutputChange::NoChange
}

/// A borrow-free snapshot of a node's discriminant, so `execute_node` can
/// match on it without holding a reference into `self.arena` across calls
/// that need `&mut self`.
enum ShallowKind {
    Container,
    Value(Value),
    Glue,
    Tag(String),
    Void,
    ControlCommand(ControlCommandKind),
    NativeFunctionCall(crate::node::NativeFunction),
    Divert(crate::node::Divert),
    ChoicePoint(crate::node::ChoicePoint),
    VariableReference(crate::node::VariableReference),
    VariableAssignment(crate::node::VariableAssignment),
    Placeholder,
}

impl NodeKind {
    fn clone_shallow(&self) -> ShallowKind {
        match self {
            NodeKind::Container(_) => ShallowKind::Container,
            NodeKind::Value(v) => ShallowKind::Value(v.clone()),
            NodeKind::Glue => ShallowKind::Glue,
            NodeKind::Tag(t) => ShallowKind::Tag(t.clone()),
            NodeKind::Void => ShallowKind::Void,
            NodeKind::ControlCommand(c) => ShallowKind::ControlCommand(*c),
            NodeKind::NativeFunctionCall(f) => ShallowKind::NativeFunctionCall(*f),
            NodeKind::Divert(d) => ShallowKind::Divert(d.clone()),
            NodeKind::ChoicePoint(c) => ShallowKind::ChoicePoint(c.clone()),
            NodeKind::VariableReference(v) => ShallowKind::VariableReference(v.clone()),
            NodeKind::VariableAssignment(v) => ShallowKind::VariableAssignment(v.clone()),
            NodeKind::Placeholder => ShallowKind::Placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_world_json() -> &'static str {
        r#"{"inkVersion": 21, "root": ["^Hello, world!", "\n", "end", null]}"#
    }

    #[test]
    fn hello_world_produces_one_line() {
        let mut story = Story::from_json(hello_world_json()).unwrap();
        assert!(story.can_continue());
        let text = story.continue_maximally().unwrap();
        assert_eq!(text.trim(), "Hello, world!");
        assert!(!story.can_continue());
    }

    #[test]
    fn glue_joins_two_lines() {
        let json = r#"{"inkVersion": 21, "root": ["^Hello", "<>", "\n", "^ world", "\n", "end", null]}"#;
        let mut story = Story::from_json(json).unwrap();
        let line = story.cont().unwrap();
        assert_eq!(line, "Hello world");
    }

    #[test]
    fn tunnel_returns_to_caller() {
        let json = r#"{"inkVersion": 21, "root": [
            {"->t->": "knot"}, "^after", "\n", "end",
            {"knot": ["^in knot", "\n", "->->", null]}
        ]}"#;
        let mut story = Story::from_json(json).unwrap();
        let line = story.cont().unwrap();
        assert_eq!(line, "in knot");
        let line = story.cont().unwrap();
        assert_eq!(line, "after");
    }

    #[test]
    fn variable_round_trips_through_global_decl() {
        let json = r#"{"inkVersion": 21, "root": [
            {"global decl": ["ev", 5, {"VAR=": "x"}, "/ev", "end"]}
        ]}"#;
        let story = Story::from_json(json).unwrap();
        assert_eq!(story.state.variables_state.get_global("x"), Some(Value::Int(5)));
    }
}
