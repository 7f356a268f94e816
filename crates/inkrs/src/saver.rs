//! Save-game (not story-graph) serialization: dumps and restores a running
//! [`crate::state::State`] as JSON, keyed by content paths rather than arena
//! indices so a save survives being loaded against a freshly-parsed copy of
//! the same compiled story.
//!
//! Grounded on `inkpy/runtime/serialisation.py` and the save-state shape
//! `state.rs`'s `SAVE_STATE_VERSION`/`MIN_COMPATIBLE_SAVE_STATE_VERSION`
//! already track.
//!
//! Only the current flow's single active thread is persisted; forked
//! (`<- thread`) contexts and named, non-current flows do not survive a
//! round trip. A story that saves mid-gather with live choice threads
//! should be continued to its next line boundary before saving.

use std::collections::HashMap;

use serde_json::{json, Value as Json};

use crate::arena::{Arena, NodeId};
use crate::call_stack::{CallStack, Element, PushPopType};
use crate::error::{Error, Result};
use crate::list::{InkList, InkListItem};
use crate::path::{Component, Path};
use crate::pointer::{container_path_components, Pointer};
use crate::state::{State, MIN_COMPATIBLE_SAVE_STATE_VERSION, SAVE_STATE_VERSION};
use crate::value::Value;

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::String(s) => Json::String(format!("^{s}")),
        Value::DivertTarget(path) => json!({ "^->": path.to_string() }),
        Value::VariablePointer { name, context_index } => json!({ "^var": name, "ci": context_index }),
        Value::List(list) => {
            let mut items = serde_json::Map::new();
            for (item, v) in &list.items {
                items.insert(item.full_name(), json!(v));
            }
            json!({ "list": Json::Object(items), "origins": list.origin_names })
        }
    }
}

pub fn value_from_json(json: &Json) -> Result<Value> {
    match json {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                Ok(Value::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        Json::String(s) => match s.strip_prefix('^') {
            Some(text) => Ok(Value::String(text.to_string())),
            None => Ok(Value::String(s.clone())),
        },
        Json::Object(map) => {
            if let Some(path) = map.get("^->").and_then(Json::as_str) {
                return Ok(Value::DivertTarget(Path::parse(path)));
            }
            if let Some(name) = map.get("^var").and_then(Json::as_str) {
                let ci = map.get("ci").and_then(Json::as_i64).unwrap_or(0) as i32;
                return Ok(Value::VariablePointer { name: name.to_string(), context_index: ci });
            }
            if let Some(Json::Object(list_obj)) = map.get("list") {
                let mut list = InkList::new();
                for (full_name, v) in list_obj {
                    if let (Some(item), Some(n)) = (InkListItem::parse_full_name(full_name), v.as_i64()) {
                        list.set(item, n as i32);
                    }
                }
                if let Some(Json::Array(origins)) = map.get("origins") {
                    list.set_initial_origin_names(origins.iter().filter_map(Json::as_str).map(String::from).collect());
                }
                return Ok(Value::List(list));
            }
            Err(Error::Load(format!("unrecognised saved value: {json}")))
        }
        Json::Null => Err(Error::Load("null is not a valid saved value".into())),
        Json::Array(_) => Err(Error::Load("array is not a valid saved value".into())),
    }
}

fn push_pop_type_to_json(t: PushPopType) -> &'static str {
    match t {
        PushPopType::Tunnel => "tunnel",
        PushPopType::Function => "function",
        PushPopType::FunctionEvaluationFromGame => "function-from-game",
    }
}

fn push_pop_type_from_json(s: &str) -> Result<PushPopType> {
    match s {
        "tunnel" => Ok(PushPopType::Tunnel),
        "function" => Ok(PushPopType::Function),
        "function-from-game" => Ok(PushPopType::FunctionEvaluationFromGame),
        other => Err(Error::Load(format!("unrecognised call stack frame type '{other}'"))),
    }
}

fn pointer_to_path_json(pointer: Pointer, arena: &Arena) -> Json {
    if pointer.is_null() {
        return Json::Null;
    }
    Json::String(pointer.path(arena).to_string())
}

fn pointer_from_path_json(
    json: &Json,
    arena: &Arena,
    root: NodeId,
    resolve_path: impl Fn(&Path, &Arena, NodeId) -> Result<NodeId>,
) -> Result<Pointer> {
    match json {
        Json::Null => Ok(Pointer::NULL),
        Json::String(s) => {
            let mut path = Path::parse(s);
            match path.components.last() {
                Some(Component::Index(n)) => {
                    let index = *n as i32;
                    path.components.pop();
                    let container = resolve_path(&path, arena, root)?;
                    Ok(Pointer { container: Some(container), index })
                }
                _ => {
                    let container = resolve_path(&path, arena, root)?;
                    Ok(Pointer::start_of(container))
                }
            }
        }
        other => Err(Error::Load(format!("expected a path string, found {other}"))),
    }
}

fn container_path_json(arena: &Arena, id: NodeId) -> String {
    Path::absolute(container_path_components(arena, id)).to_string()
}

fn element_to_json(element: &Element, arena: &Arena) -> Json {
    let temp_vars: serde_json::Map<String, Json> =
        element.temporary_variables.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect();
    json!({
        "cur": pointer_to_path_json(element.current_pointer, arena),
        "type": push_pop_type_to_json(element.push_pop_type),
        "eval": element.in_expression_evaluation,
        "temp": Json::Object(temp_vars),
        "evalHeight": element.evaluation_stack_height_when_pushed,
        "outputStart": element.function_start_in_output_stream,
    })
}

/// Serialize the currently running [`State`] to a save-game JSON document.
/// Content positions are written as path strings so the save can be loaded
/// back against the same story graph after a fresh [`crate::story::Story::from_json`].
pub fn to_save_json(state: &State, arena: &Arena) -> Result<String> {
    let elements: Vec<Json> = state.call_stack().elements().iter().map(|e| element_to_json(e, arena)).collect();

    let globals: serde_json::Map<String, Json> = state
        .variables_state
        .clone_globals_for_restart()
        .into_iter()
        .map(|(k, v)| (k, value_to_json(&v)))
        .collect();

    let eval_stack: Vec<Json> = state.evaluation_stack.iter().map(value_to_json).collect();

    let visit_counts: serde_json::Map<String, Json> =
        state.visit_counts.iter().map(|(&id, &count)| (container_path_json(arena, id), json!(count))).collect();

    let turn_indices: serde_json::Map<String, Json> =
        state.turn_indices.iter().map(|(&id, &turn)| (container_path_json(arena, id), json!(turn))).collect();

    let doc = json!({
        "inkSaveVersion": SAVE_STATE_VERSION,
        "flows": {
            state.current_flow.name.clone(): {
                "callstack": elements,
                "threadIndex": state.call_stack().thread_index(),
                "previousPointer": pointer_to_path_json(state.call_stack().previous_pointer(), arena),
            }
        },
        "currentFlowName": state.current_flow.name,
        "evalStack": eval_stack,
        "variablesState": Json::Object(globals),
        "visitCounts": Json::Object(visit_counts),
        "turnIndices": Json::Object(turn_indices),
        "turnIdx": state.current_turn_index,
        "storySeed": state.story_seed,
        "previousRandom": state.previous_random,
    });

    serde_json::to_string(&doc).map_err(|e| Error::Load(format!("failed to serialize save state: {e}")))
}

/// Restore a save-game document produced by [`to_save_json`] into `state`,
/// resolving path strings back to [`NodeId`]s via `resolve_path`.
pub fn restore_save_json(
    json_text: &str,
    state: &mut State,
    arena: &Arena,
    root: NodeId,
    resolve_path: impl Fn(&Path, &Arena, NodeId) -> Result<NodeId> + Copy,
) -> Result<()> {
    let doc: Json = serde_json::from_str(json_text).map_err(|e| Error::Load(format!("invalid save JSON: {e}")))?;

    let version = doc.get("inkSaveVersion").and_then(Json::as_u64).ok_or_else(|| Error::Load("save format version not found".into()))? as u32;
    if version < MIN_COMPATIBLE_SAVE_STATE_VERSION {
        return Err(Error::Load("save was written by a version too old to load".into()));
    }
    if version > SAVE_STATE_VERSION {
        return Err(Error::Load("save was written by a newer, incompatible version of the engine".into()));
    }

    let flow_name = doc.get("currentFlowName").and_then(Json::as_str).unwrap_or(crate::flow::DEFAULT_FLOW_NAME).to_string();
    let flow_json = doc
        .get("flows")
        .and_then(|f| f.get(&flow_name))
        .ok_or_else(|| Error::Load(format!("save is missing its current flow '{flow_name}'")))?;

    let mut call_stack = CallStack::new(Pointer::start_of(root));
    let elements_json = flow_json.get("callstack").and_then(Json::as_array).ok_or_else(|| Error::Load("save flow missing callstack".into()))?;
    let mut elements = Vec::with_capacity(elements_json.len());
    for element_json in elements_json {
        let pointer = pointer_from_path_json(element_json.get("cur").unwrap_or(&Json::Null), arena, root, resolve_path)?;
        let push_pop_type = push_pop_type_from_json(element_json.get("type").and_then(Json::as_str).unwrap_or("tunnel"))?;
        let mut element = Element::new(pointer, push_pop_type, element_json.get("eval").and_then(Json::as_bool).unwrap_or(false));
        if let Some(Json::Object(temp)) = element_json.get("temp") {
            for (name, v) in temp {
                element.temporary_variables.insert(name.clone(), value_from_json(v)?);
            }
        }
        element.evaluation_stack_height_when_pushed = element_json.get("evalHeight").and_then(Json::as_u64).unwrap_or(0) as usize;
        element.function_start_in_output_stream = element_json.get("outputStart").and_then(Json::as_u64).map(|n| n as usize);
        elements.push(element);
    }
    if elements.is_empty() {
        return Err(Error::Load("save flow has an empty call stack".into()));
    }
    call_stack.restore_elements(elements);

    state.current_flow.name = flow_name;
    state.current_flow.call_stack = call_stack;
    state.current_flow.output_stream.clear();
    state.current_flow.current_choices.clear();

    state.evaluation_stack.clear();
    if let Some(Json::Array(stack)) = doc.get("evalStack") {
        for v in stack {
            state.evaluation_stack.push(value_from_json(v)?);
        }
    }

    if let Some(Json::Object(globals)) = doc.get("variablesState") {
        let mut restored = HashMap::new();
        for (name, v) in globals {
            restored.insert(name.clone(), value_from_json(v)?);
        }
        state.variables_state.restore_globals(restored);
    }

    state.visit_counts.clear();
    if let Some(Json::Object(counts)) = doc.get("visitCounts") {
        for (path, count) in counts {
            let id = resolve_path(&Path::parse(path), arena, root)?;
            state.visit_counts.insert(id, count.as_i64().unwrap_or(0) as i32);
        }
    }

    state.turn_indices.clear();
    if let Some(Json::Object(indices)) = doc.get("turnIndices") {
        for (path, turn) in indices {
            let id = resolve_path(&Path::parse(path), arena, root)?;
            state.turn_indices.insert(id, turn.as_i64().unwrap_or(0) as i32);
        }
    }

    state.current_turn_index = doc.get("turnIdx").and_then(Json::as_i64).unwrap_or(-1) as i32;
    state.story_seed = doc.get("storySeed").and_then(Json::as_i64).unwrap_or(0) as i32;
    state.previous_random = doc.get("previousRandom").and_then(Json::as_i64).unwrap_or(state.story_seed as i64) as i32;
    state.current_errors.clear();
    state.current_warnings.clear();

    Ok(())
}
