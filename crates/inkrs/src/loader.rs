//! Parses the compiled ink JSON format into an [`Arena`] of [`Node`]s.
//!
//! Token tables are cross-checked against `inkpy/runtime/*.py`'s class
//! shapes for what each token deserializes into. `inkpy`'s own `Story.load`
//! never actually walks the JSON (it just keeps the raw `root` dict), so the
//! tree-building here follows the wire format directly rather than a
//! reference implementation.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::arena::{Arena, NodeId};
use crate::call_stack::PushPopType;
use crate::error::{Error, Result};
use crate::list::{InkList, InkListItem, ListDefinition, ListDefinitions};
use crate::node::{
    ChoicePoint, Container, ControlCommandKind, CountFlags, Divert, Node, NodeKind, NativeFunction,
    VariableAssignment, VariableReference,
};
use crate::path::Path;
use crate::value::Value;

pub const INK_VERSION_CURRENT: u32 = 21;
pub const INK_VERSION_MINIMUM_COMPATIBLE: u32 = 18;

pub struct LoadedStory {
    pub arena: Arena,
    pub root: NodeId,
    pub list_definitions: ListDefinitions,
}

pub fn load(json_text: &str) -> Result<LoadedStory> {
    let data: Json = serde_json::from_str(json_text).map_err(|e| Error::Load(format!("invalid JSON: {e}")))?;

    let version = data
        .get("inkVersion")
        .and_then(Json::as_u64)
        .ok_or_else(|| Error::Load("ink version number not found".into()))? as u32;

    if version > INK_VERSION_CURRENT {
        return Err(Error::Load(
            "version of ink used to build story was newer than the current version of the engine".into(),
        ));
    }
    if version < INK_VERSION_MINIMUM_COMPATIBLE {
        return Err(Error::Load(
            "version of ink used to build story is too old to be loaded by this version of the engine".into(),
        ));
    }

    let root_json = data.get("root").ok_or_else(|| Error::Load("root node for ink not found".into()))?;

    let list_definitions = parse_list_definitions(data.get("listDefs"));

    let mut arena = Arena::new();
    let root = parse_node(root_json, &mut arena)?;

    Ok(LoadedStory { arena, root, list_definitions })
}

fn parse_list_definitions(json: Option<&Json>) -> ListDefinitions {
    let mut lists = HashMap::new();
    if let Some(Json::Object(map)) = json {
        for (name, items_json) in map {
            let mut items = HashMap::new();
            if let Json::Object(item_map) = items_json {
                for (item_name, value) in item_map {
                    if let Some(v) = value.as_i64() {
                        items.insert(item_name.clone(), v as i32);
                    }
                }
            }
            lists.insert(name.clone(), ListDefinition::new(name.clone(), items));
        }
    }
    ListDefinitions { lists }
}

/// Parse any JSON node (container array, leaf object, string token, or
/// literal value) into an arena entry, returning its id.
fn parse_node(json: &Json, arena: &mut Arena) -> Result<NodeId> {
    match json {
        Json::Array(items) => parse_container(items, arena),
        Json::String(s) => parse_string_token(s, arena),
        Json::Number(n) => {
            let value = if let Some(i) = n.as_i64() { Value::Int(i) } else { Value::Float(n.as_f64().unwrap_or(0.0)) };
            Ok(arena.push(Node::new(NodeKind::Value(value))))
        }
        Json::Bool(b) => Ok(arena.push(Node::new(NodeKind::Value(Value::Bool(*b))))),
        Json::Object(_) => parse_object(json, arena),
        Json::Null => Ok(arena.push(Node::new(NodeKind::Void))),
    }
}

fn parse_container(items: &[Json], arena: &mut Arena) -> Result<NodeId> {
    let id = arena.reserve();

    let (content_items, meta) = match items.last() {
        Some(Json::Object(map)) => (&items[..items.len() - 1], Some(map)),
        _ => (items, None),
    };

    let mut container = Container::default();

    if let Some(map) = meta {
        if let Some(flags) = map.get("#f").and_then(Json::as_u64) {
            container.count_flags = CountFlags::from_bits(flags as u8);
        }
        if let Some(name) = map.get("#n").and_then(Json::as_str) {
            container.name = Some(name.to_string());
        }
    }

    for item_json in content_items {
        let child = parse_node(item_json, arena)?;
        arena.set_parent(child, id);
        register_if_named(arena, id, child);
        container.content.push(child);
    }

    if let Some(map) = meta {
        for (key, value) in map.iter() {
            if key == "#f" || key == "#n" {
                continue;
            }
            let child = parse_node(value, arena)?;
            arena.set_parent(child, id);
            if let Some(c) = arena.get_mut(child).as_container_mut() {
                if c.name.is_none() {
                    c.name = Some(key.clone());
                }
            }
            container.named_only_content.insert(key.clone(), child);
        }
    }

    arena.fill(id, Node { kind: NodeKind::Container(container), parent: None });
    Ok(id)
}

fn register_if_named(arena: &mut Arena, parent: NodeId, child: NodeId) {
    let name = arena.get(child).as_container().and_then(|c| c.name.clone());
    if let Some(name) = name {
        if let Some(parent_container) = arena.get_mut(parent).as_container_mut() {
            parent_container.named_only_content.insert(name, child);
        }
    }
}

fn parse_string_token(s: &str, arena: &mut Arena) -> Result<NodeId> {
    use ControlCommandKind::*;

    if let Some(text) = s.strip_prefix('^') {
        return Ok(arena.push(Node::new(NodeKind::Value(Value::String(text.to_string())))));
    }
    if s == "\n" {
        return Ok(arena.push(Node::new(NodeKind::Value(Value::String("\n".to_string())))));
    }
    if s == "<>" {
        return Ok(arena.push(Node::new(NodeKind::Glue)));
    }
    if s == "void" {
        return Ok(arena.push(Node::new(NodeKind::Void)));
    }

    let command = match s {
        "ev" => Some(EvalStart),
        "out" => Some(EvalOutput),
        "/ev" => Some(EvalEnd),
        "du" => Some(Duplicate),
        "pop" => Some(PopEvaluatedValue),
        "~ret" => Some(PopFunction),
        "->->" => Some(PopTunnel),
        "str" => Some(BeginString),
        "/str" => Some(EndString),
        "nop" => Some(NoOp),
        "choiceCnt" => Some(ChoiceCount),
        "turn" => Some(Turns),
        "turns" => Some(TurnsSince),
        "readc" => Some(ReadCount),
        "rnd" => Some(Random),
        "srnd" => Some(SeedRandom),
        "visit" => Some(VisitIndex),
        "seq" => Some(SequenceShuffleIndex),
        "thread" => Some(StartThread),
        "done" => Some(Done),
        "end" => Some(End),
        "listInt" => Some(ListFromInt),
        "range" => Some(ListRange),
        "lrnd" => Some(ListRandom),
        "#" => Some(BeginTag),
        "/#" => Some(EndTag),
        _ => None,
    };
    if let Some(cmd) = command {
        return Ok(arena.push(Node::new(NodeKind::ControlCommand(cmd))));
    }

    if let Some(native) = native_function_for_token(s) {
        return Ok(arena.push(Node::new(NodeKind::NativeFunctionCall(native))));
    }

    Err(Error::Load(format!("unrecognised content token '{s}'")))
}

fn native_function_for_token(s: &str) -> Option<NativeFunction> {
    use NativeFunction::*;
    Some(match s {
        "+" => Add,
        "-" => Subtract,
        "/" => Divide,
        "*" => Multiply,
        "%" | "mod" => Mod,
        "_" => Negate,
        "==" => Equal,
        ">" => Greater,
        "<" => Less,
        ">=" => GreaterThanOrEquals,
        "<=" => LessThanOrEquals,
        "!=" => NotEquals,
        "!" => Not,
        "&&" => And,
        "||" => Or,
        "MIN" => Min,
        "MAX" => Max,
        "POW" => Pow,
        "FLOOR" => Floor,
        "CEILING" => Ceiling,
        "INT" => Int,
        "FLOAT" => Float,
        "?" => Has,
        "!?" => Hasnt,
        "^" => Intersect,
        "LIST_COUNT" => Count,
        "LIST_ALL" => ListAll,
        "LIST_INVERT" => ListInvert,
        "LIST_MIN" => ListMin,
        "LIST_MAX" => ListMax,
        _ => return None,
    })
}

fn parse_object(json: &Json, arena: &mut Arena) -> Result<NodeId> {
    let Json::Object(map) = json else { unreachable!() };

    if let Some(path) = map.get("^->").and_then(Json::as_str) {
        return Ok(arena.push(Node::new(NodeKind::Value(Value::DivertTarget(Path::parse(path))))));
    }

    if let Some(name) = map.get("^var").and_then(Json::as_str) {
        let ci = map.get("ci").and_then(Json::as_i64).unwrap_or(0) as i32;
        return Ok(arena.push(Node::new(NodeKind::Value(Value::VariablePointer {
            name: name.to_string(),
            context_index: ci,
        }))));
    }

    if let Some(Json::Object(list_obj)) = map.get("list") {
        let mut ink_list = InkList::new();
        for (full_name, value) in list_obj {
            if let (Some(item), Some(v)) = (InkListItem::parse_full_name(full_name), value.as_i64()) {
                ink_list.set(item, v as i32);
            }
        }
        if let Some(Json::Array(origins)) = map.get("origins") {
            ink_list.origin_names = origins.iter().filter_map(Json::as_str).map(String::from).collect();
        }
        return Ok(arena.push(Node::new(NodeKind::Value(Value::List(ink_list)))));
    }

    if let Some(text) = map.get("#").and_then(Json::as_str) {
        return Ok(arena.push(Node::new(NodeKind::Tag(text.to_string()))));
    }

    if let Some(path) = map.get("*").and_then(Json::as_str) {
        let flags = map.get("flg").and_then(Json::as_u64).unwrap_or(0);
        let choice = ChoicePoint {
            path_on_choice: Path::parse(path),
            has_condition: flags & 0x1 != 0,
            has_start_content: flags & 0x2 != 0,
            has_choice_only_content: flags & 0x4 != 0,
            is_invisible_default: flags & 0x8 != 0,
            once_only: flags & 0x10 != 0,
        };
        return Ok(arena.push(Node::new(NodeKind::ChoicePoint(choice))));
    }

    if let Some(name) = map.get("VAR?").and_then(Json::as_str) {
        return Ok(arena.push(Node::new(NodeKind::VariableReference(VariableReference {
            name: Some(name.to_string()),
            path_for_count: None,
        }))));
    }

    if let Some(path) = map.get("CNT?").and_then(Json::as_str) {
        return Ok(arena.push(Node::new(NodeKind::VariableReference(VariableReference {
            name: None,
            path_for_count: Some(Path::parse(path)),
        }))));
    }

    if let Some(name) = map.get("VAR=").and_then(Json::as_str) {
        let is_new = !map.get("re").and_then(Json::as_bool).unwrap_or(false);
        return Ok(arena.push(Node::new(NodeKind::VariableAssignment(VariableAssignment {
            name: name.to_string(),
            is_new_declaration: is_new,
            is_global: true,
        }))));
    }

    if let Some(name) = map.get("temp=").and_then(Json::as_str) {
        let is_new = !map.get("re").and_then(Json::as_bool).unwrap_or(false);
        return Ok(arena.push(Node::new(NodeKind::VariableAssignment(VariableAssignment {
            name: name.to_string(),
            is_new_declaration: is_new,
            is_global: false,
        }))));
    }

    if let Some(path) = map.get("x()").and_then(Json::as_str) {
        let args = map.get("exArgs").and_then(Json::as_u64).unwrap_or(0) as u32;
        return Ok(arena.push(Node::new(NodeKind::Divert(Divert {
            variable_divert_name: None,
            target_path: Some(Path::parse(path)),
            pushes_to_stack: false,
            stack_push_type: PushPopType::Function,
            is_external: true,
            external_args: args,
            is_conditional: map.get("c").and_then(Json::as_bool).unwrap_or(false),
        }))));
    }

    let divert_key = ["f()", "->t->", "->"].into_iter().find(|k| map.contains_key(*k));
    if let Some(key) = divert_key {
        let target = map.get(key).and_then(Json::as_str).unwrap_or_default();
        let is_var = map.get("var").and_then(Json::as_bool).unwrap_or(false);
        let (pushes, push_type) = match key {
            "f()" => (true, PushPopType::Function),
            "->t->" => (true, PushPopType::Tunnel),
            _ => (false, PushPopType::Tunnel),
        };
        return Ok(arena.push(Node::new(NodeKind::Divert(Divert {
            variable_divert_name: if is_var { Some(target.to_string()) } else { None },
            target_path: if is_var { None } else { Some(Path::parse(target)) },
            pushes_to_stack: pushes,
            stack_push_type: push_type,
            is_external: false,
            external_args: 0,
            is_conditional: map.get("c").and_then(Json::as_bool).unwrap_or(false),
        }))));
    }

    Err(Error::Load(format!("unrecognised content object: {json}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(body: &str) -> String {
        format!(r#"{{"inkVersion": 21, "root": {body}, "listDefs": {{}}}}"#)
    }

    #[test]
    fn loads_minimal_hello_world() {
        let json = fixture(r#"["^Hello, world!", "\n", "end", null]"#);
        let story = load(&json).unwrap();
        let root = story.arena.get(story.root).as_container().unwrap();
        assert_eq!(root.content.len(), 3);
    }

    #[test]
    fn rejects_too_old_version() {
        let json = r#"{"inkVersion": 10, "root": [["end"], null]}"#;
        assert!(load(json).is_err());
    }

    #[test]
    fn parses_named_container_and_divert() {
        let json = fixture(r#"[{"->": "knot"}, {"knot": [["^Hi", "end"], null]}]"#);
        let story = load(&json).unwrap();
        let root = story.arena.get(story.root).as_container().unwrap();
        assert!(root.named_only_content.contains_key("knot"));
    }
}
