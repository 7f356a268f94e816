use inkrs::{Story, Value};

#[test]
fn hello_world() {
    let json = r#"{"inkVersion": 21, "root": ["^hello world", "\n", "end", null]}"#;
    let mut story = Story::from_json(json).unwrap();
    assert_eq!(story.cont().unwrap(), "hello world");
    assert!(!story.can_continue());
}

#[test]
fn glue_absorbs_newline() {
    let json = r#"{"inkVersion": 21, "root": ["^I have ", "\n", "<>", "^five eggs.", "\n", "end", null]}"#;
    let mut story = Story::from_json(json).unwrap();
    assert_eq!(story.cont().unwrap(), "I have five eggs.");
}

#[test]
fn basic_tunnel() {
    let json = r#"{"inkVersion": 21, "root": [
        {"->t->": "knot"}, "end",
        {"knot": ["^Hello world", "\n", "->->", null]}
    ]}"#;
    let mut story = Story::from_json(json).unwrap();
    let text = story.continue_maximally().unwrap();
    assert_eq!(text.trim(), "Hello world");
}

#[test]
fn once_only_invisible_default_choice_resolves_within_one_continue() {
    let json = r##"{"inkVersion": 21, "root": [
        {"*": "target", "flg": 24}, "end",
        {"target": ["^A", "\n", "end", null, {"#f": 1}]}
    ]}"##;
    let mut story = Story::from_json(json).unwrap();

    let text = story.cont().unwrap();
    assert_eq!(text, "A");
    assert!(!story.has_error());

    story.choose_path_string("0", true, &[]).unwrap();
    let text = story.cont().unwrap();
    assert_eq!(text, "");
    assert!(!story.has_error());
}

#[test]
fn variable_set_get_round_trip() {
    let json = r#"{"inkVersion": 21, "root": [
        "ev", {"VAR?": "x"}, "out", "/ev", "\n", "end", null,
        {"global decl": ["ev", 5, {"VAR=": "x"}, "/ev", "end"]}
    ]}"#;
    let mut story = Story::from_json(json).unwrap();
    assert_eq!(story.get_variable("x"), Some(Value::Int(5)));
    assert_eq!(story.cont().unwrap(), "5");

    let mut story = Story::from_json(json).unwrap();
    story.set_variable("x", Value::Int(10));
    assert_eq!(story.cont().unwrap(), "10");
}

#[test]
fn unknown_variable_has_no_value() {
    let json = r#"{"inkVersion": 21, "root": ["end", null]}"#;
    let story = Story::from_json(json).unwrap();
    assert_eq!(story.get_variable("y"), None);
}

#[test]
fn tag_segmentation() {
    let json = r##"{"inkVersion": 21, "root": [
        "#", "^author: Joe", "/#", "^title: Story", "\n", "end", null
    ]}"##;
    let mut story = Story::from_json(json).unwrap();
    let text = story.cont().unwrap();
    assert_eq!(text, "title: Story");
    assert_eq!(story.current_tags(), vec!["author: Joe".to_string()]);
}

#[test]
fn save_and_restore_round_trip_preserves_text_and_variables() {
    let json = r#"{"inkVersion": 21, "root": [
        {"->t->": "knot"}, "^after", "\n", "end",
        {
            "knot": ["^in knot", "\n", "->->", null],
            "global decl": ["ev", 5, {"VAR=": "x"}, "/ev", "end"]
        }
    ]}"#;
    let mut story = Story::from_json(json).unwrap();
    story.set_variable("x", Value::Int(42));
    let first = story.cont().unwrap();
    assert_eq!(first, "in knot");

    let save = story.to_save_json().unwrap();

    let mut reloaded = Story::from_json(json).unwrap();
    reloaded.load_save_json(&save).unwrap();
    assert_eq!(reloaded.get_variable("x"), Some(Value::Int(42)));

    let second = reloaded.cont().unwrap();
    assert_eq!(second, "after");
}
