use super::*;
use serde_json::json;

fn single(text: &str) -> ToolCall {
    let calls = extract_tool_calls(text).unwrap_or_else(|| panic!("no call in {text:?}"));
    assert_eq!(calls.len(), 1, "{text:?}");
    calls.into_iter().next().unwrap()
}

#[test]
fn all_syntaxes_normalize_to_the_same_call() {
    let args = r#"{"chapter_id":3,"title":"Dawn"}"#;
    let texts = [
        format!(r#"<tool_call>{{"name":"update_chapter","arguments":{args}}}</tool_call>"#),
        format!("<tool_call><function=update_chapter>{args}</function></tool_call>"),
        format!("<tool_call>update_chapter({args})</tool_call>"),
        format!("[TOOL_CALL]update_chapter({args})[/TOOL_CALL]"),
        format!("Tool: update_chapter({args})"),
        format!(
            "<|channel|>commentary to=functions.update_chapter <|constrain|>json<|message|>{args}<|call|>"
        ),
    ];
    let expected = json!({"chapter_id": 3, "title": "Dawn"});
    let mut canonical: Option<(String, String, String)> = None;
    for text in &texts {
        let call = single(text);
        assert_eq!(call.origin, CallOrigin::Extracted);
        assert_eq!(call.kind, "function");
        let parsed: Value = serde_json::from_str(call.arguments()).unwrap();
        assert_eq!(parsed, expected, "{text}");
        let key = (call.id.clone(), call.name().to_string(), call.arguments().to_string());
        match &canonical {
            Some(first) => assert_eq!(first, &key, "{text}"),
            None => canonical = Some(key),
        }
    }
    let (id, name, _) = canonical.unwrap();
    assert_eq!(id, "call_update_chapter");
    assert_eq!(name, "update_chapter");

    let from_channel = extract_channel_call(
        "commentary to=functions.update_chapter",
        args,
        &mut IdScope::new(),
    )
    .unwrap();
    assert_eq!(from_channel.name(), "update_chapter");
    assert_eq!(
        serde_json::from_str::<Value>(from_channel.arguments()).unwrap(),
        expected
    );
}

#[test]
fn unparsable_arguments_default_to_empty_object() {
    let call = single("[TOOL_CALL]list_images({not json})[/TOOL_CALL]");
    assert_eq!(call.name(), "list_images");
    assert_eq!(call.arguments(), "{}");

    let call = single("<tool_call>list_images()</tool_call>");
    assert_eq!(call.arguments(), "{}");

    let call = single(r#"<tool_call>{"name": "read_chapter", "arguments": {"chapter_id": </tool_call>"#);
    assert_eq!(call.name(), "read_chapter");
    assert_eq!(call.arguments(), "{}");
}

#[test]
fn duplicate_names_get_numeric_suffix_after_the_first() {
    let text = concat!(
        "[TOOL_CALL]list_images()[/TOOL_CALL]",
        "[TOOL_CALL]list_images()[/TOOL_CALL]",
        r#"<tool_call>{"name":"read_chapter","arguments":{"chapter_id":1}}</tool_call>"#,
        "[TOOL_CALL]list_images()[/TOOL_CALL]",
    );
    let ids: Vec<String> = extract_tool_calls(text)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(
        ids,
        vec![
            "call_list_images",
            "call_list_images_2",
            "call_read_chapter",
            "call_list_images_3"
        ]
    );
}

#[test]
fn id_scope_carries_across_passes() {
    let mut scope = IdScope::new();
    let a = extract_with_scope("[TOOL_CALL]list_images()[/TOOL_CALL]", &mut scope).unwrap();
    let b = extract_with_scope("Tool: list_images()", &mut scope).unwrap();
    assert_eq!(a[0].id, "call_list_images");
    assert_eq!(b[0].id, "call_list_images_2");
}

#[test]
fn plain_prose_yields_none() {
    assert!(extract_tool_calls("I could call list_images() later, or not.").is_none());
    assert!(extract_tool_calls("").is_none());
    assert!(extract_tool_calls("<|channel|>commentary<|message|>just talking<|end|>").is_none());
}

#[test]
fn line_prefix_requires_line_start_or_whitespace() {
    assert!(extract_tool_calls("xTool: list_images()").is_none());
    let calls = extract_tool_calls("Sure.\nTool: list_images()\nthanks").unwrap();
    assert_eq!(calls[0].name(), "list_images");
    let calls = extract_tool_calls("Sure. tool: describe_image({\"image_id\": 4})").unwrap();
    assert_eq!(calls[0].arguments(), r#"{"image_id":4}"#);
}

#[test]
fn strip_removes_only_call_spans() {
    let text = "Let me look. [TOOL_CALL]list_images()[/TOOL_CALL] Done.";
    let calls = extract_tool_calls(text).unwrap();
    assert_eq!(calls[0].source_span, Some(13..49));
    assert_eq!(strip_calls(text, &calls), "Let me look.  Done.");
}

#[test]
fn function_block_with_parameter_tags() {
    let call = single(
        "<tool_call><function=create_sourcebook_entry>\n<parameter=name>Mira</parameter>\n<parameter=age>31</parameter>\n</function></tool_call>",
    );
    assert_eq!(call.name(), "create_sourcebook_entry");
    assert_eq!(
        serde_json::from_str::<Value>(call.arguments()).unwrap(),
        json!({"name": "Mira", "age": 31})
    );
}

#[test]
fn json_block_variants() {
    let call = single(r#"<tool_call>{"name":"x","arguments":"{\"a\":1}"}</tool_call>"#);
    assert_eq!(call.arguments(), r#"{"a":1}"#);

    let call = single(r#"<|tool_call_start|>{"name":"y","parameters":{"b":true}}<|tool_call_end|>"#);
    assert_eq!(call.name(), "y");
    assert_eq!(call.arguments(), r#"{"b":true}"#);

    let calls = extract_tool_calls(
        r#"<tool_call>[{"name":"a","arguments":{}},{"function":{"name":"b","arguments":"{}"}}]</tool_call>"#,
    )
    .unwrap();
    let names: Vec<&str> = calls.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn parentheses_inside_json_strings_do_not_end_the_call() {
    let call = single(r#"Tool: write_chapter({"chapter_id":2,"content":"She said (quietly) \"hi)\""})"#);
    let args: Value = serde_json::from_str(call.arguments()).unwrap();
    assert_eq!(args["content"], "She said (quietly) \"hi)\"");
}

#[test]
fn heuristics() {
    assert!(looks_like_call("ok [TOOL_CALL]x()"));
    assert!(looks_like_call("Tool: x()"));
    assert!(!looks_like_call("The tool was sharp."));
    assert!(has_unclosed_call("Let me [TOOL_CALL]list_"));
    assert!(!has_unclosed_call("[TOOL_CALL]x()[/TOOL_CALL]"));
}

#[test]
fn unclosed_line_call_and_partial_openers() {
    assert!(has_unclosed_call("Checking.\nTool: read_chapter({\"chapter_id\": "));
    assert!(has_unclosed_call("Checking. Tool: read_cha"));
    assert!(!has_unclosed_call("Checking. Tool: read_chapter({})"));
    assert!(!has_unclosed_call("Tool: hammer is what I used"));

    assert_eq!(partial_hint_len("Let me check. [TOOL_"), 6);
    assert_eq!(partial_hint_len("Let me check. "), 0);
    assert_eq!(partial_hint_len("see <func"), 5);
    assert_eq!(partial_hint_len("a too"), 3);
    // `tool:` only counts after whitespace
    assert_eq!(partial_hint_len("atoo"), 0);
}
