//! Builds chat requests and decides between native tool calling and the
//! textual fallback.
//!
//! Attempt 0 advertises structured tools when the upstream is believed to
//! support them. If the upstream rejects `tools`/`tool_choice`, the request is
//! rebuilt once as attempt 1: structured fields are stripped and the system
//! prompt gains instructions for the `[TOOL_CALL]` notation.

use std::borrow::Cow;

use serde_json::{Value, json};
use tracing::info;

use crate::llm::types::{ChatMessage, ChatRequest, Role, ToolDef};

pub const MAX_ATTEMPTS: u8 = 2;

/// Error codes some providers return when they refuse tool parameters.
const REJECTION_CODES: &[&str] = &[
    "tool_choice_not_supported",
    "tools_not_supported",
    "unsupported_tool_choice",
];
const REJECTION_PARAMS: &[&str] = &["tools", "tool_choice"];

pub fn default_rejection_markers() -> Vec<String> {
    [
        "tool_choice",
        "tool choice",
        "tools are not supported",
        "does not support tools",
        "tool use is not supported",
        "function calling is not supported",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    Native,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RequestParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub struct Negotiator<'a> {
    messages: &'a [ChatMessage],
    tools: &'a [ToolDef],
    native_tools: bool,
    attempt: u8,
}

impl<'a> Negotiator<'a> {
    pub fn new(messages: &'a [ChatMessage], tools: &'a [ToolDef], native_tools: bool) -> Self {
        Self {
            messages,
            tools,
            native_tools,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    pub fn mode(&self) -> ToolMode {
        if self.attempt == 0 && self.native_tools && !self.tools.is_empty() {
            ToolMode::Native
        } else {
            ToolMode::Fallback
        }
    }

    pub fn build(&self, params: &RequestParams) -> ChatRequest {
        let (messages, tools, tool_choice) = match self.mode() {
            ToolMode::Native => (
                self.messages.to_vec(),
                Some(self.tools.to_vec()),
                Some(json!("auto")),
            ),
            ToolMode::Fallback => (fallback_messages(self.messages, self.tools).into_owned(), None, None),
        };
        ChatRequest {
            model: params.model.clone(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            tools,
            tool_choice,
            stream: params.stream.then_some(true),
        }
    }

    /// Moves to the fallback attempt when a native attempt was refused for
    /// its tool parameters. Returns whether the caller should retry.
    pub fn fallback_after(&mut self, body: &str, markers: &[String]) -> bool {
        if self.attempt != 0 || self.mode() != ToolMode::Native {
            return false;
        }
        if !is_tool_choice_rejection(body, markers) {
            return false;
        }
        info!("upstream refused native tools, retrying with textual fallback");
        self.attempt = 1;
        true
    }
}

/// Decides from a structured `error.code`/`error.param` when the upstream
/// sends one; substring markers are only consulted when it does not.
pub fn is_tool_choice_rejection(body: &str, markers: &[String]) -> bool {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let error = value.get("error").unwrap_or(&value);
        let code = error.get("code").and_then(|c| c.as_str());
        let param = error.get("param").and_then(|p| p.as_str());
        if code.is_some() || param.is_some() {
            return code.is_some_and(|c| REJECTION_CODES.contains(&c))
                || param.is_some_and(|p| REJECTION_PARAMS.contains(&p));
        }
    }
    let lower = body.to_lowercase();
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .any(|m| lower.contains(&m.to_lowercase()))
}

/// Copy of `messages` with tool instructions injected and structured tool
/// traffic rewritten as plain text. Borrowed unchanged when there are no tools.
pub fn fallback_messages<'m>(messages: &'m [ChatMessage], tools: &[ToolDef]) -> Cow<'m, [ChatMessage]> {
    if tools.is_empty() {
        return Cow::Borrowed(messages);
    }
    let instructions = fallback_instructions(tools);
    let mut out: Vec<ChatMessage> = messages.iter().map(textual_message).collect();
    match out.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            let mut content = system.content.take().unwrap_or_default();
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(&instructions);
            system.content = Some(content);
        }
        None => out.insert(0, ChatMessage::system(instructions)),
    }
    Cow::Owned(out)
}

fn textual_message(msg: &ChatMessage) -> ChatMessage {
    match msg.role {
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let mut text = msg.content.clone().unwrap_or_default();
            for call in &msg.tool_calls {
                if !text.is_empty() {
                    text.push('\n');
                }
                let args = if call.arguments().trim().is_empty() {
                    "{}"
                } else {
                    call.arguments()
                };
                text.push_str(&format!("[TOOL_CALL]{}({})[/TOOL_CALL]", call.name(), args));
            }
            ChatMessage::assistant(Some(text), vec![])
        }
        Role::Tool => {
            let name = msg.name.as_deref().unwrap_or("tool");
            ChatMessage::user(format!(
                "Result of {name}:\n{}",
                msg.content.as_deref().unwrap_or_default()
            ))
        }
        _ => msg.clone(),
    }
}

pub fn fallback_instructions(tools: &[ToolDef]) -> String {
    let mut text = String::from(
        "You can use the tools listed below. To call a tool, write the call on its own line in exactly this form:\n\
         [TOOL_CALL]tool_name({\"argument\": \"value\"})[/TOOL_CALL]\n\
         Arguments must be a single JSON object; use () when a tool takes no arguments. \
         Write one block per call, then stop and wait for the results.\n\nAvailable tools:",
    );
    for tool in tools {
        let f = &tool.function;
        text.push_str(&format!("\n- {}: {}", f.name, f.description));
        if let Some(props) = f.parameters.get("properties").and_then(|p| p.as_object())
            && !props.is_empty()
        {
            let required: Vec<&str> = f
                .parameters
                .get("required")
                .and_then(|r| r.as_array())
                .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let params: Vec<String> = props
                .iter()
                .map(|(name, schema)| {
                    let kind = schema.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                    let flag = if required.contains(&name.as_str()) {
                        ", required"
                    } else {
                        ""
                    };
                    format!("{name} ({kind}{flag})")
                })
                .collect();
            text.push_str(&format!("\n  arguments: {}", params.join(", ")));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ToolCall, ToolFunctionDef};

    fn tool(name: &str) -> ToolDef {
        ToolDef {
            kind: "function".into(),
            function: ToolFunctionDef {
                name: name.into(),
                description: format!("{name} tool"),
                parameters: json!({
                    "type": "object",
                    "properties": {"chapter_id": {"type": "integer"}},
                    "required": ["chapter_id"]
                }),
            },
        }
    }

    fn params() -> RequestParams {
        RequestParams {
            model: "m".into(),
            temperature: Some(0.5),
            max_tokens: None,
            stream: true,
        }
    }

    #[test]
    fn native_attempt_carries_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let tools = vec![tool("read_chapter")];
        let neg = Negotiator::new(&messages, &tools, true);
        let req = neg.build(&params());
        assert_eq!(neg.mode(), ToolMode::Native);
        assert_eq!(req.tools.as_ref().map(|t| t.len()), Some(1));
        assert_eq!(req.tool_choice, Some(json!("auto")));
        assert_eq!(req.stream, Some(true));
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn rejection_moves_to_fallback_once() {
        let messages = vec![ChatMessage::system("You write stories."), ChatMessage::user("hi")];
        let tools = vec![tool("read_chapter")];
        let mut neg = Negotiator::new(&messages, &tools, true);
        let markers = default_rejection_markers();
        let body = r#"{"error":{"message":"\"tool_choice\" is not supported by this model"}}"#;
        assert!(neg.fallback_after(body, &markers));
        assert_eq!(neg.attempt(), 1);
        assert_eq!(neg.mode(), ToolMode::Fallback);
        // never a third attempt
        assert!(!neg.fallback_after(body, &markers));

        let req = neg.build(&params());
        assert!(req.tools.is_none());
        assert!(req.tool_choice.is_none());
        let system = req.messages[0].content.clone().unwrap();
        assert!(system.starts_with("You write stories."));
        assert!(system.contains("[TOOL_CALL]"));
        assert!(system.contains("read_chapter: read_chapter tool"));
        assert!(system.contains("chapter_id (integer, required)"));
        // caller's list untouched
        assert_eq!(messages[0].content.as_deref(), Some("You write stories."));
    }

    #[test]
    fn unrelated_errors_do_not_trigger_fallback() {
        let messages = vec![ChatMessage::user("hi")];
        let tools = vec![tool("read_chapter")];
        let mut neg = Negotiator::new(&messages, &tools, true);
        assert!(!neg.fallback_after(
            r#"{"error":{"message":"rate limit exceeded"}}"#,
            &default_rejection_markers()
        ));
        assert_eq!(neg.attempt(), 0);
    }

    #[test]
    fn structured_code_wins_without_markers() {
        assert!(is_tool_choice_rejection(
            r#"{"error":{"code":"tools_not_supported","message":"nope"}}"#,
            &[]
        ));
        assert!(is_tool_choice_rejection(
            r#"{"error":{"param":"tool_choice","message":"invalid"}}"#,
            &[]
        ));
        // a structured code that is not a rejection is trusted over the text
        assert!(!is_tool_choice_rejection(
            r#"{"error":{"code":"rate_limited","message":"tool_choice quota"}}"#,
            &default_rejection_markers()
        ));
        assert!(is_tool_choice_rejection(
            "Model X DOES NOT SUPPORT TOOLS",
            &default_rejection_markers()
        ));
    }

    #[test]
    fn without_native_flag_first_attempt_is_fallback() {
        let messages = vec![ChatMessage::user("hi")];
        let tools = vec![tool("list_images")];
        let neg = Negotiator::new(&messages, &tools, false);
        let req = neg.build(&params());
        assert!(req.tools.is_none());
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages.len(), 2);
    }

    #[test]
    fn fallback_rewrites_structured_history() {
        let messages = vec![
            ChatMessage::user("show images"),
            ChatMessage::assistant(None, vec![ToolCall::new("c1", "list_images", "")]),
            ChatMessage::tool("c1", "list_images", "[]"),
        ];
        let tools = vec![tool("list_images")];
        let out = fallback_messages(&messages, &tools);
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[2].content.as_deref(),
            Some("[TOOL_CALL]list_images({})[/TOOL_CALL]")
        );
        assert!(out[2].tool_calls.is_empty());
        assert_eq!(out[3].role, Role::User);
        assert_eq!(out[3].content.as_deref(), Some("Result of list_images:\n[]"));
    }

    #[test]
    fn no_tools_borrows() {
        let messages = vec![ChatMessage::user("hi")];
        assert!(matches!(fallback_messages(&messages, &[]), Cow::Borrowed(_)));
    }
}
