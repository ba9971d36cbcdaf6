use tracing::debug;

use crate::llm::tool_extract::{extract_tool_calls, strip_calls};
use crate::llm::types::{ChatMessage, Role};

/// Cleans assistant turns that carry tool calls so their content does not
/// repeat the call syntax or the argument payloads.
pub fn sanitize_history(messages: &mut [ChatMessage]) {
    for msg in messages.iter_mut() {
        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            sanitize_assistant(msg);
        }
    }
}

pub fn sanitize_assistant(msg: &mut ChatMessage) {
    let Some(content) = msg.content.as_deref() else {
        return;
    };
    let mut text = match extract_tool_calls(content) {
        Some(calls) => strip_calls(content, &calls),
        None => content.to_string(),
    };
    for call in &msg.tool_calls {
        let args = call.arguments().trim();
        // "{}" is too common to strip safely
        if args.len() > 2 {
            text = text.replace(args, "");
        }
    }
    let text = text.trim();
    if text.len() != content.len() {
        debug!(before = content.len(), after = text.len(), "sanitized assistant content");
    }
    msg.content = (!text.is_empty()).then(|| text.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCall;

    #[test]
    fn strips_call_syntax_and_arguments() {
        let call = ToolCall::new("call_read_chapter", "read_chapter", r#"{"chapter_id":1}"#);
        let mut history = vec![
            ChatMessage::user("read it"),
            ChatMessage::assistant(
                Some(r#"Reading. [TOOL_CALL]read_chapter({"chapter_id":1})[/TOOL_CALL]"#.into()),
                vec![call.clone()],
            ),
            ChatMessage::assistant(Some(r#"{"chapter_id":1}"#.into()), vec![call]),
        ];
        sanitize_history(&mut history);
        assert_eq!(history[0].content.as_deref(), Some("read it"));
        assert_eq!(history[1].content.as_deref(), Some("Reading."));
        assert_eq!(history[2].content, None);
    }

    #[test]
    fn plain_assistant_turns_are_untouched() {
        let mut history = vec![ChatMessage::assistant(Some("  hello {\"a\":1} ".into()), vec![])];
        sanitize_history(&mut history);
        assert_eq!(history[0].content.as_deref(), Some("  hello {\"a\":1} "));
    }
}
