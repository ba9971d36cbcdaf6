use futures::{Stream, StreamExt};
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::llm::error::LlmError;
use crate::llm::events::{StreamEvent, ToolCallPart};
use crate::llm::stream_tools::ToolDeltaBuffer;
use crate::llm::types::{ChatMessage, ToolCall};

mod agent_loop;

pub use agent_loop::run_conversation;

/// One assistant turn folded out of an event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub fn to_message(&self) -> ChatMessage {
        let content = (!self.content.is_empty()).then(|| self.content.clone());
        ChatMessage::assistant(content, self.tool_calls.clone())
    }
}

/// Drains an event stream into a turn, forwarding visible events to `events`.
/// A terminal error event becomes the returned error.
pub async fn collect_turn<S>(
    mut stream: S,
    events: Option<&UnboundedSender<StreamEvent>>,
) -> Result<AssistantTurn, LlmError>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    let mut turn = AssistantTurn::default();
    let mut deltas = ToolDeltaBuffer::new();

    while let Some(ev) = stream.next().await {
        match &ev {
            StreamEvent::Content(text) => turn.content.push_str(text),
            StreamEvent::Thinking(text) => turn.thinking.push_str(text),
            StreamEvent::ToolCalls(parts) => {
                for part in parts {
                    match part {
                        ToolCallPart::Call(call) => turn.tool_calls.push(call.clone()),
                        ToolCallPart::Delta(delta) => deltas.push_delta(delta),
                    }
                }
            }
            StreamEvent::Error { message, status, cause, .. } => {
                warn!(message = %message, status = ?status, kind = cause.kind(), "turn ended with error");
                return Err(cause.clone());
            }
            StreamEvent::Done => break,
        }
        if let Some(tx) = events {
            let _ = tx.send(ev);
        }
    }

    if !deltas.is_empty() {
        turn.tool_calls.extend(deltas.finalize());
    }
    let mut seen = HashSet::new();
    turn.tool_calls.retain(|c| seen.insert(c.id.clone()));
    debug!(
        content_len = turn.content.len(),
        calls = turn.tool_calls.len(),
        "assistant turn collected"
    );
    Ok(turn)
}
