use serde_json::{Value, json};

use crate::llm::error::LlmError;
use crate::llm::types::{ToolCall, ToolCallDelta};

/// One entry of a `tool_calls` event.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallPart {
    /// A complete call, native or recovered from text.
    Call(ToolCall),
    /// A native streamed fragment forwarded as received.
    Delta(ToolCallDelta),
}

impl ToolCallPart {
    pub fn id(&self) -> Option<&str> {
        match self {
            ToolCallPart::Call(call) => Some(call.id.as_str()).filter(|id| !id.is_empty()),
            ToolCallPart::Delta(delta) => delta.id.as_deref(),
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            ToolCallPart::Call(call) => serde_json::to_value(call).unwrap_or(Value::Null),
            ToolCallPart::Delta(delta) => serde_json::to_value(delta).unwrap_or(Value::Null),
        }
    }
}

/// Normalized output of one upstream exchange. A stream ends with exactly one
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Content(String),
    Thinking(String),
    ToolCalls(Vec<ToolCallPart>),
    Error {
        message: String,
        status: Option<u16>,
        data: Option<Value>,
        /// The error this event was built from.
        cause: LlmError,
    },
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    pub fn to_wire(&self) -> Value {
        match self {
            StreamEvent::Content(text) => json!({ "content": text }),
            StreamEvent::Thinking(text) => json!({ "thinking": text }),
            StreamEvent::ToolCalls(parts) => {
                let items: Vec<Value> = parts.iter().map(ToolCallPart::to_wire).collect();
                json!({ "tool_calls": items })
            }
            StreamEvent::Error {
                message,
                status,
                data,
                cause,
            } => {
                let mut v = json!({ "error": message, "kind": cause.kind() });
                if let Some(status) = status {
                    v["status"] = json!(status);
                }
                if let LlmError::Upstream { code: Some(code), .. } = cause {
                    v["code"] = json!(code);
                }
                if let Some(data) = data {
                    v["data"] = data.clone();
                }
                v
            }
            StreamEvent::Done => json!({ "done": true }),
        }
    }
}

impl From<&LlmError> for StreamEvent {
    fn from(err: &LlmError) -> Self {
        let data = match err {
            LlmError::Upstream { body, .. } => {
                Some(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone())))
            }
            _ => None,
        };
        StreamEvent::Error {
            message: err.to_string(),
            status: err.status(),
            data,
            cause: err.clone(),
        }
    }
}
