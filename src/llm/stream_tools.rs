use tracing::debug;

use crate::llm::types::{ToolCall, ToolCallDelta};

#[derive(Debug, Clone, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Reassembles streamed native tool-call deltas, keyed by their index.
#[derive(Debug, Default)]
pub struct ToolDeltaBuffer {
    calls: Vec<PartialCall>,
    last_index: usize,
}

impl ToolDeltaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    // Deltas without an index continue the most recent call.
    pub fn push_delta(&mut self, delta: &ToolCallDelta) {
        let index = delta.index.unwrap_or(self.last_index);
        self.last_index = index;
        if self.calls.len() <= index {
            self.calls.resize_with(index + 1, Default::default);
        }
        let slot = &mut self.calls[index];
        if let Some(id) = &delta.id
            && slot.id.is_none()
            && !id.is_empty()
        {
            slot.id = Some(id.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                slot.name.push_str(name);
            }
            if let Some(args) = &function.arguments {
                slot.arguments.push_str(args);
            }
        }
    }

    /// Completed calls in index order. Nameless slots are dropped.
    pub fn finalize(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .enumerate()
            .filter(|(_, c)| !c.name.is_empty())
            .map(|(index, c)| {
                let id = c.id.unwrap_or_else(|| format!("call_{index}"));
                let arguments = if c.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    c.arguments
                };
                debug!(id = %id, name = %c.name, "reassembled native tool call");
                ToolCall::new(id, c.name, arguments)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCallFunctionDelta;

    fn delta(index: Option<usize>, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            kind: None,
            function: Some(ToolCallFunctionDelta {
                name: name.map(str::to_string),
                arguments: args.map(str::to_string),
            }),
        }
    }

    #[test]
    fn reassembles_interleaved_calls() {
        let mut buf = ToolDeltaBuffer::new();
        assert!(buf.is_empty());
        buf.push_delta(&delta(Some(0), Some("call_a"), Some("read_chapter"), Some("{\"chap")));
        buf.push_delta(&delta(Some(1), None, Some("list_images"), None));
        buf.push_delta(&delta(Some(0), None, None, Some("ter_id\":1}")));
        buf.push_delta(&delta(None, None, None, Some("")));

        let calls = buf.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments(), r#"{"chapter_id":1}"#);
        assert_eq!(calls[1].id, "call_1");
        assert_eq!(calls[1].name(), "list_images");
        assert_eq!(calls[1].arguments(), "{}");
    }

    #[test]
    fn nameless_slots_are_dropped() {
        let mut buf = ToolDeltaBuffer::new();
        buf.push_delta(&delta(Some(2), Some("x"), None, Some("{}")));
        assert!(buf.finalize().is_empty());
    }
}
