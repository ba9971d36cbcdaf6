use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::llm::client_core::OpenAIClient;
use crate::llm::debug::DebugEntry;
use crate::llm::error::{LlmError, classify_status};
use crate::llm::events::StreamEvent;
use crate::llm::negotiate::{Negotiator, RequestParams};
use crate::llm::types::{ChatMessage, ChatResponse, ChatStreamChunk, ToolDef, Usage};

mod assembler;

pub use assembler::TurnAssembler;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

enum Line {
    Events(Vec<StreamEvent>),
    Done,
}

impl OpenAIClient {
    /// Runs one upstream exchange and yields normalized events, ending with
    /// exactly one `Done` or `Error`.
    pub fn chat_events(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cancel: Option<CancellationToken>,
    ) -> EventStream {
        let client = self.clone();
        let params = RequestParams {
            model: model.to_string(),
            temperature: Some(self.llm_cfg.temperature),
            max_tokens: self.llm_cfg.max_tokens,
            stream: self.llm_cfg.stream,
        };
        let cancel = cancel.unwrap_or_default();

        let stream = async_stream::stream! {
            let markers = client.llm_cfg.tool_choice_rejection_markers.clone();
            let mut negotiator = Negotiator::new(&messages, &tools, client.llm_cfg.native_tools);

            let resp = loop {
                let req = negotiator.build(&params);
                let resp = match client.send_chat(&req, negotiator.attempt(), &cancel).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        yield client.emit(StreamEvent::from(&e));
                        return;
                    }
                };
                let status = resp.status();
                if status.is_success() {
                    break resp;
                }
                let body = match client.read_text(resp, &cancel).await {
                    Ok(body) => body,
                    Err(e) => {
                        yield client.emit(StreamEvent::from(&e));
                        return;
                    }
                };
                error!(status=%status.as_u16(), kind=?classify_status(status), body=%body, attempt=negotiator.attempt(), "llm non-success status");
                if negotiator.fallback_after(&body, &markers) {
                    continue;
                }
                let err = LlmError::Upstream {
                    status: status.as_u16(),
                    code: error_code(&body),
                    body,
                };
                yield client.emit(StreamEvent::from(&err));
                return;
            };

            let single_document = !params.stream
                || resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.contains("application/json"));
            let mut turn = TurnAssembler::new();

            if single_document {
                let text = match client.read_text(resp, &cancel).await {
                    Ok(text) => text,
                    Err(e) => {
                        yield client.emit(StreamEvent::from(&e));
                        return;
                    }
                };
                let body: ChatResponse = match serde_json::from_str(&text) {
                    Ok(body) => body,
                    Err(e) => {
                        error!(err=%e, "llm response body did not decode");
                        yield client.emit(StreamEvent::from(&LlmError::Decode(e.to_string())));
                        return;
                    }
                };
                if let Some(usage) = &body.usage {
                    client.track_usage(usage);
                }
                if let Some(choice) = body.choices.into_iter().next() {
                    let msg = choice.message;
                    for ev in turn.push_thinking(msg.reasoning_content.as_deref().unwrap_or_default()) {
                        yield client.emit(ev);
                    }
                    for ev in turn.push_content(msg.content.as_deref().unwrap_or_default()) {
                        yield client.emit(ev);
                    }
                    if let Some(ev) = turn.push_native_calls(msg.tool_calls) {
                        yield client.emit(ev);
                    }
                }
            } else {
                let mut byte_stream = resp.bytes_stream();
                let mut buf = Vec::<u8>::new();
                'read: loop {
                    let next = match client.bounded(byte_stream.next(), &cancel).await {
                        Ok(next) => next,
                        Err(e) => {
                            yield client.emit(StreamEvent::from(&e));
                            return;
                        }
                    };
                    let (lines, eof) = match next {
                        Some(Ok(chunk)) => {
                            buf.extend_from_slice(&chunk);
                            let mut lines = Vec::new();
                            let mut start = 0usize;
                            while let Some(pos) = buf[start..].iter().position(|b| *b == b'\n') {
                                lines.push(buf[start..start + pos].to_vec());
                                start += pos + 1;
                            }
                            buf.drain(..start);
                            (lines, false)
                        }
                        Some(Err(e)) => {
                            warn!(err=%e, "error reading chunk from byte stream");
                            let err = LlmError::Connection(format!("byte stream read error: {e}"));
                            yield client.emit(StreamEvent::from(&err));
                            return;
                        }
                        // upstream closed without the sentinel; treat as end of stream
                        None => (vec![std::mem::take(&mut buf)], true),
                    };
                    for line in lines {
                        match client.decode_line(&line, &mut turn) {
                            Line::Events(events) => {
                                for ev in events {
                                    yield client.emit(ev);
                                }
                            }
                            Line::Done => break 'read,
                        }
                    }
                    if eof {
                        break;
                    }
                }
            }

            for ev in turn.finish() {
                yield client.emit(ev);
            }
            yield client.emit(StreamEvent::Done);
        };

        Box::pin(stream)
    }

    fn emit(&self, ev: StreamEvent) -> StreamEvent {
        self.record(DebugEntry::Event(ev.to_wire()));
        ev
    }

    fn track_usage(&self, usage: &Usage) {
        self.add_tokens(usage.total_tokens);
        self.set_prompt_tokens(usage.prompt_tokens);
    }

    fn decode_line(&self, line: &[u8], turn: &mut TurnAssembler) -> Line {
        let Ok(s) = std::str::from_utf8(line) else {
            warn!(len = line.len(), "skipping non-utf8 stream line");
            return Line::Events(vec![]);
        };
        let s = s.trim();
        // blank lines separate events; ':' starts an SSE comment
        if s.is_empty() || s.starts_with(':') || s.starts_with("event:") {
            return Line::Events(vec![]);
        }
        self.record(DebugEntry::Line(s.to_string()));
        let payload = s.strip_prefix("data:").map(str::trim).unwrap_or(s);
        if payload == "[DONE]" {
            return Line::Done;
        }

        debug!(response_chunk=%payload, "llm chat_events response");

        let chunk = match serde_json::from_str::<ChatStreamChunk>(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(payload, err=%e, "failed to parse stream chunk");
                return Line::Events(vec![]);
            }
        };
        if let Some(usage) = &chunk.usage {
            self.track_usage(usage);
        }
        let mut events = Vec::new();
        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.as_deref() {
                events.extend(turn.push_thinking(reasoning));
            }
            if let Some(content) = delta.content.as_deref() {
                events.extend(turn.push_content(content));
            }
            if let Some(ev) = turn.push_native_deltas(delta.tool_calls) {
                events.push(ev);
            }
        }
        Line::Events(events)
    }
}

fn error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    error.get("code").and_then(|c| c.as_str()).map(str::to_string)
}
