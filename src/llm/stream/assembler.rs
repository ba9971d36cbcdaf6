//! Turns the text and structured deltas of one assistant turn into
//! [`StreamEvent`]s.
//!
//! Final-lane text is scanned for embedded call syntax as it arrives; a call
//! found there is cut out of the content and surfaced as a `tool_calls` event
//! at that point. Tool blocks and `to=functions.X` channels are collected
//! until their channel ends. Every id is surfaced at most once per turn.

use std::collections::HashSet;
use std::ops::Range;

use tracing::{debug, warn};

use crate::llm::channel::{Channel, ChannelDemux, Fragment};
use crate::llm::events::{StreamEvent, ToolCallPart};
use crate::llm::tool_extract::{
    IdScope, extract_block, extract_channel_call, extract_tool_calls, extract_with_scope,
    has_unclosed_call, looks_like_call, partial_hint_len,
};
use crate::llm::types::{ToolCall, ToolCallDelta};

#[derive(Debug, Default)]
pub struct TurnAssembler {
    demux: ChannelDemux,
    scope: IdScope,
    emitted: HashSet<String>,
    /// All final-lane text of the turn.
    final_text: String,
    /// Unreleased tail of `final_text`.
    pending: String,
    /// Spans of `final_text` already turned into calls.
    consumed: Vec<Range<usize>>,
    block: Option<(Channel, String)>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds assistant content text.
    pub fn push_content(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for frag in self.demux.feed(text) {
            self.on_fragment(frag, &mut out);
        }
        if let Some((channel, _)) = &self.block
            && channel != self.demux.current()
        {
            self.close_block(&mut out);
        }
        self.release_final(false, &mut out);
        out
    }

    pub fn push_thinking(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if !text.is_empty() {
            self.release_final(true, &mut out);
            push_merged(&mut out, StreamEvent::Thinking(text.to_string()));
        }
        out
    }

    /// Complete calls from a single-document response.
    pub fn push_native_calls(&mut self, calls: Vec<ToolCall>) -> Option<StreamEvent> {
        let calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = self.scope.next_id(call.name());
                }
                call
            })
            .collect();
        self.surface(calls)
    }

    /// Streamed native fragments, forwarded verbatim. A repeated id is
    /// cleared so the same id never reaches the consumer twice.
    pub fn push_native_deltas(&mut self, deltas: Vec<ToolCallDelta>) -> Option<StreamEvent> {
        if deltas.is_empty() {
            return None;
        }
        let parts = deltas
            .into_iter()
            .map(|mut delta| {
                if let Some(id) = delta.id.take().filter(|id| !id.is_empty())
                    && self.emitted.insert(id.clone())
                {
                    delta.id = Some(id);
                }
                ToolCallPart::Delta(delta)
            })
            .collect();
        Some(StreamEvent::ToolCalls(parts))
    }

    /// End of the turn: flush everything held and re-scan the final lane for
    /// calls that were split across chunk boundaries.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for frag in self.demux.flush() {
            self.on_fragment(frag, &mut out);
        }
        self.release_final(true, &mut out);
        self.close_block(&mut out);

        if let Some(found) = extract_tool_calls(&self.final_text) {
            let missed: Vec<ToolCall> = found
                .into_iter()
                .filter(|call| {
                    call.source_span
                        .as_ref()
                        .is_none_or(|span| !self.consumed.iter().any(|c| overlaps(c, span)))
                })
                .map(|mut call| {
                    call.id = self.scope.next_id(call.name());
                    call
                })
                .collect();
            if !missed.is_empty() {
                debug!(count = missed.len(), "recovered tool calls on drain");
            }
            if let Some(ev) = self.surface(missed) {
                out.push(ev);
            }
        }
        out
    }

    fn on_fragment(&mut self, frag: Fragment, out: &mut Vec<StreamEvent>) {
        if frag.channel == Channel::Thought {
            self.release_final(true, out);
            self.close_block(out);
            push_merged(out, StreamEvent::Thinking(frag.content));
        } else if frag.channel == Channel::ToolDef || frag.channel.call_target().is_some() {
            self.append_block(frag, out);
        } else {
            self.close_block(out);
            self.final_text.push_str(&frag.content);
            self.pending.push_str(&frag.content);
        }
    }

    fn append_block(&mut self, frag: Fragment, out: &mut Vec<StreamEvent>) {
        self.release_final(true, out);
        if let Some((channel, content)) = &mut self.block
            && *channel == frag.channel
        {
            content.push_str(&frag.content);
            return;
        }
        self.close_block(out);
        self.block = Some((frag.channel, frag.content));
    }

    fn close_block(&mut self, out: &mut Vec<StreamEvent>) {
        let Some((channel, content)) = self.block.take() else {
            return;
        };
        let calls = match &channel {
            Channel::Named(name) => extract_channel_call(name, &content, &mut self.scope).map(|c| vec![c]),
            _ => extract_block(&content, &mut self.scope),
        };
        match calls {
            Some(calls) => {
                if let Some(ev) = self.surface(calls) {
                    out.push(ev);
                }
            }
            None => warn!(channel = channel.as_str(), len = content.len(), "tool block without a call"),
        }
    }

    /// Moves held final text out as content, cutting embedded calls. Unless
    /// `force`d, text that may still become a call stays held.
    fn release_final(&mut self, force: bool, out: &mut Vec<StreamEvent>) {
        if self.pending.is_empty() {
            return;
        }
        if looks_like_call(&self.pending) {
            if !force && has_unclosed_call(&self.pending) {
                return;
            }
            let base = self.final_text.len() - self.pending.len();
            if let Some(mut calls) = extract_with_scope(&self.pending, &mut self.scope) {
                calls.sort_by_key(|c| c.source_span.as_ref().map(|s| s.start));
                let text = std::mem::take(&mut self.pending);
                let mut pos = 0;
                for call in calls {
                    // calls parsed from one block share its span
                    if let Some(span) = call.source_span.clone()
                        && span.start >= pos
                    {
                        let before = &text[pos..span.start];
                        let before = if pos == 0 { before.trim_end() } else { before.trim() };
                        if !before.is_empty() {
                            push_merged(out, StreamEvent::Content(before.to_string()));
                        }
                        pos = span.end;
                        self.consumed.push(base + span.start..base + span.end);
                    }
                    if let Some(ev) = self.surface(vec![call]) {
                        push_merged(out, ev);
                    }
                }
                // the tail may still hold the start of another call
                self.pending = text[pos..].trim_start().to_string();
            }
        }
        let hold = if force { 0 } else { partial_hint_len(&self.pending) };
        let cut = self.pending.len() - hold;
        if cut > 0 {
            let text: String = self.pending.drain(..cut).collect();
            push_merged(out, StreamEvent::Content(text));
        }
    }

    fn surface(&mut self, calls: Vec<ToolCall>) -> Option<StreamEvent> {
        let parts: Vec<ToolCallPart> = calls
            .into_iter()
            .filter(|call| self.emitted.insert(call.id.clone()))
            .map(ToolCallPart::Call)
            .collect();
        (!parts.is_empty()).then_some(StreamEvent::ToolCalls(parts))
    }
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn push_merged(out: &mut Vec<StreamEvent>, ev: StreamEvent) {
    match (out.last_mut(), ev) {
        (Some(StreamEvent::Content(prev)), StreamEvent::Content(text)) => prev.push_str(&text),
        (Some(StreamEvent::Thinking(prev)), StreamEvent::Thinking(text)) => prev.push_str(&text),
        (Some(StreamEvent::ToolCalls(prev)), StreamEvent::ToolCalls(parts)) => prev.extend(parts),
        (_, ev) => out.push(ev),
    }
}
