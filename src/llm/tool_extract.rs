//! Recovers tool calls that a model wrote as text instead of structured fields.
//!
//! Recognized, in priority order for each block found:
//! 1. `<tool_call>{"name": ..., "arguments": {...}}</tool_call>`
//! 2. `<tool_call><function=NAME>ARGS</function></tool_call>` (also bare)
//! 3. `<tool_call>NAME(ARGS)</tool_call>`
//! 4. `[TOOL_CALL]NAME(ARGS)[/TOOL_CALL]`
//! 5. `Tool: NAME(ARGS)` at the start of a line or after whitespace
//! 6. `<|channel|>commentary to=functions.NAME<|message|>{...}`
//!
//! Every match becomes a canonical [`ToolCall`] with a synthetic id derived
//! from the function name.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::llm::channel::call_target_from_name;
use crate::llm::types::{CallOrigin, ToolCall};

/// Hands out `call_<name>`, `call_<name>_2`, ... so repeated names stay unique.
#[derive(Debug, Clone, Default)]
pub struct IdScope {
    counts: HashMap<String, usize>,
}

impl IdScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, name: &str) -> String {
        let slug: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let n = self.counts.entry(slug.clone()).or_insert(0);
        *n += 1;
        if *n == 1 {
            format!("call_{slug}")
        } else {
            format!("call_{slug}_{n}")
        }
    }
}

struct Patterns {
    tagged: Vec<Regex>,
    bare_function: Regex,
    bracket: Regex,
    line_prefix: Regex,
    channel: Regex,
    function_inner: Regex,
    parameter: Regex,
    call_head: Regex,
    json_name: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        tagged: vec![
            Regex::new(r"(?is)<tool_call>(.*?)(?:</tool_call>|$)").unwrap(),
            Regex::new(r"(?is)<\|tool_call_start\|>(.*?)(?:<\|tool_call_end\|>|$)").unwrap(),
        ],
        bare_function: Regex::new(r"(?is)<function=[^>\s]+>.*?(?:</function>|$)").unwrap(),
        bracket: Regex::new(r"(?is)\[TOOL_CALL\](.*?)(?:\[/TOOL_CALL\]|$)").unwrap(),
        line_prefix: Regex::new(r"(?im)(?:^|\s)(tool:\s*)[A-Za-z_][\w.\-]*\s*\(").unwrap(),
        channel: Regex::new(
            r"(?is)<\|channel\|>([^<]{0,80}(?:<\|constrain\|>[^<]{0,40})?)<\|message\|>(.*?)(?:<\|call\|>|<\|end\|>|<\|return\|>|<\|start\|>|$)",
        )
        .unwrap(),
        function_inner: Regex::new(r"(?is)^<function=([^>\s]+)>(.*?)(?:</function>|$)").unwrap(),
        parameter: Regex::new(r"(?is)<parameter=([^>\s]+)>(.*?)(?:</parameter>|$)").unwrap(),
        call_head: Regex::new(r"^([A-Za-z_][\w.\-]*)\s*\(").unwrap(),
        json_name: Regex::new(r#""name"\s*:\s*"([^"]+)""#).unwrap(),
    })
}

#[derive(Debug)]
enum SpanKind {
    /// Inner text of a tagged block.
    Block(Range<usize>),
    /// `NAME(ARGS)` notation starting at the given offset.
    Notation(usize),
    /// Channel name and channel body.
    Channel(Range<usize>, Range<usize>),
}

#[derive(Debug)]
struct Candidate {
    span: Range<usize>,
    kind: SpanKind,
}

/// Extracts with a fresh id scope. `None` means no call syntax was found.
pub fn extract_tool_calls(text: &str) -> Option<Vec<ToolCall>> {
    extract_with_scope(text, &mut IdScope::new())
}

pub fn extract_with_scope(text: &str, scope: &mut IdScope) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::new();
    for cand in discover(text) {
        let parsed = match &cand.kind {
            SpanKind::Block(inner) => parse_block(&text[inner.clone()]),
            SpanKind::Notation(start) => parse_notation(&text[*start..cand.span.end])
                .into_iter()
                .collect(),
            SpanKind::Channel(name, body) => {
                match call_target_from_name(&strip_constraint(&text[name.clone()])) {
                    Some(target) => vec![(target.to_string(), parse_arguments(&text[body.clone()]))],
                    None => vec![],
                }
            }
        };
        for (name, arguments) in parsed {
            calls.push(extracted(scope, &name, arguments, Some(cand.span.clone())));
        }
    }
    debug!(found = calls.len(), "textual tool call scan");
    (!calls.is_empty()).then_some(calls)
}

/// Parses the body of a tool block that arrived on its own channel.
pub fn extract_block(inner: &str, scope: &mut IdScope) -> Option<Vec<ToolCall>> {
    let calls: Vec<ToolCall> = parse_block(inner)
        .into_iter()
        .map(|(name, args)| extracted(scope, &name, args, None))
        .collect();
    (!calls.is_empty()).then_some(calls)
}

/// A channel whose name addresses a function carries raw JSON arguments.
pub fn extract_channel_call(channel: &str, content: &str, scope: &mut IdScope) -> Option<ToolCall> {
    let target = call_target_from_name(channel)?;
    Some(extracted(scope, target, parse_arguments(content), None))
}

/// Cheap check for whether text may hide call syntax. Best effort only.
pub fn looks_like_call(text: &str) -> bool {
    const HINTS: &[&str] = &[
        "[tool_call]",
        "<tool_call",
        "<|tool_call_start|>",
        "<function=",
        "tool:",
        "<|channel|>",
    ];
    let lower = text.to_ascii_lowercase();
    HINTS.iter().any(|h| lower.contains(h))
}

/// True when a call opener is present but its closer has not arrived yet.
pub fn has_unclosed_call(text: &str) -> bool {
    const PAIRS: &[(&str, &str)] = &[
        ("[tool_call]", "[/tool_call]"),
        ("<function=", "</function>"),
        ("<tool_call>", "</tool_call>"),
    ];
    let lower = text.to_ascii_lowercase();
    let tagged = PAIRS.iter().any(|(open, close)| match lower.rfind(open) {
        Some(idx) => !lower[idx..].contains(close),
        None => false,
    });
    tagged || has_unclosed_line_call(text)
}

/// `Tool: NAME(` whose parenthesis is still open, or a `Tool:` line whose
/// name is still being written.
fn has_unclosed_line_call(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    let Some(idx) = lower.rfind("tool:") else {
        return false;
    };
    if idx > 0 && !text[..idx].ends_with(char::is_whitespace) {
        return false;
    }
    let rest = &text[idx + "tool:".len()..];
    match rest.find('(') {
        Some(open) => {
            let head = rest[..open].trim();
            !head.is_empty()
                && !head.contains(char::is_whitespace)
                && matching_paren(rest, open).is_none()
        }
        None => {
            let head = rest.trim_start();
            !rest.contains('\n')
                && head
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
    }
}

/// Length of the longest suffix of `text` that could still grow into a call
/// opener. Streaming callers hold these bytes back until the next chunk.
pub fn partial_hint_len(text: &str) -> usize {
    const OPENERS: &[&str] = &["[tool_call]", "<function=", "tool:"];
    let lower = text.to_ascii_lowercase();
    let mut best = 0;
    for opener in OPENERS {
        for len in (1..opener.len()).rev() {
            if len <= best || len > lower.len() || !lower.is_char_boundary(lower.len() - len) {
                continue;
            }
            let start = lower.len() - len;
            if !opener.starts_with(&lower[start..]) {
                continue;
            }
            if *opener == "tool:" && start > 0 && !text[..start].ends_with(char::is_whitespace) {
                continue;
            }
            best = len;
            break;
        }
    }
    best
}

/// Removes the retained source spans of `calls` from `text`.
pub fn strip_calls(text: &str, calls: &[ToolCall]) -> String {
    let mut spans: Vec<Range<usize>> = calls
        .iter()
        .filter_map(|c| c.source_span.clone())
        .filter(|s| s.end <= text.len() && s.start <= s.end)
        .collect();
    spans.sort_by_key(|s| s.start);
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for span in spans {
        if span.start < pos {
            continue;
        }
        out.push_str(&text[pos..span.start]);
        pos = span.end;
    }
    out.push_str(&text[pos..]);
    out
}

fn extracted(scope: &mut IdScope, name: &str, arguments: Value, span: Option<Range<usize>>) -> ToolCall {
    let mut call = ToolCall::new(scope.next_id(name), name, arguments.to_string());
    call.origin = CallOrigin::Extracted;
    call.source_span = span;
    call
}

fn discover(text: &str) -> Vec<Candidate> {
    let p = patterns();
    let mut found = Vec::new();

    for re in &p.tagged {
        for caps in re.captures_iter(text) {
            let (Some(all), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            found.push(Candidate {
                span: all.range(),
                kind: SpanKind::Block(inner.range()),
            });
        }
    }
    for m in p.bare_function.find_iter(text) {
        found.push(Candidate {
            span: m.range(),
            kind: SpanKind::Block(m.range()),
        });
    }
    for caps in p.bracket.captures_iter(text) {
        let (Some(all), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        found.push(Candidate {
            span: all.range(),
            kind: SpanKind::Block(inner.range()),
        });
    }
    for caps in p.line_prefix.captures_iter(text) {
        let Some(prefix) = caps.get(1) else {
            continue;
        };
        let head = prefix.end();
        let end = match text[head..].find('(') {
            Some(open) => match matching_paren(text, head + open) {
                Some(close) => close + 1,
                None => text[head..].find('\n').map(|i| head + i).unwrap_or(text.len()),
            },
            None => continue,
        };
        found.push(Candidate {
            span: prefix.start()..end,
            kind: SpanKind::Notation(head),
        });
    }
    for caps in p.channel.captures_iter(text) {
        let (Some(all), Some(name), Some(body)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        found.push(Candidate {
            span: all.range(),
            kind: SpanKind::Channel(name.range(), body.range()),
        });
    }

    // Earliest block wins; anything nested inside it is ignored.
    found.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(b.span.end.cmp(&a.span.end)));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in found {
        if kept.last().is_some_and(|k| cand.span.start < k.span.end) {
            continue;
        }
        kept.push(cand);
    }
    kept
}

fn parse_block(inner: &str) -> Vec<(String, Value)> {
    let p = patterns();
    let body = inner.trim();
    if body.is_empty() {
        return vec![];
    }

    if body.starts_with('{') || body.starts_with('[') {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(items)) => {
                return items.iter().filter_map(json_call).collect();
            }
            Ok(value) => {
                if let Some(call) = json_call(&value) {
                    return vec![call];
                }
            }
            Err(e) => {
                // keep the name if we can see it; arguments fall back to {}
                if let Some(name) = p.json_name.captures(body).and_then(|c| c.get(1)) {
                    debug!(error = %e, "tool call JSON did not parse");
                    return vec![(name.as_str().to_string(), empty_args())];
                }
            }
        }
    }

    if let Some(caps) = p.function_inner.captures(body) {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let args = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        return vec![(name.to_string(), parse_function_args(args))];
    }

    parse_notation(body).into_iter().collect()
}

fn json_call(value: &Value) -> Option<(String, Value)> {
    let obj = value.as_object()?;
    let (name, args) = match obj.get("function").and_then(|f| f.as_object()) {
        Some(function) => (function.get("name"), function.get("arguments")),
        None => (
            obj.get("name"),
            obj.get("arguments").or_else(|| obj.get("parameters")),
        ),
    };
    let name = name?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let args = match args {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(raw)) => parse_arguments(raw),
        _ => empty_args(),
    };
    Some((name.to_string(), args))
}

fn parse_function_args(args: &str) -> Value {
    let args = args.trim();
    if args.is_empty() || args.starts_with('{') {
        return parse_arguments(args);
    }
    let mut map = Map::new();
    for caps in patterns().parameter.captures_iter(args) {
        let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let raw = raw.as_str().trim();
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.as_str().to_string(), value);
    }
    Value::Object(map)
}

/// `NAME(ARGS)` at the very start of `text`.
fn parse_notation(text: &str) -> Option<(String, Value)> {
    let text = text.trim_start();
    let caps = patterns().call_head.captures(text)?;
    let name = caps.get(1)?.as_str().to_string();
    let open = caps.get(0)?.end() - 1;
    let args = match matching_paren(text, open) {
        Some(close) => &text[open + 1..close],
        None => &text[open + 1..],
    };
    Some((name, parse_arguments(args)))
}

/// Parses a JSON object; anything else becomes `{}`.
pub fn parse_arguments(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return empty_args();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) | Err(_) => {
            debug!(raw, "unparsable tool arguments, using {{}}");
            empty_args()
        }
    }
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

fn strip_constraint(name: &str) -> String {
    match name.to_ascii_lowercase().find("<|constrain|>") {
        Some(idx) => name[..idx].trim().to_string(),
        None => name.trim().to_string(),
    }
}

/// Index of the `)` closing the `(` at `open`, skipping brackets and JSON strings.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (c == ')').then_some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests;
