//! Splits a model's raw token stream into channel-tagged fragments.
//!
//! Reasoning models interleave several lanes in one text stream: hidden
//! thinking (`<think>…</think>`), harmony-style channel headers
//! (`<|channel|>analysis<|message|>`), inline tool blocks
//! (`<tool_call>…</tool_call>`) and end-of-turn markers. [`ChannelDemux`]
//! consumes arbitrary chunks, holds back only a suffix that may still turn
//! into a marker, and tags everything else with the channel active at the
//! point the text appeared.

/// An opener that has not completed after this many bytes is plain text.
pub const MAX_MARKER_LEN: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Final,
    Thought,
    ToolDef,
    Named(String),
}

impl Channel {
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        match name.to_ascii_lowercase().as_str() {
            "" | "final" => Channel::Final,
            "analysis" | "thought" | "thinking" => Channel::Thought,
            "tool_def" => Channel::ToolDef,
            _ => Channel::Named(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Channel::Final => "final",
            Channel::Thought => "thought",
            Channel::ToolDef => "tool_def",
            Channel::Named(name) => name,
        }
    }

    /// Function addressed by a channel such as `commentary to=functions.list_images`.
    pub fn call_target(&self) -> Option<&str> {
        match self {
            Channel::Named(name) => call_target_from_name(name),
            _ => None,
        }
    }
}

pub fn call_target_from_name(name: &str) -> Option<&str> {
    let idx = name.to_ascii_lowercase().find("to=")?;
    let target = name[idx + 3..].split_whitespace().next()?;
    let target = target.strip_prefix("functions.").unwrap_or(target);
    (!target.is_empty()).then_some(target)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub channel: Channel,
    pub content: String,
}

impl Fragment {
    pub fn new(channel: Channel, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    ThinkOpen,
    ThinkClose,
    ToolOpen,
    ToolClose,
    EndOfTurn,
    Separator,
    RoleHeader,
    ChannelHeader(String),
}

const LITERALS: &[(&str, Marker)] = &[
    ("<think>", Marker::ThinkOpen),
    ("</think>", Marker::ThinkClose),
    ("<thinking>", Marker::ThinkOpen),
    ("</thinking>", Marker::ThinkClose),
    ("<tool_call>", Marker::ToolOpen),
    ("</tool_call>", Marker::ToolClose),
    ("<|tool_call_start|>", Marker::ToolOpen),
    ("<|tool_call_end|>", Marker::ToolClose),
    ("<|end|>", Marker::EndOfTurn),
    ("<|call|>", Marker::EndOfTurn),
    ("<|return|>", Marker::EndOfTurn),
    ("<|message|>", Marker::Separator),
];

const CHANNEL_OPEN: &str = "<|channel|>";
const CHANNEL_BODY: &str = "<|message|>";
const CONSTRAIN: &str = "<|constrain|>";
const ROLE_OPEN: &str = "<|start|>";

// '<' introduces every marker; text without it never needs holding back.
const INTRODUCER: char = '<';

enum Scan {
    Marker {
        start: usize,
        len: usize,
        marker: Marker,
    },
    Pending(usize),
    Clear,
}

#[derive(Debug, Clone)]
pub struct ChannelDemux {
    buf: String,
    current: Channel,
}

impl Default for ChannelDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelDemux {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            current: Channel::Final,
        }
    }

    pub fn current(&self) -> &Channel {
        &self.current
    }

    /// Bytes currently held back waiting for a marker to complete.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Fragment> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();
        loop {
            match scan(&self.buf) {
                Scan::Marker { start, len, marker } => {
                    let text: String = self.buf.drain(..start).collect();
                    push_fragment(&mut out, &self.current, &text);
                    self.buf.drain(..len);
                    self.apply(marker);
                }
                Scan::Pending(start) => {
                    let text: String = self.buf.drain(..start).collect();
                    push_fragment(&mut out, &self.current, &text);
                    break;
                }
                Scan::Clear => {
                    let text = std::mem::take(&mut self.buf);
                    push_fragment(&mut out, &self.current, &text);
                    break;
                }
            }
        }
        out
    }

    /// Releases whatever is still held as literal text and resets to `final`.
    pub fn flush(&mut self) -> Vec<Fragment> {
        let mut out = Vec::new();
        let text = std::mem::take(&mut self.buf);
        push_fragment(&mut out, &self.current, &text);
        self.current = Channel::Final;
        out
    }

    fn apply(&mut self, marker: Marker) {
        self.current = match marker {
            Marker::ThinkOpen => Channel::Thought,
            Marker::ToolOpen => Channel::ToolDef,
            Marker::ThinkClose | Marker::ToolClose | Marker::EndOfTurn | Marker::RoleHeader => {
                Channel::Final
            }
            Marker::ChannelHeader(name) => Channel::from_name(&name),
            Marker::Separator => return,
        };
    }
}

fn push_fragment(out: &mut Vec<Fragment>, channel: &Channel, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut()
        && &last.channel == channel
    {
        last.content.push_str(text);
        return;
    }
    out.push(Fragment::new(channel.clone(), text));
}

fn scan(buf: &str) -> Scan {
    // ASCII lowering keeps byte offsets identical to `buf`.
    let lower = buf.to_ascii_lowercase();
    for (start, _) in lower.match_indices(INTRODUCER) {
        let rest = &lower[start..];

        if let Some((lit, marker)) = LITERALS.iter().find(|(lit, _)| rest.starts_with(lit)) {
            return Scan::Marker {
                start,
                len: lit.len(),
                marker: marker.clone(),
            };
        }

        if rest.starts_with(CHANNEL_OPEN) {
            match header_end(rest, CHANNEL_OPEN, CHANNEL_BODY) {
                Header::Complete(name_end) => {
                    let raw = &buf[start + CHANNEL_OPEN.len()..start + name_end];
                    let name = match raw.to_ascii_lowercase().find(CONSTRAIN) {
                        Some(idx) => &raw[..idx],
                        None => raw,
                    };
                    return Scan::Marker {
                        start,
                        len: name_end + CHANNEL_BODY.len(),
                        marker: Marker::ChannelHeader(name.trim().to_string()),
                    };
                }
                Header::Incomplete => return Scan::Pending(start),
                // too long to be a header: its '<' is released as text
                Header::Invalid => continue,
            }
        }

        if rest.starts_with(ROLE_OPEN) {
            match header_end(rest, ROLE_OPEN, "<|") {
                Header::Complete(role_end) => {
                    return Scan::Marker {
                        start,
                        len: role_end,
                        marker: Marker::RoleHeader,
                    };
                }
                Header::Incomplete => return Scan::Pending(start),
                Header::Invalid => continue,
            }
        }

        let could_complete = LITERALS.iter().any(|(lit, _)| lit.starts_with(rest))
            || CHANNEL_OPEN.starts_with(rest)
            || ROLE_OPEN.starts_with(rest);
        if could_complete {
            return Scan::Pending(start);
        }
    }
    Scan::Clear
}

enum Header {
    /// Offset (from the opener) where the terminator begins.
    Complete(usize),
    Incomplete,
    Invalid,
}

fn header_end(rest: &str, open: &str, terminator: &str) -> Header {
    let window = &rest[..floor_boundary(rest, MAX_MARKER_LEN)];
    if let Some(idx) = window[open.len()..].find(terminator) {
        let end = open.len() + idx;
        if end + terminator.len() <= MAX_MARKER_LEN {
            return Header::Complete(end);
        }
        return Header::Invalid;
    }
    if rest.len() < MAX_MARKER_LEN {
        Header::Incomplete
    } else {
        Header::Invalid
    }
}

fn floor_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run_all(chunks: &[&str]) -> Vec<Fragment> {
        let mut demux = ChannelDemux::new();
        let mut out = Vec::new();
        for c in chunks {
            out.extend(demux.feed(c));
        }
        out.extend(demux.flush());
        out
    }

    fn per_channel(frags: &[Fragment]) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = HashMap::new();
        for f in frags {
            map.entry(f.channel.as_str().to_string())
                .or_default()
                .push_str(&f.content);
        }
        map
    }

    #[test]
    fn think_tags_split_into_thought() {
        let frags = run_all(&["A<think>B</think>C"]);
        assert_eq!(
            frags,
            vec![
                Fragment::new(Channel::Final, "A"),
                Fragment::new(Channel::Thought, "B"),
                Fragment::new(Channel::Final, "C"),
            ]
        );
    }

    #[test]
    fn markers_are_case_insensitive() {
        let frags = run_all(&["x<THINK>y</Think>z"]);
        let map = per_channel(&frags);
        assert_eq!(map["thought"], "y");
        assert_eq!(map["final"], "xz");
    }

    #[test]
    fn every_split_point_gives_same_channels() {
        let inputs = [
            "A<think>B</think>C",
            "pre<|start|>assistant<|channel|>analysis<|message|>plan it<|end|><|start|>assistant<|channel|>final<|message|>Answer < 3",
            "hi <tool_call>{\"name\":\"list_images\",\"arguments\":{}}</tool_call> bye",
            "a <b> c <thin d </thinking> é<|tool_call_start|>x()<|tool_call_end|>",
        ];
        for input in inputs {
            let whole = per_channel(&run_all(&[input]));
            let bounds: Vec<usize> = (0..=input.len())
                .filter(|i| input.is_char_boundary(*i))
                .collect();
            for &i in &bounds {
                let split = per_channel(&run_all(&[&input[..i], &input[i..]]));
                assert_eq!(whole, split, "split at {i} of {input:?}");
            }
            // one character per chunk
            let chars: Vec<String> = input.chars().map(|c| c.to_string()).collect();
            let refs: Vec<&str> = chars.iter().map(|s| s.as_str()).collect();
            assert_eq!(whole, per_channel(&run_all(&refs)), "char-wise {input:?}");
        }
    }

    #[test]
    fn channel_header_strips_constraint() {
        let mut demux = ChannelDemux::new();
        let frags = demux.feed(
            "<|channel|>commentary to=functions.list_images <|constrain|>json<|message|>{}<|call|>",
        );
        assert_eq!(frags.len(), 1);
        assert_eq!(
            frags[0].channel,
            Channel::Named("commentary to=functions.list_images".into())
        );
        assert_eq!(frags[0].channel.call_target(), Some("list_images"));
        assert_eq!(frags[0].content, "{}");
        assert_eq!(demux.current(), &Channel::Final);
    }

    #[test]
    fn tool_block_reverts_to_final() {
        let frags = run_all(&["a<tool_call>", "x()", "</tool_call>b"]);
        assert_eq!(
            frags,
            vec![
                Fragment::new(Channel::Final, "a"),
                Fragment::new(Channel::ToolDef, "x()"),
                Fragment::new(Channel::Final, "b"),
            ]
        );
    }

    #[test]
    fn holds_only_unresolved_suffix() {
        let mut demux = ChannelDemux::new();
        let frags = demux.feed("hello <thi");
        assert_eq!(frags, vec![Fragment::new(Channel::Final, "hello ")]);
        assert_eq!(demux.pending_len(), 4);
        let frags = demux.feed("s is fine");
        assert_eq!(frags, vec![Fragment::new(Channel::Final, "<this is fine")]);
        assert_eq!(demux.pending_len(), 0);
    }

    #[test]
    fn runaway_header_is_released_and_buffer_stays_bounded() {
        let mut demux = ChannelDemux::new();
        let mut out = demux.feed("<|channel|>");
        for _ in 0..50 {
            out.extend(demux.feed("xxxxxxxx"));
            assert!(demux.pending_len() < MAX_MARKER_LEN);
        }
        out.extend(demux.flush());
        let text: String = out.iter().map(|f| f.content.as_str()).collect();
        assert!(text.starts_with("<|channel|>xxxx"));
        assert_eq!(text.len(), "<|channel|>".len() + 400);
        assert!(out.iter().all(|f| f.channel == Channel::Final));
    }

    #[test]
    fn flush_releases_partial_marker_literally() {
        let frags = run_all(&["done <|ch"]);
        assert_eq!(frags, vec![Fragment::new(Channel::Final, "done <|ch")]);
    }
}
