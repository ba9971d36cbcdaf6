//! Caller-owned capture of what went over the wire.
//!
//! The orchestrator reports into whatever [`DebugCollector`] it was handed;
//! nothing here is global.

use std::fmt;
use std::sync::Mutex;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum DebugEntry {
    Request { attempt: u8, payload: Value },
    Response { status: u16 },
    Line(String),
    Event(Value),
}

pub trait DebugCollector: Send + Sync + fmt::Debug {
    fn record(&self, entry: DebugEntry);
}

#[derive(Debug, Default)]
pub struct MemoryCollector {
    entries: Mutex<Vec<DebugEntry>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DebugEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Request payloads in the order they were sent.
    pub fn requests(&self) -> Vec<Value> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                DebugEntry::Request { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Value> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                DebugEntry::Event(v) => Some(v),
                _ => None,
            })
            .collect()
    }
}

impl DebugCollector for MemoryCollector {
    fn record(&self, entry: DebugEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_in_order() {
        let c = MemoryCollector::new();
        c.record(DebugEntry::Request {
            attempt: 0,
            payload: json!({"model": "m"}),
        });
        c.record(DebugEntry::Response { status: 200 });
        c.record(DebugEntry::Event(json!({"done": true})));
        assert_eq!(c.entries().len(), 3);
        assert_eq!(c.requests(), vec![json!({"model": "m"})]);
        assert_eq!(c.events(), vec![json!({"done": true})]);
    }
}
