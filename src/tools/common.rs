use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use crate::tools::workspace::WorkspaceError;

/// Sink flag raised by every handler that changes the story.
pub const STORY_CHANGED: &str = "story_changed";

pub(crate) fn id_arg(args: &Value, key: &str) -> Result<u64> {
    args.get(key).and_then(|v| v.as_u64()).ok_or_else(|| {
        WorkspaceError::BadRequest(format!("{key} must be a non-negative integer")).into()
    })
}

pub(crate) fn opt_id_arg(args: &Value, key: &str) -> Result<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => id_arg(args, key).map(Some),
    }
}

pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

pub(crate) fn opt_str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub(crate) fn ok<T: Serialize>(result: T) -> Result<Value> {
    Ok(json!({ "ok": true, "result": result }))
}
