use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, error};

use crate::llm::types::{ChatMessage, ToolDef, ToolFunctionDef};
use crate::tools::workspace::WorkspaceError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {}", fields.join("; "))]
    InvalidArguments { tool: String, fields: Vec<String> },

    #[error("tool execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// The schema advertised to the model.
    pub fn to_tool_def(&self) -> ToolDef {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({"type": p.kind.as_str(), "description": p.description}),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        ToolDef {
            kind: "function".into(),
            function: ToolFunctionDef {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            },
        }
    }

    /// Parses raw arguments and checks them against the declared params.
    pub fn validate(&self, raw: &str) -> Result<Value, ToolError> {
        let invalid = |fields: Vec<String>| ToolError::InvalidArguments {
            tool: self.name.clone(),
            fields,
        };
        let raw = raw.trim();
        let args: Value = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| invalid(vec![format!("arguments: not valid JSON ({e})")]))?
        };
        let Some(obj) = args.as_object() else {
            return Err(invalid(vec![format!(
                "arguments: expected object, got {}",
                kind_of(&args)
            )]));
        };

        let mut problems = Vec::new();
        for p in &self.params {
            match obj.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    problems.push(format!("{}: missing required field", p.name));
                }
                None | Some(Value::Null) => {}
                Some(v) if !p.kind.accepts(v) => problems.push(format!(
                    "{}: expected {}, got {}",
                    p.name,
                    p.kind.as_str(),
                    kind_of(v)
                )),
                Some(_) => {}
            }
        }
        if problems.is_empty() {
            Ok(args)
        } else {
            Err(invalid(problems))
        }
    }
}

/// Side-channel through which handlers report that they changed state.
#[derive(Debug, Default)]
pub struct MutationSink {
    flags: Mutex<BTreeSet<String>>,
}

impl MutationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self, what: &str) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.insert(what.to_string());
        }
    }

    pub fn is_flagged(&self, what: &str) -> bool {
        self.flags.lock().map(|f| f.contains(what)).unwrap_or(false)
    }

    pub fn any(&self) -> bool {
        self.flags.lock().map(|f| !f.is_empty()).unwrap_or(false)
    }

    pub fn take(&self) -> Vec<String> {
        self.flags
            .lock()
            .map(|mut f| std::mem::take(&mut *f).into_iter().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    fn ok(call_id: &str, name: &str, value: &Value) -> Self {
        Self {
            tool_call_id: call_id.to_string(),
            name: name.to_string(),
            content: value.to_string(),
            is_error: false,
        }
    }

    fn failed(call_id: &str, name: &str, err: &ToolError, kind: Option<&str>) -> Self {
        let mut body = json!({ "error": err.to_string() });
        if let Some(kind) = kind {
            body["kind"] = json!(kind);
        }
        if let ToolError::InvalidArguments { fields, .. } = err {
            body["fields"] = json!(fields);
        }
        Self {
            tool_call_id: call_id.to_string(),
            name: name.to_string(),
            content: body.to_string(),
            is_error: true,
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::tool(&self.tool_call_id, &self.name, &self.content)
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, anyhow::Result<Value>>;

type Handler<C> = Box<dyn for<'a> Fn(&'a C, &'a Value, &'a MutationSink) -> HandlerFuture<'a> + Send + Sync>;

struct Registered<C: ?Sized> {
    spec: ToolSpec,
    handler: Handler<C>,
}

/// Name to handler map. `C` is the collaborator handlers act on.
pub struct ToolRegistry<C: ?Sized> {
    tools: BTreeMap<String, Registered<C>>,
    order: Vec<String>,
}

impl<C: ?Sized> Default for ToolRegistry<C> {
    fn default() -> Self {
        Self {
            tools: BTreeMap::new(),
            order: Vec::new(),
        }
    }
}

impl<C: ?Sized + Sync> ToolRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, spec: ToolSpec, handler: F)
    where
        F: for<'a> Fn(&'a C, &'a Value, &'a MutationSink) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        if !self.tools.contains_key(&spec.name) {
            self.order.push(spec.name.clone());
        }
        self.tools.insert(
            spec.name.clone(),
            Registered {
                spec,
                handler: Box::new(handler),
            },
        );
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|r| &r.spec)
    }

    /// Wire schemas in registration order.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|r| r.spec.to_tool_def())
            .collect()
    }

    /// Runs one call. Every failure becomes an error [`ToolResult`].
    pub async fn dispatch(
        &self,
        name: &str,
        raw_arguments: &str,
        call_id: &str,
        ctx: &C,
        sink: &MutationSink,
    ) -> ToolResult {
        debug!(tool = name, call_id, "dispatching tool call");
        let Some(entry) = self.tools.get(name) else {
            error!(tool = name, "unknown tool");
            return ToolResult::failed(call_id, name, &ToolError::UnknownTool(name.to_string()), None);
        };
        let args = match entry.spec.validate(raw_arguments) {
            Ok(args) => args,
            Err(e) => {
                error!(tool = name, err = %e, "tool arguments rejected");
                return ToolResult::failed(call_id, name, &e, None);
            }
        };

        let started = std::panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(ctx, &args, sink)));
        let outcome = match started {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        match outcome {
            Ok(Ok(value)) => {
                debug!(tool = name, "tool succeeded");
                ToolResult::ok(call_id, name, &value)
            }
            Ok(Err(e)) => {
                error!(tool = name, err = %e, "tool execution failed");
                let kind = e.downcast_ref::<WorkspaceError>().map(WorkspaceError::kind);
                ToolResult::failed(call_id, name, &ToolError::Execution(format!("{e:#}")), kind)
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!(tool = name, panic = %msg, "tool handler panicked");
                ToolResult::failed(call_id, name, &ToolError::Execution(msg), None)
            }
        }
    }
}
