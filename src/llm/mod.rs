pub mod channel;
mod client_core;
pub mod debug;
pub mod error;
pub mod events;
mod history;
pub mod negotiate;
mod stream;
mod stream_tools;
pub mod tool_extract;
mod tool_execution;
pub mod types;

pub use channel::{Channel, ChannelDemux, Fragment};
pub use client_core::*;
pub use debug::{DebugCollector, DebugEntry, MemoryCollector};
pub use error::{LlmError, LlmErrorKind, classify_error, classify_status};
pub use events::{StreamEvent, ToolCallPart};
pub use history::*;
pub use negotiate::{Negotiator, RequestParams, ToolMode, default_rejection_markers, is_tool_choice_rejection};
pub use stream::{EventStream, TurnAssembler};
pub use stream_tools::ToolDeltaBuffer;
pub use tool_execution::*;
pub use tool_extract::{IdScope, extract_tool_calls};
pub use types::*;
