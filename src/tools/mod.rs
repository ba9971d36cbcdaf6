mod chapter;
pub mod common;
mod images;
pub mod registry;
mod sourcebook;
mod story;
pub mod workspace;

pub use common::STORY_CHANGED;
pub use registry::{MutationSink, ParamKind, ParamSpec, ToolError, ToolRegistry, ToolResult, ToolSpec};
pub use workspace::{MemoryWorkspace, StoryWorkspace, WorkspaceError};

/// Every story tool, bound to a [`StoryWorkspace`].
pub fn story_tool_registry() -> ToolRegistry<dyn StoryWorkspace> {
    let mut reg = ToolRegistry::new();
    chapter::register(&mut reg);
    story::register(&mut reg);
    sourcebook::register(&mut reg);
    images::register(&mut reg);
    reg
}
