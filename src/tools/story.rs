use anyhow::Result;
use serde_json::Value;

use crate::tools::common::{STORY_CHANGED, id_arg, ok, opt_str_arg, str_arg};
use crate::tools::registry::{MutationSink, ParamKind, ParamSpec, ToolRegistry, ToolSpec};
use crate::tools::workspace::{StoryPatch, StoryWorkspace};

pub fn register(reg: &mut ToolRegistry<dyn StoryWorkspace>) {
    reg.register(
        ToolSpec::new("get_story_metadata", "Read the story title, summary and tags."),
        |ws, args, sink| Box::pin(get_story_metadata(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("update_story_metadata", "Change the story title, summary or tags.")
            .param(ParamSpec::optional("title", ParamKind::String, "New title"))
            .param(ParamSpec::optional("summary", ParamKind::String, "New summary"))
            .param(ParamSpec::optional("tags", ParamKind::Array, "Replacement list of tags")),
        |ws, args, sink| Box::pin(update_story_metadata(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("create_book", "Create a new book to group chapters.")
            .param(ParamSpec::required("title", ParamKind::String, "Book title")),
        |ws, args, sink| Box::pin(create_book(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("delete_book", "Delete a book and the chapters inside it.")
            .param(ParamSpec::required("book_id", ParamKind::Integer, "Numeric book id")),
        |ws, args, sink| Box::pin(delete_book(ws, args, sink)),
    );
}

async fn get_story_metadata(ws: &dyn StoryWorkspace, _args: &Value, _sink: &MutationSink) -> Result<Value> {
    ok(ws.story().await?)
}

async fn update_story_metadata(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let tags = args.get("tags").and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|t| t.as_str())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });
    let patch = StoryPatch {
        title: opt_str_arg(args, "title"),
        summary: opt_str_arg(args, "summary"),
        tags,
    };
    let story = ws.update_story(patch).await?;
    sink.flag(STORY_CHANGED);
    ok(story)
}

async fn create_book(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let book = ws.create_book(str_arg(args, "title")).await?;
    sink.flag(STORY_CHANGED);
    ok(book)
}

async fn delete_book(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "book_id")?;
    ws.delete_book(id).await?;
    sink.flag(STORY_CHANGED);
    ok(serde_json::json!({"deleted": id}))
}
