use anyhow::Result;
use serde_json::Value;

use crate::tools::common::{STORY_CHANGED, id_arg, ok, opt_id_arg, opt_str_arg, str_arg};
use crate::tools::registry::{MutationSink, ParamKind, ParamSpec, ToolRegistry, ToolSpec};
use crate::tools::workspace::{ChapterPatch, StoryWorkspace};

pub fn register(reg: &mut ToolRegistry<dyn StoryWorkspace>) {
    let chapter_id = || ParamSpec::required("chapter_id", ParamKind::Integer, "Numeric chapter id");

    reg.register(
        ToolSpec::new("list_chapters", "List every chapter with its id, title and summary."),
        |ws, args, sink| Box::pin(list_chapters(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("read_chapter", "Read the full text and metadata of one chapter.").param(chapter_id()),
        |ws, args, sink| Box::pin(read_chapter(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("write_chapter", "Replace the text of a chapter.")
            .param(chapter_id())
            .param(ParamSpec::required("content", ParamKind::String, "New chapter text")),
        |ws, args, sink| Box::pin(write_chapter(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("update_chapter_metadata", "Change a chapter's title or summary.")
            .param(chapter_id())
            .param(ParamSpec::optional("title", ParamKind::String, "New title"))
            .param(ParamSpec::optional("summary", ParamKind::String, "New summary")),
        |ws, args, sink| Box::pin(update_chapter_metadata(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("create_chapter", "Create an empty chapter, optionally inside a book.")
            .param(ParamSpec::required("title", ParamKind::String, "Chapter title"))
            .param(ParamSpec::optional("book_id", ParamKind::Integer, "Book to place it in")),
        |ws, args, sink| Box::pin(create_chapter(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("delete_chapter", "Delete a chapter.").param(chapter_id()),
        |ws, args, sink| Box::pin(delete_chapter(ws, args, sink)),
    );
}

async fn list_chapters(ws: &dyn StoryWorkspace, _args: &Value, _sink: &MutationSink) -> Result<Value> {
    let chapters: Vec<Value> = ws
        .list_chapters()
        .await?
        .into_iter()
        .map(|c| serde_json::json!({"id": c.id, "title": c.title, "summary": c.summary, "book_id": c.book_id}))
        .collect();
    ok(chapters)
}

async fn read_chapter(ws: &dyn StoryWorkspace, args: &Value, _sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "chapter_id")?;
    ok(ws.read_chapter(id).await?)
}

async fn write_chapter(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "chapter_id")?;
    let chapter = ws.write_chapter(id, str_arg(args, "content")).await?;
    sink.flag(STORY_CHANGED);
    ok(serde_json::json!({"id": chapter.id, "chars": chapter.content.chars().count()}))
}

async fn update_chapter_metadata(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "chapter_id")?;
    let patch = ChapterPatch {
        title: opt_str_arg(args, "title"),
        summary: opt_str_arg(args, "summary"),
    };
    let chapter = ws.update_chapter(id, patch).await?;
    sink.flag(STORY_CHANGED);
    ok(serde_json::json!({"id": chapter.id, "title": chapter.title, "summary": chapter.summary}))
}

async fn create_chapter(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let book_id = opt_id_arg(args, "book_id")?;
    let chapter = ws.create_chapter(str_arg(args, "title"), book_id).await?;
    sink.flag(STORY_CHANGED);
    ok(chapter)
}

async fn delete_chapter(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "chapter_id")?;
    ws.delete_chapter(id).await?;
    sink.flag(STORY_CHANGED);
    ok(serde_json::json!({"deleted": id}))
}
