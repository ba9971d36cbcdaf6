use anyhow::Result;
use serde_json::Value;

use crate::tools::common::{STORY_CHANGED, id_arg, ok, opt_str_arg, str_arg};
use crate::tools::registry::{MutationSink, ParamKind, ParamSpec, ToolRegistry, ToolSpec};
use crate::tools::workspace::{EntryPatch, StoryWorkspace};

// Reference entries: characters, places, items, lore.
pub fn register(reg: &mut ToolRegistry<dyn StoryWorkspace>) {
    let entry_id = || ParamSpec::required("entry_id", ParamKind::Integer, "Numeric entry id");

    reg.register(
        ToolSpec::new("search_sourcebook", "Search reference entries by text, optionally within a category.")
            .param(ParamSpec::optional("query", ParamKind::String, "Text to look for; empty lists all"))
            .param(ParamSpec::optional("category", ParamKind::String, "character, place, item, ...")),
        |ws, args, sink| Box::pin(search_sourcebook(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("create_sourcebook_entry", "Add a reference entry.")
            .param(ParamSpec::required("name", ParamKind::String, "Entry name"))
            .param(ParamSpec::required("category", ParamKind::String, "Entry category"))
            .param(ParamSpec::optional("description", ParamKind::String, "What the story should know")),
        |ws, args, sink| Box::pin(create_sourcebook_entry(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("update_sourcebook_entry", "Change fields of a reference entry.")
            .param(entry_id())
            .param(ParamSpec::optional("name", ParamKind::String, "New name"))
            .param(ParamSpec::optional("category", ParamKind::String, "New category"))
            .param(ParamSpec::optional("description", ParamKind::String, "New description")),
        |ws, args, sink| Box::pin(update_sourcebook_entry(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("delete_sourcebook_entry", "Delete a reference entry.").param(entry_id()),
        |ws, args, sink| Box::pin(delete_sourcebook_entry(ws, args, sink)),
    );
}

async fn search_sourcebook(ws: &dyn StoryWorkspace, args: &Value, _sink: &MutationSink) -> Result<Value> {
    let category = args.get("category").and_then(|v| v.as_str());
    ok(ws.search_entries(str_arg(args, "query"), category).await?)
}

async fn create_sourcebook_entry(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let entry = ws
        .create_entry(
            str_arg(args, "name"),
            str_arg(args, "category"),
            str_arg(args, "description"),
        )
        .await?;
    sink.flag(STORY_CHANGED);
    ok(entry)
}

async fn update_sourcebook_entry(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "entry_id")?;
    let patch = EntryPatch {
        name: opt_str_arg(args, "name"),
        category: opt_str_arg(args, "category"),
        description: opt_str_arg(args, "description"),
    };
    let entry = ws.update_entry(id, patch).await?;
    sink.flag(STORY_CHANGED);
    ok(entry)
}

async fn delete_sourcebook_entry(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let id = id_arg(args, "entry_id")?;
    ws.delete_entry(id).await?;
    sink.flag(STORY_CHANGED);
    ok(serde_json::json!({"deleted": id}))
}
