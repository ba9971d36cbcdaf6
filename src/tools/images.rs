use anyhow::Result;
use serde_json::Value;

use crate::tools::common::{STORY_CHANGED, ok, str_arg};
use crate::tools::registry::{MutationSink, ParamKind, ParamSpec, ToolRegistry, ToolSpec};
use crate::tools::workspace::StoryWorkspace;

pub fn register(reg: &mut ToolRegistry<dyn StoryWorkspace>) {
    reg.register(
        ToolSpec::new("list_images", "List the story's images."),
        |ws, args, sink| Box::pin(list_images(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("describe_image", "Get the stored description of an image.")
            .param(ParamSpec::required("name", ParamKind::String, "Image file name")),
        |ws, args, sink| Box::pin(describe_image(ws, args, sink)),
    );
    reg.register(
        ToolSpec::new("create_image", "Register a new image with a description.")
            .param(ParamSpec::required("name", ParamKind::String, "Image file name"))
            .param(ParamSpec::required("description", ParamKind::String, "What the image shows")),
        |ws, args, sink| Box::pin(create_image(ws, args, sink)),
    );
}

async fn list_images(ws: &dyn StoryWorkspace, _args: &Value, _sink: &MutationSink) -> Result<Value> {
    ok(ws.list_images().await?)
}

async fn describe_image(ws: &dyn StoryWorkspace, args: &Value, _sink: &MutationSink) -> Result<Value> {
    ok(ws.describe_image(str_arg(args, "name")).await?)
}

async fn create_image(ws: &dyn StoryWorkspace, args: &Value, sink: &MutationSink) -> Result<Value> {
    let image = ws
        .create_image(str_arg(args, "name"), str_arg(args, "description"))
        .await?;
    sink.flag(STORY_CHANGED);
    ok(image)
}
