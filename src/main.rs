use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use quill::config::{AppConfig, CliOverrides};
use quill::llm::{ChatMessage, OpenAIClient, StreamEvent, ToolCallPart, run_conversation};
use quill::logging::init_logging;
use quill::tools::{MemoryWorkspace, MutationSink, StoryWorkspace, story_tool_registry};

const SYSTEM_PROMPT: &str = "You are a writing assistant working on the user's story. \
Use the tools to read and change chapters, story metadata, the sourcebook and images. \
Answer in plain prose once you are done.";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "quill",
    version,
    about = "Run one tool-using conversation about an in-memory story"
)]
struct Cli {
    /// OpenAI-compatible API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// API key (set via env OPENAI_API_KEY recommended)
    #[arg(long)]
    api_key: Option<String>,

    /// Log level (error,warn,info,debug,trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Request a single JSON document instead of a stream
    #[arg(long, action = ArgAction::SetTrue)]
    no_stream: bool,

    /// Describe tools in the prompt instead of sending them natively
    #[arg(long, action = ArgAction::SetTrue)]
    no_native_tools: bool,

    /// Give up after this many model turns
    #[arg(long)]
    max_rounds: Option<usize>,

    /// What to ask the model
    prompt: String,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            native_tools: self.no_native_tools.then_some(false),
            stream: self.no_stream.then_some(false),
            max_rounds: self.max_rounds,
        }
    }
}

fn print_event(ev: &StreamEvent) {
    match ev {
        StreamEvent::Content(text) => {
            print!("{text}");
            let _ = io::stdout().flush();
        }
        StreamEvent::Thinking(text) => eprint!("\x1b[2m{text}\x1b[0m"),
        StreamEvent::ToolCalls(parts) => {
            for part in parts {
                match part {
                    ToolCallPart::Call(call) => {
                        eprintln!("\n[tool] {}({})", call.name(), call.arguments())
                    }
                    ToolCallPart::Delta(delta) => {
                        if let Some(name) = delta.function.as_ref().and_then(|f| f.name.as_deref()) {
                            eprintln!("\n[tool] {name}");
                        }
                    }
                }
            }
        }
        StreamEvent::Error { .. } | StreamEvent::Done => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let cfg = AppConfig::load(cli.overrides())?;
    info!(base_url = %cfg.base_url, model = %cfg.model, "app config");
    let api_key = cfg
        .api_key
        .clone()
        .context("no API key: pass --api-key or set OPENAI_API_KEY")?;
    let client = OpenAIClient::new(cfg.base_url.clone(), api_key)?.with_llm_config(cfg.llm.clone());

    let workspace = MemoryWorkspace::demo();
    let registry = story_tool_registry();
    let sink = MutationSink::new();
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(cli.prompt)];

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            print_event(&ev);
        }
    });

    let result = run_conversation(
        &client,
        &cfg.model,
        &mut messages,
        &registry,
        &workspace as &dyn StoryWorkspace,
        &sink,
        Some(&tx),
        Some(cancel),
    )
    .await;
    drop(tx);
    let _ = printer.await;
    println!();

    if sink.any() {
        eprintln!("[story changed: {}]", sink.take().join(", "));
    }
    eprintln!(
        "[tokens: {} total, {} prompt]",
        client.get_tokens_used(),
        client.get_prompt_tokens_used()
    );

    if let Err(e) = result {
        error!(err = %e, "conversation failed");
        return Err(e.into());
    }
    Ok(())
}
