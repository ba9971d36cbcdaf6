use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::llm::default_rejection_markers;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const PROJECT_CONFIG_DIR: &str = ".quill";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub connect_timeout_ms: u64,
    /// Bounds sending the request and every awaited response chunk.
    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Offer structured tools on the first attempt.
    pub native_tools: bool,
    pub stream: bool,
    pub max_rounds: usize,
    pub tool_choice_rejection_markers: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            temperature: 0.7,
            max_tokens: None,
            native_tools: true,
            stream: true,
            max_rounds: 10,
            tool_choice_rejection_markers: default_rejection_markers(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub llm: Option<PartialLlmConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialLlmConfig {
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub native_tools: Option<bool>,
    pub stream: Option<bool>,
    pub max_rounds: Option<usize>,
    pub tool_choice_rejection_markers: Option<Vec<String>>,
}

impl PartialLlmConfig {
    /// Fields set on `self` win over `lower`.
    pub fn or(self, lower: PartialLlmConfig) -> PartialLlmConfig {
        PartialLlmConfig {
            connect_timeout_ms: self.connect_timeout_ms.or(lower.connect_timeout_ms),
            request_timeout_ms: self.request_timeout_ms.or(lower.request_timeout_ms),
            temperature: self.temperature.or(lower.temperature),
            max_tokens: self.max_tokens.or(lower.max_tokens),
            native_tools: self.native_tools.or(lower.native_tools),
            stream: self.stream.or(lower.stream),
            max_rounds: self.max_rounds.or(lower.max_rounds),
            tool_choice_rejection_markers: self
                .tool_choice_rejection_markers
                .or(lower.tool_choice_rejection_markers),
        }
    }

    pub fn resolve(self) -> LlmConfig {
        let d = LlmConfig::default();
        LlmConfig {
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(d.connect_timeout_ms),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(d.request_timeout_ms),
            temperature: self.temperature.unwrap_or(d.temperature),
            max_tokens: self.max_tokens.or(d.max_tokens),
            native_tools: self.native_tools.unwrap_or(d.native_tools),
            stream: self.stream.unwrap_or(d.stream),
            max_rounds: self.max_rounds.unwrap_or(d.max_rounds),
            tool_choice_rejection_markers: self
                .tool_choice_rejection_markers
                .unwrap_or(d.tool_choice_rejection_markers),
        }
    }
}

/// Values given on the command line; they take precedence over everything.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub native_tools: Option<bool>,
    pub stream: Option<bool>,
    pub max_rounds: Option<usize>,
}

impl AppConfig {
    /// CLI, then environment, then `.quill/config.toml`, then the global file.
    pub fn load(cli: CliOverrides) -> Result<Self> {
        let project_root = std::env::current_dir().context("resolve current dir")?;
        let project_cfg = load_project_config(&project_root).unwrap_or_default();
        let file_cfg = load_file_config().unwrap_or_default();
        Ok(Self::merge(
            cli,
            |key| std::env::var(key).ok(),
            project_cfg,
            file_cfg,
        ))
    }

    pub fn merge(
        cli: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        project_cfg: FileConfig,
        file_cfg: FileConfig,
    ) -> Self {
        let api_key = cli
            .api_key
            .or_else(|| env("OPENAI_API_KEY"))
            .or(project_cfg.api_key)
            .or(file_cfg.api_key);
        let base_url = cli
            .base_url
            .or_else(|| env("OPENAI_BASE_URL"))
            .or(project_cfg.base_url)
            .or(file_cfg.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = cli
            .model
            .or_else(|| env("OPENAI_MODEL"))
            .or(project_cfg.model)
            .or(file_cfg.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let native_tools_env = env("QUILL_NATIVE_TOOLS").and_then(|v| parse_bool(&v));
        let overrides = PartialLlmConfig {
            native_tools: cli.native_tools.or(native_tools_env),
            stream: cli.stream,
            max_rounds: cli.max_rounds,
            ..PartialLlmConfig::default()
        };
        let llm = overrides
            .or(project_cfg.llm.unwrap_or_default())
            .or(file_cfg.llm.unwrap_or_default())
            .resolve();

        Self {
            base_url,
            model,
            api_key,
            llm,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    match toml::from_str::<FileConfig>(&s) {
        Ok(cfg) => {
            info!(path=%path.display(), "loaded config file");
            Ok(Some(cfg))
        }
        Err(e) => {
            warn!(path=%path.display(), error=%e.to_string(), "parse config failed");
            Ok(None)
        }
    }
}

pub fn global_config_candidates() -> Vec<PathBuf> {
    let mut v = Vec::new();
    if let Ok(p) = std::env::var("QUILL_CONFIG") {
        v.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs::config_dir() {
        v.push(dir.join("quill").join("config.toml"));
    }
    v
}

pub fn load_file_config() -> Result<FileConfig> {
    for p in global_config_candidates() {
        if let Some(cfg) = read_config(&p)? {
            return Ok(cfg);
        }
    }
    Ok(FileConfig::default())
}

/// Load project-specific configuration from .quill/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let path = project_root.join(PROJECT_CONFIG_DIR).join("config.toml");
    Ok(read_config(&path)?.unwrap_or_default())
}

#[cfg(test)]
mod tests;
