use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::debug::{DebugCollector, DebugEntry};

mod network;

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    pub base_url: String,
    pub api_key: String,
    pub(crate) inner: reqwest::Client,
    pub llm_cfg: LlmConfig,
    /// Tracks total tokens used by this client
    pub tokens_used: Arc<AtomicU32>,
    /// Tracks prompt tokens reported by the last response
    pub prompt_tokens_used: Arc<AtomicU32>,
    pub(crate) collector: Option<Arc<dyn DebugCollector>>,
}

impl OpenAIClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let cfg = LlmConfig::default();
        let inner = build_http(&cfg)?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            inner,
            llm_cfg: cfg,
            tokens_used: Arc::new(AtomicU32::new(0)),
            prompt_tokens_used: Arc::new(AtomicU32::new(0)),
            collector: None,
        })
    }

    pub fn with_llm_config(mut self, cfg: LlmConfig) -> Self {
        // keep the previous client if the builder rejects the settings
        if let Ok(c) = build_http(&cfg) {
            self.inner = c;
        }
        self.llm_cfg = cfg;
        self
    }

    pub fn with_collector(mut self, collector: Arc<dyn DebugCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub(crate) fn record(&self, entry: DebugEntry) {
        if let Some(c) = &self.collector {
            c.record(entry);
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base).trim_end_matches('/');
        format!("{base}/v1/chat/completions")
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_cfg.request_timeout_ms)
    }

    /// Get the total number of tokens used by this client
    pub fn get_tokens_used(&self) -> u32 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    pub fn add_tokens(&self, tokens: u32) {
        self.tokens_used.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn get_prompt_tokens_used(&self) -> u32 {
        self.prompt_tokens_used.load(Ordering::Relaxed)
    }

    pub fn set_prompt_tokens(&self, tokens: u32) {
        self.prompt_tokens_used.store(tokens, Ordering::Relaxed);
    }
}

fn build_http(cfg: &LlmConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        let c = OpenAIClient::new("https://api.example.com/v1/", "x").unwrap();
        assert_eq!(c.endpoint(), "https://api.example.com/v1/chat/completions");
        let c2 = OpenAIClient::new("https://api.example.com/", "x").unwrap();
        assert_eq!(c2.endpoint(), "https://api.example.com/v1/chat/completions");
        let c3 = OpenAIClient::new("http://127.0.0.1:8080", "x").unwrap();
        assert_eq!(c3.endpoint(), "http://127.0.0.1:8080/v1/chat/completions");

        // only a trailing `/v1` segment is stripped
        let c4 = OpenAIClient::new("https://v1.example.com", "x").unwrap();
        assert_eq!(c4.endpoint(), "https://v1.example.com/v1/chat/completions");
        let c5 = OpenAIClient::new("https://gw.example.com/v1beta", "x").unwrap();
        assert_eq!(c5.endpoint(), "https://gw.example.com/v1beta/v1/chat/completions");
        let c6 = OpenAIClient::new("https://gw.example.com/openai/v1", "x").unwrap();
        assert_eq!(c6.endpoint(), "https://gw.example.com/openai/v1/chat/completions");
    }

    #[test]
    fn token_tracking() {
        let client = OpenAIClient::new("https://api.example.com/", "x").unwrap();
        assert_eq!(client.get_tokens_used(), 0);
        client.add_tokens(100);
        client.add_tokens(50);
        assert_eq!(client.get_tokens_used(), 150);
        // clones share the counters
        let other = client.clone();
        other.set_prompt_tokens(7);
        assert_eq!(client.get_prompt_tokens_used(), 7);
    }
}
