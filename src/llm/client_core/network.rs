use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::OpenAIClient;
use crate::llm::debug::DebugEntry;
use crate::llm::error::{LlmError, classify_error};
use crate::llm::types::ChatRequest;

impl OpenAIClient {
    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| LlmError::Config(format!("api key is not a valid header value: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Issues one chat.completions request. The response is returned whatever
    /// its status; transport failures, timeouts and cancellation are errors.
    pub(crate) async fn send_chat(
        &self,
        req: &ChatRequest,
        attempt: u8,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, LlmError> {
        let url = self.endpoint();
        let headers = self.headers()?;

        if let Ok(payload) = serde_json::to_value(req) {
            debug!(payload=%payload, endpoint=%url, attempt, "sending chat.completions payload");
            self.record(DebugEntry::Request { attempt, payload });
        }

        let fut = self.inner.post(&url).headers(headers).json(req).send();
        let resp = self.bounded(fut, cancel).await?.map_err(|e| {
            let kind = classify_error(&e);
            error!(attempt, kind=?kind, err=%e, "llm send error");
            LlmError::Connection(e.to_string())
        })?;
        self.record(DebugEntry::Response {
            status: resp.status().as_u16(),
        });
        Ok(resp)
    }

    pub(crate) async fn read_text(
        &self,
        resp: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.bounded(resp.text(), cancel)
            .await?
            .map_err(|e| LlmError::Connection(format!("read response body: {e}")))
    }

    /// Runs `fut` under the request timeout, giving up early on cancellation.
    pub(crate) async fn bounded<F, T>(&self, fut: F, cancel: &CancellationToken) -> Result<T, LlmError>
    where
        F: Future<Output = T>,
    {
        let timeout = self.request_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("llm request cancelled");
                Err(LlmError::Cancelled)
            }
            res = tokio::time::timeout(timeout, fut) => {
                res.map_err(|_| LlmError::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::types::ChatMessage;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-test".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: None,
        }
    }

    #[tokio::test]
    async fn sends_bearer_and_json() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/chat/completions"),
                request::headers(contains(key("authorization"))),
                request::body(json_decoded(eq(serde_json::json!({
                    "model": "gpt-test",
                    "messages": [{"role": "user", "content": "hi"}]
                })))),
            ])
            .respond_with(status_code(200).body("{}")),
        );
        let client = OpenAIClient::new(server.url_str("/"), "test-key").unwrap();
        let resp = client
            .send_chat(&request(), 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(delay_and_then(
                    std::time::Duration::from_millis(500),
                    status_code(200),
                )),
        );
        let client = OpenAIClient::new(server.url_str("/"), "x")
            .unwrap()
            .with_llm_config(LlmConfig {
                request_timeout_ms: 50,
                ..LlmConfig::default()
            });
        let err = client
            .send_chat(&request(), 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout(50)));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = OpenAIClient::new("http://127.0.0.1:9", "x").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.send_chat(&request(), 0, &cancel).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }
}
