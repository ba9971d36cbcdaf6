use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("chat error: {status} - {body}")]
    Upstream {
        status: u16,
        body: String,
        code: Option<String>,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("no final answer after {rounds} rounds")]
    Convergence { rounds: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl LlmError {
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short name of the variant, as written on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Upstream { .. } => "upstream",
            LlmError::Connection(_) => "connection",
            LlmError::Timeout(_) => "timeout",
            LlmError::Decode(_) => "decode",
            LlmError::Convergence { .. } => "convergence",
            LlmError::Cancelled => "cancelled",
            LlmError::Config(_) => "config",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    RateLimited,
    Server,
    Network,
    Timeout,
    Client,
    Deserialize,
    Unknown,
}

pub fn classify_status(status: StatusCode) -> LlmErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmErrorKind::RateLimited;
    }
    if status.is_server_error() {
        return LlmErrorKind::Server;
    }
    if status.is_client_error() {
        return LlmErrorKind::Client;
    }
    LlmErrorKind::Unknown
}

pub fn classify_error(err: &reqwest::Error) -> LlmErrorKind {
    if err.is_timeout() {
        return LlmErrorKind::Timeout;
    }
    if err.is_decode() {
        return LlmErrorKind::Deserialize;
    }
    if err.is_connect() || err.is_body() || err.is_request() {
        return LlmErrorKind::Network;
    }
    err.status().map(classify_status).unwrap_or(LlmErrorKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            LlmErrorKind::RateLimited
        );
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), LlmErrorKind::Server);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), LlmErrorKind::Client);
    }

    #[test]
    fn upstream_error_display() {
        let err = LlmError::Upstream {
            status: 400,
            body: "bad".into(),
            code: None,
        };
        assert_eq!(err.to_string(), "chat error: 400 - bad");
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.kind(), "upstream");
        assert_eq!(LlmError::Timeout(5).kind(), "timeout");
        assert_eq!(
            LlmError::Convergence { rounds: 10 }.to_string(),
            "no final answer after 10 rounds"
        );
    }
}
