use bytes::Bytes;
use http::StatusCode;

use relayd_protocol::claude::error::{ErrorBody, ErrorKind as ClaudeErrorKind};

/// The error taxonomy the engine reasons about internally.
/// Never surfaced to the wire verbatim — `into_proxy_error` renders the
/// client-facing Claude error shape.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream transient error (status {status:?})")]
    UpstreamTransient { status: Option<u16> },
    #[error("upstream permanent error (status {status})")]
    UpstreamPermanent { status: u16 },
    #[error("request could not be translated: {0}")]
    TranslationInput(String),
    #[error("upstream response could not be parsed: {0}")]
    TranslationOutput(String),
    #[error("client cancelled the request")]
    ClientCancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Whether the engine should try the next eligible upstream.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transport(_) | ErrorKind::UpstreamTransient { .. })
    }

    /// `true` for statuses the engine treats as transient: transport
    /// failures, 408, 429, 5xx, and 529.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 529 => ErrorKind::UpstreamTransient { status: Some(status) },
            500..=599 => ErrorKind::UpstreamTransient { status: Some(status) },
            _ => ErrorKind::UpstreamPermanent { status },
        }
    }
}

/// The final HTTP response the engine hands back to the listener: a
/// status code plus a Claude-shaped JSON error body.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    pub fn new(status: StatusCode, kind: ClaudeErrorKind, message: impl Into<String>) -> Self {
        let body = ErrorBody::new(kind, message.into());
        let body = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            body: Bytes::from(body),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ClaudeErrorKind::InvalidRequest, message)
    }

    pub fn no_upstream_available() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ClaudeErrorKind::Api,
            "no upstream available",
        )
    }

    /// 502 listing the attempted upstream names and their terminal error
    /// classes.
    pub fn all_upstreams_failed(attempted: &[(String, String)]) -> Self {
        let listing = attempted
            .iter()
            .map(|(name, class)| format!("{name} ({class})"))
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            StatusCode::BAD_GATEWAY,
            ClaudeErrorKind::Api,
            format!("all upstreams failed: {listing}"),
        )
    }

    /// Maps an `UpstreamPermanent` HTTP status to the matching Claude
    /// error shape.
    pub fn from_upstream_status(status: u16, message: impl Into<String>) -> Self {
        let kind = ClaudeErrorKind::from_status(status);
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        Self::new(status, kind, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ClaudeErrorKind::Api, message)
    }
}
