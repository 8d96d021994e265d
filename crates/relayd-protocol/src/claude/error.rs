use serde::{Deserialize, Serialize};

/// Claude's error wire shape: `{type:"error", error:{type, message}}`.
/// `kind` is one of the fixed set of error type strings the
/// Messages API uses; this crate treats it as an open string so upstream
/// error bodies that use an unrecognized kind still round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Api,
    Overloaded,
}

impl ErrorKind {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Api => "api_error",
            ErrorKind::Overloaded => "overloaded_error",
        }
    }

    /// Maps an upstream HTTP status to a Claude error kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidRequest,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            529 => ErrorKind::Overloaded,
            _ => ErrorKind::Api,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub r#type: ErrorBodyType,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorBodyType {
    #[serde(rename = "error")]
    Error,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            r#type: ErrorBodyType::Error,
            error: ErrorDetail {
                kind: kind.as_wire_str().to_string(),
                message: message.into(),
            },
        }
    }
}
