use serde::{Deserialize, Serialize};

use super::types::{Message, Model, SystemParam, Tool};

/// The body of a client `POST /v1/messages` request. Fields the core
/// doesn't transform are kept as plain `Option`s and passed through
/// verbatim by every transformer that has a wire slot for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub model: Model,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

impl CreateMessageRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn is_text_only(&self) -> bool {
        self.tools.is_none()
            && self
                .messages
                .iter()
                .all(|message| message.content.is_text_only())
    }
}
