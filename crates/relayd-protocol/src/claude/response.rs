use serde::{Deserialize, Serialize};

use super::types::{ContentBlock, Model, Role, StopReason, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "message")]
    Message,
}

/// A buffered Claude `Message` object, synthesized from whichever upstream
/// actually answered the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: MessageType,
    pub role: Role,
    pub model: Model,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl CreateMessageResponse {
    pub fn generated_id() -> String {
        format!("msg_{}", uuid::Uuid::new_v4().simple())
    }
}
