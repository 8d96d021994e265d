use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A Claude model identifier. Upstreams that don't speak Claude natively
/// never see this type directly; it only round-trips through the wire.
pub type Model = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// `system` may be a plain string or an array of text blocks; both forms
/// are accepted on the wire and both are flattened to plain text when a
/// target upstream only understands a single system string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemParam {
    Text(String),
    Blocks(Vec<TextBlock>),
}

impl SystemParam {
    pub fn flatten_text(&self) -> String {
        match self {
            SystemParam::Text(text) => text.clone(),
            SystemParam::Blocks(blocks) => blocks
                .iter()
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub r#type: TextBlockType,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextBlockType {
    #[serde(rename = "text")]
    Text,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            r#type: TextBlockType::Text,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    #[serde(rename = "type")]
    pub r#type: ToolUseBlockType,
    pub id: String,
    pub name: String,
    pub input: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolUseBlockType {
    #[serde(rename = "tool_use")]
    ToolUse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    #[serde(rename = "type")]
    pub r#type: ToolResultBlockType,
    pub tool_use_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolResultBlockType {
    #[serde(rename = "tool_result")]
    ToolResult,
}

/// A content block as it appears in `messages[].content`. Block kinds the
/// core does not model explicitly (image, document, thinking, ...) are
/// preserved verbatim as `Other` so a passthrough upstream round-trips them
/// byte-for-byte; non-passthrough upstreams drop them with a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Other(JsonValue),
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(block) => Some(block.text.as_str()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::ToolUse(_) => "tool_use",
            ContentBlock::ToolResult(_) => "tool_result",
            ContentBlock::Other(value) => value
                .get("type")
                .and_then(JsonValue::as_str)
                .map(|_| "other")
                .unwrap_or("other"),
        }
    }
}

/// `messages[].content` is either a bare string (text-only shorthand) or an
/// array of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn as_blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text(TextBlock::new(text.clone()))],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text across all text blocks, ignoring non-text blocks.
    pub fn flatten_text(&self) -> String {
        self.as_blocks()
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_text_only(&self) -> bool {
        self.as_blocks()
            .iter()
            .all(|block| matches!(block, ContentBlock::Text(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A tool definition, passed through best-effort; the
/// core never inspects its shape beyond what's needed to map it onto an
/// OpenAI `tools[].function` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: JsonValue,
}
