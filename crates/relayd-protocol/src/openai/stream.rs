use serde::{Deserialize, Serialize};

use super::types::{FinishReason, ToolCall, Usage};

/// One `data: {...}` chunk of an OpenAI chat-completions SSE stream.
/// The sentinel `data: [DONE]` line is not modeled here;
/// the stream transformer consumes it directly off the raw SSE text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

/// Tool-call deltas are indexed and partial: a given `index` accumulates
/// its `arguments` string across chunks until the finish event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallChunk>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl From<ToolCall> for ToolCallChunk {
    fn from(call: ToolCall) -> Self {
        Self {
            index: 0,
            id: Some(call.id),
            function: Some(FunctionCallChunk {
                name: Some(call.function.name),
                arguments: Some(call.function.arguments),
            }),
        }
    }
}
