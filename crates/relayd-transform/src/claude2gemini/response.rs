use relayd_protocol::claude::response::{CreateMessageResponse, MessageType};
use relayd_protocol::claude::types::{
    ContentBlock, Role, StopReason, TextBlock, ToolResultBlock, ToolResultBlockType, ToolUseBlock, ToolUseBlockType,
    Usage,
};
use relayd_protocol::gemini::response::GenerateContentResponse;
use relayd_protocol::gemini::types::{FinishReason, Part};

/// Gemini `generateContent` response → Claude `Message`.
/// `caller_model` is the Claude-facing model id the client sent.
pub fn transform_response(response: GenerateContentResponse, caller_model: &str) -> CreateMessageResponse {
    let candidate = response.candidates.into_iter().next();

    let (content, stop_reason) = match candidate {
        Some(candidate) => (parts_to_content(&candidate.content.parts), candidate.finish_reason.map(map_finish_reason)),
        None => (Vec::new(), None),
    };

    let usage = response
        .usage_metadata
        .map(|usage| Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
        .unwrap_or_default();

    CreateMessageResponse {
        id: CreateMessageResponse::generated_id(),
        r#type: MessageType::Message,
        role: Role::Assistant,
        model: caller_model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

fn parts_to_content(parts: &[Part]) -> Vec<ContentBlock> {
    parts
        .iter()
        .enumerate()
        .map(|(index, part)| match part {
            Part::Text { text } => ContentBlock::Text(TextBlock::new(text.clone())),
            Part::FunctionCall { function_call } => ContentBlock::ToolUse(ToolUseBlock {
                r#type: ToolUseBlockType::ToolUse,
                // Gemini never assigns call ids; synthesize one from the
                // part's position so a later tool_result can reference it.
                id: format!("toolu_{index}"),
                name: function_call.name.clone(),
                input: function_call.args.clone(),
            }),
            Part::FunctionResponse { function_response } => ContentBlock::ToolResult(ToolResultBlock {
                r#type: ToolResultBlockType::ToolResult,
                tool_use_id: function_response.name.clone(),
                content: Some(function_response.response.clone()),
                is_error: None,
            }),
        })
        .collect()
}

/// `{STOP→end_turn, MAX_TOKENS→max_tokens,
/// SAFETY→end_turn, RECITATION→end_turn}`.
pub fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::MaxTokens => StopReason::MaxTokens,
        FinishReason::Safety => StopReason::EndTurn,
        FinishReason::Recitation => StopReason::EndTurn,
    }
}

pub fn extract_tokens(response: &GenerateContentResponse) -> (u64, u64) {
    match &response.usage_metadata {
        Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
        None => (0, 0),
    }
}
