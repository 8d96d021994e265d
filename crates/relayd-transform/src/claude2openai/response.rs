use relayd_protocol::claude::response::{CreateMessageResponse, MessageType};
use relayd_protocol::claude::types::{ContentBlock, Role, StopReason, TextBlock, ToolUseBlock, ToolUseBlockType, Usage};
use relayd_protocol::openai::response::CreateChatCompletionResponse;
use relayd_protocol::openai::types::{FinishReason, ToolCall};

/// OpenAI chat-completions response → Claude `Message`.
/// `caller_model` is the Claude-facing model id the client sent (or the
/// upstream default if the caller didn't pin one) — the synthesized
/// message always reports that, never the upstream's own model string.
pub fn transform_response(response: CreateChatCompletionResponse, caller_model: &str) -> CreateMessageResponse {
    let choice = response.choices.into_iter().next();

    let (content, stop_reason) = match choice {
        Some(choice) => {
            let mut content = Vec::new();
            let text = match choice.message.content {
                Some(content) => content_to_text(content),
                None => String::new(),
            };
            if !text.is_empty() {
                content.push(ContentBlock::Text(TextBlock::new(text)));
            }
            if let Some(tool_calls) = choice.message.tool_calls {
                content.extend(tool_calls.into_iter().map(tool_call_to_block));
            }
            (content, choice.finish_reason.map(map_finish_reason))
        }
        None => (Vec::new(), None),
    };

    CreateMessageResponse {
        id: response.id,
        r#type: MessageType::Message,
        role: Role::Assistant,
        model: caller_model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: response
            .usage
            .map(|usage| Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

fn tool_call_to_block(call: ToolCall) -> ContentBlock {
    let input = serde_json::from_str(&call.function.arguments).unwrap_or_else(|err| {
        tracing::warn!(%err, "tool call arguments were not valid JSON, passing through as string");
        serde_json::Value::String(call.function.arguments.clone())
    });
    ContentBlock::ToolUse(ToolUseBlock {
        r#type: ToolUseBlockType::ToolUse,
        id: call.id,
        name: call.function.name,
        input,
    })
}

fn content_to_text(content: relayd_protocol::openai::types::MessageContent) -> String {
    use relayd_protocol::openai::types::{ContentPart, MessageContent};
    match content {
        MessageContent::Text(text) => text,
        MessageContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

/// `{stop→end_turn, length→max_tokens, tool_calls→tool_use,
/// content_filter→end_turn}`.
pub fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::EndTurn,
    }
}

pub fn extract_tokens(response: &CreateChatCompletionResponse) -> (u64, u64) {
    match &response.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => (0, 0),
    }
}
