use serde_json::Value as JsonValue;

use relayd_protocol::claude::request::CreateMessageRequest as ClaudeRequest;
use relayd_protocol::claude::types::{ContentBlock, MessageContent, Role as ClaudeRole};
use relayd_protocol::openai::request::CreateChatCompletionRequest as OpenAIRequest;
use relayd_protocol::openai::types::{
    ChatMessage, FunctionCall, FunctionDef, MessageContent as OpenAIMessageContent,
    Role as OpenAIRole, StopSequences, ToolCall, ToolCallType, ToolDef,
};

/// Claude request → OpenAI chat-completions request. `default_model` is the upstream's `defaultModel`; callers are
/// required to supply it for non-Claude upstreams (enforced at pool
/// validation time).
pub fn transform_request(request: &ClaudeRequest, default_model: &str) -> OpenAIRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(ChatMessage::system(system.flatten_text()));
    }

    for message in &request.messages {
        messages.extend(map_message(message.role, &message.content));
    }

    OpenAIRequest {
        model: default_model.to_string(),
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request
            .stop_sequences
            .clone()
            .map(StopSequences::Many),
        stream: request.stream,
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| ToolDef {
                    r#type: ToolCallType::Function,
                    function: FunctionDef {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    },
                })
                .collect()
        }),
    }
}

/// A Claude message may expand to more than one OpenAI message: a
/// `tool_result` block has no slot inside a `user`/`assistant` message on
/// the OpenAI side, so it's emitted as its own `tool`-role message and
/// whatever text/tool_use blocks surround it are flushed separately,
/// preserving block order.
fn map_message(role: ClaudeRole, content: &MessageContent) -> Vec<ChatMessage> {
    let openai_role = match role {
        ClaudeRole::User => OpenAIRole::User,
        ClaudeRole::Assistant => OpenAIRole::Assistant,
    };

    let blocks = content.as_blocks();
    let mut messages = Vec::new();
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &blocks {
        match block {
            ContentBlock::Text(text_block) => text.push_str(&text_block.text),
            ContentBlock::ToolUse(tool_use) => tool_calls.push(ToolCall {
                id: tool_use.id.clone(),
                r#type: ToolCallType::Function,
                function: FunctionCall {
                    name: tool_use.name.clone(),
                    arguments: tool_use.input.to_string(),
                },
            }),
            ContentBlock::ToolResult(tool_result) => {
                flush_pending(&mut messages, openai_role, &mut text, &mut tool_calls);
                messages.push(ChatMessage {
                    role: OpenAIRole::Tool,
                    content: Some(OpenAIMessageContent::Text(tool_result_text(tool_result.content.as_ref()))),
                    tool_calls: None,
                    tool_call_id: Some(tool_result.tool_use_id.clone()),
                });
            }
            ContentBlock::Other(_) => {
                tracing::warn!(role = ?role, "dropping unsupported content block in claude->openai request translation");
            }
        }
    }
    flush_pending(&mut messages, openai_role, &mut text, &mut tool_calls);

    messages
}

fn flush_pending(messages: &mut Vec<ChatMessage>, role: OpenAIRole, text: &mut String, tool_calls: &mut Vec<ToolCall>) {
    if text.is_empty() && tool_calls.is_empty() {
        return;
    }
    messages.push(ChatMessage {
        role,
        content: if text.is_empty() { None } else { Some(OpenAIMessageContent::Text(std::mem::take(text))) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(std::mem::take(tool_calls)) },
        tool_call_id: None,
    });
}

fn tool_result_text(content: Option<&JsonValue>) -> String {
    match content {
        Some(JsonValue::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayd_protocol::claude::types::{Message, SystemParam};

    #[test]
    fn maps_model_system_and_messages() {
        let request = ClaudeRequest {
            model: "claude-3".to_string(),
            max_tokens: 8,
            messages: vec![Message {
                role: ClaudeRole::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            system: Some(SystemParam::Text("be terse".to_string())),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
        };

        let openai = transform_request(&request, "gpt-4-turbo");
        assert_eq!(openai.model, "gpt-4-turbo");
        assert_eq!(openai.messages.len(), 2);
        assert_eq!(openai.messages[0].role, OpenAIRole::System);
    }

    #[test]
    fn tool_result_block_becomes_its_own_tool_message() {
        use relayd_protocol::claude::types::{ContentBlock, ToolResultBlock, ToolResultBlockType};

        let request = ClaudeRequest {
            model: "claude-3".to_string(),
            max_tokens: 8,
            messages: vec![Message {
                role: ClaudeRole::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult(ToolResultBlock {
                    r#type: ToolResultBlockType::ToolResult,
                    tool_use_id: "call_1".to_string(),
                    content: Some(serde_json::json!("72F and sunny")),
                    is_error: None,
                })]),
            }],
            system: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
        };

        let openai = transform_request(&request, "gpt-4-turbo");
        assert_eq!(openai.messages.len(), 1);
        assert_eq!(openai.messages[0].role, OpenAIRole::Tool);
        assert_eq!(openai.messages[0].tool_call_id, Some("call_1".to_string()));
    }
}
