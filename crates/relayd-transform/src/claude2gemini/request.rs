use serde_json::Value as JsonValue;

use relayd_protocol::claude::request::CreateMessageRequest as ClaudeRequest;
use relayd_protocol::claude::types::{ContentBlock, MessageContent, Role as ClaudeRole};
use relayd_protocol::gemini::request::GenerateContentRequest;
use relayd_protocol::gemini::types::{
    Content, FunctionCall, FunctionResponse, GenerationConfig, Part, Role as GeminiRole, SystemInstruction,
};

/// Claude request → Gemini `generateContent` request. `system` becomes `systemInstruction`; `max_tokens` and
/// sampling knobs fold into `generationConfig`. `default_model` is unused
/// here since Gemini carries the model in the URL path, not the body —
/// kept for dispatch-table uniformity with the other two directions.
pub fn transform_request(request: &ClaudeRequest, _default_model: &str) -> GenerateContentRequest {
    let contents = request
        .messages
        .iter()
        .map(|message| map_message(message.role, &message.content))
        .collect();

    let system_instruction = request.system.as_ref().map(|system| SystemInstruction {
        parts: vec![Part::Text {
            text: system.flatten_text(),
        }],
    });

    let generation_config = GenerationConfig {
        max_output_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop_sequences.clone(),
    };

    if request.tools.is_some() {
        tracing::warn!("dropping top-level tool definitions in claude->gemini request translation: not supported in core");
    }

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
    }
}

fn map_message(role: ClaudeRole, content: &MessageContent) -> Content {
    let gemini_role = match role {
        ClaudeRole::User => GeminiRole::User,
        ClaudeRole::Assistant => GeminiRole::Model,
    };

    let blocks = content.as_blocks();
    let mut parts = Vec::with_capacity(blocks.len());
    for block in &blocks {
        match block {
            ContentBlock::Text(text_block) => parts.push(Part::Text { text: text_block.text.clone() }),
            ContentBlock::ToolUse(tool_use) => parts.push(Part::FunctionCall {
                function_call: FunctionCall {
                    name: tool_use.name.clone(),
                    args: tool_use.input.clone(),
                },
            }),
            ContentBlock::ToolResult(tool_result) => parts.push(Part::FunctionResponse {
                // Claude's tool_result only carries the originating call's
                // id, not its function name, so the id stands in for
                // `name` here; Gemini doesn't validate it against history.
                function_response: FunctionResponse {
                    name: tool_result.tool_use_id.clone(),
                    response: tool_result_response(tool_result.content.as_ref()),
                },
            }),
            ContentBlock::Other(_) => {
                tracing::warn!(role = ?role, "dropping unsupported content block in claude->gemini request translation");
            }
        }
    }

    Content { role: Some(gemini_role), parts }
}

fn tool_result_response(content: Option<&JsonValue>) -> JsonValue {
    match content {
        Some(JsonValue::Object(_)) => content.cloned().unwrap_or_default(),
        Some(other) => serde_json::json!({ "result": other }),
        None => serde_json::json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayd_protocol::claude::types::{Message, SystemParam};

    #[test]
    fn maps_system_and_generation_config() {
        let request = ClaudeRequest {
            model: "claude-3".to_string(),
            max_tokens: 256,
            messages: vec![Message {
                role: ClaudeRole::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            system: Some(SystemParam::Text("be terse".to_string())),
            temperature: Some(0.5),
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
        };

        let gemini = transform_request(&request, "gemini-1.5-pro");
        assert_eq!(gemini.contents.len(), 1);
        assert_eq!(gemini.contents[0].role, Some(GeminiRole::User));
        let instruction = gemini.system_instruction.expect("system instruction");
        assert_eq!(instruction.parts[0], Part::Text { text: "be terse".to_string() });
        let config = gemini.generation_config.expect("generation config");
        assert_eq!(config.max_output_tokens, Some(256));
        assert_eq!(config.temperature, Some(0.5));
    }
}
