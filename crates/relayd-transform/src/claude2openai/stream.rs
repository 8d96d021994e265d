use std::collections::HashMap;

use relayd_protocol::claude::response::MessageType;
use relayd_protocol::claude::stream::{
    ContentBlockDelta, MessageDeltaPayload, StreamContentBlockStart, StreamEvent, StreamMessage,
    StreamUsage,
};
use relayd_protocol::claude::types::Role;
use relayd_protocol::openai::stream::{ChatCompletionChunk, ToolCallChunk};

use crate::claude2openai::response::map_finish_reason;
use crate::token_estimate::estimate_tokens;

/// Incrementally folds an OpenAI chat-completions SSE stream into the
/// fixed Claude event sequence. A text content block is opened on first
/// non-empty text delta; each distinct `tool_calls[].index` opens its own
/// `tool_use` block on first sight. All open blocks close on
/// `finish_reason`.
#[derive(Debug, Clone)]
pub struct OpenAiToClaudeStream {
    id: String,
    model: String,
    text_block_index: Option<u32>,
    tool_block_indices: HashMap<u32, u32>,
    next_block_index: u32,
    message_started: bool,
    output_tokens_estimate: u64,
    finished: bool,
}

impl OpenAiToClaudeStream {
    pub fn new(caller_model: String) -> Self {
        Self {
            id: "unknown".to_string(),
            model: caller_model,
            text_block_index: None,
            tool_block_indices: HashMap::new(),
            next_block_index: 0,
            message_started: false,
            output_tokens_estimate: 0,
            finished: false,
        }
    }

    /// Running telemetry-only output token count.
    pub fn output_tokens_estimate(&self) -> u64 {
        self.output_tokens_estimate
    }

    pub fn transform_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.message_started {
            self.id = chunk.id.clone();
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.id.clone(),
                    r#type: MessageType::Message,
                    role: Role::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: StreamUsage::default(),
                },
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            if self.text_block_index.is_none() {
                let index = self.open_block();
                self.text_block_index = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlockStart::Text {
                        text: String::new(),
                    },
                });
            }
            self.output_tokens_estimate += estimate_tokens(&text);
            events.push(StreamEvent::ContentBlockDelta {
                index: self.text_block_index.expect("just opened above"),
                delta: ContentBlockDelta::TextDelta { text },
            });
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for call in &tool_calls {
                events.extend(self.emit_tool_call(call));
            }
        }

        if let Some(finish_reason) = choice.finish_reason {
            if !self.finished {
                self.finished = true;
                events.extend(self.close_open_blocks());
                let output_tokens = chunk
                    .usage
                    .as_ref()
                    .map(|u| u.completion_tokens)
                    .unwrap_or(self.output_tokens_estimate);
                let input_tokens = chunk.usage.as_ref().map(|u| u.prompt_tokens);
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaPayload {
                        stop_reason: Some(map_finish_reason(finish_reason)),
                        stop_sequence: None,
                    },
                    usage: StreamUsage {
                        input_tokens,
                        output_tokens: Some(output_tokens),
                    },
                });
                events.push(StreamEvent::MessageStop);
            }
        }

        events
    }

    fn open_block(&mut self) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }

    fn emit_tool_call(&mut self, call: &ToolCallChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let is_new = !self.tool_block_indices.contains_key(&call.index);
        let block_index = *self.tool_block_indices.entry(call.index).or_insert_with(|| {
            let index = self.next_block_index;
            self.next_block_index += 1;
            index
        });

        if is_new {
            let id = call.id.clone().unwrap_or_else(|| format!("toolcall-{}", call.index));
            let name = call
                .function
                .as_ref()
                .and_then(|function| function.name.clone())
                .unwrap_or_else(|| "tool".to_string());
            events.push(StreamEvent::ContentBlockStart {
                index: block_index,
                content_block: StreamContentBlockStart::ToolUse {
                    id,
                    name,
                    input: serde_json::Value::Object(Default::default()),
                },
            });
        }

        if let Some(arguments) = call.function.as_ref().and_then(|function| function.arguments.clone()) {
            events.push(StreamEvent::ContentBlockDelta {
                index: block_index,
                delta: ContentBlockDelta::InputJsonDelta { partial_json: arguments },
            });
        }

        events
    }

    fn close_open_blocks(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(index) = self.text_block_index.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        let mut tool_indices: Vec<u32> = self.tool_block_indices.drain().map(|(_, index)| index).collect();
        tool_indices.sort_unstable();
        for index in tool_indices {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        events
    }

    /// Called when the upstream stream terminates without a clean
    /// `finish_reason` (transport error mid-stream): synthesizes the
    /// error-closing tail so the client still sees a well-formed event
    /// sequence, without a retry.
    pub fn close_with_error(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut events = Vec::new();
        if !self.message_started {
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.id.clone(),
                    r#type: MessageType::Message,
                    role: Role::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: StreamUsage::default(),
                },
            });
        }
        events.extend(self.close_open_blocks());
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason: Some(relayd_protocol::claude::types::StopReason::Error),
                stop_sequence: None,
            },
            usage: StreamUsage {
                input_tokens: None,
                output_tokens: Some(self.output_tokens_estimate),
            },
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayd_protocol::openai::stream::{ChunkChoice, ChunkDelta};

    fn chunk(content: Option<&str>, finish: Option<relayd_protocol::openai::types::FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4-turbo".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: content.map(str::to_string),
                    tool_calls: None,
                },
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    #[test]
    fn streams_in_claude_event_order() {
        let mut state = OpenAiToClaudeStream::new("claude-3".to_string());
        let mut all = Vec::new();
        all.extend(state.transform_chunk(chunk(Some("he"), None)));
        all.extend(state.transform_chunk(chunk(Some("llo"), None)));
        all.extend(state.transform_chunk(chunk(
            None,
            Some(relayd_protocol::openai::types::FinishReason::Stop),
        )));

        let kinds: Vec<&str> = all
            .iter()
            .map(|e| match e {
                StreamEvent::MessageStart { .. } => "message_start",
                StreamEvent::ContentBlockStart { .. } => "content_block_start",
                StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
                StreamEvent::ContentBlockStop { .. } => "content_block_stop",
                StreamEvent::MessageDelta { .. } => "message_delta",
                StreamEvent::MessageStop => "message_stop",
                StreamEvent::Ping => "ping",
                StreamEvent::Error { .. } => "error",
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn tool_call_deltas_open_and_close_their_own_block() {
        use relayd_protocol::openai::stream::ToolCallChunk;
        use relayd_protocol::openai::types::FinishReason;

        let mut state = OpenAiToClaudeStream::new("claude-3".to_string());
        let mut all = Vec::new();
        all.extend(state.transform_chunk(ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4-turbo".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: None,
                    tool_calls: Some(vec![ToolCallChunk {
                        index: 0,
                        id: Some("call_1".to_string()),
                        function: Some(relayd_protocol::openai::stream::FunctionCallChunk {
                            name: Some("get_weather".to_string()),
                            arguments: Some(r#"{"city":"#.to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        }));
        all.extend(state.transform_chunk(ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4-turbo".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: None,
                    tool_calls: Some(vec![ToolCallChunk {
                        index: 0,
                        id: None,
                        function: Some(relayd_protocol::openai::stream::FunctionCallChunk {
                            name: None,
                            arguments: Some(r#""paris"}"#.to_string()),
                        }),
                    }]),
                },
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: None,
        }));

        let starts: Vec<_> = all
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockStart { content_block, .. } => Some(content_block),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 1);
        assert!(matches!(
            starts[0],
            StreamContentBlockStart::ToolUse { name, .. } if name == "get_weather"
        ));

        let deltas: Vec<_> = all
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta { delta: ContentBlockDelta::InputJsonDelta { partial_json }, .. } => {
                    Some(partial_json.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(deltas.join(""), r#"{"city":"paris"}"#);

        assert!(all.iter().any(|event| matches!(event, StreamEvent::ContentBlockStop { .. })));
        assert!(all.iter().any(|event| matches!(event, StreamEvent::MessageStop)));
    }
}
