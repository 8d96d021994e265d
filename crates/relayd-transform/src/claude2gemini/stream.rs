use relayd_protocol::claude::response::MessageType;
use relayd_protocol::claude::stream::{
    ContentBlockDelta, MessageDeltaPayload, StreamContentBlockStart, StreamEvent, StreamMessage,
    StreamUsage,
};
use relayd_protocol::claude::types::Role;
use relayd_protocol::gemini::stream::StreamChunk;
use relayd_protocol::gemini::types::Part;

use crate::claude2gemini::response::map_finish_reason;
use crate::token_estimate::estimate_tokens;

/// Incrementally folds a Gemini streaming `generateContent` response (one
/// full JSON object per SSE event, unlike OpenAI's delta chunks) into the
/// fixed Claude event sequence. A function call arrives whole in a single
/// event, so its `tool_use` block opens and closes within the same
/// `transform_chunk` call rather than spanning several deltas.
#[derive(Debug, Clone)]
pub struct GeminiToClaudeStream {
    id: String,
    model: String,
    text_block_index: Option<u32>,
    next_block_index: u32,
    message_started: bool,
    output_tokens_estimate: u64,
    finished: bool,
}

impl GeminiToClaudeStream {
    pub fn new(caller_model: String) -> Self {
        Self {
            id: relayd_protocol::claude::response::CreateMessageResponse::generated_id(),
            model: caller_model,
            text_block_index: None,
            next_block_index: 0,
            message_started: false,
            output_tokens_estimate: 0,
            finished: false,
        }
    }

    pub fn output_tokens_estimate(&self) -> u64 {
        self.output_tokens_estimate
    }

    pub fn transform_chunk(&mut self, chunk: StreamChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.message_started {
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

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return events;
        };

        for part in &candidate.content.parts {
            match part {
                Part::Text { text } => {
                    if text.is_empty() {
                        continue;
                    }
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
                    self.output_tokens_estimate += estimate_tokens(text);
                    events.push(StreamEvent::ContentBlockDelta {
                        index: self.text_block_index.expect("just opened above"),
                        delta: ContentBlockDelta::TextDelta { text: text.clone() },
                    });
                }
                Part::FunctionCall { function_call } => {
                    let index = self.open_block();
                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: StreamContentBlockStart::ToolUse {
                            id: format!("toolu_{index}"),
                            name: function_call.name.clone(),
                            input: serde_json::Value::Object(Default::default()),
                        },
                    });
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentBlockDelta::InputJsonDelta {
                            partial_json: function_call.args.to_string(),
                        },
                    });
                    events.push(StreamEvent::ContentBlockStop { index });
                }
                Part::FunctionResponse { .. } => {
                    tracing::warn!("dropping unexpected function_response part in model-generated gemini stream chunk");
                }
            }
        }

        if let Some(finish_reason) = candidate.finish_reason {
            if !self.finished {
                self.finished = true;
                if let Some(index) = self.text_block_index.take() {
                    events.push(StreamEvent::ContentBlockStop { index });
                }
                let output_tokens = chunk
                    .usage_metadata
                    .as_ref()
                    .map(|u| u.candidates_token_count)
                    .unwrap_or(self.output_tokens_estimate);
                let input_tokens = chunk.usage_metadata.as_ref().map(|u| u.prompt_token_count);
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
        if let Some(index) = self.text_block_index.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
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
    use relayd_protocol::gemini::response::Candidate;
    use relayd_protocol::gemini::types::{Content, FinishReason, Role as GeminiRole};

    fn chunk(text: &str, finish: Option<FinishReason>) -> StreamChunk {
        StreamChunk {
            candidates: vec![Candidate {
                content: Content {
                    role: Some(GeminiRole::Model),
                    parts: vec![Part::Text { text: text.to_string() }],
                },
                finish_reason: finish,
            }],
            usage_metadata: None,
        }
    }

    #[test]
    fn streams_in_claude_event_order() {
        let mut state = GeminiToClaudeStream::new("claude-3".to_string());
        let mut all = Vec::new();
        all.extend(state.transform_chunk(chunk("he", None)));
        all.extend(state.transform_chunk(chunk("llo", Some(FinishReason::Stop))));

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
    fn function_call_part_opens_and_closes_its_own_block() {
        use relayd_protocol::gemini::types::FunctionCall;

        let mut state = GeminiToClaudeStream::new("claude-3".to_string());
        let events = state.transform_chunk(StreamChunk {
            candidates: vec![Candidate {
                content: Content {
                    role: Some(GeminiRole::Model),
                    parts: vec![Part::FunctionCall {
                        function_call: FunctionCall {
                            name: "get_weather".to_string(),
                            args: serde_json::json!({"city": "paris"}),
                        },
                    }],
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage_metadata: None,
        });

        assert!(events.iter().any(|event| matches!(
            event,
            StreamEvent::ContentBlockStart { content_block: StreamContentBlockStart::ToolUse { name, .. }, .. }
                if name == "get_weather"
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            StreamEvent::ContentBlockDelta { delta: ContentBlockDelta::InputJsonDelta { partial_json }, .. }
                if partial_json.contains("paris")
        )));
    }
}
