use std::sync::Arc;

use bytes::Bytes;

use relayd_pool::{PoolState, StatsStore, Upstream, UpstreamKind};
use relayd_protocol::claude::request::CreateMessageRequest;
use relayd_protocol::claude::response::CreateMessageResponse;
use relayd_protocol::claude::stream::{MessageDeltaPayload, StreamEvent, StreamUsage};
use relayd_protocol::claude::types::StopReason;
use relayd_protocol::sse::{encode_named_event, SseParser};
use relayd_transform::{claude2gemini, claude2openai, claude_passthrough};

use crate::dispatch::{ByteStream, RawBody, RawRequest, UpstreamClient};
use crate::error::{ErrorKind, ProxyError};
use crate::outbound_auth;

/// What the listener (C6) does with the result of `Engine::handle`.
pub enum EngineOutcome {
    Buffered(CreateMessageResponse),
    /// Already SSE-encoded bytes (`event: ...\ndata: ...\n\n` frames),
    /// ready to be written straight to the client connection.
    Streaming(ByteStream),
}

/// The routing & failover engine (C5). Holds no per-request state; a new
/// attempt loop is driven fresh for each `handle` call against a snapshot
/// of the pool taken at the top of the loop.
pub struct Engine {
    pool: Arc<PoolState>,
    stats: Arc<StatsStore>,
    client: Arc<dyn UpstreamClient>,
}

impl Engine {
    pub fn new(pool: Arc<PoolState>, stats: Arc<StatsStore>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { pool, stats, client }
    }

    /// Iterates eligible upstreams in priority order,
    /// translating, dispatching, and translating back for each, until one
    /// succeeds or the pool is exhausted.
    pub async fn handle(&self, request: CreateMessageRequest) -> Result<EngineOutcome, ProxyError> {
        let streaming = request.is_streaming();
        let caller_model = request.model.clone();
        let attempts = self.pool.attempt_order().await;
        if attempts.is_empty() {
            return Err(ProxyError::no_upstream_available());
        }

        let mut attempted = Vec::new();

        for upstream in attempts {
            self.stats.record_attempt(&upstream.name).await;

            let raw = match build_raw_request(&upstream, &request, streaming) {
                Ok(raw) => raw,
                Err(ErrorKind::TranslationInput(message)) => {
                    return Err(ProxyError::bad_request(message));
                }
                Err(other) => return Err(ProxyError::internal(other.to_string())),
            };

            let response = self.client.send(raw.clone()).await;
            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    self.stats.record_error(&upstream.name).await;
                    self.pool.mark_failed(&upstream.name).await;
                    attempted.push((upstream.name.clone(), err.to_string()));
                    continue;
                }
            };

            if !(200..300).contains(&response.status) {
                let kind = ErrorKind::from_status(response.status);
                let body_text = match &response.body {
                    RawBody::Bytes(bytes) => String::from_utf8_lossy(bytes).to_string(),
                    RawBody::Stream(_) => String::new(),
                };
                self.stats.record_error(&upstream.name).await;
                if kind.is_retryable() {
                    self.pool.mark_failed(&upstream.name).await;
                    attempted.push((upstream.name.clone(), format!("status {}", response.status)));
                    continue;
                }
                return Err(ProxyError::from_upstream_status(response.status, body_text));
            }

            if streaming {
                let output = self.spawn_stream_pipe(upstream.clone(), caller_model.clone(), response.body);
                return Ok(EngineOutcome::Streaming(output));
            }

            let body = match response.body {
                RawBody::Bytes(bytes) => bytes,
                RawBody::Stream(_) => unreachable!("buffered request never yields a stream body"),
            };

            let translated = match translate_buffered_response(upstream.kind, body, &caller_model) {
                Ok(result) => Some(result),
                // A malformed buffered response is retried once against the
                // same upstream before being treated as transient, in case
                // it was a one-off truncation rather than a persistent bug.
                Err(_) => match self.retry_buffered(&upstream, raw, &caller_model).await {
                    Ok(result) => Some(result),
                    Err(_) => None,
                },
            };

            match translated {
                Some((message, input_tokens, output_tokens)) => {
                    self.stats.record_tokens(&upstream.name, input_tokens, output_tokens).await;
                    self.pool.mark_ok(&upstream.name).await;
                    return Ok(EngineOutcome::Buffered(message));
                }
                None => {
                    self.stats.record_error(&upstream.name).await;
                    self.pool.mark_failed(&upstream.name).await;
                    attempted.push((upstream.name.clone(), "unparsable upstream response".to_string()));
                    continue;
                }
            }
        }

        Err(ProxyError::all_upstreams_failed(&attempted))
    }

    /// The one same-upstream retry for a buffered response that failed to
    /// parse. Any transport error or non-2xx status on the retry is folded
    /// into the same failure as the original parse error.
    async fn retry_buffered(
        &self,
        upstream: &Upstream,
        raw: RawRequest,
        caller_model: &str,
    ) -> Result<(CreateMessageResponse, u64, u64), ()> {
        let response = self.client.send(raw).await.map_err(|_| ())?;
        if !(200..300).contains(&response.status) {
            return Err(());
        }
        let body = match response.body {
            RawBody::Bytes(bytes) => bytes,
            RawBody::Stream(_) => unreachable!("buffered request never yields a stream body"),
        };
        translate_buffered_response(upstream.kind, body, caller_model).map_err(|_| ())
    }

    /// Wires the upstream byte stream to the client: for each raw SSE
    /// event, runs it through the upstream kind's incremental decoder and
    /// re-encodes the result as Claude SSE frames. Stats are finalized
    /// once the stream closes, inside this task, since bytes are already
    /// flowing to the client by the time this is called.
    fn spawn_stream_pipe(&self, upstream: Upstream, caller_model: String, body: RawBody) -> ByteStream {
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
        let RawBody::Stream(mut source) = body else {
            unreachable!("streaming request never yields a buffered body")
        };
        let stats = self.stats.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut pipe = StreamPipe::new(upstream.kind, caller_model);

            while let Some(chunk) = source.recv().await {
                for event in parser.push_bytes(&chunk) {
                    pipe.feed(event.event.as_deref(), &event.data, &tx).await;
                }
            }
            for event in parser.finish() {
                pipe.feed(event.event.as_deref(), &event.data, &tx).await;
            }

            let (input_tokens, output_tokens) = pipe.finish(&tx).await;
            stats.record_tokens(&upstream.name, input_tokens, output_tokens).await;
            pool.mark_ok(&upstream.name).await;
        });

        rx
    }
}

/// Per-stream decode state, one of the three transformer kinds.
enum StreamPipe {
    Claude { input_tokens: u64, output_tokens: u64, stopped: bool },
    OpenAi(claude2openai::stream::OpenAiToClaudeStream),
    Gemini(claude2gemini::stream::GeminiToClaudeStream),
}

impl StreamPipe {
    fn new(kind: UpstreamKind, caller_model: String) -> Self {
        match kind {
            UpstreamKind::Claude => StreamPipe::Claude { input_tokens: 0, output_tokens: 0, stopped: false },
            UpstreamKind::Openai => StreamPipe::OpenAi(claude2openai::stream::OpenAiToClaudeStream::new(caller_model)),
            UpstreamKind::Gemini => StreamPipe::Gemini(claude2gemini::stream::GeminiToClaudeStream::new(caller_model)),
        }
    }

    /// Feeds one upstream SSE frame through the decoder and writes any
    /// resulting Claude events to the client channel.
    async fn feed(&mut self, event_name: Option<&str>, data: &str, tx: &tokio::sync::mpsc::Sender<Bytes>) {
        match self {
            StreamPipe::Claude { input_tokens, output_tokens, stopped } => {
                // Claude SSE passes through verbatim; the engine only
                // peeks at `message_delta.usage` and `message_stop` to keep
                // per-upstream token stats accurate and to know whether the
                // stream closed cleanly, without buffering the stream.
                if data == "[DONE]" {
                    return;
                }
                if let Ok(event) = serde_json::from_str::<StreamEvent>(data) {
                    match event {
                        StreamEvent::MessageDelta { usage, .. } => {
                            if let Some(input) = usage.input_tokens {
                                *input_tokens = input;
                            }
                            if let Some(output) = usage.output_tokens {
                                *output_tokens = output;
                            }
                        }
                        StreamEvent::MessageStop => *stopped = true,
                        _ => {}
                    }
                }
                let name = event_name.unwrap_or("message");
                let _ = tx.send(Bytes::from(encode_named_event(name, data))).await;
            }
            StreamPipe::OpenAi(state) => {
                if data == "[DONE]" {
                    return;
                }
                let Ok(chunk) = serde_json::from_str(data) else { return };
                for event in state.transform_chunk(chunk) {
                    send_event(tx, &event).await;
                }
            }
            StreamPipe::Gemini(state) => {
                let Ok(chunk) = serde_json::from_str(data) else { return };
                for event in state.transform_chunk(chunk) {
                    send_event(tx, &event).await;
                }
            }
        }
    }

    /// Closes out the stream, synthesizing an error tail for any kind
    /// that never saw a clean stop event, and returns the telemetry token totals to record.
    async fn finish(&mut self, tx: &tokio::sync::mpsc::Sender<Bytes>) -> (u64, u64) {
        match self {
            StreamPipe::Claude { input_tokens, output_tokens, stopped } => {
                if !*stopped {
                    *stopped = true;
                    let delta = StreamEvent::MessageDelta {
                        delta: MessageDeltaPayload { stop_reason: Some(StopReason::Error), stop_sequence: None },
                        usage: StreamUsage { input_tokens: None, output_tokens: Some(*output_tokens) },
                    };
                    send_event(tx, &delta).await;
                    send_event(tx, &StreamEvent::MessageStop).await;
                }
                (*input_tokens, *output_tokens)
            }
            StreamPipe::OpenAi(state) => {
                for event in state.close_with_error() {
                    send_event(tx, &event).await;
                }
                (0, state.output_tokens_estimate())
            }
            StreamPipe::Gemini(state) => {
                for event in state.close_with_error() {
                    send_event(tx, &event).await;
                }
                (0, state.output_tokens_estimate())
            }
        }
    }
}

async fn send_event(tx: &tokio::sync::mpsc::Sender<Bytes>, event: &StreamEvent) {
    let name = event_name(event);
    let Ok(data) = serde_json::to_string(event) else { return };
    let _ = tx.send(Bytes::from(encode_named_event(name, &data))).await;
}

fn event_name(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Ping => "ping",
        StreamEvent::Error { .. } => "error",
    }
}

fn build_raw_request(upstream: &Upstream, request: &CreateMessageRequest, streaming: bool) -> Result<RawRequest, ErrorKind> {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    let host = upstream.host.trim_end_matches('/');

    let (path, body) = match upstream.kind {
        UpstreamKind::Claude => {
            let translated = claude_passthrough::transform_request(request.clone(), upstream.default_model.as_deref());
            let body = serde_json::to_vec(&translated)
                .map_err(|err| ErrorKind::TranslationInput(err.to_string()))?;
            ("/v1/messages".to_string(), body)
        }
        UpstreamKind::Openai => {
            let default_model = upstream
                .default_model
                .as_deref()
                .ok_or_else(|| ErrorKind::TranslationInput("upstream missing defaultModel".to_string()))?;
            let translated = claude2openai::request::transform_request(request, default_model);
            let body = serde_json::to_vec(&translated)
                .map_err(|err| ErrorKind::TranslationInput(err.to_string()))?;
            ("/v1/chat/completions".to_string(), body)
        }
        UpstreamKind::Gemini => {
            let default_model = upstream
                .default_model
                .as_deref()
                .ok_or_else(|| ErrorKind::TranslationInput("upstream missing defaultModel".to_string()))?;
            let translated = claude2gemini::request::transform_request(request, default_model);
            let body = serde_json::to_vec(&translated)
                .map_err(|err| ErrorKind::TranslationInput(err.to_string()))?;
            let action = if streaming { "streamGenerateContent?alt=sse" } else { "generateContent" };
            (format!("/v1beta/models/{default_model}:{action}"), body)
        }
    };

    let query = outbound_auth::attach(upstream.kind, &upstream.credential, &mut headers);
    let url = format!("https://{host}{path}{query}");

    Ok(RawRequest {
        url,
        headers,
        body: Bytes::from(body),
        is_stream: streaming,
    })
}

fn translate_buffered_response(
    kind: UpstreamKind,
    body: Bytes,
    caller_model: &str,
) -> Result<(CreateMessageResponse, u64, u64), ErrorKind> {
    match kind {
        UpstreamKind::Claude => {
            let response: CreateMessageResponse =
                serde_json::from_slice(&body).map_err(|err| ErrorKind::TranslationOutput(err.to_string()))?;
            let response = claude_passthrough::transform_response(response);
            let (input, output) = (response.usage.input_tokens, response.usage.output_tokens);
            Ok((response, input, output))
        }
        UpstreamKind::Openai => {
            let response = serde_json::from_slice(&body).map_err(|err| ErrorKind::TranslationOutput(err.to_string()))?;
            let (input, output) = claude2openai::response::extract_tokens(&response);
            Ok((claude2openai::response::transform_response(response, caller_model), input, output))
        }
        UpstreamKind::Gemini => {
            let response = serde_json::from_slice(&body).map_err(|err| ErrorKind::TranslationOutput(err.to_string()))?;
            let (input, output) = claude2gemini::response::extract_tokens(&response);
            Ok((claude2gemini::response::transform_response(response, caller_model), input, output))
        }
    }
}
