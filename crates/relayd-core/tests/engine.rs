use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use relayd_core::dispatch::{RawBody, RawRequest, RawResponse};
use relayd_core::error::ErrorKind;
use relayd_core::{Engine, EngineOutcome, UpstreamClient};
use relayd_pool::{PoolState, StatsStore, Upstream, UpstreamKind};
use relayd_protocol::claude::request::CreateMessageRequest;
use relayd_protocol::claude::types::{Message, MessageContent, Role};

fn upstream(name: &str, kind: UpstreamKind, default_model: Option<&str>) -> Upstream {
    Upstream {
        name: name.to_string(),
        host: "example.test".to_string(),
        credential: "k".to_string(),
        kind,
        default_model: default_model.map(str::to_string),
        enabled: true,
        remark: String::new(),
    }
}

fn request() -> CreateMessageRequest {
    CreateMessageRequest {
        model: "claude-3".to_string(),
        max_tokens: 8,
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text("hi".to_string()),
        }],
        system: None,
        temperature: None,
        top_p: None,
        stop_sequences: None,
        stream: None,
        tools: None,
    }
}

/// Scripted per-call responses keyed by call index, used to simulate a
/// sequence of upstream attempts without a real network.
struct ScriptedClient {
    responses: Vec<Result<RawResponse, ErrorKind>>,
    calls: AtomicUsize,
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        _req: RawRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, ErrorKind>> + Send + 'a>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match self.responses.get(index) {
                Some(Ok(RawResponse { status, headers, body: RawBody::Bytes(bytes) })) => Ok(RawResponse {
                    status: *status,
                    headers: headers.clone(),
                    body: RawBody::Bytes(bytes.clone()),
                }),
                Some(Ok(RawResponse { body: RawBody::Stream(_), .. })) => {
                    panic!("scripted stream responses are not supported in this helper")
                }
                Some(Err(err)) => Err(err.clone()),
                None => panic!("unscripted upstream call #{index}"),
            }
        })
    }
}

fn ok_openai_response() -> RawResponse {
    RawResponse {
        status: 200,
        headers: Vec::new(),
        body: RawBody::Bytes(Bytes::from_static(
            br#"{"id":"chatcmpl-1","model":"gpt-4-turbo","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )),
    }
}

fn server_error_response() -> RawResponse {
    RawResponse {
        status: 503,
        headers: Vec::new(),
        body: RawBody::Bytes(Bytes::from_static(b"{}")),
    }
}

/// Buffered Claude->OpenAI round trip.
#[tokio::test]
async fn buffered_openai_upstream_round_trips_and_records_stats() {
    let pool = PoolState::new();
    pool.replace(vec![upstream("a", UpstreamKind::Openai, Some("gpt-4-turbo"))])
        .await
        .unwrap();
    let stats = Arc::new(StatsStore::new());
    let client = Arc::new(ScriptedClient {
        responses: vec![Ok(ok_openai_response())],
        calls: AtomicUsize::new(0),
    });
    let engine = Engine::new(Arc::new(pool), stats.clone(), client);

    let outcome = engine.handle(request()).await.unwrap();
    let EngineOutcome::Buffered(message) = outcome else {
        panic!("expected a buffered outcome")
    };
    assert_eq!(message.usage.input_tokens, 3);
    assert_eq!(message.usage.output_tokens, 1);

    let snapshot = stats.snapshot().await;
    let stat = snapshot.endpoints.get("a").unwrap();
    assert_eq!(stat.requests, 1);
    assert_eq!(stat.errors, 0);
}

/// Pool = [A (503), B (200)]; client succeeds via B.
#[tokio::test]
async fn failover_skips_transient_failure_to_next_upstream() {
    let pool = PoolState::new();
    pool.replace(vec![
        upstream("a", UpstreamKind::Openai, Some("gpt-4-turbo")),
        upstream("b", UpstreamKind::Openai, Some("gpt-4-turbo")),
    ])
    .await
    .unwrap();
    let stats = Arc::new(StatsStore::new());
    let client = Arc::new(ScriptedClient {
        responses: vec![Ok(server_error_response()), Ok(ok_openai_response())],
        calls: AtomicUsize::new(0),
    });
    let engine = Engine::new(Arc::new(pool), stats.clone(), client);

    let outcome = engine.handle(request()).await.unwrap();
    assert!(matches!(outcome, EngineOutcome::Buffered(_)));

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.endpoints.get("a").unwrap().requests, 1);
    assert_eq!(snapshot.endpoints.get("a").unwrap().errors, 1);
    assert_eq!(snapshot.endpoints.get("b").unwrap().errors, 0);
}

/// Pool = [A(500), B(500)]; client receives 502.
#[tokio::test]
async fn all_upstreams_failing_yields_502() {
    let pool = PoolState::new();
    pool.replace(vec![
        upstream("a", UpstreamKind::Openai, Some("gpt-4-turbo")),
        upstream("b", UpstreamKind::Openai, Some("gpt-4-turbo")),
    ])
    .await
    .unwrap();
    let stats = Arc::new(StatsStore::new());
    let client = Arc::new(ScriptedClient {
        responses: vec![Ok(server_error_response()), Ok(server_error_response())],
        calls: AtomicUsize::new(0),
    });
    let engine = Engine::new(Arc::new(pool), stats.clone(), client);

    let err = engine.handle(request()).await.unwrap_err();
    assert_eq!(err.status.as_u16(), 502);

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.endpoints.get("a").unwrap().errors, 1);
    assert_eq!(snapshot.endpoints.get("b").unwrap().errors, 1);
}

/// A permanent 4xx does not fail over.
#[tokio::test]
async fn permanent_client_error_does_not_retry_remaining_upstreams() {
    let pool = PoolState::new();
    pool.replace(vec![
        upstream("a", UpstreamKind::Openai, Some("gpt-4-turbo")),
        upstream("b", UpstreamKind::Openai, Some("gpt-4-turbo")),
    ])
    .await
    .unwrap();
    let stats = Arc::new(StatsStore::new());
    let client = Arc::new(ScriptedClient {
        responses: vec![Ok(RawResponse {
            status: 401,
            headers: Vec::new(),
            body: RawBody::Bytes(Bytes::from_static(b"{}")),
        })],
        calls: AtomicUsize::new(0),
    });
    let engine = Engine::new(Arc::new(pool), stats.clone(), client);

    let err = engine.handle(request()).await.unwrap_err();
    assert_eq!(err.status.as_u16(), 401);

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.endpoints.get("a").unwrap().errors, 1);
    assert!(snapshot.endpoints.get("b").is_none());
}
