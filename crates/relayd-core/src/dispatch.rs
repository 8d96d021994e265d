use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Proxy};

use crate::error::ErrorKind;
use crate::outbound_auth::Headers;

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug)]
pub enum RawBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: RawBody,
}

#[derive(Debug, Clone)]
pub struct RawRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    pub is_stream: bool,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// 120s for non-streaming, 600s for streaming — the caller picks the
    /// right one per request via `RawRequest::is_stream`.
    pub buffered_timeout: Duration,
    pub streaming_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            buffered_timeout: Duration::from_secs(120),
            streaming_timeout: Duration::from_secs(600),
        }
    }
}

/// Sends a translated request to an upstream over the wire (C5's "dispatch"
/// step). A trait so the failover engine can be exercised in tests against
/// a stub.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: RawRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, ErrorKind>> + Send + 'a>>;
}

/// `wreq`-backed client with a per-proxy connection cache — a process-wide
/// client with a bounded pool per upstream host, rebuilt only
/// when the configured outbound proxy changes.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: DispatchConfig,
    clients: Arc<Mutex<HashMap<Option<String>, Client>>>,
}

impl WreqUpstreamClient {
    pub fn new(config: DispatchConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let client = build_client(&config, proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(proxy, client);
        Ok(Self {
            config,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn client(&self) -> Result<Client, ErrorKind> {
        let proxy = normalize_proxy(self.config.proxy.clone());
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| ErrorKind::Internal("upstream client cache lock poisoned".to_string()))?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref())
            .map_err(|err| ErrorKind::Transport(err.to_string()))?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value.map(|item| item.trim().to_string()).filter(|item| !item.is_empty())
}

fn build_client(config: &DispatchConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.streaming_timeout.max(config.buffered_timeout));

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: RawRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, ErrorKind>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client()?;
            let timeout = if req.is_stream {
                self.config.streaming_timeout
            } else {
                self.config.buffered_timeout
            };

            let mut builder = client.post(&req.url).timeout(timeout).body(req.body);
            for (k, v) in &req.headers {
                builder = builder.header(k, v);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream).await
        })
    }
}

async fn convert_response(resp: wreq::Response, want_stream: bool) -> Result<RawResponse, ErrorKind> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());
    let is_success = (200..300).contains(&status);

    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(RawResponse {
            status,
            headers,
            body: RawBody::Bytes(body),
        });
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            let Ok(chunk) = item else { break };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(RawResponse {
        status,
        headers,
        body: RawBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (k, v) in map {
        if let Ok(s) = v.to_str() {
            out.push((k.as_str().to_string(), s.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> ErrorKind {
    ErrorKind::Transport(err.to_string())
}
