use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use relayd_core::{Engine, ProxyError};
use relayd_pool::PoolState;
use relayd_protocol::claude::list_models::{ListModelsResponse, ModelInfo, ModelInfoType};
use relayd_protocol::claude::request::CreateMessageRequest;

pub struct AppState {
    pub engine: Engine,
    pub pool: Arc<PoolState>,
}

pub async fn create_message(State(state): State<Arc<AppState>>, Json(request): Json<CreateMessageRequest>) -> Response {
    match state.engine.handle(request).await {
        Ok(relayd_core::EngineOutcome::Buffered(message)) => Json(message).into_response(),
        Ok(relayd_core::EngineOutcome::Streaming(rx)) => {
            let stream = ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);
            let mut response = Response::new(Body::from_stream(stream));
            response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
        Err(err) => proxy_error_response(err),
    }
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let eligible = state.pool.eligible().await;
    let data = eligible
        .into_iter()
        .map(|upstream| ModelInfo {
            id: upstream.default_model.unwrap_or_else(|| upstream.name.clone()),
            r#type: ModelInfoType::Model,
            display_name: upstream.name,
        })
        .collect();
    Json(ListModelsResponse { data, has_more: false }).into_response()
}

pub async fn health(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.pool.eligible().await.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

fn proxy_error_response(err: ProxyError) -> Response {
    Response::builder()
        .status(err.status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(err.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
