use relayd_protocol::claude::request::CreateMessageRequest;
use relayd_protocol::claude::response::CreateMessageResponse;

/// Claude↔Claude is an identity transform at the JSON level. Header rewriting lives in
/// `relayd-core::auth`, which is where credentials are actually attached;
/// this function exists purely so the dispatch table has a uniform shape
/// across all three upstream kinds.
pub fn transform_request(request: CreateMessageRequest, default_model: Option<&str>) -> CreateMessageRequest {
    match default_model {
        Some(model) => CreateMessageRequest {
            model: model.to_string(),
            ..request
        },
        None => request,
    }
}

pub fn transform_response(response: CreateMessageResponse) -> CreateMessageResponse {
    response
}
