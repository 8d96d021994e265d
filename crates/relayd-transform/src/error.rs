/// `TranslationInput` / `TranslationOutput` Request
/// translation in this crate is otherwise infallible and best-effort
/// (unrepresentable fields are dropped with a `tracing::warn!`, not an
/// error) — this only fires for shapes a transformer cannot make any
/// sense of at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("request has no content to translate")]
    EmptyRequest,
    #[error("upstream response could not be parsed: {0}")]
    UnparsableResponse(String),
}
