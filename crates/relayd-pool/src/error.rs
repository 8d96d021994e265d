/// Errors surfaced by `PoolState` operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("invalid pool: {0}")]
    InvalidPool(String),
    #[error("no such upstream: {0}")]
    NoSuchUpstream(String),
}
