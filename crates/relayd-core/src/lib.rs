pub mod dispatch;
pub mod engine;
pub mod error;
pub mod outbound_auth;

pub use dispatch::{DispatchConfig, UpstreamClient, WreqUpstreamClient};
pub use engine::{Engine, EngineOutcome};
pub use error::{ErrorKind, ProxyError};
