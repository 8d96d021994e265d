use serde::{Deserialize, Serialize};

use crate::upstream::Upstream;

/// The read-only snapshot the core consumes from the external
/// configuration collaborator: `{ port, endpoints, ... }`.
/// The proxy never writes this file itself — only the excluded
/// control-plane API and the process entry point do — but it owns the
/// schema since the pool is the thing that validates and consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub endpoints: Vec<Upstream>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl ProxyConfig {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
