use serde::{Deserialize, Serialize};

/// Which wire protocol this upstream natively speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKind {
    Claude,
    Openai,
    Gemini,
}

/// An immutable upstream descriptor (C1). Owned by whoever calls
/// `PoolState::replace`; the pool holds its own copy and never mutates one
/// in place — reconfiguration always replaces the whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,
    pub host: String,
    pub credential: String,
    pub kind: UpstreamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub remark: String,
}

impl Upstream {
    /// `defaultModel` is mandatory for every kind except Claude, since
    /// Claude requests already carry a model id the upstream understands.
    pub fn requires_default_model(&self) -> bool {
        !matches!(self.kind, UpstreamKind::Claude)
    }
}
