use serde::{Deserialize, Serialize};

use super::types::Model;

/// `GET /v1/models` response shape, synthesized by the listener from
/// `Pool::Eligible()` — one entry per eligible upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub data: Vec<ModelInfo>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: Model,
    #[serde(rename = "type")]
    pub r#type: ModelInfoType,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelInfoType {
    #[serde(rename = "model")]
    Model,
}
