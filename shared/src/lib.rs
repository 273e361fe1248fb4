use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::EnumIter;

/// Identifier handed out by `/upload` and used by every read endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    pub const PREFIX: &'static str = "oct_";

    /// Builds an id from a random token, e.g. the leading hex digits of a UUID.
    pub fn from_token(token: &str) -> Self {
        Self(format!("{}{}", Self::PREFIX, token))
    }

    /// Accepts ids made of ASCII alphanumerics, `_` and `-` only, so an id can
    /// never escape the storage directories when used as a filename prefix.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RetinalLayer {
    Rnfl,
    Gcl,
    Ipl,
    Opl,
    Inl,
    Onl,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResponse {
    pub status: String,
    pub image_id: ImageId,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub image_id: ImageId,
    pub predictions: BTreeMap<String, f32>,
    pub top_disease: String,
    pub confidence: f32,
    pub summary: String,
    pub recommendation: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MaskResponse {
    pub image_id: ImageId,
    pub overlay_mask_url: Option<String>,
    pub retinal_layer_thickness: BTreeMap<RetinalLayer, f32>,
    pub notes: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
