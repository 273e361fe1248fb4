use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use oct_shared::{ImageId, PredictionResponse};
use std::collections::BTreeMap;

use crate::analysis::preprocess::ModelInput;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Model server request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Model server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected model output: {0}")]
    MalformedOutput(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Blocking task failed")]
    Blocking,
}

/// The OCT analysis collaborator: a classifier over preprocessed input and an
/// optional layer segmenter.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Class probabilities, ordered like the configured class names.
    async fn classify(&self, input: ModelInput) -> Result<Vec<f32>, AnalysisError>;

    /// Whether a segmenter is configured at all. Checked before any image is decoded.
    fn can_segment(&self) -> bool;

    /// Segmentation mask for `image`, or `None` when no segmenter is available.
    async fn segment(&self, image: &DynamicImage) -> Result<Option<GrayImage>, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub probabilities: Vec<(String, f32)>,
    pub top_disease: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn from_probabilities(
        class_names: &[String],
        probabilities: &[f32],
    ) -> Result<Self, AnalysisError> {
        if probabilities.len() != class_names.len() {
            return Err(AnalysisError::MalformedOutput(format!(
                "expected {} probabilities, got {}",
                class_names.len(),
                probabilities.len()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(AnalysisError::MalformedOutput(
                "non-finite probability".into(),
            ));
        }

        let (top_idx, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| AnalysisError::MalformedOutput("empty model output".into()))?;

        Ok(Self {
            probabilities: class_names
                .iter()
                .cloned()
                .zip(probabilities.iter().copied())
                .collect(),
            top_disease: class_names[top_idx].clone(),
            confidence,
        })
    }

    pub fn is_normal(&self) -> bool {
        self.top_disease.eq_ignore_ascii_case("NORMAL")
    }

    pub fn summary(&self) -> String {
        let conf_pct = self.confidence * 100.0;
        if self.is_normal() {
            format!(
                "AI suggests no significant abnormalities detected ({:.1}% confidence).",
                conf_pct
            )
        } else {
            format!(
                "AI suggests {} with {:.1}% confidence.",
                self.top_disease, conf_pct
            )
        }
    }

    pub fn recommendation(&self) -> &'static str {
        if self.is_normal() {
            "Routine monitoring advised; follow standard screening intervals."
        } else {
            "Recommend ophthalmology evaluation and correlation with clinical findings."
        }
    }

    pub fn into_response(self, image_id: ImageId) -> PredictionResponse {
        let summary = self.summary();
        let recommendation = self.recommendation().to_string();
        PredictionResponse {
            image_id,
            predictions: self.probabilities.into_iter().collect::<BTreeMap<_, _>>(),
            top_disease: self.top_disease,
            confidence: self.confidence,
            summary,
            recommendation,
        }
    }
}
