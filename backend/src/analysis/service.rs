use actix_web::web;
use oct_shared::ImageId;
use std::path::Path;
use std::sync::Arc;

use crate::analysis::model::{AnalysisError, Analyzer, Prediction};
use crate::analysis::{overlay, preprocess};
use crate::config::AnalysisConfig;

/// Demo overlay shipped in the results folder, served when nothing better exists.
pub const DEMO_OVERLAY: &str = "result.jpg";

pub fn overlay_filename(image_id: &ImageId) -> String {
    format!("{}_overlay.png", image_id)
}

#[derive(Clone)]
pub struct AnalysisService {
    analyzer: Arc<dyn Analyzer>,
    config: Arc<AnalysisConfig>,
}

impl AnalysisService {
    pub fn new(analyzer: Arc<dyn Analyzer>, config: AnalysisConfig) -> Self {
        Self {
            analyzer,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub async fn predict(&self, image_path: &Path) -> Result<Prediction, AnalysisError> {
        let path = image_path.to_path_buf();
        let size = self.config.input_size;
        let input = web::block(move || preprocess::load_model_input(&path, size))
            .await
            .map_err(|_| AnalysisError::Blocking)??;

        let probabilities = self.analyzer.classify(input).await?;
        let prediction = Prediction::from_probabilities(&self.config.class_names, &probabilities)?;
        log::info!(
            "Predicted {} ({:.3}) for {}",
            prediction.top_disease,
            prediction.confidence,
            image_path.display()
        );
        Ok(prediction)
    }

    /// Produces a fresh overlay when the analyzer can segment, otherwise falls
    /// back to whatever overlay already exists. Returns the file name inside
    /// `results_folder`.
    pub async fn render_overlay(
        &self,
        image_id: &ImageId,
        image_path: &Path,
        results_folder: &Path,
    ) -> Result<Option<String>, AnalysisError> {
        if !self.analyzer.can_segment() {
            log::info!("No segmenter configured, using existing overlay for {}", image_id);
            return Ok(Self::existing_overlay(image_id, results_folder).await);
        }

        let path = image_path.to_path_buf();
        let image = match web::block(move || preprocess::load_image(&path))
            .await
            .map_err(|_| AnalysisError::Blocking)?
        {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Cannot segment {}: {}", image_id, e);
                return Ok(Self::existing_overlay(image_id, results_folder).await);
            }
        };

        let Some(mask) = self.analyzer.segment(&image).await? else {
            log::info!("No segmentation available for {}, using existing overlay", image_id);
            return Ok(Self::existing_overlay(image_id, results_folder).await);
        };

        let png = web::block(move || overlay::encode_png(&overlay::compose_overlay(&image, &mask)))
            .await
            .map_err(|_| AnalysisError::Blocking)??;

        let filename = overlay_filename(image_id);
        tokio::fs::write(results_folder.join(&filename), png).await?;
        log::info!("Wrote overlay {} for {}", filename, image_id);
        Ok(Some(filename))
    }

    /// Per-image overlay if present, then the demo overlay.
    pub async fn existing_overlay(image_id: &ImageId, results_folder: &Path) -> Option<String> {
        let candidates = [overlay_filename(image_id), DEMO_OVERLAY.to_string()];
        for candidate in candidates {
            if is_file(&results_folder.join(&candidate)).await {
                return Some(candidate);
            }
        }
        None
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
