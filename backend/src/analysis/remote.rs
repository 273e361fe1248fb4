use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use url::Url;

use crate::analysis::model::{AnalysisError, Analyzer};
use crate::analysis::preprocess::ModelInput;

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<Vec<Vec<Vec<f32>>>>,
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

/// Talks to a TensorFlow Serving style REST classifier and, when configured,
/// a segmentation service that turns an image into a mask image.
#[derive(Clone)]
pub struct RemoteAnalyzer {
    client: reqwest::Client,
    model_url: Url,
    segmentation_url: Option<Url>,
}

impl RemoteAnalyzer {
    pub fn new(
        model_url: Url,
        segmentation_url: Option<Url>,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            model_url,
            segmentation_url,
        })
    }

    fn instance(input: &ModelInput) -> Vec<Vec<Vec<f32>>> {
        input
            .outer_iter()
            .map(|row| row.outer_iter().map(|pixel| pixel.to_vec()).collect())
            .collect()
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AnalysisError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        log::error!("Analysis service responded with {}: {}", status, body);
        Err(AnalysisError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Analyzer for RemoteAnalyzer {
    async fn classify(&self, input: ModelInput) -> Result<Vec<f32>, AnalysisError> {
        let request = PredictRequest {
            instances: vec![Self::instance(&input)],
        };
        log::debug!("Sending classification request to {}", self.model_url);

        let response = self
            .client
            .post(self.model_url.clone())
            .json(&request)
            .send()
            .await?;
        let response: PredictResponse = Self::check_status(response).await?.json().await?;

        response
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::MalformedOutput("no predictions returned".into()))
    }

    fn can_segment(&self) -> bool {
        self.segmentation_url.is_some()
    }

    async fn segment(&self, image: &DynamicImage) -> Result<Option<GrayImage>, AnalysisError> {
        let Some(url) = &self.segmentation_url else {
            return Ok(None);
        };

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(AnalysisError::Encode)?;

        log::debug!("Sending segmentation request to {}", url);
        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?;
        let bytes = Self::check_status(response).await?.bytes().await?;

        let mask = image::load_from_memory(&bytes)
            .map_err(|e| AnalysisError::MalformedOutput(format!("unreadable mask: {}", e)))?;
        Ok(Some(mask.to_luma8()))
    }
}
