use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array3;
use std::path::Path;

use crate::analysis::model::AnalysisError;

/// Height x width x RGB tensor scaled to [-1, 1].
pub type ModelInput = Array3<f32>;

pub fn load_image(path: &Path) -> Result<DynamicImage, AnalysisError> {
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(AnalysisError::Decode)
}

/// Nearest-neighbour resize to `size` x `size`, then InceptionV3 scaling.
pub fn to_model_input(image: &DynamicImage, size: u32) -> ModelInput {
    let rgb = image.resize_exact(size, size, FilterType::Nearest).to_rgb8();
    Array3::from_shape_fn((size as usize, size as usize, 3), |(y, x, c)| {
        f32::from(rgb.get_pixel(x as u32, y as u32)[c]) / 127.5 - 1.0
    })
}

pub fn load_model_input(path: &Path, size: u32) -> Result<ModelInput, AnalysisError> {
    let image = load_image(path)?;
    Ok(to_model_input(&image, size))
}
