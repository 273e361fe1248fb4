use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use std::io::Cursor;

use crate::analysis::model::AnalysisError;

pub const MASK_THRESHOLD: u8 = 128;
const OVERLAY_ALPHA: f32 = 0.45;
const OVERLAY_TINT: [u8; 3] = [255, 0, 0];

/// Tints every pixel of `base` whose mask value reaches the threshold. The
/// mask is rescaled to the base dimensions if needed.
pub fn compose_overlay(base: &DynamicImage, mask: &GrayImage) -> RgbImage {
    let mut out = base.to_rgb8();
    let (width, height) = out.dimensions();
    let resized;
    let mask = if mask.dimensions() == (width, height) {
        mask
    } else {
        resized = imageops::resize(mask, width, height, FilterType::Nearest);
        &resized
    };

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] < MASK_THRESHOLD {
            continue;
        }
        for (channel, tint) in pixel.0.iter_mut().zip(OVERLAY_TINT) {
            let blended = f32::from(*channel) * (1.0 - OVERLAY_ALPHA) + f32::from(tint) * OVERLAY_ALPHA;
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, AnalysisError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(AnalysisError::Encode)?;
    Ok(buf)
}
