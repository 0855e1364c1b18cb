//! Signature cleaner: generator network or Otsu binarization.
//!
//! The generator maps a 256×256 crop in [-1, 1] to a cleaned crop of the same
//! shape. Without weights, the crop is binarized with an automatic Otsu
//! threshold instead.

use crate::session;
use crate::types::{AdapterMode, Outcome};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const GENERATOR_INPUT_SIZE: usize = 256;

#[derive(Error, Debug)]
pub enum CleanerError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Signature cleaner, fixed at startup to trained weights or the threshold heuristic.
pub enum SignatureCleaner {
    Loaded(Session),
    Fallback,
}

impl SignatureCleaner {
    /// Load the generator ONNX model, or select the fallback when no weights are available.
    pub fn load(model_path: Option<&str>) -> Result<Self, CleanerError> {
        Ok(match session::open_optional("cleaner", model_path)? {
            Some(session) => Self::Loaded(session),
            None => Self::Fallback,
        })
    }

    pub fn mode(&self) -> AdapterMode {
        match self {
            Self::Loaded(_) => AdapterMode::Loaded,
            Self::Fallback => AdapterMode::Fallback,
        }
    }

    /// Clean a cropped signature. On error the input is returned unchanged.
    pub fn clean(&mut self, image: &RgbImage) -> Outcome<RgbImage> {
        match self {
            Self::Fallback => Outcome::Ok(otsu_binarize(image)),
            Self::Loaded(session) => match run_generator(session, image) {
                Ok(cleaned) => Outcome::Ok(cleaned),
                Err(e) => {
                    tracing::warn!(error = %e, "cleaner failed; passing crop through");
                    Outcome::degraded(image.clone(), format!("cleaning: {e}"))
                }
            },
        }
    }
}

fn run_generator(session: &mut Session, image: &RgbImage) -> Result<RgbImage, CleanerError> {
    let (width, height) = image.dimensions();
    let input = preprocess(image);

    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (_, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| CleanerError::InferenceFailed(format!("generator output: {e}")))?;

    let generated = postprocess(data)?;
    Ok(imageops::resize(&generated, width, height, FilterType::Triangle))
}

/// Resize to 256×256 and normalize each channel to [-1, 1], NCHW.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let size = GENERATOR_INPUT_SIZE;
    let resized = imageops::resize(image, size as u32, size as u32, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// Map a `[1, 3, 256, 256]` tanh output back to an RGB image.
fn postprocess(data: &[f32]) -> Result<RgbImage, CleanerError> {
    let size = GENERATOR_INPUT_SIZE;
    let plane = size * size;
    if data.len() != 3 * plane {
        return Err(CleanerError::InferenceFailed(format!(
            "expected {} values, got {}",
            3 * plane,
            data.len()
        )));
    }

    let denorm = |v: f32| -> u8 { ((v + 1.0) / 2.0 * 255.0).clamp(0.0, 255.0) as u8 };
    Ok(RgbImage::from_fn(size as u32, size as u32, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb([denorm(data[i]), denorm(data[plane + i]), denorm(data[2 * plane + i])])
    }))
}

/// ITU-R 601 luma, matching the usual RGB→gray conversion.
fn luma(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let l = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
        Luma([l as u8])
    })
}

/// Otsu's threshold: the level maximizing between-class variance.
/// Pixels strictly above the returned level belong to the foreground class.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }

    let total = (gray.width() as u64 * gray.height() as u64) as f64;
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &n)| i as f64 * n as f64).sum();

    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;
    let mut best_level = 0u8;
    let mut best_variance = -1.0f64;

    for (level, &count) in hist.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += level as f64 * count as f64;

        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}

/// Grayscale, Otsu-threshold to {0, 255}, and expand back to three channels.
pub fn otsu_binarize(image: &RgbImage) -> RgbImage {
    let gray = luma(image);
    let threshold = otsu_threshold(&gray);
    tracing::debug!(threshold, "otsu threshold");

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = if gray.get_pixel(x, y)[0] > threshold { 255 } else { 0 };
        Rgb([v, v, v])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dark "stroke" on the left half, light paper on the right.
    fn two_tone(w: u32, h: u32, dark: u8, light: u8) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            let v = if x < w / 2 { dark } else { light };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_otsu_separates_bimodal() {
        let gray = luma(&two_tone(20, 10, 30, 220));
        let t = otsu_threshold(&gray);
        assert!((30..220).contains(&t), "threshold {t} outside the two modes");
    }

    #[test]
    fn test_otsu_binarize_output_is_binary_rgb() {
        let image = two_tone(20, 10, 40, 200);
        let out = otsu_binarize(&image);
        assert_eq!(out.dimensions(), image.dimensions());
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(19, 9), &Rgb([255, 255, 255]));
        assert!(out.pixels().all(|p| p[0] == p[1] && p[1] == p[2] && (p[0] == 0 || p[0] == 255)));
    }

    #[test]
    fn test_otsu_uniform_image() {
        let gray = GrayImage::from_pixel(4, 4, Luma([128]));
        // No split exists; level stays at the initial value.
        assert_eq!(otsu_threshold(&gray), 0);
    }

    #[test]
    fn test_luma_weights() {
        let image = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(luma(&image).get_pixel(0, 0)[0], 76);
        let image = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        assert_eq!(luma(&image).get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_fallback_clean_keeps_dimensions() {
        let image = two_tone(33, 17, 10, 240);
        let outcome = SignatureCleaner::Fallback.clean(&image);
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.value().dimensions(), (33, 17));
    }

    #[test]
    fn test_preprocess_normalization() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 0, 255]));
        let tensor = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, GENERATOR_INPUT_SIZE, GENERATOR_INPUT_SIZE]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-2);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_postprocess_denormalizes() {
        let plane = GENERATOR_INPUT_SIZE * GENERATOR_INPUT_SIZE;
        let mut data = vec![-1.0f32; 3 * plane];
        data[..plane].fill(1.0);
        let out = postprocess(&data).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_postprocess_rejects_wrong_length() {
        assert!(matches!(postprocess(&[0.0; 12]), Err(CleanerError::InferenceFailed(_))));
    }

    #[test]
    fn test_inference_error_returns_input_unchanged() {
        let image = two_tone(48, 24, 15, 235);
        let mut cleaner = SignatureCleaner::Loaded(crate::session::test_models::rejecting_session());
        assert_eq!(cleaner.mode(), AdapterMode::Loaded);

        let outcome = cleaner.clean(&image);
        assert!(outcome.is_degraded());
        assert!(outcome.reason().unwrap().starts_with("cleaning:"));

        let cleaned = outcome.into_value();
        assert_eq!(cleaned.as_raw(), image.as_raw());
        assert_eq!(
            crate::codec::encode_jpeg(&cleaned).unwrap(),
            crate::codec::encode_jpeg(&image).unwrap()
        );
    }
}
