//! Twin-network signature verifier via ONNX Runtime.
//!
//! Both signatures are embedded by the same network; the Euclidean distance
//! between embeddings is squashed to a [0, 1] similarity. Without weights, a
//! mean absolute pixel difference stands in for the embedding distance.

use crate::types::{AdapterMode, Embedding, Outcome};
use crate::session;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

// --- Named constants ---
const VERIFIER_INPUT_SIZE: usize = 224;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Embedding distance that maps to a similarity of exactly 0.5.
const DISTANCE_MIDPOINT: f32 = 5.0;
/// Score reported when comparison could not be performed.
pub const NEUTRAL_SCORE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedding dimension mismatch: {0} vs {1}")]
    DimensionMismatch(usize, usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Signature verifier, fixed at startup to trained weights or pixel comparison.
pub enum SignatureVerifier {
    Loaded(Session),
    Fallback,
}

impl SignatureVerifier {
    /// Load the twin-network ONNX model, or select the fallback when no weights are available.
    pub fn load(model_path: Option<&str>) -> Result<Self, VerifierError> {
        Ok(match session::open_optional("verifier", model_path)? {
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

    /// Similarity in [0, 1] between a cleaned signature and the reference.
    ///
    /// On error the neutral score is returned.
    pub fn compare(&mut self, probe: &RgbImage, reference: &RgbImage) -> Outcome<f32> {
        match self {
            Self::Fallback => Outcome::Ok(pixel_similarity(probe, reference)),
            Self::Loaded(session) => match embedding_similarity(session, probe, reference) {
                Ok(similarity) => Outcome::Ok(similarity),
                Err(e) => {
                    tracing::warn!(error = %e, "verifier failed; using neutral score");
                    neutral(format!("verification: {e}"))
                }
            },
        }
    }
}

/// Neutral verification outcome, used whenever comparison cannot run.
pub fn neutral(reason: impl Into<String>) -> Outcome<f32> {
    Outcome::degraded(NEUTRAL_SCORE, reason)
}

fn embedding_similarity(session: &mut Session, probe: &RgbImage, reference: &RgbImage) -> Result<f32, VerifierError> {
    let a = embed(session, probe)?;
    let b = embed(session, reference)?;
    if a.values.len() != b.values.len() {
        return Err(VerifierError::DimensionMismatch(a.values.len(), b.values.len()));
    }

    let distance = a.euclidean_distance(&b);
    let similarity = similarity_from_distance(distance);
    tracing::debug!(distance, similarity, "embedding comparison");
    Ok(similarity)
}

fn embed(session: &mut Session, image: &RgbImage) -> Result<Embedding, VerifierError> {
    let input = preprocess(image);

    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (_, raw_data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| VerifierError::InferenceFailed(format!("embedding extraction: {e}")))?;

    if raw_data.is_empty() {
        return Err(VerifierError::InferenceFailed("empty embedding".into()));
    }

    Ok(Embedding {
        values: raw_data.to_vec(),
    })
}

/// `sigmoid(DISTANCE_MIDPOINT - distance)`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + (distance - DISTANCE_MIDPOINT).exp())
}

/// Resize to 224×224 and apply ImageNet normalization, NCHW.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let size = VERIFIER_INPUT_SIZE;
    let resized = imageops::resize(image, size as u32, size as u32, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    tensor
}

/// `1 - min(mean |a - b| / 255, 1)` over both images resized to 224×224 RGB.
pub fn pixel_similarity(a: &RgbImage, b: &RgbImage) -> f32 {
    let size = VERIFIER_INPUT_SIZE as u32;
    let a = imageops::resize(a, size, size, FilterType::Triangle);
    let b = imageops::resize(b, size, size, FilterType::Triangle);

    let total: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&p, &q)| (p as f64 - q as f64).abs())
        .sum();
    let mean_diff = total / a.as_raw().len() as f64;

    (1.0 - (mean_diff / 255.0).min(1.0)) as f32
}
