//! Signature detector via ONNX Runtime.
//!
//! Runs a YOLO-style single-output detector on a letterboxed RGB frame and
//! crops the highest-confidence box. Without weights, or when nothing clears
//! the confidence floor, a deterministic center crop is used instead.

use crate::session;
use crate::types::{AdapterMode, BoundingBox, Detection, Outcome};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

// --- Named constants ---
const YOLO_INPUT_SIZE: usize = 640;
const YOLO_PAD_VALUE: f32 = 114.0;
const YOLO_BOX_ROWS: usize = 4;
/// Candidates must score strictly above this to count as a detection.
pub const CONFIDENCE_FLOOR: f32 = 0.25;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unexpected output shape {0:?}; expected [1, 4 + classes, anchors]")]
    BadOutputShape(Vec<i64>),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// A raw detector box in source-image coordinates.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// A signature crop together with the detection that produced it.
#[derive(Debug, Clone)]
pub struct Crop {
    pub image: RgbImage,
    /// `None` when detection itself failed and the full image was returned.
    pub detection: Option<Detection>,
}

/// Signature detector, fixed at startup to trained weights or the center-crop heuristic.
pub enum SignatureDetector {
    Loaded(Session),
    Fallback,
}

impl SignatureDetector {
    /// Load the detector ONNX model, or select the fallback when no weights are available.
    pub fn load(model_path: Option<&str>) -> Result<Self, DetectorError> {
        Ok(match session::open_optional("detector", model_path)? {
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

    /// Locate and crop the signature.
    ///
    /// Never fails: a detector error yields the uncropped image with no detection.
    pub fn detect(&mut self, image: &RgbImage) -> Outcome<Crop> {
        let (width, height) = image.dimensions();

        let best = match self {
            Self::Fallback => None,
            Self::Loaded(session) => match run_detector(session, image) {
                Ok(candidates) => select_best(&candidates, CONFIDENCE_FLOOR),
                Err(e) => {
                    tracing::warn!(error = %e, "detector failed; using full image");
                    return Outcome::degraded(
                        Crop {
                            image: image.clone(),
                            detection: None,
                        },
                        format!("detection: {e}"),
                    );
                }
            },
        };

        let detection = match best {
            Some(c) => {
                let bbox = BoundingBox::clamped(c.x1, c.y1, c.x2, c.y2, width, height);
                if bbox.is_empty() {
                    tracing::debug!(?bbox, "detected box empty after clamping; centering");
                    centered_detection(width, height)
                } else {
                    Detection {
                        bbox,
                        confidence: Some(c.confidence),
                    }
                }
            }
            None => centered_detection(width, height),
        };

        tracing::debug!(bbox = ?detection.bbox, confidence = ?detection.confidence, "signature located");

        let bbox = detection.bbox;
        let cropped = imageops::crop_imm(image, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image();

        Outcome::Ok(Crop {
            image: cropped,
            detection: Some(detection),
        })
    }
}

fn centered_detection(width: u32, height: u32) -> Detection {
    Detection {
        bbox: BoundingBox::centered(width, height),
        confidence: None,
    }
}

/// Pick the highest-confidence candidate above `floor`. Ties keep the first seen.
fn select_best(candidates: &[Candidate], floor: f32) -> Option<Candidate> {
    let mut best: Option<&Candidate> = None;
    for c in candidates {
        if c.confidence <= floor {
            continue;
        }
        if best.map_or(true, |b| c.confidence > b.confidence) {
            best = Some(c);
        }
    }
    best.cloned()
}

fn run_detector(session: &mut Session, image: &RgbImage) -> Result<Vec<Candidate>, DetectorError> {
    let (input, letterbox) = preprocess(image);

    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;
    let dims: Vec<i64> = shape.iter().copied().collect();

    decode_output(data, &dims, &letterbox)
}

/// Letterbox an RGB image into a 640×640 NCHW tensor scaled to [0, 1].
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let size = YOLO_INPUT_SIZE as f32;
    let scale = (size / width).min(size / height);

    let new_w = ((width * scale).round() as u32).clamp(1, YOLO_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, YOLO_INPUT_SIZE as u32);
    let pad_x = (size - new_w as f32) / 2.0;
    let pad_y = (size - new_h as f32) / 2.0;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::from_elem((1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE), YOLO_PAD_VALUE / 255.0);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x_start;
        let ty = y as usize + pad_y_start;
        if tx >= YOLO_INPUT_SIZE || ty >= YOLO_INPUT_SIZE {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Decode a `[1, 4 + classes, anchors]` output into source-space candidates.
///
/// Rows 0–3 hold `cx, cy, w, h` in letterboxed pixels; the remaining rows hold
/// per-class scores, of which the maximum is the candidate confidence.
fn decode_output(data: &[f32], dims: &[i64], letterbox: &LetterboxInfo) -> Result<Vec<Candidate>, DetectorError> {
    let (rows, anchors) = match dims {
        [1, rows, anchors] if *rows > YOLO_BOX_ROWS as i64 && *anchors >= 0 => (*rows as usize, *anchors as usize),
        _ => return Err(DetectorError::BadOutputShape(dims.to_vec())),
    };
    if data.len() < rows * anchors {
        return Err(DetectorError::InferenceFailed(format!(
            "expected {} values, got {}",
            rows * anchors,
            data.len()
        )));
    }

    let at = |row: usize, anchor: usize| data[row * anchors + anchor];
    let mut candidates = Vec::new();

    for a in 0..anchors {
        let confidence = (YOLO_BOX_ROWS..rows)
            .map(|r| at(r, a))
            .fold(f32::NEG_INFINITY, f32::max);

        let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
        candidates.push(Candidate {
            x1: (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y1: (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
            x2: (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y2: (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale,
            confidence,
        });
    }

    Ok(candidates)
}
