use serde::{Deserialize, Serialize};

/// Minimum confidence score for a verification to be reported as `success`.
pub const ACCEPT_THRESHOLD: f32 = 0.7;

/// Pixel-space bounding box `(x1, y1, x2, y2)`, exclusive on the right and bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Deterministic center crop used when no detection is available.
    ///
    /// The margin is `min(width, height) / 4` on every edge.
    pub fn centered(width: u32, height: u32) -> Self {
        let margin = width.min(height) / 4;
        Self {
            x1: margin,
            y1: margin,
            x2: width - margin,
            y2: height - margin,
        }
    }

    /// Build a box from floating point corners, truncating toward zero and
    /// clamping to the image bounds.
    pub fn clamped(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let clamp = |v: f32, max: u32| -> u32 { (v.max(0.0) as u32).min(max) };
        Self {
            x1: clamp(x1, width),
            y1: clamp(y1, height),
            x2: clamp(x2, width),
            y2: clamp(y2, height),
        }
    }
}

/// Where a signature crop came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1]. `None` when the centered fallback crop was used.
    pub confidence: Option<f32>,
}

/// Signature embedding vector produced by the twin network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Result of a single adapter call.
///
/// Adapters never fail: when their model path errors they fall back to a
/// substitute value and report why.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Ok(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Ok(value) | Self::Degraded { value, .. } => value,
        }
    }

    /// The reason for degradation, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Whether an adapter runs trained weights or its heuristic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    Loaded,
    Fallback,
}

/// Lifecycle status of a verification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Processing,
    Success,
    Failed,
}

impl VerificationStatus {
    /// Final status for a confidence score: `Success` iff `score >= ACCEPT_THRESHOLD`.
    pub fn from_score(score: f32) -> Self {
        if score >= ACCEPT_THRESHOLD {
            Self::Success
        } else {
            Self::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}
