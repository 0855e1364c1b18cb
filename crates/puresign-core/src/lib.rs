//! puresign-core — Signature detection, cleaning, and verification.
//!
//! Each stage wraps an optional ONNX model and degrades to a deterministic
//! heuristic when weights are absent or inference fails.

pub mod cleaner;
pub mod codec;
pub mod detector;
mod session;
pub mod types;
pub mod verifier;

pub use cleaner::SignatureCleaner;
pub use codec::{decode_rgb, encode_jpeg, CodecError};
pub use detector::{Crop, SignatureDetector};
pub use types::{AdapterMode, BoundingBox, Detection, Embedding, Outcome, VerificationStatus, ACCEPT_THRESHOLD};
pub use verifier::SignatureVerifier;
