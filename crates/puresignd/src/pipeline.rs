//! Detect → clean → verify over encoded image bytes.

use crate::engine::{EngineError, EngineHandle};
use crate::storage::ObjectStore;
use puresign_core::{codec, verifier, CodecError, Detection, Outcome};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Engine(#[from] EngineError),
}

/// Everything produced by one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// JPEG of the detected signature crop.
    pub detected_jpeg: Vec<u8>,
    /// JPEG of the cleaned signature.
    pub cleaned_jpeg: Vec<u8>,
    /// Similarity to the reference in [0, 1].
    pub confidence_score: f32,
    pub detection: Option<Detection>,
    /// Reasons for every stage that fell back after an error.
    pub degraded: Vec<String>,
}

#[derive(Clone)]
pub struct InferencePipeline {
    engine: EngineHandle,
    store: Arc<dyn ObjectStore>,
}

impl InferencePipeline {
    pub fn new(engine: EngineHandle, store: Arc<dyn ObjectStore>) -> Self {
        Self { engine, store }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Run all three stages in order.
    ///
    /// Stage failures degrade the output instead of failing the call; only an
    /// undecodable document, an encode failure, or a dead engine is an error.
    pub async fn process(
        &self,
        document: &[u8],
        reference_path: &str,
        verification_id: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let mut degraded = Vec::new();
        let image = codec::decode_rgb(document)?;
        tracing::debug!(
            verification_id,
            width = image.width(),
            height = image.height(),
            "document decoded"
        );

        let crop = note(self.engine.detect(image).await?, &mut degraded);
        let detected_jpeg = codec::encode_jpeg(&crop.image)?;

        let cleaned = note(self.engine.clean(crop.image).await?, &mut degraded);
        let cleaned_jpeg = codec::encode_jpeg(&cleaned)?;

        let score = match self.load_reference(reference_path).await {
            Ok(reference) => self.engine.verify(cleaned, reference).await?,
            Err(reason) => {
                tracing::warn!(verification_id, reason = %reason, "reference unavailable; using neutral score");
                verifier::neutral(reason)
            }
        };
        let confidence_score = note(score, &mut degraded);

        if !degraded.is_empty() {
            tracing::warn!(verification_id, ?degraded, "pipeline completed with degraded stages");
        }
        tracing::info!(
            verification_id,
            confidence_score,
            detection = ?crop.detection,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            detected_jpeg,
            cleaned_jpeg,
            confidence_score,
            detection: crop.detection,
            degraded,
        })
    }

    async fn load_reference(&self, reference_path: &str) -> Result<image::RgbImage, String> {
        let bytes = self
            .store
            .download(reference_path)
            .await
            .map_err(|e| format!("verification: {e}"))?;
        codec::decode_rgb(&bytes).map_err(|e| format!("verification: reference {e}"))
    }
}

fn note<T>(outcome: Outcome<T>, degraded: &mut Vec<String>) -> T {
    if let Some(reason) = outcome.reason() {
        degraded.push(reason.to_string());
    }
    outcome.into_value()
}
