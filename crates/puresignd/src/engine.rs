use image::RgbImage;
use puresign_core::cleaner::CleanerError;
use puresign_core::detector::DetectorError;
use puresign_core::verifier::VerifierError;
use puresign_core::{AdapterMode, Crop, Outcome, SignatureCleaner, SignatureDetector, SignatureVerifier};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("cleaner error: {0}")]
    Cleaner(#[from] CleanerError),
    #[error("verifier error: {0}")]
    Verifier(#[from] VerifierError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Which adapters run trained weights.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelModes {
    pub detector: AdapterMode,
    pub cleaner: AdapterMode,
    pub verifier: AdapterMode,
}

/// The three model adapters, loaded once at startup.
pub struct Models {
    pub detector: SignatureDetector,
    pub cleaner: SignatureCleaner,
    pub verifier: SignatureVerifier,
}

impl Models {
    /// Load each adapter from its optional weight path.
    pub fn load(
        detector_path: Option<&str>,
        cleaner_path: Option<&str>,
        verifier_path: Option<&str>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            detector: SignatureDetector::load(detector_path)?,
            cleaner: SignatureCleaner::load(cleaner_path)?,
            verifier: SignatureVerifier::load(verifier_path)?,
        })
    }

    /// All three adapters in heuristic mode.
    pub fn fallback() -> Self {
        Self {
            detector: SignatureDetector::Fallback,
            cleaner: SignatureCleaner::Fallback,
            verifier: SignatureVerifier::Fallback,
        }
    }

    pub fn modes(&self) -> ModelModes {
        ModelModes {
            detector: self.detector.mode(),
            cleaner: self.cleaner.mode(),
            verifier: self.verifier.mode(),
        }
    }
}

/// Messages sent from request tasks to the engine thread.
enum EngineRequest {
    Detect {
        image: RgbImage,
        reply: oneshot::Sender<Outcome<Crop>>,
    },
    Clean {
        image: RgbImage,
        reply: oneshot::Sender<Outcome<RgbImage>>,
    },
    Verify {
        probe: RgbImage,
        reference: RgbImage,
        reply: oneshot::Sender<Outcome<f32>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    modes: ModelModes,
}

impl EngineHandle {
    pub fn modes(&self) -> ModelModes {
        self.modes
    }

    /// Locate and crop the signature in a decoded document.
    pub async fn detect(&self, image: RgbImage) -> Result<Outcome<Crop>, EngineError> {
        self.request(|reply| EngineRequest::Detect { image, reply }).await
    }

    /// Clean a signature crop.
    pub async fn clean(&self, image: RgbImage) -> Result<Outcome<RgbImage>, EngineError> {
        self.request(|reply| EngineRequest::Clean { image, reply }).await
    }

    /// Compare a cleaned signature against the reference.
    pub async fn verify(&self, probe: RgbImage, reference: RgbImage) -> Result<Outcome<f32>, EngineError> {
        self.request(|reply| EngineRequest::Verify { probe, reference, reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the models for its whole lifetime, so inference never
/// blocks the async executor and weights are never reloaded. Requests are
/// served one at a time in arrival order.
pub fn spawn_engine(mut models: Models, queue: usize) -> Result<EngineHandle, EngineError> {
    let modes = models.modes();
    tracing::info!(
        detector = ?modes.detector,
        cleaner = ?modes.cleaner,
        verifier = ?modes.verifier,
        "models ready"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue.max(1));

    std::thread::Builder::new()
        .name("puresign-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let _ = reply.send(models.detector.detect(&image));
                    }
                    EngineRequest::Clean { image, reply } => {
                        let _ = reply.send(models.cleaner.clean(&image));
                    }
                    EngineRequest::Verify {
                        probe,
                        reference,
                        reply,
                    } => {
                        let _ = reply.send(models.verifier.compare(&probe, &reference));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, modes })
}
