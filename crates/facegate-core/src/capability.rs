//! Face capability provider: detection, encoding, and the match decision.
//!
//! The pipeline only talks to [`FaceCapability`]. The provider is resolved once
//! at startup into a [`Capability`]; when the models cannot be loaded the
//! process keeps running with `Capability::Absent` and every recognition
//! request reports the service as unavailable.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::recognizer::{ArcfaceEncoder, RecognizerError, ARCFACE_EMBEDDING_DIM};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Euclidean cut-off between L2-normalized ArcFace encodings.
/// For unit vectors d² = 2 - 2·cos, so 1.10 corresponds to cosine ≈ 0.395.
const MATCH_DISTANCE_THRESHOLD: f32 = 1.10;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder: {0}")]
    Encoder(#[from] RecognizerError),
    #[error("{0}")]
    Inference(String),
}

/// Contract of a face capability provider.
pub trait FaceCapability: Send + Sync {
    /// Detect faces, in the provider's native order.
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<BoundingBox>, CapabilityError>;

    /// Encode one detected region into a `dimension()`-length vector.
    fn encode(&self, image: &GrayImage, region: &BoundingBox) -> Result<Embedding, CapabilityError>;

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }

    /// Same/different decision on a distance, using a fixed internal threshold.
    fn is_match(&self, distance: f32) -> bool;

    /// Fixed length of every encoding this provider produces.
    fn dimension(&self) -> usize;
}

/// SCRFD + ArcFace running on ONNX Runtime.
///
/// ONNX sessions need exclusive access per run, so each model sits behind its
/// own mutex; detection and encoding of different requests can overlap.
pub struct OnnxCapability {
    detector: Mutex<ScrfdDetector>,
    encoder: Mutex<ArcfaceEncoder>,
}

impl OnnxCapability {
    pub fn load(model_dir: &Path) -> Result<Self, CapabilityError> {
        let detector = ScrfdDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let encoder = ArcfaceEncoder::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector: Mutex::new(detector),
            encoder: Mutex::new(encoder),
        })
    }
}

impl FaceCapability for OnnxCapability {
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(detector.detect(image)?)
    }

    fn encode(&self, image: &GrayImage, region: &BoundingBox) -> Result<Embedding, CapabilityError> {
        let mut encoder = self.encoder.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(encoder.encode(image, region)?)
    }

    fn is_match(&self, distance: f32) -> bool {
        distance <= MATCH_DISTANCE_THRESHOLD
    }

    fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }
}

/// Startup-resolved availability of the face capability.
#[derive(Clone)]
pub enum Capability {
    Present(Arc<dyn FaceCapability>),
    Absent { reason: String },
}

impl Capability {
    /// Load the ONNX provider from `model_dir`. Never fails: a missing or
    /// broken model yields `Absent` with the reason logged.
    pub fn load(model_dir: &Path) -> Capability {
        match OnnxCapability::load(model_dir) {
            Ok(provider) => {
                tracing::info!(dir = %model_dir.display(), "face capability loaded");
                Capability::Present(Arc::new(provider))
            }
            Err(e) => {
                tracing::warn!(
                    dir = %model_dir.display(),
                    error = %e,
                    "face capability unavailable; recognition and training disabled"
                );
                Capability::Absent {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn provider(&self) -> Option<&Arc<dyn FaceCapability>> {
        match self {
            Capability::Present(provider) => Some(provider),
            Capability::Absent { .. } => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Capability::Present(_))
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Present(p) => f
                .debug_struct("Present")
                .field("dimension", &p.dimension())
                .finish(),
            Capability::Absent { reason } => {
                f.debug_struct("Absent").field("reason", reason).finish()
            }
        }
    }
}
