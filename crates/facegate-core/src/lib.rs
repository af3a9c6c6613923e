//! facegate-core: face capability and identity gallery.
//!
//! Uses SCRFD for face detection and ArcFace for face encoding, both running
//! via ONNX Runtime on the CPU, behind the [`FaceCapability`] contract.

pub mod alignment;
pub mod capability;
pub mod detector;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use capability::{Capability, CapabilityError, FaceCapability, OnnxCapability};
pub use gallery::{Gallery, GalleryEntry, Nearest, SharedGallery};
pub use types::{BoundingBox, Embedding, Identity};

/// Model directory used when none is configured.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/facegate/models")
}
