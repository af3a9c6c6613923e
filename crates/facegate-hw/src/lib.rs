//! facegate-hw: camera capture and frame distribution.
//!
//! Provides a hot-swappable V4L2 camera source, the background acquisition
//! loop, and the latest-wins frame buffers the rest of the pipeline reads.

pub mod acquisition;
pub mod buffer;
pub mod camera;
pub mod frame;
pub mod source;

pub use acquisition::{AcquisitionLoop, CaptureProfile, Pacing};
pub use buffer::{FrameBuffer, LatestFrame};
pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, Resolution, V4l2Opener};
pub use frame::{Frame, FrameError};
pub use source::{CameraSource, CaptureDevice, CaptureError, DeviceOpener, SwitchOutcome};
