//! Deterministic stand-ins for the face capability and the camera.
//!
//! Test images encode their own content: pixel (0,0) is the number of faces,
//! pixels (1,0) and (2,0) are the encoding components times ten.

use facegate_core::{BoundingBox, CapabilityError, Embedding, FaceCapability};
use facegate_hw::{CameraError, CaptureDevice, DeviceOpener, Frame, Resolution};
use image::{GrayImage, Luma};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn face_image(faces: u8, a: u8, b: u8) -> GrayImage {
    let mut image = GrayImage::from_pixel(40, 30, Luma([0]));
    image.put_pixel(0, 0, Luma([faces]));
    image.put_pixel(1, 0, Luma([a]));
    image.put_pixel(2, 0, Luma([b]));
    image
}

pub fn face_png(faces: u8, a: u8, b: u8) -> Vec<u8> {
    Frame::new(face_image(faces, a, b), 0).to_png().unwrap()
}

#[derive(Default)]
pub struct FakeCapability {
    pub detect_calls: AtomicUsize,
}

impl FaceCapability for FakeCapability {
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let count = image.get_pixel(0, 0)[0] as usize;
        Ok((0..count)
            .map(|i| BoundingBox {
                x: 5.0 + i as f32 * 10.0,
                y: 5.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.9,
                landmarks: None,
            })
            .collect())
    }

    fn encode(&self, image: &GrayImage, _region: &BoundingBox) -> Result<Embedding, CapabilityError> {
        Ok(Embedding::new(vec![
            image.get_pixel(1, 0)[0] as f32 / 10.0,
            image.get_pixel(2, 0)[0] as f32 / 10.0,
        ]))
    }

    fn is_match(&self, distance: f32) -> bool {
        distance < 1.0
    }

    fn dimension(&self) -> usize {
        2
    }
}

/// Camera whose every device returns a copy of a shared, replaceable image.
#[derive(Clone)]
pub struct StillOpener {
    pub image: Arc<Mutex<GrayImage>>,
}

impl StillOpener {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image: Arc::new(Mutex::new(image)),
        }
    }

    pub fn show(&self, image: GrayImage) {
        *self.image.lock().unwrap() = image;
    }
}

struct StillDevice {
    index: u32,
    image: Arc<Mutex<GrayImage>>,
    sequence: AtomicU32,
}

impl CaptureDevice for StillDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let image = self.image.lock().unwrap().clone();
        Ok(Frame::new(image, self.sequence.fetch_add(1, Ordering::Relaxed)))
    }

    fn index(&self) -> u32 {
        self.index
    }
}

impl DeviceOpener for StillOpener {
    fn open(&self, index: u32, _resolution: Resolution) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if index > 3 {
            return Err(CameraError::DeviceNotFound(format!("/dev/video{index}")));
        }
        Ok(Box::new(StillDevice {
            index,
            image: Arc::clone(&self.image),
            sequence: AtomicU32::new(0),
        }))
    }
}
