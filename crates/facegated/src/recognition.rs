//! On-demand identification of the face in the latest raw frame.

use crate::store::{now_timestamp, IdentityStore};
use facegate_core::{BoundingBox, Capability, Identity, SharedGallery};
use facegate_hw::{Frame, FrameBuffer, LatestFrame};
use image::{GrayImage, Luma};
use std::sync::{Arc, Mutex, PoisonError};

/// Why recognition cannot run at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Unavailable {
    CapabilityAbsent(String),
    EmptyGallery,
}

/// Result of one recognition request. Only `Failed` indicates a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Recognized { identity: Identity, distance: f32 },
    /// A face was found but no gallery entry is close enough.
    Unrecognized { nearest: String, distance: f32 },
    NoFace,
    NoFrame,
    Unavailable(Unavailable),
    Failed(String),
}

const BOX_SHADE: u8 = 255;

pub struct RecognitionEngine {
    raw: Arc<dyn LatestFrame>,
    processed: Arc<FrameBuffer>,
    capability: Capability,
    gallery: Arc<SharedGallery>,
    store: Arc<dyn IdentityStore>,
    downsample: u32,
    last_recognized: Mutex<Option<String>>,
}

impl RecognitionEngine {
    pub fn new(
        raw: Arc<dyn LatestFrame>,
        processed: Arc<FrameBuffer>,
        capability: Capability,
        gallery: Arc<SharedGallery>,
        store: Arc<dyn IdentityStore>,
        downsample: u32,
    ) -> Self {
        Self {
            raw,
            processed,
            capability,
            gallery,
            store,
            downsample: downsample.max(1),
            last_recognized: Mutex::new(None),
        }
    }

    /// Name of the most recently accepted identity.
    pub fn last_recognized(&self) -> Option<String> {
        self.last_recognized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn recognize(&self) -> RecognitionOutcome {
        let provider = match &self.capability {
            Capability::Present(provider) => provider,
            Capability::Absent { reason } => {
                return RecognitionOutcome::Unavailable(Unavailable::CapabilityAbsent(reason.clone()))
            }
        };
        let gallery = self.gallery.snapshot();
        if gallery.is_empty() {
            return RecognitionOutcome::Unavailable(Unavailable::EmptyGallery);
        }

        let Some(frame) = self.raw.latest() else {
            return RecognitionOutcome::NoFrame;
        };

        let small = frame.downsample(self.downsample);
        let faces = match provider.detect_faces(&small) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                return RecognitionOutcome::Failed(e.to_string());
            }
        };
        self.publish_annotated(&frame, &faces);

        let Some(face) = faces.first() else {
            return RecognitionOutcome::NoFace;
        };
        let query = match provider.encode(&small, face) {
            Ok(encoding) => encoding,
            Err(e) => {
                tracing::warn!(error = %e, "face encoding failed");
                return RecognitionOutcome::Failed(e.to_string());
            }
        };

        let Some(nearest) = gallery.nearest(&query, |a, b| provider.distance(a, b)) else {
            return RecognitionOutcome::Failed("no comparable gallery entry".into());
        };
        if !provider.is_match(nearest.distance) {
            tracing::debug!(nearest = nearest.name, distance = nearest.distance, "face not recognized");
            return RecognitionOutcome::Unrecognized {
                nearest: nearest.name.to_string(),
                distance: nearest.distance,
            };
        }

        let name = nearest.name.to_string();
        let distance = nearest.distance;
        let seen_at = now_timestamp();
        if let Err(e) = self.store.update_last_seen(&name, &seen_at) {
            tracing::warn!(name = %name, error = %e, "failed to update last-seen");
        }
        *self
            .last_recognized
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(name.clone());

        let identity = match self.store.get(&name) {
            Ok(Some(identity)) => identity,
            Ok(None) | Err(_) => Identity {
                name: name.clone(),
                encoding: gallery.entries()[nearest.index].encoding.clone(),
                profile_image: Vec::new(),
                enrolled_at: String::new(),
                last_seen: seen_at,
                total_spent: 0.0,
            },
        };
        tracing::info!(name = %name, distance, "face recognized");
        RecognitionOutcome::Recognized { identity, distance }
    }

    fn publish_annotated(&self, frame: &Frame, faces: &[BoundingBox]) {
        let mut annotated = frame.clone();
        for face in faces {
            outline(&mut annotated.image, &face.scaled(self.downsample as f32), BOX_SHADE);
        }
        self.processed.set(annotated);
    }
}

/// Draw a one-pixel rectangle, clipped to the image.
fn outline(image: &mut GrayImage, bbox: &BoundingBox, shade: u8) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let max_x = image.width() - 1;
    let max_y = image.height() - 1;
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
    let (x0, y0) = (clamp(bbox.x, max_x), clamp(bbox.y, max_y));
    let (x1, y1) = (
        clamp(bbox.x + bbox.width, max_x),
        clamp(bbox.y + bbox.height, max_y),
    );
    for x in x0..=x1 {
        image.put_pixel(x, y0, Luma([shade]));
        image.put_pixel(x, y1, Luma([shade]));
    }
    for y in y0..=y1 {
        image.put_pixel(x0, y, Luma([shade]));
        image.put_pixel(x1, y, Luma([shade]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteIdentityStore;
    use crate::test_support::{face_image, FakeCapability};
    use facegate_core::{Embedding, Gallery, GalleryEntry};

    struct Fixture {
        raw: Arc<FrameBuffer>,
        processed: Arc<FrameBuffer>,
        gallery: Arc<SharedGallery>,
        store: Arc<dyn IdentityStore>,
        engine: RecognitionEngine,
    }

    fn fixture() -> Fixture {
        let raw = Arc::new(FrameBuffer::new("raw"));
        let processed = Arc::new(FrameBuffer::new("processed"));
        let gallery = Arc::new(SharedGallery::default());
        let store: Arc<dyn IdentityStore> =
            Arc::new(SqliteIdentityStore::open_in_memory().unwrap());
        let engine = RecognitionEngine::new(
            Arc::clone(&raw) as Arc<dyn LatestFrame>,
            Arc::clone(&processed),
            Capability::Present(Arc::new(FakeCapability::default())),
            Arc::clone(&gallery),
            Arc::clone(&store),
            1,
        );
        Fixture {
            raw,
            processed,
            gallery,
            store,
            engine,
        }
    }

    fn enroll(f: &Fixture, entries: &[(&str, [f32; 2])]) {
        for (name, values) in entries {
            f.store
                .insert(name, &Embedding::new(values.to_vec()), b"", "2026-01-01 00:00:00")
                .unwrap();
        }
        f.gallery
            .replace(Gallery::from_identities(&f.store.load_all().unwrap()));
    }

    fn show(f: &Fixture, image: GrayImage) {
        f.raw.set(Frame::new(image, 0));
    }

    #[test]
    fn test_empty_gallery_is_unavailable() {
        let f = fixture();
        show(&f, face_image(1, 0, 0));
        assert_eq!(
            f.engine.recognize(),
            RecognitionOutcome::Unavailable(Unavailable::EmptyGallery)
        );
    }

    #[test]
    fn test_absent_capability_is_unavailable() {
        let raw = Arc::new(FrameBuffer::new("raw"));
        let gallery = Arc::new(SharedGallery::new(Gallery::new([GalleryEntry {
            name: "a".into(),
            encoding: Embedding::new(vec![0.0, 0.0]),
        }])));
        let engine = RecognitionEngine::new(
            raw,
            Arc::new(FrameBuffer::new("processed")),
            Capability::Absent {
                reason: "models missing".into(),
            },
            gallery,
            Arc::new(SqliteIdentityStore::open_in_memory().unwrap()),
            4,
        );
        assert!(matches!(
            engine.recognize(),
            RecognitionOutcome::Unavailable(Unavailable::CapabilityAbsent(r)) if r == "models missing"
        ));
    }

    #[test]
    fn test_no_frame_and_no_face() {
        let f = fixture();
        enroll(&f, &[("A", [0.0, 0.0])]);
        assert_eq!(f.engine.recognize(), RecognitionOutcome::NoFrame);

        show(&f, face_image(0, 0, 0));
        assert_eq!(f.engine.recognize(), RecognitionOutcome::NoFace);
        assert!(f.processed.get().is_some());
    }

    #[test]
    fn test_nearest_within_threshold_is_recognized() {
        let f = fixture();
        enroll(&f, &[("A", [0.0, 0.0]), ("B", [10.0, 10.0])]);

        // Query [0.1, 0.1].
        show(&f, face_image(1, 1, 1));
        match f.engine.recognize() {
            RecognitionOutcome::Recognized { identity, distance } => {
                assert_eq!(identity.name, "A");
                assert!((distance - 0.02f32.sqrt()).abs() < 1e-5);
                assert_ne!(identity.last_seen, "2026-01-01 00:00:00");
            }
            other => panic!("expected A, got {other:?}"),
        }
        assert_eq!(f.engine.last_recognized().as_deref(), Some("A"));
        assert_ne!(f.store.get("A").unwrap().unwrap().last_seen, "2026-01-01 00:00:00");
        assert_eq!(f.store.get("B").unwrap().unwrap().last_seen, "2026-01-01 00:00:00");

        // Query [5.0, 5.0] is far from both.
        show(&f, face_image(1, 50, 50));
        assert!(matches!(
            f.engine.recognize(),
            RecognitionOutcome::Unrecognized { .. }
        ));
        assert_eq!(f.engine.last_recognized().as_deref(), Some("A"));
    }

    #[test]
    fn test_tie_goes_to_earliest_entry() {
        let f = fixture();
        enroll(&f, &[("first", [0.0, 0.5]), ("second", [0.5, 0.0])]);
        show(&f, face_image(1, 0, 0));
        match f.engine.recognize() {
            RecognitionOutcome::Recognized { identity, .. } => assert_eq!(identity.name, "first"),
            other => panic!("expected first, got {other:?}"),
        }
    }

    #[test]
    fn test_first_detected_face_is_used() {
        let f = fixture();
        enroll(&f, &[("A", [0.0, 0.0])]);
        show(&f, face_image(3, 0, 0));
        assert!(matches!(f.engine.recognize(), RecognitionOutcome::Recognized { .. }));

        // Every detected face is outlined on the processed frame.
        let annotated = f.processed.get().unwrap();
        for i in 0..3u32 {
            assert_eq!(annotated.image.get_pixel(5 + i * 10, 5)[0], BOX_SHADE);
        }
        // The raw frame is untouched.
        assert_eq!(f.raw.get().unwrap().image.get_pixel(5, 5)[0], 0);
    }

    #[test]
    fn test_outline_clips_to_image() {
        let mut image = GrayImage::new(10, 10);
        let bbox = BoundingBox {
            x: -4.0,
            y: 6.0,
            width: 30.0,
            height: 30.0,
            confidence: 1.0,
            landmarks: None,
        };
        outline(&mut image, &bbox, 200);
        assert_eq!(image.get_pixel(0, 6)[0], 200);
        assert_eq!(image.get_pixel(9, 9)[0], 200);
        assert_eq!(image.get_pixel(5, 8)[0], 0);
    }
}
