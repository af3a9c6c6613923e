//! The assembled daemon: owns every pipeline component from start to shutdown.

use crate::config::Config;
use crate::dataset::{validate_name, Dataset, DatasetError};
use crate::enrollment::{EnrollError, EnrollReport, EnrollSettings, EnrollmentPipeline};
use crate::recognition::{RecognitionEngine, RecognitionOutcome};
use crate::store::{IdentityStore, SqliteIdentityStore, StoreError};
use crate::stream::{StreamEncoder, StreamSettings};
use crate::training::{TrainingError, TrainingJob};
use facegate_core::{Capability, SharedGallery};
use facegate_hw::{
    AcquisitionLoop, CameraSource, CaptureProfile, DeviceOpener, FrameBuffer, LatestFrame, Pacing,
    SwitchOutcome, V4l2Opener,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoveError {
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("unknown identity: {0}")]
    NotFound(String),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("training: {0}")]
    Training(#[from] TrainingError),
}

/// Listing entry; excludes the encoding and image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub name: String,
    pub enrolled_at: String,
    pub last_seen: String,
    pub total_spent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub camera_index: u32,
    pub camera_available: bool,
    pub acquisition_running: bool,
    /// Age of the newest raw frame; `None` until one is captured.
    pub frame_age_ms: Option<u64>,
    pub capture_profile: CaptureProfile,
    pub capability: String,
    pub gallery_size: usize,
    pub last_recognized: Option<String>,
}

pub struct Facegate {
    profile: CaptureProfile,
    camera: Arc<CameraSource>,
    raw: Arc<FrameBuffer>,
    capability: Capability,
    gallery: Arc<SharedGallery>,
    store: Arc<dyn IdentityStore>,
    dataset: Arc<Dataset>,
    training: Arc<TrainingJob>,
    recognition: RecognitionEngine,
    enrollment: EnrollmentPipeline,
    raw_stream: StreamEncoder,
    processed_stream: StreamEncoder,
    acquisition: Mutex<Option<AcquisitionLoop>>,
}

impl Facegate {
    /// Build the production pipeline from `config`.
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        let capability = Capability::load(&config.model_dir);
        let store = Arc::new(SqliteIdentityStore::open(&config.db_path)?);
        Self::assemble(config, V4l2Opener, capability, store)
    }

    /// Wire all components, publish the initial gallery, open the camera and
    /// begin acquisition.
    pub fn assemble(
        config: &Config,
        opener: impl DeviceOpener + 'static,
        capability: Capability,
        store: Arc<dyn IdentityStore>,
    ) -> anyhow::Result<Self> {
        let profile = config.capture_profile();
        let dataset = Arc::new(Dataset::open(&config.dataset_dir)?);
        let gallery = Arc::new(SharedGallery::default());
        let raw = Arc::new(FrameBuffer::new("raw"));
        let processed = Arc::new(FrameBuffer::new("processed"));

        let training = Arc::new(TrainingJob::new(
            Arc::clone(&dataset),
            Arc::clone(&store),
            capability.clone(),
            Arc::clone(&gallery),
        ));
        // Catch up on samples left from a previous run before serving requests.
        let report = training.run()?;
        tracing::info!(
            trained = report.trained.len(),
            rejected = report.rejected.len(),
            identities = report.gallery_size,
            "initial training complete"
        );

        let recognition = RecognitionEngine::new(
            Arc::clone(&raw) as Arc<dyn LatestFrame>,
            Arc::clone(&processed),
            capability.clone(),
            Arc::clone(&gallery),
            Arc::clone(&store),
            config.recognition_downsample,
        );
        let enrollment = EnrollmentPipeline::new(
            Arc::clone(&raw) as Arc<dyn LatestFrame>,
            Arc::clone(&dataset),
            Arc::clone(&store),
            Arc::clone(&training),
            EnrollSettings {
                samples: config.enroll_samples,
                delay: config.enroll_delay(),
            },
        );
        let raw_stream = StreamEncoder::new(
            Arc::clone(&raw),
            StreamSettings {
                throttle: config.raw_stream.throttle(profile),
                jpeg_quality: config.raw_stream.jpeg_quality,
            },
        );
        let processed_stream = StreamEncoder::new(
            processed,
            StreamSettings {
                throttle: config.processed_stream.throttle(profile),
                jpeg_quality: config.processed_stream.jpeg_quality,
            },
        );

        let camera = Arc::new(CameraSource::new(opener, config.resolution));
        camera.open(config.camera_index);
        let acquisition =
            AcquisitionLoop::spawn(Arc::clone(&camera), Arc::clone(&raw), Pacing::from(profile))?;

        tracing::info!(
            camera = config.camera_index,
            profile = ?profile,
            capability = ?capability,
            "pipeline started"
        );

        Ok(Self {
            profile,
            camera,
            raw,
            capability,
            gallery,
            store,
            dataset,
            training,
            recognition,
            enrollment,
            raw_stream,
            processed_stream,
            acquisition: Mutex::new(Some(acquisition)),
        })
    }

    pub fn recognize(&self) -> RecognitionOutcome {
        self.recognition.recognize()
    }

    pub fn enroll(&self, name: &str) -> Result<EnrollReport, EnrollError> {
        self.enrollment.enroll(name)
    }

    pub fn switch_camera(&self, index: u32) -> SwitchOutcome {
        let outcome = self.camera.switch(index);
        if outcome == SwitchOutcome::Opened {
            // Frames from the previous device are stale.
            self.raw.clear();
        }
        tracing::info!(index, outcome = ?outcome, "camera switch");
        outcome
    }

    pub fn list_identities(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        Ok(self
            .store
            .load_all()?
            .into_iter()
            .map(|i| IdentitySummary {
                name: i.name,
                enrolled_at: i.enrolled_at,
                last_seen: i.last_seen,
                total_spent: i.total_spent,
            })
            .collect())
    }

    /// Delete the identity row and its samples, then republish the gallery.
    pub fn remove_identity(&self, name: &str) -> Result<(), RemoveError> {
        let name = validate_name(name).map_err(|_| RemoveError::InvalidName(name.to_string()))?;
        let removed_row = self.store.remove(&name)?;
        let removed_samples = self.dataset.remove(&name)?;
        self.training.forget(&name);
        if !removed_row && !removed_samples {
            return Err(RemoveError::NotFound(name));
        }
        self.training.reload_gallery()?;
        tracing::info!(name = %name, removed_row, removed_samples, "identity removed");
        Ok(())
    }

    pub fn status(&self) -> ServiceStatus {
        let acquisition_running = self
            .acquisition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(AcquisitionLoop::is_running);
        ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            camera_index: self.camera.index(),
            camera_available: self.camera.is_available(),
            acquisition_running,
            frame_age_ms: self
                .raw
                .get()
                .map(|frame| frame.captured_at.elapsed().as_millis() as u64),
            capture_profile: self.profile,
            capability: match &self.capability {
                Capability::Present(p) => format!("present (dimension {})", p.dimension()),
                Capability::Absent { reason } => format!("absent: {reason}"),
            },
            gallery_size: self.gallery.snapshot().len(),
            last_recognized: self.recognition.last_recognized(),
        }
    }

    pub fn raw_stream(&self) -> &StreamEncoder {
        &self.raw_stream
    }

    pub fn processed_stream(&self) -> &StreamEncoder {
        &self.processed_stream
    }

    /// Stop acquisition and release the camera. Idempotent.
    pub fn shutdown(&self) {
        let acquisition = self
            .acquisition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut acquisition) = acquisition {
            acquisition.shutdown();
        }
        self.camera.close();
        tracing::info!("pipeline stopped");
    }
}

impl Drop for Facegate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{face_image, FakeCapability, StillOpener};
    use std::time::{Duration, Instant};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            dataset_dir: dir.join("dataset"),
            db_path: dir.join("facegate.db"),
            profile: Some(CaptureProfile::Fast),
            enroll_samples: 3,
            enroll_delay_ms: 1,
            recognition_downsample: 1,
            ..Config::default()
        }
    }

    fn app(dir: &std::path::Path, opener: StillOpener) -> Facegate {
        Facegate::assemble(
            &test_config(dir),
            opener,
            Capability::Present(Arc::new(FakeCapability::default())),
            Arc::new(SqliteIdentityStore::open_in_memory().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_enroll_recognize_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let camera = StillOpener::new(face_image(1, 1, 1));
        let app = app(tmp.path(), camera.clone());
        assert!(wait_for(|| app.raw.get().is_some()));

        assert!(matches!(
            app.recognize(),
            RecognitionOutcome::Unavailable(_)
        ));

        let report = app.enroll("alice").unwrap();
        assert_eq!(report.saved, 3);
        assert!(report.persisted);
        assert!(matches!(app.enroll("alice"), Err(EnrollError::Conflict(_))));

        match app.recognize() {
            RecognitionOutcome::Recognized { identity, .. } => assert_eq!(identity.name, "alice"),
            other => panic!("expected alice, got {other:?}"),
        }
        let listed = app.list_identities().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "alice");

        let status = app.status();
        assert_eq!(status.gallery_size, 1);
        assert_eq!(status.last_recognized.as_deref(), Some("alice"));
        assert!(status.camera_available);
        assert!(status.acquisition_running);
        assert!(status.frame_age_ms.is_some_and(|age| age < 5_000));

        app.remove_identity("alice").unwrap();
        assert!(app.list_identities().unwrap().is_empty());
        assert!(!tmp.path().join("dataset/alice").exists());
        assert_eq!(app.status().gallery_size, 0);
        assert!(matches!(app.remove_identity("alice"), Err(RemoveError::NotFound(_))));

        // The name can be enrolled again.
        camera.show(face_image(1, 2, 2));
        assert!(app.enroll("alice").unwrap().persisted);
    }

    #[test]
    fn test_switch_camera() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), StillOpener::new(face_image(0, 0, 0)));

        assert_eq!(app.switch_camera(0), SwitchOutcome::AlreadyActive);
        assert_eq!(app.switch_camera(2), SwitchOutcome::Opened);
        assert_eq!(app.status().camera_index, 2);

        assert_eq!(app.switch_camera(9), SwitchOutcome::Failed);
        assert!(!app.status().camera_available);
        assert!(app.status().acquisition_running);

        assert_eq!(app.switch_camera(1), SwitchOutcome::Opened);
        assert!(wait_for(|| app.raw.get().is_some()));
    }

    #[test]
    fn test_startup_trains_leftover_samples() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let dataset = Dataset::open(&config.dataset_dir).unwrap();
        dataset.create("bob").unwrap();
        dataset
            .save_sample("bob", 1, &crate::test_support::face_png(1, 5, 5))
            .unwrap();

        let app = app(tmp.path(), StillOpener::new(face_image(1, 5, 5)));
        assert_eq!(app.status().gallery_size, 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), StillOpener::new(face_image(0, 0, 0)));
        assert!(wait_for(|| app.status().frame_age_ms.is_some()));
        app.shutdown();
        assert!(!app.status().acquisition_running);
        assert!(!app.status().camera_available);
        app.shutdown();
    }
}
