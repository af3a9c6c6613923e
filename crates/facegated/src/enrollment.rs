//! Sample capture for a new identity, followed by a training run.

use crate::dataset::{validate_name, Dataset, DatasetError};
use crate::store::{IdentityStore, StoreError};
use crate::training::{TrainingError, TrainingJob, TrainingReport};
use facegate_hw::LatestFrame;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("identity already exists: {0}")]
    Conflict(String),
    #[error("no samples captured for {name} ({requested} attempts)")]
    NoSamples { name: String, requested: usize },
    #[error("dataset: {0}")]
    Dataset(DatasetError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("training: {0}")]
    Training(#[from] TrainingError),
}

impl From<DatasetError> for EnrollError {
    fn from(e: DatasetError) -> Self {
        match e {
            DatasetError::InvalidName(name) => EnrollError::InvalidName(name),
            DatasetError::Conflict(name) => EnrollError::Conflict(name),
            other => EnrollError::Dataset(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnrollSettings {
    /// Capture attempts per enrollment.
    pub samples: usize,
    /// Pause between attempts.
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct EnrollReport {
    pub name: String,
    pub requested: usize,
    pub saved: usize,
    /// Whether training produced a persisted identity for `name`.
    pub persisted: bool,
    pub training: TrainingReport,
}

pub struct EnrollmentPipeline {
    frames: Arc<dyn LatestFrame>,
    dataset: Arc<Dataset>,
    store: Arc<dyn IdentityStore>,
    training: Arc<TrainingJob>,
    settings: EnrollSettings,
}

impl EnrollmentPipeline {
    pub fn new(
        frames: Arc<dyn LatestFrame>,
        dataset: Arc<Dataset>,
        store: Arc<dyn IdentityStore>,
        training: Arc<TrainingJob>,
        settings: EnrollSettings,
    ) -> Self {
        Self {
            frames,
            dataset,
            store,
            training,
            settings,
        }
    }

    /// Capture samples for `name` and train. Blocks for about `samples × delay`.
    pub fn enroll(&self, name: &str) -> Result<EnrollReport, EnrollError> {
        let name = validate_name(name)?;
        if self.store.contains(&name)? || self.dataset.exists(&name) {
            return Err(EnrollError::Conflict(name));
        }
        let Some(capture) = self.training.begin_capture(&name) else {
            return Err(EnrollError::Conflict(name));
        };
        self.dataset.create(&name)?;

        let requested = self.settings.samples;
        tracing::info!(name = %name, requested, "enrollment started");

        let mut saved = 0usize;
        for attempt in 0..requested {
            if attempt > 0 {
                std::thread::sleep(self.settings.delay);
            }
            let Some(frame) = self.frames.latest() else {
                tracing::debug!(name = %name, attempt, "no frame available; attempt skipped");
                continue;
            };
            let png = match frame.to_png() {
                Ok(png) => png,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "sample encoding failed");
                    continue;
                }
            };
            match self.dataset.save_sample(&name, saved as u64 + 1, &png) {
                Ok(path) => {
                    saved += 1;
                    tracing::debug!(path = %path.display(), "sample saved");
                }
                Err(e) => tracing::warn!(name = %name, error = %e, "sample not saved"),
            }
        }

        if saved == 0 {
            if let Err(e) = self.dataset.remove(&name) {
                tracing::warn!(name = %name, error = %e, "failed to remove empty sample directory");
            }
            tracing::warn!(name = %name, requested, "enrollment captured no samples");
            return Err(EnrollError::NoSamples { name, requested });
        }

        drop(capture);
        tracing::info!(name = %name, requested, saved, "samples captured; training");
        self.training.forget(&name);
        let training = self.training.run()?;
        let persisted = self.store.contains(&name)?;

        Ok(EnrollReport {
            name,
            requested,
            saved,
            persisted,
            training,
        })
    }
}
