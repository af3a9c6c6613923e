//! Turns enrollment sample directories into persisted identities.
//!
//! A run processes every sample directory without a persisted identity,
//! averages the encodings of its single-face samples, inserts the result, and
//! finally republishes the gallery from the store. Failures stay scoped to the
//! identity that caused them.
//!
//! Runs and reloads are serialised, so the published gallery always follows
//! the store's latest state. Names still being captured are skipped until
//! their [`CaptureGuard`] is dropped.

use crate::dataset::{Dataset, DatasetError, Fingerprint};
use crate::store::{now_timestamp, IdentityStore, StoreError};
use facegate_core::{Capability, Embedding, FaceCapability, Gallery, SharedGallery};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// What happened to one identity during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    Trained { used: usize, total: usize },
    /// No sample contained exactly one usable face.
    NoUsableSamples { total: usize },
    /// Previously rejected and the sample set has not changed.
    Unchanged,
    /// Another run persisted it first.
    AlreadyPersisted,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrainingReport {
    pub trained: Vec<String>,
    pub rejected: Vec<String>,
    pub failed: Vec<String>,
    pub gallery_size: usize,
}

pub struct TrainingJob {
    dataset: Arc<Dataset>,
    store: Arc<dyn IdentityStore>,
    capability: Capability,
    gallery: Arc<SharedGallery>,
    rejected: Mutex<HashMap<String, Fingerprint>>,
    capturing: Mutex<HashSet<String>>,
    run_lock: Mutex<()>,
}

/// Keeps a name out of training runs while its samples are being written.
pub struct CaptureGuard<'a> {
    job: &'a TrainingJob,
    name: String,
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.job.capturing().remove(&self.name);
    }
}

impl TrainingJob {
    pub fn new(
        dataset: Arc<Dataset>,
        store: Arc<dyn IdentityStore>,
        capability: Capability,
        gallery: Arc<SharedGallery>,
    ) -> Self {
        Self {
            dataset,
            store,
            capability,
            gallery,
            rejected: Mutex::new(HashMap::new()),
            capturing: Mutex::new(HashSet::new()),
            run_lock: Mutex::new(()),
        }
    }

    fn rejected(&self) -> MutexGuard<'_, HashMap<String, Fingerprint>> {
        self.rejected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capturing(&self) -> MutexGuard<'_, HashSet<String>> {
        self.capturing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.run_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `name` as capturing until the returned guard is dropped.
    ///
    /// Returns `None` if another capture already holds the name.
    pub fn begin_capture(&self, name: &str) -> Option<CaptureGuard<'_>> {
        if !self.capturing().insert(name.to_string()) {
            return None;
        }
        Some(CaptureGuard {
            job: self,
            name: name.to_string(),
        })
    }

    /// Train every pending identity, then reload the gallery.
    pub fn run(&self) -> Result<TrainingReport, TrainingError> {
        let _exclusive = self.exclusive();
        let mut report = TrainingReport::default();

        match self.capability.provider() {
            Some(provider) => {
                let persisted: HashSet<String> =
                    self.store.load_all()?.into_iter().map(|i| i.name).collect();

                for name in self.dataset.identities()? {
                    if persisted.contains(&name) {
                        continue;
                    }
                    if self.capturing().contains(&name) {
                        tracing::debug!(name = %name, "samples still being captured; skipped");
                        continue;
                    }
                    match self.train_identity(provider.as_ref(), &name) {
                        Ok(IdentityOutcome::Trained { used, total }) => {
                            tracing::info!(name = %name, used, total, "identity trained");
                            report.trained.push(name);
                        }
                        Ok(IdentityOutcome::NoUsableSamples { total }) => {
                            tracing::warn!(name = %name, total, "no usable samples; identity not trained");
                            report.rejected.push(name);
                        }
                        Ok(IdentityOutcome::Unchanged) => {
                            tracing::debug!(name = %name, "samples unchanged since rejection; skipped");
                            report.rejected.push(name);
                        }
                        Ok(IdentityOutcome::AlreadyPersisted) => {
                            tracing::debug!(name = %name, "identity persisted concurrently");
                        }
                        Err(e) => {
                            tracing::error!(name = %name, error = %e, "training failed for identity");
                            report.failed.push(name);
                        }
                    }
                }
            }
            None => tracing::warn!("face capability absent; skipping training"),
        }

        report.gallery_size = self.publish()?;
        Ok(report)
    }

    /// Replace the published gallery with the store's current contents.
    pub fn reload_gallery(&self) -> Result<usize, TrainingError> {
        let _exclusive = self.exclusive();
        self.publish()
    }

    /// Caller holds the run lock.
    fn publish(&self) -> Result<usize, TrainingError> {
        let identities = self.store.load_all()?;
        let gallery = Gallery::from_identities(&identities);
        let size = gallery.len();
        self.gallery.replace(gallery);
        tracing::info!(identities = size, "gallery published");
        Ok(size)
    }

    /// Drop any remembered rejection for `name`.
    pub fn forget(&self, name: &str) {
        self.rejected().remove(name);
    }

    fn train_identity(
        &self,
        provider: &dyn FaceCapability,
        name: &str,
    ) -> Result<IdentityOutcome, TrainingError> {
        let fingerprint = self.dataset.fingerprint(name)?;
        if self.rejected().get(name) == Some(&fingerprint) {
            return Ok(IdentityOutcome::Unchanged);
        }

        let samples = self.dataset.samples(name)?;
        let total = samples.len();
        let mut profile_image = None;
        let mut accepted: Vec<Embedding> = Vec::new();

        for sample in &samples {
            let bytes = match std::fs::read(&sample.path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %sample.path.display(), error = %e, "unreadable sample");
                    continue;
                }
            };
            let image = match image::load_from_memory(&bytes) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %sample.path.display(), error = %e, "undecodable sample");
                    continue;
                }
            };
            if profile_image.is_none() {
                profile_image = Some(bytes);
            }

            let faces = match provider.detect_faces(&image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(path = %sample.path.display(), error = %e, "detection failed");
                    continue;
                }
            };
            if faces.len() != 1 {
                tracing::debug!(path = %sample.path.display(), faces = faces.len(), "sample skipped");
                continue;
            }

            match provider.encode(&image, &faces[0]) {
                Ok(encoding) if encoding.len() == provider.dimension() => accepted.push(encoding),
                Ok(encoding) => tracing::warn!(
                    path = %sample.path.display(),
                    len = encoding.len(),
                    expected = provider.dimension(),
                    "encoding has wrong dimension"
                ),
                Err(e) => {
                    tracing::warn!(path = %sample.path.display(), error = %e, "encoding failed")
                }
            }
        }

        let (Some(mean), Some(profile_image)) = (Embedding::mean(&accepted), profile_image) else {
            self.rejected().insert(name.to_string(), fingerprint);
            return Ok(IdentityOutcome::NoUsableSamples { total });
        };

        match self.store.insert(name, &mean, &profile_image, &now_timestamp()) {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return Ok(IdentityOutcome::AlreadyPersisted),
            Err(e) => return Err(e.into()),
        }
        self.forget(name);

        Ok(IdentityOutcome::Trained {
            used: accepted.len(),
            total,
        })
    }
}
