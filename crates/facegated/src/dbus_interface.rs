use crate::enrollment::EnrollError;
use crate::recognition::{RecognitionOutcome, Unavailable};
use crate::service::{Facegate, RemoveError};
use facegate_hw::SwitchOutcome;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.facegate.Facegate1";
pub const OBJECT_PATH: &str = "/org/facegate/Facegate1";

/// Errors returned to D-Bus callers as `org.facegate.Error.*`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.facegate.Error")]
pub enum FacegateError {
    #[zbus(error)]
    ZBus(zbus::Error),
    ServiceUnavailable(String),
    NotFound(String),
    Conflict(String),
    InvalidArgs(String),
    Failed(String),
}

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.Facegate1
/// Object path: /org/facegate/Facegate1
pub struct FacegateService {
    app: Arc<Facegate>,
}

impl FacegateService {
    pub fn new(app: Arc<Facegate>) -> Self {
        Self { app }
    }

    /// Run blocking pipeline work off the D-Bus executor.
    async fn blocking<T, F>(&self, work: F) -> Result<T, FacegateError>
    where
        F: FnOnce(&Facegate) -> T + Send + 'static,
        T: Send + 'static,
    {
        let app = Arc::clone(&self.app);
        tokio::task::spawn_blocking(move || work(app.as_ref()))
            .await
            .map_err(|e| FacegateError::Failed(format!("worker task failed: {e}")))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, FacegateError> {
    serde_json::to_string(value).map_err(|e| FacegateError::Failed(e.to_string()))
}

/// Translate a recognition outcome into a reply or a D-Bus error.
pub fn recognition_reply(outcome: RecognitionOutcome) -> Result<String, FacegateError> {
    match outcome {
        RecognitionOutcome::Recognized { identity, distance } => to_json(&serde_json::json!({
            "name": identity.name,
            "distance": distance,
            "enrolled_at": identity.enrolled_at,
            "last_seen": identity.last_seen,
            "total_spent": identity.total_spent,
        })),
        RecognitionOutcome::Unrecognized { distance, .. } => Err(FacegateError::NotFound(format!(
            "face not recognized (nearest distance {distance:.3})"
        ))),
        RecognitionOutcome::NoFace => Err(FacegateError::NotFound("no face detected".into())),
        RecognitionOutcome::NoFrame => Err(FacegateError::ServiceUnavailable(
            "no camera frame available".into(),
        )),
        RecognitionOutcome::Unavailable(Unavailable::EmptyGallery) => Err(
            FacegateError::ServiceUnavailable("no identities enrolled".into()),
        ),
        RecognitionOutcome::Unavailable(Unavailable::CapabilityAbsent(reason)) => Err(
            FacegateError::ServiceUnavailable(format!("face recognition unavailable: {reason}")),
        ),
        RecognitionOutcome::Failed(reason) => Err(FacegateError::Failed(reason)),
    }
}

impl From<EnrollError> for FacegateError {
    fn from(e: EnrollError) -> Self {
        match e {
            EnrollError::InvalidName(_) => FacegateError::InvalidArgs(e.to_string()),
            EnrollError::Conflict(_) => FacegateError::Conflict(e.to_string()),
            EnrollError::NoSamples { .. } => FacegateError::ServiceUnavailable(e.to_string()),
            EnrollError::Dataset(_) | EnrollError::Store(_) | EnrollError::Training(_) => {
                FacegateError::Failed(e.to_string())
            }
        }
    }
}

impl From<RemoveError> for FacegateError {
    fn from(e: RemoveError) -> Self {
        match e {
            RemoveError::InvalidName(_) => FacegateError::InvalidArgs(e.to_string()),
            RemoveError::NotFound(_) => FacegateError::NotFound(e.to_string()),
            RemoveError::Store(_) | RemoveError::Dataset(_) | RemoveError::Training(_) => {
                FacegateError::Failed(e.to_string())
            }
        }
    }
}

#[interface(name = "org.facegate.Facegate1")]
impl FacegateService {
    /// Identify the face in the current frame. Returns the identity as JSON.
    async fn recognize(&self) -> Result<String, FacegateError> {
        tracing::info!("recognize requested");
        recognition_reply(self.blocking(|app| app.recognize()).await?)
    }

    /// Capture samples for a new identity and train it.
    async fn enroll(&self, name: &str) -> Result<String, FacegateError> {
        tracing::info!(name, "enroll requested");
        let name = name.to_string();
        let report = self.blocking(move |app| app.enroll(&name)).await??;
        to_json(&serde_json::json!({
            "name": report.name,
            "requested": report.requested,
            "saved": report.saved,
            "persisted": report.persisted,
        }))
    }

    /// Open a different camera index. Returns `true` if the camera is available afterwards.
    async fn switch_camera(&self, index: u32) -> Result<bool, FacegateError> {
        tracing::info!(index, "switch_camera requested");
        match self.blocking(move |app| app.switch_camera(index)).await? {
            SwitchOutcome::AlreadyActive | SwitchOutcome::Opened => Ok(true),
            SwitchOutcome::Failed => Err(FacegateError::ServiceUnavailable(format!(
                "camera {index} could not be opened"
            ))),
        }
    }

    /// List enrolled identities as a JSON array.
    async fn list_identities(&self) -> Result<String, FacegateError> {
        let identities = self
            .blocking(|app| app.list_identities())
            .await?
            .map_err(|e| FacegateError::Failed(e.to_string()))?;
        to_json(&identities)
    }

    /// Delete an identity and its samples.
    async fn remove_identity(&self, name: &str) -> Result<bool, FacegateError> {
        tracing::info!(name, "remove_identity requested");
        let name = name.to_string();
        self.blocking(move |app| app.remove_identity(&name)).await??;
        Ok(true)
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> Result<String, FacegateError> {
        to_json(&self.blocking(|app| app.status()).await?)
    }
}
