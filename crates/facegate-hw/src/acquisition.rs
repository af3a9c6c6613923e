//! Background frame acquisition.
//!
//! A dedicated OS thread reads the camera source and overwrites the raw frame
//! buffer with every successful capture. Failed reads are transient: the loop
//! backs off and tries again on the next cycle.

use crate::buffer::FrameBuffer;
use crate::source::{CameraSource, CaptureError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const FAILURE_BACKOFF_FACTOR: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Acquisition pacing preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureProfile {
    Fast,
    /// For small boards (Raspberry Pi class) where CPU is scarce.
    Reduced,
}

impl CaptureProfile {
    /// `Reduced` when running on a device-tree board, `Fast` otherwise.
    pub fn detect() -> Self {
        if Path::new("/proc/device-tree/model").exists() {
            CaptureProfile::Reduced
        } else {
            CaptureProfile::Fast
        }
    }

    pub fn interval(self) -> Duration {
        match self {
            CaptureProfile::Fast => Duration::from_millis(10),
            CaptureProfile::Reduced => Duration::from_millis(20),
        }
    }
}

/// Sleep schedule of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub interval: Duration,
    pub failure_backoff: Duration,
    pub max_backoff: Duration,
}

impl Pacing {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            failure_backoff: interval * FAILURE_BACKOFF_FACTOR,
            max_backoff: MAX_BACKOFF.max(interval),
        }
    }

    /// Delay after `failures` consecutive failed reads (doubling, capped).
    pub fn backoff(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.failure_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

impl From<CaptureProfile> for Pacing {
    fn from(profile: CaptureProfile) -> Self {
        Pacing::new(profile.interval())
    }
}

/// Handle to the running acquisition thread. Dropping it stops the thread.
pub struct AcquisitionLoop {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionLoop {
    pub fn spawn(
        source: Arc<CameraSource>,
        raw: Arc<FrameBuffer>,
        pacing: Pacing,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = std::thread::Builder::new()
            .name("facegate-capture".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || run(&source, &raw, pacing, &stop)
            })?;

        tracing::info!(interval_ms = pacing.interval.as_millis() as u64, "acquisition started");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it to finish its current cycle.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("acquisition thread panicked");
            }
            tracing::info!("acquisition stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(source: &CameraSource, raw: &FrameBuffer, pacing: Pacing, stop: &AtomicBool) {
    let mut failures = 0u32;

    while !stop.load(Ordering::Acquire) {
        match source.read_frame() {
            Ok(frame) => {
                raw.set(frame);
                if failures > 0 {
                    tracing::info!(after = failures, "camera reads recovered");
                }
                failures = 0;
                std::thread::sleep(pacing.interval);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures == 1 {
                    match &e {
                        CaptureError::NoDevice => tracing::debug!("no camera open; backing off"),
                        CaptureError::ReadFailed(err) => {
                            tracing::warn!(error = %err, "frame read failed")
                        }
                    }
                }
                std::thread::sleep(pacing.backoff(failures));
            }
        }
    }
}
