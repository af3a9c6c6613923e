//! Single-slot, latest-wins frame storage.

use crate::frame::Frame;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Anything that can hand out a copy of the most recent frame.
pub trait LatestFrame: Send + Sync {
    fn latest(&self) -> Option<Frame>;
}

/// One slot guarded by its own lock.
///
/// Writers overwrite unconditionally; readers receive a clone. The lock is
/// only held for the swap or the copy, never while a frame is processed.
pub struct FrameBuffer {
    name: &'static str,
    slot: Mutex<Option<Frame>>,
}

impl FrameBuffer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the slot; any unread frame is discarded.
    pub fn set(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    /// Copy of the current frame, if any.
    pub fn get(&self) -> Option<Frame> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

impl LatestFrame for FrameBuffer {
    fn latest(&self) -> Option<Frame> {
        self.get()
    }
}
