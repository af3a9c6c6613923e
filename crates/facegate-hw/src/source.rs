//! Hot-swappable camera source.
//!
//! [`CameraSource`] owns at most one open capture device. The device mutex
//! covers opening, closing, index lookups, and the acquisition thread's single
//! read attempt. Frame consumers never take it; they read frame buffers.
//!
//! Because the mutex is held for the whole read, a switch (or a status query)
//! waits for at most one in-flight read. A stalled device can therefore delay a
//! switch by up to one V4L2 driver read timeout. The old handle is released
//! before the new index is opened.

use crate::camera::{CameraError, Resolution};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// An open capture device.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
    fn index(&self) -> u32;
}

/// Factory for capture devices by index.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, index: u32, resolution: Resolution) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Why no frame could be read. Always transient from the pipeline's view.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no camera device is open")]
    NoDevice,
    #[error("read failed: {0}")]
    ReadFailed(#[from] CameraError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The requested index was already open; nothing changed.
    AlreadyActive,
    Opened,
    /// The old handle was released but the new index failed to open.
    Failed,
}

struct Slot {
    index: u32,
    device: Option<Box<dyn CaptureDevice>>,
}

pub struct CameraSource {
    opener: Box<dyn DeviceOpener>,
    resolution: Resolution,
    slot: Mutex<Slot>,
    available: AtomicBool,
}

impl CameraSource {
    /// A closed source; call [`open`](Self::open) to acquire a device.
    pub fn new(opener: impl DeviceOpener + 'static, resolution: Resolution) -> Self {
        Self {
            opener: Box::new(opener),
            resolution,
            slot: Mutex::new(Slot {
                index: 0,
                device: None,
            }),
            available: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release any held device, then open `index`. Returns availability.
    ///
    /// Failure is recorded in the availability flag, never returned as an error.
    pub fn open(&self, index: u32) -> bool {
        let mut slot = self.lock();
        self.open_locked(&mut slot, index)
    }

    fn open_locked(&self, slot: &mut Slot, index: u32) -> bool {
        if let Some(previous) = slot.device.take() {
            tracing::info!(index = previous.index(), "releasing camera");
            drop(previous);
        }
        self.available.store(false, Ordering::Release);
        slot.index = index;

        match self.opener.open(index, self.resolution) {
            Ok(device) => {
                slot.device = Some(device);
                self.available.store(true, Ordering::Release);
                tracing::info!(index, "camera available");
                true
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "camera open failed; source unavailable");
                false
            }
        }
    }

    /// Switch to `index` unless it is already the open device.
    pub fn switch(&self, index: u32) -> SwitchOutcome {
        let mut slot = self.lock();
        if slot.index == index && slot.device.is_some() {
            return SwitchOutcome::AlreadyActive;
        }
        if self.open_locked(&mut slot, index) {
            SwitchOutcome::Opened
        } else {
            SwitchOutcome::Failed
        }
    }

    /// Release the device, if any.
    pub fn close(&self) {
        let mut slot = self.lock();
        if let Some(device) = slot.device.take() {
            tracing::info!(index = device.index(), "closing camera");
        }
        self.available.store(false, Ordering::Release);
    }

    /// One read attempt against the current device.
    pub fn read_frame(&self) -> Result<Frame, CaptureError> {
        let mut slot = self.lock();
        let device = slot.device.as_mut().ok_or(CaptureError::NoDevice)?;
        Ok(device.read_frame()?)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Index of the current (or last attempted) device.
    pub fn index(&self) -> u32 {
        self.lock().index
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use image::{GrayImage, Luma};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::sync::Arc;

    /// Counts live handles so tests can assert exclusivity.
    #[derive(Default)]
    pub struct HandleCounter {
        pub live: AtomicUsize,
        pub peak: AtomicUsize,
        pub opened: AtomicUsize,
    }

    pub struct FakeDevice {
        index: u32,
        sequence: AtomicU32,
        fail_reads: bool,
        counter: Arc<HandleCounter>,
    }

    impl CaptureDevice for FakeDevice {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if self.fail_reads {
                return Err(CameraError::CaptureFailed("fake read failure".into()));
            }
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            // Pixel value carries the device index so tests can tell sources apart.
            let image = GrayImage::from_pixel(8, 6, Luma([self.index as u8]));
            Ok(Frame::new(image, seq))
        }

        fn index(&self) -> u32 {
            self.index
        }
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.counter.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct FakeOpener {
        pub counter: Arc<HandleCounter>,
        pub unopenable: HashSet<u32>,
        pub unreadable: HashSet<u32>,
    }

    impl DeviceOpener for FakeOpener {
        fn open(&self, index: u32, _resolution: Resolution) -> Result<Box<dyn CaptureDevice>, CameraError> {
            if self.unopenable.contains(&index) {
                return Err(CameraError::DeviceNotFound(format!("/dev/video{index}")));
            }
            let live = self.counter.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counter.peak.fetch_max(live, Ordering::SeqCst);
            self.counter.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                index,
                sequence: AtomicU32::new(0),
                fail_reads: self.unreadable.contains(&index),
                counter: Arc::clone(&self.counter),
            }))
        }
    }

    impl DeviceOpener for Arc<FakeOpener> {
        fn open(&self, index: u32, resolution: Resolution) -> Result<Box<dyn CaptureDevice>, CameraError> {
            self.as_ref().open(index, resolution)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_at_most_one_handle_across_opens() {
        let opener = Arc::new(FakeOpener::default());
        let source = CameraSource::new(Arc::clone(&opener), Resolution::default());

        for index in [0, 1, 1, 2, 0, 3] {
            assert!(source.open(index));
            assert_eq!(opener.counter.live.load(Ordering::SeqCst), 1);
        }
        assert_eq!(opener.counter.peak.load(Ordering::SeqCst), 1);
        assert_eq!(source.index(), 3);
    }

    #[test]
    fn test_concurrent_opens_stay_exclusive() {
        let opener = Arc::new(FakeOpener::default());
        let source = Arc::new(CameraSource::new(Arc::clone(&opener), Resolution::default()));

        let workers: Vec<_> = (0..4u32)
            .map(|t| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        source.open((t + i) % 5);
                        let _ = source.read_frame();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(opener.counter.peak.load(Ordering::SeqCst), 1);
        assert_eq!(opener.counter.opened.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_open_failure_marks_unavailable_and_releases_old() {
        let opener = Arc::new(FakeOpener {
            unopenable: [7].into_iter().collect(),
            ..Default::default()
        });
        let source = CameraSource::new(Arc::clone(&opener), Resolution::default());

        assert!(source.open(0));
        assert!(source.is_available());
        assert!(!source.open(7));
        assert!(!source.is_available());
        assert_eq!(opener.counter.live.load(Ordering::SeqCst), 0);
        assert!(matches!(source.read_frame(), Err(CaptureError::NoDevice)));
    }

    #[test]
    fn test_switch_same_index_is_noop() {
        let opener = Arc::new(FakeOpener::default());
        let source = CameraSource::new(Arc::clone(&opener), Resolution::default());

        assert_eq!(source.switch(2), SwitchOutcome::Opened);
        assert_eq!(source.switch(2), SwitchOutcome::AlreadyActive);
        assert_eq!(opener.counter.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_and_drop_release_handle() {
        let opener = Arc::new(FakeOpener::default());
        {
            let source = CameraSource::new(Arc::clone(&opener), Resolution::default());
            source.open(1);
            source.close();
            assert_eq!(opener.counter.live.load(Ordering::SeqCst), 0);
            source.open(1);
        }
        assert_eq!(opener.counter.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_frame_from_device() {
        let source = CameraSource::new(FakeOpener::default(), Resolution::default());
        source.open(4);
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.image.get_pixel(0, 0)[0], 4);
    }

    /// Device whose reads stall, flagging when a read starts and ends.
    struct StallingDevice {
        index: u32,
        reading: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl CaptureDevice for StallingDevice {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.reading.store(true, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(200));
            self.finished.store(true, Ordering::SeqCst);
            Ok(Frame::new(image::GrayImage::new(4, 4), 0))
        }

        fn index(&self) -> u32 {
            self.index
        }
    }

    struct StallingOpener {
        reading: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl DeviceOpener for StallingOpener {
        fn open(&self, index: u32, _resolution: Resolution) -> Result<Box<dyn CaptureDevice>, CameraError> {
            Ok(Box::new(StallingDevice {
                index,
                reading: Arc::clone(&self.reading),
                finished: Arc::clone(&self.finished),
            }))
        }
    }

    #[test]
    fn test_switch_waits_for_in_flight_read() {
        let reading = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let source = Arc::new(CameraSource::new(
            StallingOpener {
                reading: Arc::clone(&reading),
                finished: Arc::clone(&finished),
            },
            Resolution::default(),
        ));
        assert!(source.open(0));

        let reader = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || source.read_frame().is_ok())
        };
        while !reading.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        assert_eq!(source.switch(1), SwitchOutcome::Opened);
        assert!(finished.load(Ordering::SeqCst));
        assert!(reader.join().unwrap());
        assert_eq!(source.index(), 1);
    }
}
