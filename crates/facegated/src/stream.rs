//! MJPEG chunk streams over a frame buffer.

use bytes::{BufMut, Bytes, BytesMut};
use facegate_hw::FrameBuffer;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Retry delay while the buffer is empty.
const EMPTY_BACKOFF: Duration = Duration::from_millis(20);

/// One multipart part carrying a JPEG image.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub throttle: Duration,
    pub jpeg_quality: u8,
}

/// Produces independent MJPEG streams from one buffer.
pub struct StreamEncoder {
    name: &'static str,
    buffer: Arc<FrameBuffer>,
    settings: StreamSettings,
}

impl StreamEncoder {
    pub fn new(buffer: Arc<FrameBuffer>, settings: StreamSettings) -> Self {
        Self {
            name: buffer.name(),
            buffer,
            settings,
        }
    }

    /// A fresh, unbounded stream. Dropping it stops encoding for this consumer only.
    pub fn stream(&self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let buffer = Arc::clone(&self.buffer);
        let settings = self.settings;
        let name = self.name;

        async_stream::stream! {
            tracing::debug!(stream = name, "stream consumer connected");
            loop {
                let frame = match buffer.get() {
                    Some(frame) => frame,
                    None => {
                        tokio::time::sleep(EMPTY_BACKOFF).await;
                        continue;
                    }
                };

                let quality = settings.jpeg_quality;
                match tokio::task::spawn_blocking(move || frame.to_jpeg(quality)).await {
                    Ok(Ok(jpeg)) => {
                        yield Ok::<Bytes, std::io::Error>(mjpeg_part(&jpeg));
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(stream = name, error = %e, "jpeg encoding failed");
                    }
                    Err(e) => {
                        tracing::error!(stream = name, error = %e, "encoder task failed");
                        break;
                    }
                }

                tokio::time::sleep(settings.throttle).await;
            }
        }
    }
}
