//! Live preview endpoints.

use crate::service::Facegate;
use crate::stream::{StreamEncoder, CONTENT_TYPE};
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

pub fn router(app: Arc<Facegate>) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/processed_feed", get(processed_feed))
        .with_state(app)
}

async fn video_feed(State(app): State<Arc<Facegate>>) -> Response {
    tracing::debug!("raw preview requested");
    mjpeg_response(app.raw_stream())
}

async fn processed_feed(State(app): State<Arc<Facegate>>) -> Response {
    tracing::debug!("processed preview requested");
    mjpeg_response(app.processed_stream())
}

fn mjpeg_response(encoder: &StreamEncoder) -> Response {
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        Body::from_stream(encoder.stream()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::SqliteIdentityStore;
    use crate::test_support::{face_image, StillOpener};
    use facegate_core::Capability;
    use facegate_hw::CaptureProfile;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_feeds_serve_multipart_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            dataset_dir: tmp.path().join("dataset"),
            profile: Some(CaptureProfile::Fast),
            ..Config::default()
        };
        let app = Arc::new(
            Facegate::assemble(
                &config,
                StillOpener::new(face_image(0, 0, 0)),
                Capability::Absent {
                    reason: "test".into(),
                },
                Arc::new(SqliteIdentityStore::open_in_memory().unwrap()),
            )
            .unwrap(),
        );

        let response = video_feed(State(Arc::clone(&app))).await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));

        let response = processed_feed(State(app)).await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
    }
}
