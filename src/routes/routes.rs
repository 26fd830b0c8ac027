//! Defines routes for photo, upload, and trigger operations.
//!
//! ## Structure
//! - `GET    /photos`: list the caller's photos
//! - `POST   /photos`: create metadata ahead of an upload
//! - `GET    /photos/{photo_id}/{size}`: download one stored size
//! - `DELETE /photos/{photo_id}`: remove a photo and all its sizes
//! - `PUT    /uploads/{photo_id}`: stage upload bytes and start resizing
//! - `POST   /events`: deliver a batch of photo references

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        photo_handlers::{
            create_photo, delete_photo, get_photo_content, list_photos, trigger, upload_photo,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build and return the router carrying [`AppState`] to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/photos", get(list_photos).post(create_photo))
        .route("/photos/{photo_id}", delete(delete_photo))
        .route("/photos/{photo_id}/{size}", get(get_photo_content))
        .route("/uploads/{photo_id}", put(upload_photo))
        .route("/events", post(trigger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::photo_handlers::USER_HEADER;
    use crate::models::size::ORIGINAL;
    use crate::services::{
        content_service::ContentStore,
        identity::{IdentityCache, IdentityProvider, PassthroughProvider},
        metadata_service::MetadataStore,
    };
    use crate::test_support::{Fixture, jpeg_bytes};
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use image::GenericImageView;
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    fn app(fixture: &Fixture) -> Router {
        let provider: Arc<dyn IdentityProvider> = Arc::new(PassthroughProvider);
        let state = AppState {
            db: fixture.metadata.db.clone(),
            storage_dir: fixture.dir.path().join("images"),
            metadata: fixture.metadata.clone(),
            content: fixture.content.clone(),
            resizer: fixture.resizer.clone(),
            identity: Arc::new(IdentityCache::new(provider, 8)),
        };
        routes().with_state(state)
    }

    fn request(method: Method, uri: &str, user: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(body).unwrap()
    }

    fn json_request(method: Method, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
        let mut req = request(method, uri, user, Body::from(body.to_string()));
        req.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        req
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoints_respond() {
        let fixture = Fixture::new().await;

        let resp = app(&fixture)
            .oneshot(request(Method::GET, "/healthz", None, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(&fixture)
            .oneshot(request(Method::GET, "/readyz", None, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["disk"]["ok"], true);
    }

    #[tokio::test]
    async fn create_photo_requires_identity_and_valid_metadata() {
        let fixture = Fixture::new().await;

        let resp = app(&fixture)
            .oneshot(json_request(
                Method::POST,
                "/photos",
                None,
                json!({"filename": "a.jpg", "mimeType": "image/jpeg"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(&fixture)
            .oneshot(json_request(
                Method::POST,
                "/photos",
                Some("u1"),
                json!({"id": "p1", "mimeType": "image/jpeg"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(fixture.metadata.get("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upload_flow_produces_downloadable_sizes() {
        let fixture = Fixture::new().await;

        let resp = app(&fixture)
            .oneshot(json_request(
                Method::POST,
                "/photos",
                Some("u1"),
                json!({"id": "p1", "filename": "a.jpg", "mimeType": "image/jpeg"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["uploadUrl"], "/uploads/p1");
        assert_eq!(body["photo"]["sizes"], json!([]));

        let resp = app(&fixture)
            .oneshot(request(
                Method::PUT,
                "/uploads/p1",
                Some("u1"),
                Body::from(jpeg_bytes(2000, 1000)),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        // resizing runs in the background after the upload is accepted
        let mut listed = Value::Null;
        for _ in 0..100 {
            let resp = app(&fixture)
                .oneshot(request(Method::GET, "/photos", Some("u1"), Body::empty()))
                .await
                .unwrap();
            listed = body_json(resp).await;
            if listed[0]["sizes"].as_array().map(Vec::len) == Some(4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let names: Vec<_> = listed[0]["sizes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["ORIGINAL", "THUMB", "MEDIUM", "SMALL"]);

        let resp = app(&fixture)
            .oneshot(request(Method::GET, "/photos/p1/THUMB", Some("u1"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/jpeg");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!(thumb.dimensions(), (180, 90));

        let resp = app(&fixture)
            .oneshot(request(Method::GET, "/photos/p1/THUMB", Some("u2"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app(&fixture)
            .oneshot(request(Method::GET, "/photos/p1/HUGE", Some("u1"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn events_endpoint_runs_the_batch() {
        let fixture = Fixture::new().await;
        fixture
            .upload("p1", "u1", "a.jpg", "image/jpeg", jpeg_bytes(640, 480))
            .await;

        let resp = app(&fixture)
            .oneshot(json_request(
                Method::POST,
                "/events",
                None,
                json!({"records": [{"photoId": "p1", "userId": "u1"}, {"photoId": "ghost"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        assert_eq!(body["received"], 2);
        assert_eq!(body["processed"], 1);
        assert_eq!(body["skipped"], 1);

        let meta = fixture.metadata.get("p1").await.unwrap().unwrap();
        assert_eq!(meta.sizes.len(), 4);
    }

    #[tokio::test]
    async fn upload_is_refused_once_the_original_is_stored() {
        let fixture = Fixture::new().await;
        fixture
            .upload("p1", "u1", "a.jpg", "image/jpeg", jpeg_bytes(400, 200))
            .await;
        fixture.resizer.process("p1").await.unwrap();

        let resp = app(&fixture)
            .oneshot(request(
                Method::PUT,
                "/uploads/p1",
                Some("u1"),
                Body::from(jpeg_bytes(800, 400)),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        assert!(!fixture.dir.path().join("uploads").join("p1").exists());
        let original = fixture.content.get("p1", &ORIGINAL).await.unwrap().unwrap();
        let original = image::load_from_memory(&original.data).unwrap();
        assert_eq!(original.dimensions(), (400, 200));
    }

    #[tokio::test]
    async fn delete_removes_metadata_and_content() {
        let fixture = Fixture::new().await;
        fixture
            .upload("p1", "u1", "a.jpg", "image/jpeg", jpeg_bytes(400, 300))
            .await;
        fixture.resizer.process("p1").await.unwrap();

        let resp = app(&fixture)
            .oneshot(request(Method::DELETE, "/photos/p1", Some("u1"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        assert!(fixture.metadata.get("p1").await.unwrap().is_none());
        assert!(fixture.content.get("p1", &ORIGINAL).await.unwrap().is_none());
    }
}
