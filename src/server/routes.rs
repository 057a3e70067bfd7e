//! Detection routes. Every handler extracts its input, hands the blocking
//! decode -> detect -> render pipeline to the actix thread pool and answers
//! with JSON

use super::protocol::{CameraRequest, LiveFrameRequest};
use super::{Limits, WebError};
use crate::gateway::{Error, Gateway};
use crate::util;
use actix_multipart::Multipart;
use actix_web::{post, web, HttpResponse, Responder};
use std::collections::HashMap;
use tokio_stream::StreamExt;
use tracing::{debug, info};

type Result<T> = std::result::Result<T, WebError>;

/// Read the first multipart field called `name`. Other fields are skipped
async fn read_field(mut payload: Multipart, name: &str, limit: usize) -> Result<Option<Vec<u8>>> {
    while let Some(field) = payload.next().await {
        let mut field = field?;
        if field.content_disposition().get_name() != Some(name) {
            continue;
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > limit {
                return Err(Error::TooLarge(limit).into());
            }
            data.extend_from_slice(&chunk);
        }
        debug!("read {} byte(s) from field `{name}`", data.len());
        return Ok(Some(data));
    }
    Ok(None)
}

#[post("/detect-image")]
pub async fn detect_image(
    payload: Multipart,
    gateway: web::Data<Gateway>,
    limits: web::Data<Limits>,
) -> Result<impl Responder> {
    let upload = read_field(payload, "image", limits.max_upload_bytes).await?;
    let output = web::block(move || gateway.detect_image(upload.as_deref())).await??;

    info!("detect-image: persisted {}", output.image_path);
    Ok(web::Json(output))
}

#[post("/detect-video")]
pub async fn detect_video(
    payload: Multipart,
    gateway: web::Data<Gateway>,
    limits: web::Data<Limits>,
) -> Result<impl Responder> {
    let upload = read_field(payload, "video", limits.max_upload_bytes).await?;
    let output = web::block(move || gateway.detect_video(upload.as_deref())).await??;

    info!("detect-video: {} screenshot(s)", output.screenshots.len());
    Ok(web::Json(output))
}

#[post("/detect-camera")]
pub async fn detect_camera(
    req: web::Json<CameraRequest>,
    gateway: web::Data<Gateway>,
) -> Result<impl Responder> {
    let index = req.camera_index;
    let output = web::block(move || gateway.detect_camera(index)).await??;

    info!("detect-camera {index}: persisted {}", output.image_path);
    Ok(web::Json(output))
}

#[post("/detect-live-camera")]
pub async fn detect_live_camera(
    req: web::Json<LiveFrameRequest>,
    gateway: web::Data<Gateway>,
) -> Result<impl Responder> {
    let LiveFrameRequest { image } = req.into_inner();
    let output = web::block(move || gateway.detect_live(image.as_deref())).await??;

    debug!("detect-live-camera: {} face(s)", output.faces.len());
    Ok(web::Json(output))
}

/// Serve a persisted artifact by name
pub async fn artifact(name: web::Path<String>, gateway: web::Data<Gateway>) -> Result<HttpResponse> {
    let name = name.into_inner();
    if !util::is_valid_artifact_name(&name) {
        return Ok(not_found());
    }

    let lookup = name.clone();
    let data = web::block(move || gateway.sink().fetch(&lookup)).await??;
    Ok(match data {
        Some(data) => HttpResponse::Ok()
            .content_type(util::content_type(&name))
            .body(data),
        None => not_found(),
    })
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(HashMap::from([("error", "not found")]))
}

#[cfg(test)]
mod tests {
    use super::super::configure;
    use super::*;
    use crate::config::NO_IMAGE_DATA;
    use crate::detector::Rect;
    use crate::sink::MemorySink;
    use crate::testing::{self, BlobDetector, ScriptedCamera, ScriptedVideo};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use base64::{engine::general_purpose, Engine as _};
    use serde_json::{json, Value};
    use std::sync::Arc;

    const BOUNDARY: &str = "facegate-boundary";

    fn gateway(camera: ScriptedCamera) -> web::Data<Gateway> {
        web::Data::new(
            Gateway::new(
                Arc::new(BlobDetector),
                Arc::new(MemorySink::new("static")),
                Arc::new(camera),
                Arc::new(ScriptedVideo::new(vec![])),
            )
            .with_unique_names(false),
        )
    }

    fn limits(max_upload_bytes: usize) -> Limits {
        Limits {
            max_upload_bytes,
            public_prefix: "static".into(),
        }
    }

    fn multipart(field: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(uri: &str, field: &str, data: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart(field, data))
    }

    #[actix_web::test]
    async fn test_detect_image_route() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;
        let png = testing::png(&testing::with_faces(64, 64, &[Rect::new(8, 8, 20, 20)]));

        let resp = test::call_service(&app, upload("/detect-image", "image", &png).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({"message": "Face(s) detected", "image_path": "static/detected_face.jpg"})
        );

        // the annotated result is served back under its public path
        let req = test::TestRequest::get().uri("/static/detected_face.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        let data = test::read_body(resp).await;
        assert!(image::load_from_memory(&data).is_ok());
    }

    #[actix_web::test]
    async fn test_detect_image_missing_field() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        let resp = test::call_service(&app, upload("/detect-image", "photo", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "missing form field `image`"}));
    }

    #[actix_web::test]
    async fn test_detect_image_too_large() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(16)))).await;

        let resp = test::call_service(&app, upload("/detect-image", "image", &[7; 64]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_web::test]
    async fn test_detect_video_without_faces() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        let resp = test::call_service(&app, upload("/detect-video", "video", b"mp4").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({"message": "Face(s) detected in video", "screenshots": []})
        );
    }

    #[actix_web::test]
    async fn test_detect_camera_unavailable() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        let req = test::TestRequest::post()
            .uri("/detect-camera")
            .set_json(json!({"camera_index": 3}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"message": "Could not access camera"}));
    }

    #[actix_web::test]
    async fn test_detect_camera_default_index() {
        let frame = testing::with_faces(64, 48, &[Rect::new(20, 10, 20, 20)]);
        let gateway = gateway(ScriptedCamera::working(frame));
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        let req = test::TestRequest::post()
            .uri("/detect-camera")
            .set_json(json!({}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            body,
            json!({"message": "Face(s) detected from camera", "image_path": "static/camera_detected.jpg"})
        );
    }

    #[actix_web::test]
    async fn test_detect_live_camera() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;
        let png = testing::png(&testing::with_faces(80, 80, &[Rect::new(10, 20, 40, 40)]));
        let uri = format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(png));

        let req = test::TestRequest::post()
            .uri("/detect-live-camera")
            .set_json(json!({ "image": uri }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            body,
            json!({"faces": [{"x": 10, "y": 20, "width": 40, "height": 40}]})
        );
    }

    #[actix_web::test]
    async fn test_detect_live_camera_no_image() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        let req = test::TestRequest::post()
            .uri("/detect-live-camera")
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "error": NO_IMAGE_DATA }));
    }

    #[actix_web::test]
    async fn test_detect_live_camera_bad_payload() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        let req = test::TestRequest::post()
            .uri("/detect-live-camera")
            .set_json(json!({"image": "data:image/png;base64,%%%"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_artifact_not_found() {
        let gateway = gateway(ScriptedCamera::missing());
        let app = test::init_service(App::new().configure(configure(gateway, limits(1 << 20)))).await;

        for uri in ["/static/missing.jpg", "/static/.hidden"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }
}
