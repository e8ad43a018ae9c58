//! API integration tests.

use std::io::Cursor;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::test_app;

const BOUNDARY: &str = "coderun-test-boundary";

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn compile_request(code: &str) -> Request<Body> {
    Request::builder()
        .uri("/compile-code")
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "code": code }).to_string()))
        .unwrap()
}

fn multipart_request(parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, file_name, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .uri("/upload-image")
        .method(Method::POST)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 128, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _fixture) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_structured_404() {
    let (app, _fixture) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_compile_code_returns_output_and_errors() {
    let (app, _fixture) = test_app();

    let response = app
        .oneshot(compile_request("echo hello\necho warn >&2\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["output"], "hello\n");
    assert_eq!(json["errors"], "warn\n");
}

#[tokio::test]
async fn test_compile_code_nonzero_exit_still_reports() {
    let (app, _fixture) = test_app();

    let response = app
        .oneshot(compile_request("echo boom >&2\nexit 4\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["output"], "");
    assert_eq!(json["errors"], "boom\n");
}

#[tokio::test]
async fn test_compile_code_rejects_empty_code() {
    let (app, _fixture) = test_app();

    let response = app.oneshot(compile_request("   \n")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No code provided");
}

#[tokio::test]
async fn test_compile_code_missing_field_is_empty_code() {
    let (app, _fixture) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/compile-code")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compile_code_times_out() {
    let (app, _fixture) = test_app();

    let response = app.oneshot(compile_request("sleep 10\n")).await.unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(
        body_json(response).await["error"],
        "Code execution timed out"
    );
}

#[tokio::test]
async fn test_upload_without_images_is_rejected() {
    let (app, _fixture) = test_app();

    let response = app
        .oneshot(multipart_request(&[("other", "a.txt", b"x".as_slice())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "No image files provided"
    );
}

#[tokio::test]
async fn test_upload_rejects_non_image() {
    let (app, fixture) = test_app();

    let response = app
        .oneshot(multipart_request(&[("images", "notes.png", b"not a png".as_slice())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        std::fs::read_dir(fixture.upload_dir.path()).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn test_upload_stores_images() {
    let (app, fixture) = test_app();
    let image = png();

    let response = app
        .oneshot(multipart_request(&[
            ("images", "first.png", image.as_slice()),
            ("images", "second.png", image.as_slice()),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "2 images uploaded successfully");
    assert_eq!(json["files"], json!(["first.png", "second.png"]));
    assert_eq!(json["ocr_texts"], json!({}));

    let stored: Vec<String> = std::fs::read_dir(fixture.upload_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|name| name.ends_with("-first.png")));
}
