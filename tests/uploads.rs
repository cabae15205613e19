//! Upload Tests
//!
//! Image validation, the per-file size cap and static serving of stored files.

mod common;

use axum::http::StatusCode;
use common::{app, Part, GIF_BYTES, PNG_BYTES, TEST_MAX_FILE_SIZE};

const INVALID_FILE_TYPE: &str =
    "Invalid file type. Only JPEG, PNG and GIF image files are allowed.";

/// JPEG start-of-image plus an APP0 marker; enough for format sniffing.
const JPEG_HEAD: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

#[tokio::test]
async fn stored_image_is_served() {
    let app = app().await;
    let user = app.create_user("upl_serve").await;

    let resp = app
        .post_multipart("/api/v1/posts", &[Part::png("image")], Some(&user.token))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let image = resp.data()["image"].as_str().unwrap().to_string();

    // <12 hex>-<millis>.png
    let (random, rest) = image.split_once('-').unwrap();
    assert_eq!(random.len(), 12);
    assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(rest.strip_suffix(".png").unwrap().parse::<u64>().is_ok());

    let resp = app.get(&format!("/uploads/{}", image), None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.bytes(), PNG_BYTES);
}

#[tokio::test]
async fn gif_is_accepted() {
    let app = app().await;
    let user = app.create_user("upl_gif").await;

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[Part::File {
                name: "image",
                file_name: "wave.GIF",
                content_type: "image/gif",
                bytes: GIF_BYTES,
            }],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::CREATED);
    assert!(resp.data()["image"].as_str().unwrap().ends_with(".gif"));
}

#[tokio::test]
async fn client_file_name_never_picks_the_extension() {
    let app = app().await;
    let user = app.create_user("upl_polyglot").await;

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[Part::File {
                name: "image",
                file_name: "x.html",
                content_type: "image/gif",
                bytes: b"GIF89a<script>alert(document.cookie)</script>",
            }],
            Some(&user.token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let image = resp.data()["image"].as_str().unwrap().to_string();
    assert!(image.ends_with(".gif"), "stored as {}", image);

    let resp = app.get(&format!("/uploads/{}", image), None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let content_type = resp.headers["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("image/"), "served as {}", content_type);
}

#[tokio::test]
async fn text_disguised_as_png_is_rejected() {
    let app = app().await;
    let user = app.create_user("upl_fake_png").await;

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[
                Part::Text("content", "sneaky"),
                Part::File {
                    name: "image",
                    file_name: "notes.webp",
                    content_type: "image/png",
                    bytes: b"just some plain text, not an image",
                },
            ],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), INVALID_FILE_TYPE);
}

#[tokio::test]
async fn disallowed_content_type_is_rejected() {
    let app = app().await;
    let user = app.create_user("upl_mime").await;

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[Part::File {
                name: "image",
                file_name: "pixel.bmp",
                content_type: "image/bmp",
                bytes: PNG_BYTES,
            }],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), INVALID_FILE_TYPE);
}

#[tokio::test]
async fn oversized_file_is_rejected_and_removed() {
    let app = app().await;
    let user = app.create_user("upl_big").await;

    let mut bytes = vec![0xff, 0xd8, 0xff, 0xe0];
    bytes.resize(TEST_MAX_FILE_SIZE + 1, 0);

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[
                Part::Text("content", "too much"),
                Part::File {
                    name: "image",
                    file_name: "huge.jpeg",
                    content_type: "image/jpeg",
                    bytes: &bytes,
                },
            ],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(resp.json()["code"], 413);
    assert_eq!(resp.error_message(), "File too large");
    assert!(!app.upload_names().iter().any(|name| name.ends_with(".jpg")));
}

#[tokio::test]
async fn files_are_removed_when_the_form_is_invalid() {
    let app = app().await;
    let user = app.create_user("upl_cleanup").await;
    let content = "x".repeat(2201);

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[
                Part::File {
                    name: "image",
                    file_name: "orphan.jpg",
                    content_type: "image/jpeg",
                    bytes: JPEG_HEAD,
                },
                Part::Text("content", &content),
            ],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(!app.upload_names().iter().any(|name| name.ends_with(".jpg")));
}

#[tokio::test]
async fn unexpected_file_field_is_rejected() {
    let app = app().await;
    let user = app.create_user("upl_field").await;

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[Part::png("avatar")],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "Unexpected field: avatar");
}

#[tokio::test]
async fn missing_upload_is_not_found() {
    let app = app().await;

    let resp = app.get("/uploads/does-not-exist.png", None).await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
