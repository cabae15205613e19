//! User Profile Tests
//!
//! Covers public profiles, profile updates and per-user post listings.

mod common;

use axum::http::StatusCode;
use common::{app, Part};

// ===========================================================================
// Profiles
// ===========================================================================

#[tokio::test]
async fn get_user_profile_with_counts() {
    let app = app().await;
    let user = app.create_user("prof_counts").await;
    let fan = app.create_user("prof_counts_fan").await;
    app.create_post(&user, "first post").await;
    app.post(&format!("/api/v1/users/{}/follow", user.id), Some(&fan.token))
        .await;

    let resp = app.get(&format!("/api/v1/users/{}", user.id), None).await;

    assert_eq!(resp.status, StatusCode::OK);
    let data = resp.data();
    assert_eq!(data["username"], user.username.as_str());
    assert_eq!(data["_count"]["posts"], 1);
    assert_eq!(data["_count"]["followers"], 1);
    assert_eq!(data["_count"]["following"], 0);
    assert!(data.get("email").is_none());
    assert!(data["joinTime"].is_string());
}

#[tokio::test]
async fn get_unknown_user() {
    let app = app().await;

    let resp = app.get("/api/v1/users/987654321", None).await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "User not found");
}

// ===========================================================================
// Profile Updates
// ===========================================================================

#[tokio::test]
async fn update_profile_text_fields() {
    let app = app().await;
    let user = app.create_user("prof_text").await;

    let resp = app
        .put_multipart(
            "/api/v1/users/profile",
            &[
                Part::Text("bio", "  Rustacean  "),
                Part::Text("location", "Berlin"),
                Part::Text("website", "blog.example.com"),
            ],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let data = resp.data();
    assert_eq!(data["bio"], "Rustacean");
    assert_eq!(data["location"], "Berlin");
    assert_eq!(data["website"], "https://blog.example.com");
    assert!(data["avatar"].is_null());
}

#[tokio::test]
async fn update_profile_leaves_absent_fields() {
    let app = app().await;
    let user = app.create_user("prof_partial").await;

    app.put_multipart(
        "/api/v1/users/profile",
        &[Part::Text("bio", "kept"), Part::Text("location", "Paris")],
        Some(&user.token),
    )
    .await;
    let resp = app
        .put_multipart(
            "/api/v1/users/profile",
            &[Part::Text("location", "Lyon")],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["bio"], "kept");
    assert_eq!(resp.data()["location"], "Lyon");
}

#[tokio::test]
async fn update_profile_with_avatar_and_cover() {
    let app = app().await;
    let user = app.create_user("prof_images").await;

    let resp = app
        .put_multipart(
            "/api/v1/users/profile",
            &[Part::png("avatar"), Part::png("coverImage")],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let data = resp.data();
    let avatar = data["avatar"].as_str().unwrap().to_string();
    let cover = data["coverImage"].as_str().unwrap().to_string();
    assert!(avatar.ends_with(".png"));
    assert_ne!(avatar, cover);

    let names = app.upload_names();
    assert!(names.contains(&avatar));
    assert!(names.contains(&cover));

    let profile = app.get(&format!("/api/v1/users/{}", user.id), None).await;
    assert_eq!(profile.data()["avatar"], avatar.as_str());
}

#[tokio::test]
async fn update_profile_rejects_long_bio() {
    let app = app().await;
    let user = app.create_user("prof_long_bio").await;
    let bio = "b".repeat(161);

    let resp = app
        .put_multipart(
            "/api/v1/users/profile",
            &[Part::Text("bio", &bio)],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_profile_rejects_bad_website_and_keeps_no_files() {
    let app = app().await;
    let user = app.create_user("prof_bad_site").await;

    let resp = app
        .put_multipart(
            "/api/v1/users/profile",
            &[Part::png("avatar"), Part::Text("website", "ftp://files.example.com")],
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "Invalid website URL");

    let profile = app.get(&format!("/api/v1/users/{}", user.id), None).await;
    assert!(profile.data()["avatar"].is_null());
}

#[tokio::test]
async fn update_profile_requires_auth() {
    let app = app().await;

    let resp = app
        .put_multipart("/api/v1/users/profile", &[Part::Text("bio", "x")], None)
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "No token provided");
}

// ===========================================================================
// User Posts
// ===========================================================================

#[tokio::test]
async fn list_user_posts_newest_first() {
    let app = app().await;
    let user = app.create_user("uposts").await;
    let other = app.create_user("uposts_other").await;
    let first = app.create_post(&user, "older").await;
    let second = app.create_post(&user, "newer").await;
    app.create_post(&other, "not mine").await;

    let resp = app
        .get(&format!("/api/v1/users/{}/posts", user.id), None)
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let ids: Vec<i64> = resp
        .data()
        .as_array()
        .unwrap()
        .iter()
        .map(|post| post["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![second, first]);
}

#[tokio::test]
async fn list_posts_of_unknown_user() {
    let app = app().await;

    let resp = app.get("/api/v1/users/987654322/posts", None).await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
