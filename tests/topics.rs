//! Topic Tests

mod common;

use axum::http::StatusCode;
use common::{app, Part};
use serde_json::json;

#[tokio::test]
async fn create_topic() {
    let app = app().await;
    let user = app.create_user("topic_create").await;

    let resp = app
        .post_json(
            "/api/v1/topics",
            json!({
                "title": "  Rust async  ",
                "category": "tech_create",
                "description": "Futures and executors",
            }),
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::CREATED);
    let data = resp.data();
    assert_eq!(data["title"], "Rust async");
    assert_eq!(data["category"], "tech_create");
    assert_eq!(data["description"], "Futures and executors");
    assert_eq!(data["_count"]["posts"], 0);
}

#[tokio::test]
async fn create_topic_requires_auth() {
    let app = app().await;

    let resp = app
        .post_json(
            "/api/v1/topics",
            json!({ "title": "anon", "category": "misc" }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_topic_validation() {
    let app = app().await;
    let user = app.create_user("topic_invalid").await;

    let cases = [
        json!({ "title": "", "category": "misc" }),
        json!({ "title": "t".repeat(65), "category": "misc" }),
        json!({ "title": "no category", "category": "  " }),
        json!({ "title": "long category", "category": "c".repeat(33) }),
    ];

    for body in cases {
        let resp = app
            .post_json("/api/v1/topics", body.clone(), Some(&user.token))
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "accepted {}", body);
    }
}

#[tokio::test]
async fn duplicate_topic_title() {
    let app = app().await;
    let user = app.create_user("topic_dup").await;
    app.create_topic(&user, "Only once", "dup").await;

    let resp = app
        .post_json(
            "/api/v1/topics",
            json!({ "title": "Only once", "category": "dup" }),
            Some(&user.token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "Topic title already in use");
}

#[tokio::test]
async fn list_topics_by_category_most_posts_first() {
    let app = app().await;
    let user = app.create_user("topic_list").await;
    let quiet = app.create_topic(&user, "Quiet corner", "list_cat").await;
    let busy = app.create_topic(&user, "Busy square", "list_cat").await;
    app.create_topic(&user, "Elsewhere", "other_cat").await;

    let busy_id = busy.to_string();
    app.post_multipart(
        "/api/v1/posts",
        &[
            Part::Text("content", "joining in"),
            Part::Text("topicId", &busy_id),
        ],
        Some(&user.token),
    )
    .await;

    let resp = app.get("/api/v1/topics?category=list_cat", None).await;

    assert_eq!(resp.status, StatusCode::OK);
    let topics = resp.data();
    let ids: Vec<i64> = topics
        .as_array()
        .unwrap()
        .iter()
        .map(|topic| topic["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![busy, quiet]);
    assert_eq!(topics[0]["_count"]["posts"], 1);
    assert_eq!(topics[1]["_count"]["posts"], 0);
}

#[tokio::test]
async fn get_topic_and_unknown_topic() {
    let app = app().await;
    let user = app.create_user("topic_get").await;
    let topic_id = app.create_topic(&user, "Lookup", "get").await;

    let resp = app.get(&format!("/api/v1/topics/{}", topic_id), None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["title"], "Lookup");
    assert_eq!(resp.data()["description"], "about it");

    let resp = app.get("/api/v1/topics/987654329", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "Topic not found");
}

#[tokio::test]
async fn topic_posts_only_include_tagged_posts() {
    let app = app().await;
    let user = app.create_user("topic_posts").await;
    let topic_id = app.create_topic(&user, "Tagged only", "posts").await;
    let topic = topic_id.to_string();

    let resp = app
        .post_multipart(
            "/api/v1/posts",
            &[Part::Text("content", "on topic"), Part::Text("topicId", &topic)],
            Some(&user.token),
        )
        .await;
    assert_eq!(resp.data()["topicId"].as_i64().unwrap(), topic_id);
    app.create_post(&user, "off topic").await;

    let resp = app
        .get(&format!("/api/v1/topics/{}/posts", topic_id), None)
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let posts = resp.data();
    assert_eq!(posts.as_array().unwrap().len(), 1);
    assert_eq!(posts[0]["content"], "on topic");

    let resp = app.get("/api/v1/topics/987654330/posts", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
