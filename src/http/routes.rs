use axum::{routing::get, routing::post, routing::put, Router};

use crate::AppState;
use crate::http::handlers;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::current_user))
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route("/users/profile", put(handlers::update_profile))
        .route("/users/:id", get(handlers::get_user))
        .route("/users/:id/follow", post(handlers::toggle_follow))
        .route("/users/:id/posts", get(handlers::list_user_posts))
        .route("/users/:id/followers", get(handlers::list_followers))
        .route("/users/:id/following", get(handlers::list_following))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", get(handlers::list_posts).post(handlers::create_post))
        .route(
            "/posts/:id",
            get(handlers::get_post).delete(handlers::delete_post),
        )
        .route("/posts/:id/like", post(handlers::toggle_like))
        .route("/posts/:id/comment", post(handlers::comment_post))
}

pub fn topics() -> Router<AppState> {
    Router::new()
        .route("/topics", get(handlers::list_topics).post(handlers::create_topic))
        .route("/topics/:id", get(handlers::get_topic))
        .route("/topics/:id/posts", get(handlers::list_topic_posts))
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/unread-count",
            get(handlers::unread_notification_count),
        )
        .route(
            "/notifications/read-all",
            post(handlers::mark_all_notifications_read),
        )
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
}
