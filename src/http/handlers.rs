use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

use crate::app::auth::{AuthGrant, AuthService, CurrentUser};
use crate::app::engagement::EngagementService;
use crate::app::notifications::NotificationService;
use crate::app::posts::PostService;
use crate::app::social::SocialService;
use crate::app::topics::TopicService;
use crate::app::users::UserService;
use crate::domain::engagement::Comment;
use crate::domain::notification::Notification;
use crate::domain::post::{NewPost, Post, PostDetail};
use crate::domain::topic::{NewTopic, Topic};
use crate::domain::user::{ProfileUpdate, ProfileView, UserProfile, UserSummary};
use crate::http::upload::{remove_all, UploadForm};
use crate::http::{ApiResponse, AppError, AuthUser};
use crate::infra::store::{unique_violation, Cursor, TOPICS_TITLE_KEY};
use crate::AppState;

type ApiResult<T> = Result<ApiResponse<T>, AppError>;

const MAX_USERNAME_CHARS: usize = 32;
const MIN_PASSWORD_CHARS: usize = 6;
const MAX_PASSWORD_CHARS: usize = 128;
const MAX_BIO_CHARS: usize = 160;
const MAX_LOCATION_CHARS: usize = 30;
const MAX_POST_CHARS: usize = 2200;
const MAX_COMMENT_CHARS: usize = 1000;
const MAX_TOPIC_TITLE_CHARS: usize = 64;
const MAX_TOPIC_CATEGORY_CHARS: usize = 32;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<Cursor>, AppError> {
    let Some(cursor) = cursor.filter(|cursor| !cursor.is_empty()) else {
        return Ok(None);
    };

    // RFC 3339 timestamps never contain '/', so the last one separates the id.
    let (timestamp, id) = cursor
        .rsplit_once('/')
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = id
        .parse::<i64>()
        .map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<Cursor>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn is_unique_violation_on(err: &anyhow::Error, constraint: &str) -> bool {
    unique_violation(err).map_or(false, |violation| violation.constraint == constraint)
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.store.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            tracing::warn!(error = ?err, "store ping failed");
            "degraded"
        }
    };

    Json(HealthResponse { status })
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(state.store.clone(), state.token_key, state.token_ttl_hours)
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<AuthGrant> {
    let email = payload.email.trim().to_string();
    let username = payload.username.trim().to_string();

    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("A valid email is required"));
    }
    if username.is_empty() || char_len(&username) > MAX_USERNAME_CHARS {
        return Err(AppError::bad_request(
            "Username must be between 1 and 32 characters",
        ));
    }
    let password_len = char_len(&payload.password);
    if !(MIN_PASSWORD_CHARS..=MAX_PASSWORD_CHARS).contains(&password_len) {
        return Err(AppError::bad_request(
            "Password must be between 6 and 128 characters",
        ));
    }

    let grant = auth_service(&state)
        .register(email, username, &payload.password)
        .await
        .map_err(|err| {
            if unique_violation(&err).is_some() {
                return AppError::bad_request("Email or username already in use");
            }
            tracing::error!(error = ?err, "failed to register user");
            AppError::internal()
        })?;

    tracing::info!(user_id = grant.user.id, "user registered");
    Ok(ApiResponse::created(grant))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<AuthGrant> {
    let identifier = payload.email.trim();
    if identifier.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("Email and password are required"));
    }
    if char_len(&payload.password) > MAX_PASSWORD_CHARS {
        return Err(AppError::unauthorized("Invalid email or password"));
    }

    let grant = auth_service(&state)
        .login(identifier, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal()
        })?;

    match grant {
        Some(grant) => Ok(ApiResponse::ok(grant)),
        None => Err(AppError::unauthorized("Invalid email or password")),
    }
}

pub async fn current_user(auth: AuthUser, State(state): State<AppState>) -> ApiResult<CurrentUser> {
    let user = auth_service(&state)
        .current_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = auth.user_id, "failed to fetch current user");
            AppError::internal()
        })?;

    match user {
        Some(user) => Ok(ApiResponse::ok(user)),
        None => Err(AppError::unauthorized("User not found")),
    }
}

pub async fn get_user(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult<UserProfile> {
    let service = UserService::new(state.store.clone());
    let profile = service.get_profile(id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = id, "failed to fetch user");
        AppError::internal()
    })?;

    match profile {
        Some(profile) => Ok(ApiResponse::ok(profile)),
        None => Err(AppError::not_found("User not found")),
    }
}

/// Trims and checks a website, adding `https://` when no scheme is given.
/// An empty value clears the field.
fn normalize_website(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let parsed = Url::parse(&candidate).map_err(|_| AppError::bad_request("Invalid website URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AppError::bad_request("Invalid website URL"));
    }

    Ok(candidate)
}

fn profile_update_from_form(form: &mut UploadForm) -> Result<ProfileUpdate, AppError> {
    let bio = form.take_text("bio").map(|bio| bio.trim().to_string());
    if bio.as_deref().map_or(false, |bio| char_len(bio) > MAX_BIO_CHARS) {
        return Err(AppError::bad_request("Bio must be at most 160 characters"));
    }

    let location = form
        .take_text("location")
        .map(|location| location.trim().to_string());
    if location
        .as_deref()
        .map_or(false, |location| char_len(location) > MAX_LOCATION_CHARS)
    {
        return Err(AppError::bad_request(
            "Location must be at most 30 characters",
        ));
    }

    let website = form
        .take_text("website")
        .map(|website| normalize_website(&website))
        .transpose()?;

    Ok(ProfileUpdate {
        bio,
        location,
        website,
        avatar: None,
        cover_image: None,
    })
}

pub async fn update_profile(
    auth: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<ProfileView> {
    let mut form = UploadForm::collect(&state.storage, multipart, &["avatar", "coverImage"]).await?;

    let mut update = match profile_update_from_form(&mut form) {
        Ok(update) => update,
        Err(err) => {
            form.discard().await;
            return Err(err);
        }
    };
    update.avatar = form.take_file("avatar");
    update.cover_image = form.take_file("coverImage");
    form.discard().await;

    let stored: Vec<String> = update
        .avatar
        .iter()
        .chain(update.cover_image.iter())
        .cloned()
        .collect();

    let service = UserService::new(state.store.clone());
    let profile = match service.update_profile(auth.user_id, update).await {
        Ok(profile) => profile,
        Err(err) => {
            tracing::error!(error = ?err, user_id = auth.user_id, "failed to update profile");
            remove_all(&state.storage, stored).await;
            return Err(AppError::internal());
        }
    };

    match profile {
        Some(profile) => Ok(ApiResponse::ok(profile)),
        None => {
            remove_all(&state.storage, stored).await;
            Err(AppError::not_found("User not found"))
        }
    }
}

#[derive(Serialize)]
pub struct FollowResponse {
    following: bool,
}

pub async fn toggle_follow(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<FollowResponse> {
    if id == auth.user_id {
        return Err(AppError::bad_request("Cannot follow yourself"));
    }

    let service = SocialService::new(state.store.clone());
    let following = service
        .toggle_follow(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, follower_id = auth.user_id, following_id = id, "failed to toggle follow");
            AppError::internal()
        })?;

    match following {
        Some(following) => Ok(ApiResponse::ok(FollowResponse { following })),
        None => Err(AppError::not_found("User not found")),
    }
}

pub async fn list_user_posts(
    Path(id): Path<i64>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> ApiResult<Vec<Post>> {
    let viewer_id = auth.map(|user| user.user_id);

    let service = UserService::new(state.store.clone());
    let posts = service.list_posts(id, viewer_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = id, "failed to list user posts");
        AppError::internal()
    })?;

    match posts {
        Some(posts) => Ok(ApiResponse::ok(posts)),
        None => Err(AppError::not_found("User not found")),
    }
}

pub async fn list_followers(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<Vec<UserSummary>> {
    let service = SocialService::new(state.store.clone());
    let followers = service.followers(id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = id, "failed to list followers");
        AppError::internal()
    })?;

    match followers {
        Some(followers) => Ok(ApiResponse::ok(followers)),
        None => Err(AppError::not_found("User not found")),
    }
}

pub async fn list_following(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<Vec<UserSummary>> {
    let service = SocialService::new(state.store.clone());
    let following = service.following(id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = id, "failed to list following");
        AppError::internal()
    })?;

    match following {
        Some(following) => Ok(ApiResponse::ok(following)),
        None => Err(AppError::not_found("User not found")),
    }
}

pub async fn list_posts(auth: Option<AuthUser>, State(state): State<AppState>) -> ApiResult<Vec<Post>> {
    let viewer_id = auth.map(|user| user.user_id);

    let service = PostService::new(state.store.clone());
    let posts = service.list_posts(viewer_id).await.map_err(|err| {
        tracing::error!(error = ?err, "failed to list posts");
        AppError::internal()
    })?;

    Ok(ApiResponse::ok(posts))
}

fn new_post_from_form(form: &mut UploadForm, author_id: i64) -> Result<NewPost, AppError> {
    let content = form
        .take_text("content")
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    if char_len(&content) > MAX_POST_CHARS {
        return Err(AppError::bad_request(
            "Content must be at most 2200 characters",
        ));
    }
    if content.is_empty() && !form.has_file("image") {
        return Err(AppError::bad_request("Content or image is required"));
    }

    let topic_id = match form.take_text("topicId") {
        Some(raw) if !raw.trim().is_empty() => Some(
            raw.trim()
                .parse::<i64>()
                .map_err(|_| AppError::bad_request("Invalid topicId"))?,
        ),
        _ => None,
    };

    Ok(NewPost {
        author_id,
        content,
        image: form.take_file("image"),
        topic_id,
    })
}

pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Post> {
    let mut form = UploadForm::collect(&state.storage, multipart, &["image"]).await?;

    let new_post = match new_post_from_form(&mut form, auth.user_id) {
        Ok(new_post) => new_post,
        Err(err) => {
            form.discard().await;
            return Err(err);
        }
    };
    form.discard().await;
    let stored: Vec<String> = new_post.image.iter().cloned().collect();

    let service = PostService::new(state.store.clone());
    let post = match service.create_post(new_post).await {
        Ok(post) => post,
        Err(err) => {
            tracing::error!(error = ?err, author_id = auth.user_id, "failed to create post");
            remove_all(&state.storage, stored).await;
            return Err(AppError::internal());
        }
    };

    match post {
        Some(post) => {
            tracing::info!(post_id = post.id, author_id = auth.user_id, "post created");
            Ok(ApiResponse::created(post))
        }
        None => {
            remove_all(&state.storage, stored).await;
            Err(AppError::not_found("Topic not found"))
        }
    }
}

pub async fn get_post(
    Path(id): Path<i64>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> ApiResult<PostDetail> {
    let viewer_id = auth.map(|user| user.user_id);

    let service = PostService::new(state.store.clone());
    let post = service.get_post(id, viewer_id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = id, "failed to fetch post");
        AppError::internal()
    })?;

    match post {
        Some(post) => Ok(ApiResponse::ok(post)),
        None => Err(AppError::not_found("Post not found")),
    }
}

#[derive(Serialize)]
pub struct DeleteResponse {
    id: i64,
    deleted: bool,
}

pub async fn delete_post(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<DeleteResponse> {
    let service = PostService::new(state.store.clone());
    let deleted = service
        .delete_post(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = id, user_id = auth.user_id, "failed to delete post");
            AppError::internal()
        })?;

    if deleted {
        tracing::info!(post_id = id, user_id = auth.user_id, "post deleted");
        Ok(ApiResponse::ok(DeleteResponse { id, deleted }))
    } else {
        Err(AppError::not_found("Post not found"))
    }
}

#[derive(Serialize)]
pub struct LikeResponse {
    liked: bool,
}

pub async fn toggle_like(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<LikeResponse> {
    let service = EngagementService::new(state.store.clone());
    let liked = service
        .toggle_like(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = id, user_id = auth.user_id, "failed to toggle like");
            AppError::internal()
        })?;

    match liked {
        Some(liked) => Ok(ApiResponse::ok(LikeResponse { liked })),
        None => Err(AppError::not_found("Post not found")),
    }
}

#[derive(Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub content: String,
}

pub async fn comment_post(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> ApiResult<Comment> {
    let content = payload.content.trim().to_string();
    if content.is_empty() {
        return Err(AppError::bad_request("Comment content cannot be empty"));
    }
    if char_len(&content) > MAX_COMMENT_CHARS {
        return Err(AppError::bad_request(
            "Comment must be at most 1000 characters",
        ));
    }

    let service = EngagementService::new(state.store.clone());
    let comment = service
        .comment(auth.user_id, id, content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = id, user_id = auth.user_id, "failed to add comment");
            AppError::internal()
        })?;

    match comment {
        Some(comment) => Ok(ApiResponse::created(comment)),
        None => Err(AppError::not_found("Post not found")),
    }
}

#[derive(Deserialize)]
pub struct TopicQuery {
    pub category: Option<String>,
}

pub async fn list_topics(
    State(state): State<AppState>,
    Query(query): Query<TopicQuery>,
) -> ApiResult<Vec<Topic>> {
    let category = query
        .category
        .map(|category| category.trim().to_string())
        .filter(|category| !category.is_empty());

    let service = TopicService::new(state.store.clone());
    let topics = service.list_topics(category).await.map_err(|err| {
        tracing::error!(error = ?err, "failed to list topics");
        AppError::internal()
    })?;

    Ok(ApiResponse::ok(topics))
}

#[derive(Deserialize)]
pub struct CreateTopicRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create_topic(
    _auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateTopicRequest>,
) -> ApiResult<Topic> {
    let title = payload.title.trim().to_string();
    let category = payload.category.trim().to_string();

    if title.is_empty() || char_len(&title) > MAX_TOPIC_TITLE_CHARS {
        return Err(AppError::bad_request(
            "Title must be between 1 and 64 characters",
        ));
    }
    if category.is_empty() || char_len(&category) > MAX_TOPIC_CATEGORY_CHARS {
        return Err(AppError::bad_request(
            "Category must be between 1 and 32 characters",
        ));
    }

    let service = TopicService::new(state.store.clone());
    let topic = service
        .create_topic(NewTopic {
            title,
            category,
            description: payload.description.trim().to_string(),
        })
        .await
        .map_err(|err| {
            if is_unique_violation_on(&err, TOPICS_TITLE_KEY) {
                return AppError::bad_request("Topic title already in use");
            }
            tracing::error!(error = ?err, "failed to create topic");
            AppError::internal()
        })?;

    Ok(ApiResponse::created(topic))
}

pub async fn get_topic(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult<Topic> {
    let service = TopicService::new(state.store.clone());
    let topic = service.get_topic(id).await.map_err(|err| {
        tracing::error!(error = ?err, topic_id = id, "failed to fetch topic");
        AppError::internal()
    })?;

    match topic {
        Some(topic) => Ok(ApiResponse::ok(topic)),
        None => Err(AppError::not_found("Topic not found")),
    }
}

pub async fn list_topic_posts(
    Path(id): Path<i64>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> ApiResult<Vec<Post>> {
    let viewer_id = auth.map(|user| user.user_id);

    let service = TopicService::new(state.store.clone());
    let posts = service.list_posts(id, viewer_id).await.map_err(|err| {
        tracing::error!(error = ?err, topic_id = id, "failed to list topic posts");
        AppError::internal()
    })?;

    match posts {
        Some(posts) => Ok(ApiResponse::ok(posts)),
        None => Err(AppError::not_found("Topic not found")),
    }
}

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<ListResponse<Notification>> {
    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = NotificationService::new(state.store.clone());
    let mut notifications = service
        .list(auth.user_id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = auth.user_id, "failed to list notifications");
            AppError::internal()
        })?;

    let next_cursor = if notifications.len() > limit as usize {
        notifications.truncate(limit as usize);
        notifications
            .last()
            .map(|last| (last.created_at, last.id))
    } else {
        None
    };

    Ok(ApiResponse::ok(ListResponse {
        items: notifications,
        next_cursor: encode_cursor(next_cursor),
    }))
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    count: i64,
}

pub async fn unread_notification_count(
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<UnreadCountResponse> {
    let service = NotificationService::new(state.store.clone());
    let count = service.unread_count(auth.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = auth.user_id, "failed to count notifications");
        AppError::internal()
    })?;

    Ok(ApiResponse::ok(UnreadCountResponse { count }))
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    read: bool,
}

pub async fn mark_notification_read(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<MarkReadResponse> {
    let service = NotificationService::new(state.store.clone());
    let updated = service
        .mark_read(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, notification_id = id, user_id = auth.user_id, "failed to mark notification read");
            AppError::internal()
        })?;

    if updated {
        Ok(ApiResponse::ok(MarkReadResponse { read: true }))
    } else {
        Err(AppError::not_found("Notification not found"))
    }
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    updated: u64,
}

pub async fn mark_all_notifications_read(
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<MarkAllReadResponse> {
    let service = NotificationService::new(state.store.clone());
    let updated = service.mark_all_read(auth.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = auth.user_id, "failed to mark notifications read");
        AppError::internal()
    })?;

    Ok(ApiResponse::ok(MarkAllReadResponse { updated }))
}
