use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use time::OffsetDateTime;

use crate::domain::engagement::Comment;
use crate::domain::notification::{NewNotification, Notification};
use crate::domain::post::{NewPost, Post, PostDetail, PostFilter};
use crate::domain::topic::{NewTopic, Topic};
use crate::domain::user::{
    NewUser, ProfileUpdate, ProfileView, UserCredentials, UserIdentity, UserProfile, UserSummary,
};

/// Shared handle to whichever backend the process was started with.
pub type Store = Arc<dyn SocialStore>;

/// Keyset position for newest-first listings.
pub type Cursor = (OffsetDateTime, i64);

/// Persistence seam shared by the Postgres and in-memory backends.
///
/// Missing rows are reported as `None`/`false`; uniqueness conflicts as a
/// [`UniqueViolation`] inside the returned error.
#[axum::async_trait]
pub trait SocialStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn insert_user(&self, user: NewUser) -> Result<UserIdentity>;

    /// Looks a user up by email or username.
    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>>;

    async fn find_identity(&self, user_id: i64) -> Result<Option<UserIdentity>>;

    async fn find_profile(&self, user_id: i64) -> Result<Option<UserProfile>>;

    async fn update_profile(
        &self,
        user_id: i64,
        update: ProfileUpdate,
    ) -> Result<Option<ProfileView>>;

    /// Flips the follow edge and, in the same critical section, records or
    /// removes the follow notification. `None` when the followed user does
    /// not exist.
    async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<Option<bool>>;

    async fn list_followers(&self, user_id: i64) -> Result<Vec<UserSummary>>;

    async fn list_following(&self, user_id: i64) -> Result<Vec<UserSummary>>;

    async fn insert_post(&self, post: NewPost) -> Result<Post>;

    async fn list_posts(&self, filter: PostFilter, viewer_id: Option<i64>) -> Result<Vec<Post>>;

    async fn find_post(&self, post_id: i64, viewer_id: Option<i64>) -> Result<Option<PostDetail>>;

    async fn post_author(&self, post_id: i64) -> Result<Option<i64>>;

    async fn delete_post(&self, post_id: i64, author_id: i64) -> Result<bool>;

    /// Flips the like and, in the same critical section, records or removes
    /// the author's like notification. `None` when the post does not exist.
    async fn toggle_like(&self, user_id: i64, post_id: i64) -> Result<Option<bool>>;

    /// `None` when the post does not exist.
    async fn insert_comment(
        &self,
        author_id: i64,
        post_id: i64,
        content: String,
    ) -> Result<Option<Comment>>;

    async fn insert_topic(&self, topic: NewTopic) -> Result<Topic>;

    async fn list_topics(&self, category: Option<String>) -> Result<Vec<Topic>>;

    async fn find_topic(&self, topic_id: i64) -> Result<Option<Topic>>;

    async fn insert_notification(&self, notification: NewNotification) -> Result<()>;

    async fn list_notifications(
        &self,
        user_id: i64,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// Idempotent. `false` when the notification does not belong to the user.
    async fn mark_notification_read(&self, notification_id: i64, user_id: i64) -> Result<bool>;

    async fn mark_all_notifications_read(&self, user_id: i64) -> Result<u64>;

    async fn unread_notification_count(&self, user_id: i64) -> Result<i64>;
}

pub const USERS_EMAIL_KEY: &str = "users_email_key";
pub const USERS_USERNAME_KEY: &str = "users_username_key";
pub const TOPICS_TITLE_KEY: &str = "topics_title_key";

/// A write hit a uniqueness constraint.
#[derive(Debug, Clone)]
pub struct UniqueViolation {
    pub constraint: String,
}

impl UniqueViolation {
    pub fn new(constraint: impl Into<String>) -> Self {
        Self {
            constraint: constraint.into(),
        }
    }
}

impl fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unique constraint violated: {}", self.constraint)
    }
}

impl std::error::Error for UniqueViolation {}

/// Finds a [`UniqueViolation`] anywhere in an error returned by a store.
pub fn unique_violation(err: &anyhow::Error) -> Option<&UniqueViolation> {
    err.downcast_ref::<UniqueViolation>()
}
