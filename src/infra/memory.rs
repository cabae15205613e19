use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::domain::engagement::Comment;
use crate::domain::notification::{NewNotification, Notification, NotificationKind};
use crate::domain::post::{NewPost, Post, PostCounts, PostDetail, PostFilter};
use crate::domain::topic::{NewTopic, Topic, TopicCounts};
use crate::domain::user::{
    NewUser, ProfileCounts, ProfileUpdate, ProfileView, UserCredentials, UserIdentity,
    UserProfile, UserSummary,
};
use crate::infra::store::{
    Cursor, SocialStore, UniqueViolation, TOPICS_TITLE_KEY, USERS_EMAIL_KEY, USERS_USERNAME_KEY,
};

/// Process-local backend. All tables sit behind one lock, so every
/// check-then-write below runs as a single critical section.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, UserRow>,
    posts: BTreeMap<i64, PostRow>,
    comments: BTreeMap<i64, CommentRow>,
    // (post_id, user_id)
    likes: BTreeMap<(i64, i64), OffsetDateTime>,
    // (follower_id, following_id)
    follows: BTreeMap<(i64, i64), OffsetDateTime>,
    topics: BTreeMap<i64, TopicRow>,
    notifications: BTreeMap<i64, NotificationRow>,
    sequences: Sequences,
}

#[derive(Default)]
struct Sequences {
    users: i64,
    posts: i64,
    comments: i64,
    topics: i64,
    notifications: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

struct UserRow {
    id: i64,
    email: String,
    username: String,
    password_hash: String,
    avatar: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    website: Option<String>,
    cover_image: Option<String>,
    join_time: OffsetDateTime,
}

impl UserRow {
    fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
        }
    }

    fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

struct PostRow {
    id: i64,
    content: String,
    image: Option<String>,
    author_id: i64,
    topic_id: Option<i64>,
    created_at: OffsetDateTime,
}

struct CommentRow {
    id: i64,
    content: String,
    author_id: i64,
    post_id: i64,
    created_at: OffsetDateTime,
}

struct TopicRow {
    id: i64,
    title: String,
    category: String,
    description: String,
    created_at: OffsetDateTime,
}

struct NotificationRow {
    id: i64,
    recipient_id: i64,
    actor_id: i64,
    kind: NotificationKind,
    post_id: Option<i64>,
    comment_id: Option<i64>,
    read_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl Tables {
    fn summary(&self, user_id: i64) -> Option<UserSummary> {
        self.users.get(&user_id).map(UserRow::summary)
    }

    fn post_view(&self, row: &PostRow, viewer_id: Option<i64>) -> Option<Post> {
        let author = self.summary(row.author_id)?;
        let likes = self
            .likes
            .range((row.id, i64::MIN)..=(row.id, i64::MAX))
            .count() as i64;
        let comments = self
            .comments
            .values()
            .filter(|comment| comment.post_id == row.id)
            .count() as i64;
        let liked = viewer_id
            .map(|viewer_id| self.likes.contains_key(&(row.id, viewer_id)))
            .unwrap_or(false);

        Some(Post {
            id: row.id,
            content: row.content.clone(),
            image: row.image.clone(),
            author_id: row.author_id,
            topic_id: row.topic_id,
            created_at: row.created_at,
            author,
            counts: PostCounts { comments, likes },
            liked,
        })
    }

    fn comment_view(&self, row: &CommentRow) -> Option<Comment> {
        Some(Comment {
            id: row.id,
            content: row.content.clone(),
            author_id: row.author_id,
            post_id: row.post_id,
            created_at: row.created_at,
            author: self.summary(row.author_id)?,
        })
    }

    fn topic_view(&self, row: &TopicRow) -> Topic {
        let posts = self
            .posts
            .values()
            .filter(|post| post.topic_id == Some(row.id))
            .count() as i64;
        Topic {
            id: row.id,
            title: row.title.clone(),
            category: row.category.clone(),
            description: row.description.clone(),
            created_at: row.created_at,
            counts: TopicCounts { posts },
        }
    }

    fn follow_edges<F>(&self, select: F) -> Vec<UserSummary>
    where
        F: Fn(&(i64, i64)) -> Option<i64>,
    {
        let mut edges: Vec<(OffsetDateTime, i64)> = self
            .follows
            .iter()
            .filter_map(|(key, created_at)| select(key).map(|id| (*created_at, id)))
            .collect();
        edges.sort_by(|a, b| b.cmp(a));
        edges
            .into_iter()
            .filter_map(|(_, id)| self.summary(id))
            .collect()
    }

    fn push_notification(&mut self, notification: NewNotification) {
        let id = next_id(&mut self.sequences.notifications);
        self.notifications.insert(
            id,
            NotificationRow {
                id,
                recipient_id: notification.recipient_id,
                actor_id: notification.actor_id,
                kind: notification.kind,
                post_id: notification.post_id,
                comment_id: notification.comment_id,
                read_at: None,
                created_at: OffsetDateTime::now_utc(),
            },
        );
    }

    /// Keeps the notification in step with a toggled like or follow.
    /// Self-actions never notify.
    fn sync_toggle_notification(&mut self, notification: NewNotification, on: bool) {
        if notification.recipient_id == notification.actor_id {
            return;
        }
        if on {
            self.push_notification(notification);
        } else {
            self.notifications.retain(|_, row| {
                !(row.recipient_id == notification.recipient_id
                    && row.actor_id == notification.actor_id
                    && row.kind == notification.kind
                    && row.post_id == notification.post_id)
            });
        }
    }
}

fn newest_first(a: (OffsetDateTime, i64), b: (OffsetDateTime, i64)) -> std::cmp::Ordering {
    b.cmp(&a)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills an empty store with the demo account, post and topic.
    pub async fn seed_demo(&self, password_hash: String) -> Result<()> {
        let user = self
            .insert_user(NewUser {
                email: "test@example.com".to_string(),
                username: "testuser".to_string(),
                password_hash,
            })
            .await?;
        self.update_profile(
            user.id,
            ProfileUpdate {
                bio: Some("Test user".to_string()),
                location: Some("China".to_string()),
                website: Some("http://example.com".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .await?;
        let topic = self
            .insert_topic(NewTopic {
                title: "Test topic".to_string(),
                category: "Test".to_string(),
                description: "This is a test topic".to_string(),
            })
            .await?;
        self.insert_post(NewPost {
            author_id: user.id,
            content: "This is a test post".to_string(),
            image: None,
            topic_id: Some(topic.id),
        })
        .await?;
        Ok(())
    }
}

#[axum::async_trait]
impl SocialStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> Result<UserIdentity> {
        let mut tables = self.tables.write().await;

        if tables.users.values().any(|row| row.email == user.email) {
            return Err(UniqueViolation::new(USERS_EMAIL_KEY).into());
        }
        if tables.users.values().any(|row| row.username == user.username) {
            return Err(UniqueViolation::new(USERS_USERNAME_KEY).into());
        }

        let id = next_id(&mut tables.sequences.users);
        let row = UserRow {
            id,
            email: user.email,
            username: user.username,
            password_hash: user.password_hash,
            avatar: None,
            bio: None,
            location: None,
            website: None,
            cover_image: None,
            join_time: OffsetDateTime::now_utc(),
        };
        let identity = row.identity();
        tables.users.insert(id, row);
        Ok(identity)
    }

    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>> {
        let tables = self.tables.read().await;
        let row = tables
            .users
            .values()
            .find(|row| row.email == identifier)
            .or_else(|| tables.users.values().find(|row| row.username == identifier));

        Ok(row.map(|row| UserCredentials {
            identity: row.identity(),
            password_hash: row.password_hash.clone(),
        }))
    }

    async fn find_identity(&self, user_id: i64) -> Result<Option<UserIdentity>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&user_id).map(UserRow::identity))
    }

    async fn find_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let tables = self.tables.read().await;
        let Some(row) = tables.users.get(&user_id) else {
            return Ok(None);
        };

        let following = tables
            .follows
            .keys()
            .filter(|(follower, _)| *follower == user_id)
            .count() as i64;
        let followers = tables
            .follows
            .keys()
            .filter(|(_, following)| *following == user_id)
            .count() as i64;
        let posts = tables
            .posts
            .values()
            .filter(|post| post.author_id == user_id)
            .count() as i64;

        Ok(Some(UserProfile {
            id: row.id,
            username: row.username.clone(),
            avatar: row.avatar.clone(),
            bio: row.bio.clone(),
            location: row.location.clone(),
            website: row.website.clone(),
            cover_image: row.cover_image.clone(),
            join_time: row.join_time,
            counts: ProfileCounts {
                following,
                followers,
                posts,
            },
        }))
    }

    async fn update_profile(
        &self,
        user_id: i64,
        update: ProfileUpdate,
    ) -> Result<Option<ProfileView>> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.users.get_mut(&user_id) else {
            return Ok(None);
        };

        if update.bio.is_some() {
            row.bio = update.bio;
        }
        if update.location.is_some() {
            row.location = update.location;
        }
        if update.website.is_some() {
            row.website = update.website;
        }
        if update.avatar.is_some() {
            row.avatar = update.avatar;
        }
        if update.cover_image.is_some() {
            row.cover_image = update.cover_image;
        }

        Ok(Some(ProfileView {
            id: row.id,
            username: row.username.clone(),
            avatar: row.avatar.clone(),
            bio: row.bio.clone(),
            location: row.location.clone(),
            website: row.website.clone(),
            cover_image: row.cover_image.clone(),
        }))
    }

    async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<Option<bool>> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&following_id) || follower_id == following_id {
            return Ok(None);
        }

        let key = (follower_id, following_id);
        let following = tables.follows.remove(&key).is_none();
        if following {
            tables.follows.insert(key, OffsetDateTime::now_utc());
        }
        tables.sync_toggle_notification(NewNotification::follow(following_id, follower_id), following);
        Ok(Some(following))
    }

    async fn list_followers(&self, user_id: i64) -> Result<Vec<UserSummary>> {
        let tables = self.tables.read().await;
        Ok(tables.follow_edges(|&(follower, following)| {
            (following == user_id).then_some(follower)
        }))
    }

    async fn list_following(&self, user_id: i64) -> Result<Vec<UserSummary>> {
        let tables = self.tables.read().await;
        Ok(tables.follow_edges(|&(follower, following)| {
            (follower == user_id).then_some(following)
        }))
    }

    async fn insert_post(&self, post: NewPost) -> Result<Post> {
        let mut tables = self.tables.write().await;
        let id = next_id(&mut tables.sequences.posts);
        let row = PostRow {
            id,
            content: post.content,
            image: post.image,
            author_id: post.author_id,
            topic_id: post.topic_id,
            created_at: OffsetDateTime::now_utc(),
        };
        let view = tables
            .post_view(&row, None)
            .ok_or_else(|| anyhow::anyhow!("post author {} does not exist", row.author_id))?;
        tables.posts.insert(id, row);
        Ok(view)
    }

    async fn list_posts(&self, filter: PostFilter, viewer_id: Option<i64>) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|row| filter.matches(row.author_id, row.topic_id))
            .filter_map(|row| tables.post_view(row, viewer_id))
            .collect();
        posts.sort_by(|a, b| newest_first((a.created_at, a.id), (b.created_at, b.id)));
        Ok(posts)
    }

    async fn find_post(&self, post_id: i64, viewer_id: Option<i64>) -> Result<Option<PostDetail>> {
        let tables = self.tables.read().await;
        let Some(post) = tables
            .posts
            .get(&post_id)
            .and_then(|row| tables.post_view(row, viewer_id))
        else {
            return Ok(None);
        };

        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|row| row.post_id == post_id)
            .filter_map(|row| tables.comment_view(row))
            .collect();
        comments.sort_by(|a, b| newest_first((a.created_at, a.id), (b.created_at, b.id)));

        Ok(Some(PostDetail { post, comments }))
    }

    async fn post_author(&self, post_id: i64) -> Result<Option<i64>> {
        let tables = self.tables.read().await;
        Ok(tables.posts.get(&post_id).map(|row| row.author_id))
    }

    async fn delete_post(&self, post_id: i64, author_id: i64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.posts.get(&post_id) {
            Some(row) if row.author_id == author_id => {}
            _ => return Ok(false),
        }

        tables.posts.remove(&post_id);
        tables.comments.retain(|_, row| row.post_id != post_id);
        tables.likes.retain(|(liked_post, _), _| *liked_post != post_id);
        tables
            .notifications
            .retain(|_, row| row.post_id != Some(post_id));
        Ok(true)
    }

    async fn toggle_like(&self, user_id: i64, post_id: i64) -> Result<Option<bool>> {
        let mut tables = self.tables.write().await;
        let Some(author_id) = tables.posts.get(&post_id).map(|row| row.author_id) else {
            return Ok(None);
        };

        let key = (post_id, user_id);
        let liked = tables.likes.remove(&key).is_none();
        if liked {
            tables.likes.insert(key, OffsetDateTime::now_utc());
        }
        tables.sync_toggle_notification(NewNotification::like(author_id, user_id, post_id), liked);
        Ok(Some(liked))
    }

    async fn insert_comment(
        &self,
        author_id: i64,
        post_id: i64,
        content: String,
    ) -> Result<Option<Comment>> {
        let mut tables = self.tables.write().await;
        if !tables.posts.contains_key(&post_id) {
            return Ok(None);
        }

        let id = next_id(&mut tables.sequences.comments);
        let row = CommentRow {
            id,
            content,
            author_id,
            post_id,
            created_at: OffsetDateTime::now_utc(),
        };
        let view = tables
            .comment_view(&row)
            .ok_or_else(|| anyhow::anyhow!("comment author {} does not exist", author_id))?;
        tables.comments.insert(id, row);
        Ok(Some(view))
    }

    async fn insert_topic(&self, topic: NewTopic) -> Result<Topic> {
        let mut tables = self.tables.write().await;
        if tables.topics.values().any(|row| row.title == topic.title) {
            return Err(UniqueViolation::new(TOPICS_TITLE_KEY).into());
        }

        let id = next_id(&mut tables.sequences.topics);
        let row = TopicRow {
            id,
            title: topic.title,
            category: topic.category,
            description: topic.description,
            created_at: OffsetDateTime::now_utc(),
        };
        let view = tables.topic_view(&row);
        tables.topics.insert(id, row);
        Ok(view)
    }

    async fn list_topics(&self, category: Option<String>) -> Result<Vec<Topic>> {
        let tables = self.tables.read().await;
        let mut topics: Vec<Topic> = tables
            .topics
            .values()
            .filter(|row| category.as_deref().map_or(true, |c| row.category == c))
            .map(|row| tables.topic_view(row))
            .collect();
        topics.sort_by(|a, b| b.counts.posts.cmp(&a.counts.posts).then(a.id.cmp(&b.id)));
        Ok(topics)
    }

    async fn find_topic(&self, topic_id: i64) -> Result<Option<Topic>> {
        let tables = self.tables.read().await;
        Ok(tables.topics.get(&topic_id).map(|row| tables.topic_view(row)))
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<()> {
        self.tables.write().await.push_notification(notification);
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: i64,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&NotificationRow> = tables
            .notifications
            .values()
            .filter(|row| row.recipient_id == user_id)
            .filter(|row| cursor.map_or(true, |position| (row.created_at, row.id) < position))
            .collect();
        rows.sort_by(|a, b| newest_first((a.created_at, a.id), (b.created_at, b.id)));

        let notifications = rows
            .into_iter()
            .filter_map(|row| {
                Some(Notification {
                    id: row.id,
                    kind: row.kind,
                    actor: tables.summary(row.actor_id)?,
                    post_id: row.post_id,
                    comment_id: row.comment_id,
                    read: row.read_at.is_some(),
                    created_at: row.created_at,
                })
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok(notifications)
    }

    async fn mark_notification_read(&self, notification_id: i64, user_id: i64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.notifications.get_mut(&notification_id) {
            Some(row) if row.recipient_id == user_id => {
                row.read_at.get_or_insert_with(OffsetDateTime::now_utc);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: i64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let now = OffsetDateTime::now_utc();
        let mut updated = 0;
        for row in tables.notifications.values_mut() {
            if row.recipient_id == user_id && row.read_at.is_none() {
                row.read_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn unread_notification_count(&self, user_id: i64) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .values()
            .filter(|row| row.recipient_id == user_id && row.read_at.is_none())
            .count() as i64)
    }
}
