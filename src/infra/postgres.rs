use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};

use crate::domain::engagement::Comment;
use crate::domain::notification::{NewNotification, Notification, NotificationKind};
use crate::domain::post::{NewPost, Post, PostCounts, PostDetail, PostFilter};
use crate::domain::topic::{NewTopic, Topic, TopicCounts};
use crate::domain::user::{
    NewUser, ProfileCounts, ProfileUpdate, ProfileView, UserCredentials, UserIdentity,
    UserProfile, UserSummary,
};
use crate::infra::db::Db;
use crate::infra::store::{Cursor, SocialStore, UniqueViolation};

/// Relational backend. Uniqueness, cascades and toggle serialization are
/// delegated to Postgres constraints and row locks.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

const POST_SELECT: &str = "SELECT p.id, p.content, p.image, p.author_id, p.topic_id, p.created_at, \
            u.username AS author_username, u.avatar AS author_avatar, \
            (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count, \
            (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count, \
            EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = $1) AS liked \
     FROM posts p \
     JOIN users u ON u.id = p.author_id";

#[axum::async_trait]
impl SocialStore for PgStore {
    async fn ping(&self) -> Result<()> {
        self.db.ping().await
    }

    async fn insert_user(&self, user: NewUser) -> Result<UserIdentity> {
        let row = sqlx::query(
            "INSERT INTO users (email, username, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING id, email, username",
        )
        .bind(user.email)
        .bind(user.username)
        .bind(user.password_hash)
        .fetch_one(self.db.pool())
        .await
        .map_err(map_write_error)?;

        Ok(UserIdentity {
            id: row.get("id"),
            email: row.get("email"),
            username: row.get("username"),
        })
    }

    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query(
            "SELECT id, email, username, password_hash \
             FROM users WHERE email = $1 OR username = $1 \
             ORDER BY (email = $1) DESC \
             LIMIT 1",
        )
        .bind(identifier)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| UserCredentials {
            identity: UserIdentity {
                id: row.get("id"),
                email: row.get("email"),
                username: row.get("username"),
            },
            password_hash: row.get("password_hash"),
        }))
    }

    async fn find_identity(&self, user_id: i64) -> Result<Option<UserIdentity>> {
        let row = sqlx::query("SELECT id, email, username FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| UserIdentity {
            id: row.get("id"),
            email: row.get("email"),
            username: row.get("username"),
        }))
    }

    async fn find_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.avatar, u.bio, u.location, u.website, u.cover_image, \
                    u.join_time, \
                    (SELECT COUNT(*) FROM follows WHERE follower_id = u.id) AS following_count, \
                    (SELECT COUNT(*) FROM follows WHERE following_id = u.id) AS followers_count, \
                    (SELECT COUNT(*) FROM posts WHERE author_id = u.id) AS posts_count \
             FROM users u WHERE u.id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| UserProfile {
            id: row.get("id"),
            username: row.get("username"),
            avatar: row.get("avatar"),
            bio: row.get("bio"),
            location: row.get("location"),
            website: row.get("website"),
            cover_image: row.get("cover_image"),
            join_time: row.get("join_time"),
            counts: ProfileCounts {
                following: row.get("following_count"),
                followers: row.get("followers_count"),
                posts: row.get("posts_count"),
            },
        }))
    }

    async fn update_profile(
        &self,
        user_id: i64,
        update: ProfileUpdate,
    ) -> Result<Option<ProfileView>> {
        let row = sqlx::query(
            "UPDATE users \
             SET bio = COALESCE($2, bio), \
                 location = COALESCE($3, location), \
                 website = COALESCE($4, website), \
                 avatar = COALESCE($5, avatar), \
                 cover_image = COALESCE($6, cover_image) \
             WHERE id = $1 \
             RETURNING id, username, avatar, bio, location, website, cover_image",
        )
        .bind(user_id)
        .bind(update.bio)
        .bind(update.location)
        .bind(update.website)
        .bind(update.avatar)
        .bind(update.cover_image)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| ProfileView {
            id: row.get("id"),
            username: row.get("username"),
            avatar: row.get("avatar"),
            bio: row.get("bio"),
            location: row.get("location"),
            website: row.get("website"),
            cover_image: row.get("cover_image"),
        }))
    }

    async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<Option<bool>> {
        let mut tx = self.db.pool().begin().await?;

        let target: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(following_id)
            .fetch_optional(&mut *tx)
            .await?;
        if target.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let following: bool = sqlx::query_scalar(
            "WITH removed AS ( \
                DELETE FROM follows WHERE follower_id = $1 AND following_id = $2 \
                RETURNING follower_id \
             ), added AS ( \
                INSERT INTO follows (follower_id, following_id) \
                SELECT $1, $2 WHERE NOT EXISTS (SELECT 1 FROM removed) \
                ON CONFLICT DO NOTHING \
                RETURNING follower_id \
             ) \
             SELECT EXISTS (SELECT 1 FROM added)",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(&mut *tx)
        .await?;

        sync_toggle_notification(
            &mut tx,
            &NewNotification::follow(following_id, follower_id),
            following,
        )
        .await?;

        tx.commit().await?;
        Ok(Some(following))
    }

    async fn list_followers(&self, user_id: i64) -> Result<Vec<UserSummary>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.avatar \
             FROM follows f \
             JOIN users u ON u.id = f.follower_id \
             WHERE f.following_id = $1 \
             ORDER BY f.created_at DESC, u.id DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn list_following(&self, user_id: i64) -> Result<Vec<UserSummary>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.avatar \
             FROM follows f \
             JOIN users u ON u.id = f.following_id \
             WHERE f.follower_id = $1 \
             ORDER BY f.created_at DESC, u.id DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn insert_post(&self, post: NewPost) -> Result<Post> {
        let row = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO posts (author_id, content, image, topic_id) \
                VALUES ($1, $2, $3, $4) \
                RETURNING id, content, image, author_id, topic_id, created_at \
             ) \
             SELECT p.*, u.username AS author_username, u.avatar AS author_avatar, \
                    0::BIGINT AS comment_count, 0::BIGINT AS like_count, FALSE AS liked \
             FROM inserted p \
             JOIN users u ON u.id = p.author_id",
        )
        .bind(post.author_id)
        .bind(post.content)
        .bind(post.image)
        .bind(post.topic_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(post_from_row(&row))
    }

    async fn list_posts(&self, filter: PostFilter, viewer_id: Option<i64>) -> Result<Vec<Post>> {
        let sql = format!(
            "{} \
             WHERE ($2::BIGINT IS NULL OR p.author_id = $2) \
               AND ($3::BIGINT IS NULL OR p.topic_id = $3) \
             ORDER BY p.created_at DESC, p.id DESC",
            POST_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(filter.author_id)
            .bind(filter.topic_id)
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn find_post(&self, post_id: i64, viewer_id: Option<i64>) -> Result<Option<PostDetail>> {
        let sql = format!("{} WHERE p.id = $2", POST_SELECT);
        let row = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;

        let post = match row {
            Some(row) => post_from_row(&row),
            None => return Ok(None),
        };

        let rows = sqlx::query(
            "SELECT c.id, c.content, c.author_id, c.post_id, c.created_at, \
                    u.username AS author_username, u.avatar AS author_avatar \
             FROM comments c \
             JOIN users u ON u.id = c.author_id \
             WHERE c.post_id = $1 \
             ORDER BY c.created_at DESC, c.id DESC",
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;

        let comments = rows.iter().map(comment_from_row).collect();
        Ok(Some(PostDetail { post, comments }))
    }

    async fn post_author(&self, post_id: i64) -> Result<Option<i64>> {
        let author_id = sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(author_id)
    }

    async fn delete_post(&self, post_id: i64, author_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND author_id = $2")
            .bind(post_id)
            .bind(author_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn toggle_like(&self, user_id: i64, post_id: i64) -> Result<Option<bool>> {
        let mut tx = self.db.pool().begin().await?;

        let author_id: Option<i64> =
            sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1 FOR UPDATE")
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(author_id) = author_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let liked: bool = sqlx::query_scalar(
            "WITH removed AS ( \
                DELETE FROM likes WHERE user_id = $1 AND post_id = $2 \
                RETURNING user_id \
             ), added AS ( \
                INSERT INTO likes (user_id, post_id) \
                SELECT $1, $2 WHERE NOT EXISTS (SELECT 1 FROM removed) \
                ON CONFLICT DO NOTHING \
                RETURNING user_id \
             ) \
             SELECT EXISTS (SELECT 1 FROM added)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;

        sync_toggle_notification(
            &mut tx,
            &NewNotification::like(author_id, user_id, post_id),
            liked,
        )
        .await?;

        tx.commit().await?;
        Ok(Some(liked))
    }

    async fn insert_comment(
        &self,
        author_id: i64,
        post_id: i64,
        content: String,
    ) -> Result<Option<Comment>> {
        let row = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO comments (author_id, post_id, content) \
                SELECT $1, $2, $3 WHERE EXISTS (SELECT 1 FROM posts WHERE id = $2) \
                RETURNING id, content, author_id, post_id, created_at \
             ) \
             SELECT c.*, u.username AS author_username, u.avatar AS author_avatar \
             FROM inserted c \
             JOIN users u ON u.id = c.author_id",
        )
        .bind(author_id)
        .bind(post_id)
        .bind(content)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(comment_from_row))
    }

    async fn insert_topic(&self, topic: NewTopic) -> Result<Topic> {
        let row = sqlx::query(
            "INSERT INTO topics (title, category, description) \
             VALUES ($1, $2, $3) \
             RETURNING id, title, category, description, created_at, 0::BIGINT AS post_count",
        )
        .bind(topic.title)
        .bind(topic.category)
        .bind(topic.description)
        .fetch_one(self.db.pool())
        .await
        .map_err(map_write_error)?;

        Ok(topic_from_row(&row))
    }

    async fn list_topics(&self, category: Option<String>) -> Result<Vec<Topic>> {
        let rows = sqlx::query(
            "SELECT t.id, t.title, t.category, t.description, t.created_at, \
                    (SELECT COUNT(*) FROM posts p WHERE p.topic_id = t.id) AS post_count \
             FROM topics t \
             WHERE ($1::TEXT IS NULL OR t.category = $1) \
             ORDER BY post_count DESC, t.id ASC",
        )
        .bind(category)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(topic_from_row).collect())
    }

    async fn find_topic(&self, topic_id: i64) -> Result<Option<Topic>> {
        let row = sqlx::query(
            "SELECT t.id, t.title, t.category, t.description, t.created_at, \
                    (SELECT COUNT(*) FROM posts p WHERE p.topic_id = t.id) AS post_count \
             FROM topics t WHERE t.id = $1",
        )
        .bind(topic_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(topic_from_row))
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (recipient_id, actor_id, kind, post_id, comment_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(notification.recipient_id)
        .bind(notification.actor_id)
        .bind(notification.kind.as_db())
        .bind(notification.post_id)
        .bind(notification.comment_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: i64,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = match cursor {
            Some((created_at, notification_id)) => {
                sqlx::query(
                    "SELECT n.id, n.kind, n.post_id, n.comment_id, n.read_at, n.created_at, \
                            u.id AS actor_id, u.username AS actor_username, u.avatar AS actor_avatar \
                     FROM notifications n \
                     JOIN users u ON u.id = n.actor_id \
                     WHERE n.recipient_id = $1 \
                       AND (n.created_at < $2 OR (n.created_at = $2 AND n.id < $3)) \
                     ORDER BY n.created_at DESC, n.id DESC \
                     LIMIT $4",
                )
                .bind(user_id)
                .bind(created_at)
                .bind(notification_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT n.id, n.kind, n.post_id, n.comment_id, n.read_at, n.created_at, \
                            u.id AS actor_id, u.username AS actor_username, u.avatar AS actor_avatar \
                     FROM notifications n \
                     JOIN users u ON u.id = n.actor_id \
                     WHERE n.recipient_id = $1 \
                     ORDER BY n.created_at DESC, n.id DESC \
                     LIMIT $2",
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get("kind");
            let kind = NotificationKind::from_db(&kind)
                .ok_or_else(|| anyhow!("unknown notification kind: {}", kind))?;
            let read_at: Option<time::OffsetDateTime> = row.get("read_at");
            notifications.push(Notification {
                id: row.get("id"),
                kind,
                actor: UserSummary {
                    id: row.get("actor_id"),
                    username: row.get("actor_username"),
                    avatar: row.get("actor_avatar"),
                },
                post_id: row.get("post_id"),
                comment_id: row.get("comment_id"),
                read: read_at.is_some(),
                created_at: row.get("created_at"),
            });
        }

        Ok(notifications)
    }

    async fn mark_notification_read(&self, notification_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET read_at = COALESCE(read_at, now()) \
             WHERE id = $1 AND recipient_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = now() \
             WHERE recipient_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn unread_notification_count(&self, user_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(count)
    }
}

/// Writes or removes the notification for a toggled like or follow inside
/// the toggle's transaction. Self-actions never notify.
async fn sync_toggle_notification(
    tx: &mut Transaction<'_, Postgres>,
    notification: &NewNotification,
    on: bool,
) -> Result<()> {
    if notification.recipient_id == notification.actor_id {
        return Ok(());
    }

    if on {
        sqlx::query(
            "INSERT INTO notifications (recipient_id, actor_id, kind, post_id, comment_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(notification.recipient_id)
        .bind(notification.actor_id)
        .bind(notification.kind.as_db())
        .bind(notification.post_id)
        .bind(notification.comment_id)
        .execute(&mut **tx)
        .await?;
    } else {
        sqlx::query(
            "DELETE FROM notifications \
             WHERE recipient_id = $1 AND actor_id = $2 AND kind = $3 \
               AND post_id IS NOT DISTINCT FROM $4",
        )
        .bind(notification.recipient_id)
        .bind(notification.actor_id)
        .bind(notification.kind.as_db())
        .bind(notification.post_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn map_write_error(err: sqlx::Error) -> anyhow::Error {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or_default();
            return UniqueViolation::new(constraint).into();
        }
    }
    err.into()
}

fn summary_from_row(row: &PgRow) -> UserSummary {
    UserSummary {
        id: row.get("id"),
        username: row.get("username"),
        avatar: row.get("avatar"),
    }
}

fn post_from_row(row: &PgRow) -> Post {
    Post {
        id: row.get("id"),
        content: row.get("content"),
        image: row.get("image"),
        author_id: row.get("author_id"),
        topic_id: row.get("topic_id"),
        created_at: row.get("created_at"),
        author: UserSummary {
            id: row.get("author_id"),
            username: row.get("author_username"),
            avatar: row.get("author_avatar"),
        },
        counts: PostCounts {
            comments: row.get("comment_count"),
            likes: row.get("like_count"),
        },
        liked: row.get("liked"),
    }
}

fn comment_from_row(row: &PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        content: row.get("content"),
        author_id: row.get("author_id"),
        post_id: row.get("post_id"),
        created_at: row.get("created_at"),
        author: UserSummary {
            id: row.get("author_id"),
            username: row.get("author_username"),
            avatar: row.get("author_avatar"),
        },
    }
}

fn topic_from_row(row: &PgRow) -> Topic {
    Topic {
        id: row.get("id"),
        title: row.get("title"),
        category: row.get("category"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        counts: TopicCounts {
            posts: row.get("post_count"),
        },
    }
}
