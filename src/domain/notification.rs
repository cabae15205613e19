use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::user::UserSummary;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub kind: NotificationKind,
    pub actor: UserSummary,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "like" => Some(Self::Like),
            "comment" => Some(Self::Comment),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Follow => "follow",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub actor_id: i64,
    pub kind: NotificationKind,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
}

impl NewNotification {
    pub fn like(recipient_id: i64, actor_id: i64, post_id: i64) -> Self {
        Self {
            recipient_id,
            actor_id,
            kind: NotificationKind::Like,
            post_id: Some(post_id),
            comment_id: None,
        }
    }

    pub fn comment(recipient_id: i64, actor_id: i64, post_id: i64, comment_id: i64) -> Self {
        Self {
            recipient_id,
            actor_id,
            kind: NotificationKind::Comment,
            post_id: Some(post_id),
            comment_id: Some(comment_id),
        }
    }

    pub fn follow(recipient_id: i64, actor_id: i64) -> Self {
        Self {
            recipient_id,
            actor_id,
            kind: NotificationKind::Follow,
            post_id: None,
            comment_id: None,
        }
    }
}
