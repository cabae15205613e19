use serde::Serialize;
use time::OffsetDateTime;

/// The identity carried by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub id: i64,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub identity: UserIdentity,
    pub password_hash: String,
}

/// Author block embedded in posts, comments and notifications.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub cover_image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub join_time: OffsetDateTime,
    #[serde(rename = "_count")]
    pub counts: ProfileCounts,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProfileCounts {
    pub following: i64,
    pub followers: i64,
    pub posts: i64,
}

/// Editable slice of a profile, returned after an update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub avatar: Option<String>,
    pub cover_image: Option<String>,
}
