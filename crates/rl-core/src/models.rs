//! # Domain Models
//!
//! These structs represent the documents stored by Rapline.
//! Identifiers are UUID v7 so they sort by creation time. Serde names follow
//! the field names the existing mobile client already sends and reads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Logical database every collection lives in.
pub const DATABASE_NAME: &str = "its-a-rap-db";

/// The fixed set of collections. Names are never client-configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    Posts,
    Comments,
    RecordingReplies,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Users,
        Collection::Posts,
        Collection::Comments,
        Collection::RecordingReplies,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "iposts",
            Collection::Comments => "treply",
            Collection::RecordingReplies => "lreply",
        }
    }
}

/// Opaque document identifier.
///
/// Travels as its hyphenated string form; decoding a malformed string fails,
/// so a `DocId` held in memory is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(Uuid);

impl DocId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses a raw reference supplied by a caller.
    pub fn parse(raw: &str) -> Result<Self> {
        raw.parse()
    }
}

impl FromStr for DocId {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| AppError::ValidationError(format!("malformed identifier {raw:?}")))
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A registered account as stored in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "user_ID")]
    pub id: DocId,
    #[serde(rename = "user_Name")]
    pub name: String,
    /// Argon2 PHC string. Never leaves the server; see [`UserProfile`].
    #[serde(rename = "user_Pass")]
    pub password_hash: String,
    #[serde(rename = "avatar_URL", default)]
    pub avatar_url: String,
    #[serde(rename = "user_Songs", default)]
    pub songs: Vec<String>,
    #[serde(rename = "user_comments", default)]
    pub comments: Vec<String>,
    #[serde(rename = "user_recordings", default)]
    pub recordings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Builds the stored document for a registration. The caller supplies the
    /// already-hashed password.
    pub fn register(new: NewUser, password_hash: String) -> Self {
        Self {
            id: DocId::generate(),
            name: new.name,
            password_hash,
            avatar_url: new.avatar_url,
            songs: new.songs,
            comments: new.comments,
            recordings: new.recordings,
            created_at: Utc::now(),
        }
    }
}

/// Registration body for `POST /user`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    #[serde(rename = "user_Name", default)]
    pub name: String,
    #[serde(rename = "user_Pass", default)]
    pub password: String,
    #[serde(rename = "avatar_URL", default)]
    pub avatar_url: String,
    #[serde(rename = "user_Songs", default)]
    pub songs: Vec<String>,
    #[serde(rename = "user_comments", default)]
    pub comments: Vec<String>,
    #[serde(rename = "user_recordings", default)]
    pub recordings: Vec<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        require("user_Name", &self.name)?;
        require("user_Pass", &self.password)
    }
}

/// Login body for `POST /login`.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(rename = "user_Name", default)]
    pub name: String,
    #[serde(rename = "user_Pass", default)]
    pub password: String,
}

/// The outward shape of a [`User`]: everything except the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "user_ID")]
    pub id: DocId,
    #[serde(rename = "user_Name")]
    pub name: String,
    #[serde(rename = "avatar_URL")]
    pub avatar_url: String,
    #[serde(rename = "user_Songs")]
    pub songs: Vec<String>,
    #[serde(rename = "user_comments")]
    pub comments: Vec<String>,
    #[serde(rename = "user_recordings")]
    pub recordings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            avatar_url: user.avatar_url,
            songs: user.songs,
            comments: user.comments,
            recordings: user.recordings,
            created_at: user.created_at,
        }
    }
}

/// A published track, stored in the `iposts` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "post_Id")]
    pub id: DocId,
    #[serde(rename = "user_Id")]
    pub owner_id: DocId,
    #[serde(rename = "post_Title")]
    pub title: String,
    #[serde(rename = "comment", default)]
    pub comments: Vec<DocId>,
    /// External audio link (SoundCloud)
    #[serde(rename = "soundcloud_URL", default)]
    pub soundcloud_url: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn publish(new: NewPost) -> Self {
        Self {
            id: DocId::generate(),
            owner_id: new.owner_id,
            title: new.title,
            comments: new.comments,
            soundcloud_url: new.soundcloud_url,
            created_at: Utc::now(),
        }
    }
}

/// Body for `POST /posts`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    #[serde(rename = "user_Id")]
    pub owner_id: DocId,
    #[serde(rename = "post_Title", default)]
    pub title: String,
    #[serde(rename = "comment", default)]
    pub comments: Vec<DocId>,
    #[serde(rename = "soundcloud_URL", default)]
    pub soundcloud_url: String,
}

impl NewPost {
    pub fn validate(&self) -> Result<()> {
        require("post_Title", &self.title)
    }
}

/// A text reply to a post, stored in the `treply` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "comment_Id")]
    pub id: DocId,
    /// Parent post
    #[serde(rename = "PPId")]
    pub post_id: DocId,
    /// Author
    #[serde(rename = "user_Id")]
    pub user_id: DocId,
    #[serde(rename = "text_reply_text")]
    pub text: String,
    /// Sort key for listing, newest first
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn post(new: NewComment) -> Self {
        Self {
            id: DocId::generate(),
            post_id: new.post_id,
            user_id: new.user_id,
            text: new.text,
            timestamp: Utc::now(),
        }
    }
}

/// Body for `POST /comments`. Both references arrive as strings and are
/// decoded into [`DocId`]s here; a malformed one rejects the whole body.
#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    #[serde(rename = "PPId")]
    pub post_id: DocId,
    #[serde(rename = "user_Id")]
    pub user_id: DocId,
    #[serde(rename = "text_reply_text", default)]
    pub text: String,
}

impl NewComment {
    pub fn validate(&self) -> Result<()> {
        require("text_reply_text", &self.text)
    }
}

/// A recorded-audio reply, stored in the `lreply` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingReply {
    #[serde(rename = "file_Id")]
    pub id: DocId,
    #[serde(rename = "user_Id", default)]
    pub user_id: Option<DocId>,
    /// Where the upload was committed on local disk
    #[serde(rename = "file_Path")]
    pub file_path: String,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "parent_Post_Id", default)]
    pub parent_post_id: Option<DocId>,
    pub created_at: DateTime<Utc>,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::ValidationError(format!("{field} is required")));
    }
    Ok(())
}
