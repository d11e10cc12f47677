//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Comment, DocId, Post, RecordingReply, User};

/// Document persistence contract, one group of operations per collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // User Operations
    /// Fails with `AppError::Conflict` when the name is already taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
    /// Case-sensitive exact match.
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, id: DocId) -> Result<Option<User>>;

    // Post Operations
    async fn insert_post(&self, post: &Post) -> Result<()>;
    async fn find_post_by_id(&self, id: DocId) -> Result<Option<Post>>;
    /// Every post in store order, unfiltered.
    async fn find_all_posts(&self) -> Result<Vec<Post>>;

    // Comment Operations
    async fn insert_comment(&self, comment: &Comment) -> Result<()>;
    /// Comments on one post, newest first.
    async fn find_comments_by_post(&self, post_id: DocId) -> Result<Vec<Comment>>;

    // Recording Operations
    async fn insert_recording_reply(&self, reply: &RecordingReply) -> Result<()>;
}

/// Upload storage contract for recorded replies.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Opens a sink that will land under `filename`, scoped to the reply
    /// `owner`, once finished. A finished upload never replaces another.
    async fn begin_upload(&self, owner: DocId, filename: &str) -> Result<Box<dyn MediaSink>>;
    /// Removes a committed upload. Used when the reply document cannot be saved.
    async fn remove(&self, path: &str) -> Result<()>;
}

/// An in-progress upload. Nothing is visible under the final name until
/// [`MediaSink::finish`] succeeds.
#[async_trait]
pub trait MediaSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;
    /// Commits the upload and returns the path it was stored at.
    async fn finish(self: Box<Self>) -> Result<String>;
    /// Drops the partial file.
    async fn discard(self: Box<Self>);
}

/// Credential contract. Both calls are CPU-bound; callers on an async
/// executor should run them on a blocking thread.
pub trait AuthProvider: Send + Sync {
    /// Produces a salted one-way hash suitable for storage.
    fn hash_password(&self, password: &str) -> Result<String>;

    /// Verifies a password against a stored hash. With no stored hash (no such
    /// account) the same amount of work is done and the answer is `false`.
    fn verify_password(&self, password: &str, hash: Option<&str>) -> bool;
}
