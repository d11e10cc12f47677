//! # rl-db-sqlite Implementation
//!
//! A document store on top of SQLite. Each collection is a table whose rows
//! hold one JSON document plus the two columns the store needs for itself:
//! the identifier (primary key) and an integer creation time used for ordering.
//! Field lookups go through `json_extract` against expression indexes.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rl_core::error::{AppError, Result};
use rl_core::models::{Collection, Comment, DocId, Post, RecordingReply, User};
use rl_core::traits::DocumentStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

// JSON paths must match the serde names in rl_core::models.
const USER_NAME_PATH: &str = "$.user_Name";
const COMMENT_POST_PATH: &str = "$.PPId";

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Opens the shared connection handle and makes sure every collection exists.
    ///
    /// `sqlite::memory:` gets a single pinned connection; otherwise every
    /// pooled connection would see its own empty database.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_collections().await?;
        log::info!("document store ready at {url}");
        Ok(store)
    }

    async fn ensure_collections(&self) -> anyhow::Result<()> {
        for collection in Collection::ALL {
            let table = collection.name();
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY NOT NULL,
                    body TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )"
            ))
            .execute(&self.pool)
            .await?;
        }

        // The unique index is what keeps two concurrent registrations of one
        // name from both landing.
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS users_name_unique ON {} (json_extract(body, '{USER_NAME_PATH}'))",
            Collection::Users.name()
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS treply_post ON {} (json_extract(body, '{COMMENT_POST_PATH}'), created_at)",
            Collection::Comments.name()
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_doc<T: Serialize>(
        &self,
        collection: Collection,
        id: DocId,
        created_at: chrono::DateTime<chrono::Utc>,
        doc: &T,
    ) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, body, created_at) VALUES (?, ?, ?)",
            collection.name()
        ))
        .bind(id.to_string())
        .bind(body)
        .bind(created_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(collection, e))?;

        log::debug!("inserted {id} into {}", collection.name());
        Ok(())
    }

    async fn find_one<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &str,
        value: String,
    ) -> Result<Option<T>> {
        let row = sqlx::query(&format!(
            "SELECT body FROM {} WHERE {filter} = ? LIMIT 1",
            collection.name()
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(|row| decode_body(&row)).transpose()
    }
}

/// Maps SQL failures to the domain taxonomy. A unique violation on insert is
/// a conflict, everything else is a storage failure.
fn map_insert_error(collection: Collection, err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            let what = match collection {
                Collection::Users => "user name already taken".to_string(),
                other => format!("duplicate identifier in {}", other.name()),
            };
            AppError::Conflict(what)
        }
        _ => storage_error(err),
    }
}

fn storage_error(err: sqlx::Error) -> AppError {
    log::error!("document store error: {err}");
    AppError::Storage(err.to_string())
}

fn decode_body<T: DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> Result<T> {
    let body: String = row.try_get("body").map_err(storage_error)?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.insert_doc(Collection::Users, user.id, user.created_at, user).await
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.find_one(
            Collection::Users,
            &format!("json_extract(body, '{USER_NAME_PATH}')"),
            name.to_string(),
        )
        .await
    }

    async fn find_user_by_id(&self, id: DocId) -> Result<Option<User>> {
        self.find_one(Collection::Users, "id", id.to_string()).await
    }

    async fn insert_post(&self, post: &Post) -> Result<()> {
        self.insert_doc(Collection::Posts, post.id, post.created_at, post).await
    }

    async fn find_post_by_id(&self, id: DocId) -> Result<Option<Post>> {
        self.find_one(Collection::Posts, "id", id.to_string()).await
    }

    async fn find_all_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT body FROM {} ORDER BY rowid",
            Collection::Posts.name()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode_body::<_>).collect()
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.insert_doc(Collection::Comments, comment.id, comment.timestamp, comment)
            .await
    }

    async fn find_comments_by_post(&self, post_id: DocId) -> Result<Vec<Comment>> {
        let rows = sqlx::query(&format!(
            "SELECT body FROM {} WHERE json_extract(body, '{COMMENT_POST_PATH}') = ?
             ORDER BY created_at DESC, id DESC",
            Collection::Comments.name()
        ))
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode_body::<_>).collect()
    }

    async fn insert_recording_reply(&self, reply: &RecordingReply) -> Result<()> {
        self.insert_doc(Collection::RecordingReplies, reply.id, reply.created_at, reply)
            .await
    }
}
