//! # rl-api Handlers
//!
//! This module coordinates the flow between HTTP requests and Core traits.
//! Every handler runs Decode -> Validate -> Persist/Query -> Encode and
//! returns `ApiError` on the first failure.

use std::future::Future;
use std::time::Duration;

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use rl_core::error::{AppError, Result};
use rl_core::models::{
    Comment, Credentials, DocId, NewComment, NewPost, NewUser, Post, RecordingReply, User,
    UserProfile,
};
use rl_core::traits::{AuthProvider, DocumentStore, MediaSink, MediaStore};
use serde::Deserialize;

use crate::error::{bad_input, ApiError};

/// Body written on a successful recording upload. Existing clients match on it.
pub const UPLOAD_ACK: &str = "200OK";

const FILE_FIELD: &str = "file";
const MAX_TEXT_FIELD_BYTES: usize = 4 * 1024;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub store: Box<dyn DocumentStore>,
    pub media: Box<dyn MediaStore>,
    pub auth: Box<dyn AuthProvider>,
    /// Deadline applied to every document store call
    pub store_timeout: Duration,
}

impl AppState {
    async fn within_deadline<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Storage(format!(
                "document store did not answer within {:?}",
                self.store_timeout
            ))),
        }
    }

    async fn ensure_user_exists(&self, id: DocId) -> Result<()> {
        match self.within_deadline(self.store.find_user_by_id(id)).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound("user".into(), id.to_string())),
        }
    }

    async fn ensure_post_exists(&self, id: DocId) -> Result<()> {
        match self.within_deadline(self.store.find_post_by_id(id)).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound("post".into(), id.to_string())),
        }
    }
}

/// Runs password work on the blocking pool so Argon2 never stalls a worker.
async fn with_auth<R: Send + 'static>(
    data: &web::Data<AppState>,
    work: impl FnOnce(&dyn AuthProvider) -> R + Send + 'static,
) -> Result<R> {
    let state = data.clone();
    web::block(move || work(state.auth.as_ref()))
        .await
        .map_err(|e| AppError::Internal(format!("password work did not complete: {e}")))
}

/// `?id=` on the read endpoints. Kept raw so a malformed id is reported as
/// bad input rather than as a missing parameter.
#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

/// `POST /user`
pub async fn register_user(
    data: web::Data<AppState>,
    body: web::Json<NewUser>,
) -> std::result::Result<HttpResponse, ApiError> {
    let new = body.into_inner();
    new.validate()?;

    // Fast path only; the store's unique index settles races.
    if data
        .within_deadline(data.store.find_user_by_name(&new.name))
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!("user name {:?} already taken", new.name)).into());
    }

    let password = new.password.clone();
    let password_hash = with_auth(&data, move |auth| auth.hash_password(&password)).await??;
    let user = User::register(new, password_hash);
    data.within_deadline(data.store.insert_user(&user)).await?;

    log::info!("registered user {} ({})", user.name, user.id);
    Ok(HttpResponse::Created().json(UserProfile::from(user)))
}

/// `POST /login`
///
/// Unknown name and wrong password are indistinguishable to the caller: same
/// status, same body shape, and the same hashing work either way.
pub async fn login(
    data: web::Data<AppState>,
    body: web::Json<Credentials>,
) -> std::result::Result<HttpResponse, ApiError> {
    let creds = body.into_inner();
    let user = data
        .within_deadline(data.store.find_user_by_name(&creds.name))
        .await?;

    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
    let password = creds.password;
    let verified = with_auth(&data, move |auth| {
        auth.verify_password(&password, stored_hash.as_deref())
    })
    .await?;

    match user {
        Some(user) if verified => Ok(HttpResponse::Ok().json(UserProfile::from(user))),
        Some(user) => {
            log::info!("login rejected: wrong password for {}", user.id);
            Err(AppError::NotFound("user".into(), creds.name).into())
        }
        None => {
            log::info!("login rejected: no user named {:?}", creds.name);
            Err(AppError::NotFound("user".into(), creds.name).into())
        }
    }
}

/// `POST /posts`
pub async fn create_post(
    data: web::Data<AppState>,
    body: web::Json<NewPost>,
) -> std::result::Result<HttpResponse, ApiError> {
    let new = body.into_inner();
    new.validate()?;
    data.ensure_user_exists(new.owner_id).await?;

    let post = Post::publish(new);
    data.within_deadline(data.store.insert_post(&post)).await?;

    log::info!("post {} published by {}", post.id, post.owner_id);
    Ok(HttpResponse::Created().json(post))
}

/// `GET /posts`
pub async fn list_posts(data: web::Data<AppState>) -> std::result::Result<HttpResponse, ApiError> {
    let posts = data.within_deadline(data.store.find_all_posts()).await?;
    Ok(HttpResponse::Ok().json(posts))
}

/// `POST /comments`
pub async fn create_comment(
    data: web::Data<AppState>,
    body: web::Json<NewComment>,
) -> std::result::Result<HttpResponse, ApiError> {
    let new = body.into_inner();
    new.validate()?;
    data.ensure_post_exists(new.post_id).await?;
    data.ensure_user_exists(new.user_id).await?;

    let comment = Comment::post(new);
    data.within_deadline(data.store.insert_comment(&comment)).await?;

    Ok(HttpResponse::Created().json(comment))
}

/// `GET /comments?id=<post id>`
pub async fn list_comments(
    data: web::Data<AppState>,
    query: web::Query<IdQuery>,
) -> std::result::Result<HttpResponse, ApiError> {
    let post_id = DocId::parse(&query.id)?;
    let comments = data
        .within_deadline(data.store.find_comments_by_post(post_id))
        .await?;
    Ok(HttpResponse::Ok().json(comments))
}

/// `GET /user?id=<user id>`
pub async fn get_user(
    data: web::Data<AppState>,
    query: web::Query<IdQuery>,
) -> std::result::Result<HttpResponse, ApiError> {
    let id = DocId::parse(&query.id)?;
    match data.within_deadline(data.store.find_user_by_id(id)).await? {
        Some(user) => Ok(HttpResponse::Ok().json(UserProfile::from(user))),
        None => Err(AppError::NotFound("user".into(), id.to_string()).into()),
    }
}

/// `POST /lreply`
///
/// Streams the `file` part to the media store under the new reply's id, then
/// records the reply. The partial upload is discarded on every failure before
/// the document is saved; after that only this reply's own file is removed.
pub async fn upload_reply(
    data: web::Data<AppState>,
    payload: Multipart,
) -> std::result::Result<HttpResponse, ApiError> {
    let reply_id = DocId::generate();
    let mut form = ReplyForm::default();

    let checked = match form.read(data.media.as_ref(), reply_id, payload).await {
        Ok(()) => form.check_references(&data).await,
        Err(err) => Err(err),
    };
    if let Err(err) = checked {
        form.abandon().await;
        return Err(err);
    }

    let sink = form
        .upload
        .take()
        .ok_or_else(|| bad_input(format!("multipart field `{FILE_FIELD}` is required")))?;
    let file_path = sink.finish().await?;

    let reply = RecordingReply {
        id: reply_id,
        user_id: form.user_id,
        file_path,
        comments: form.comments,
        username: form.username,
        parent_post_id: form.parent_post_id,
        created_at: Utc::now(),
    };

    if let Err(err) = data
        .within_deadline(data.store.insert_recording_reply(&reply))
        .await
    {
        if let Err(cleanup) = data.media.remove(&reply.file_path).await {
            log::warn!("orphaned upload {}: {cleanup}", reply.file_path);
        }
        return Err(err.into());
    }

    log::info!("recording reply {} stored at {}", reply.id, reply.file_path);
    Ok(HttpResponse::Ok().content_type("text/plain").body(UPLOAD_ACK))
}

/// Fields collected from the `/lreply` multipart body.
#[derive(Default)]
struct ReplyForm {
    upload: Option<Box<dyn MediaSink>>,
    user_id: Option<DocId>,
    username: String,
    parent_post_id: Option<DocId>,
    comments: Vec<String>,
}

impl ReplyForm {
    async fn read(
        &mut self,
        media: &dyn MediaStore,
        reply_id: DocId,
        mut payload: Multipart,
    ) -> std::result::Result<(), ApiError> {
        while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
            let name = field.name().to_string();

            if name == FILE_FIELD {
                if self.upload.is_some() {
                    return Err(bad_input("only one file may be uploaded per reply"));
                }
                let filename = field
                    .content_disposition()
                    .get_filename()
                    .map(str::to_owned)
                    .ok_or_else(|| bad_input("file part has no filename"))?;

                let sink = self.upload.insert(media.begin_upload(reply_id, &filename).await?);
                while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
                    sink.write_chunk(&chunk).await?;
                }
                continue;
            }

            let value = read_text(&mut field).await?;
            match name.as_str() {
                "user_Id" => self.user_id = optional_id(&value)?,
                "parent_Post_Id" => self.parent_post_id = optional_id(&value)?,
                "username" => self.username = value,
                "comments" => self.comments.push(value),
                other => log::debug!("ignoring form field {other:?}"),
            }
        }
        Ok(())
    }

    async fn check_references(&self, data: &AppState) -> std::result::Result<(), ApiError> {
        if let Some(user_id) = self.user_id {
            data.ensure_user_exists(user_id).await?;
        }
        if let Some(post_id) = self.parent_post_id {
            data.ensure_post_exists(post_id).await?;
        }
        Ok(())
    }

    async fn abandon(&mut self) {
        if let Some(sink) = self.upload.take() {
            sink.discard().await;
        }
    }
}

async fn read_text(field: &mut Field) -> std::result::Result<String, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(bad_input(format!("form field {:?} is too long", field.name())));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| bad_input(format!("form field {:?} is not UTF-8", field.name())))
}

fn optional_id(raw: &str) -> Result<Option<DocId>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    DocId::parse(raw).map(Some)
}

/// A broken request stream is an upload failure; anything else is a
/// malformed form.
fn multipart_error(err: MultipartError) -> ApiError {
    match err {
        MultipartError::Payload(_) => ApiError(AppError::UploadFailed(err.to_string())),
        other => bad_input(format!("malformed multipart body: {other}")),
    }
}
