//! # rl-storage-local
//! rapline/crates/rl-storage-local/src/lib.rs
//! Local filesystem implementation of `MediaStore`.
//! Uploads stream into a hidden temp file in the root and are renamed into
//! `<root>/<owner id>/<file name>` only once complete, so a failed upload
//! never leaves a truncated file under the real name. Each owner directory is
//! created fresh on commit; two uploads with the same client name never share
//! a path.

use async_trait::async_trait;
use rl_core::error::{AppError, Result};
use rl_core::models::DocId;
use rl_core::traits::{MediaSink, MediaStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./uploads"), absolute once opened
    root_path: PathBuf,
    /// Per-upload byte cap
    max_bytes: u64,
}

impl LocalMediaStore {
    /// Creates the upload directory if needed and resolves it to an absolute path.
    pub async fn open(root: PathBuf, max_bytes: u64) -> anyhow::Result<Self> {
        fs::create_dir_all(&root).await?;
        let root_path = fs::canonicalize(&root).await?;
        log::info!("storing uploads under {}", root_path.display());
        Ok(Self { root_path, max_bytes })
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Keeps only the final path component of a client-supplied name and
    /// places it in the owner's directory.
    fn destination(&self, owner: DocId, filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::ValidationError(format!("unusable file name {filename:?}")))?;
        Ok(self.root_path.join(owner.to_string()).join(name))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn begin_upload(&self, owner: DocId, filename: &str) -> Result<Box<dyn MediaSink>> {
        let final_path = self.destination(owner, filename)?;
        let temp_path = self
            .root_path
            .join(format!(".{}.part", Uuid::new_v4().simple()));

        let file = File::create(&temp_path).await.map_err(upload_error)?;

        Ok(Box::new(LocalMediaSink {
            file,
            temp_path,
            final_path,
            written: 0,
            max_bytes: self.max_bytes,
        }))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let path = Path::new(path);
        if !path.starts_with(&self.root_path) {
            return Err(AppError::ValidationError(format!(
                "{} is outside the upload directory",
                path.display()
            )));
        }
        fs::remove_file(path).await.map_err(upload_error)?;

        // The owner directory held only this file
        if let Some(owner_dir) = path.parent().filter(|dir| *dir != self.root_path) {
            if let Err(err) = fs::remove_dir(owner_dir).await {
                log::warn!("could not remove upload dir {}: {err}", owner_dir.display());
            }
        }
        Ok(())
    }
}

struct LocalMediaSink {
    file: File,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    max_bytes: u64,
}

#[async_trait]
impl MediaSink for LocalMediaSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.written += chunk.len() as u64;
        if self.written > self.max_bytes {
            return Err(AppError::PayloadTooLarge(self.max_bytes));
        }
        self.file.write_all(chunk).await.map_err(upload_error)
    }

    async fn finish(self: Box<Self>) -> Result<String> {
        let LocalMediaSink { mut file, temp_path, final_path, .. } = *self;

        let committed = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            // `create_dir` fails on an existing directory, so the rename
            // below always lands in an empty one.
            if let Some(owner_dir) = final_path.parent() {
                fs::create_dir(owner_dir).await?;
            }
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(err) = committed {
            remove_quietly(&temp_path).await;
            if err.kind() == ErrorKind::AlreadyExists {
                return Err(AppError::Conflict(format!(
                    "an upload already exists at {}",
                    final_path.display()
                )));
            }
            if let Some(owner_dir) = final_path.parent() {
                // Only ever empty here; leaves nothing if it was never made
                let _ = fs::remove_dir(owner_dir).await;
            }
            return Err(upload_error(err));
        }

        log::info!("stored upload at {}", final_path.display());
        Ok(final_path.display().to_string())
    }

    async fn discard(self: Box<Self>) {
        let LocalMediaSink { file, temp_path, .. } = *self;
        drop(file);
        remove_quietly(&temp_path).await;
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        log::warn!("could not remove partial upload {}: {err}", path.display());
    }
}

fn upload_error(err: std::io::Error) -> AppError {
    log::error!("upload I/O error: {err}");
    AppError::UploadFailed(err.to_string())
}
