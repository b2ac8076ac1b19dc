//! Local/remote file synchronization over object storage.
//!
//! A [`SyncedFile`] pairs a local path with a storage key and caches two
//! watermarks: the local modification time at the last upload or download,
//! and the remote last-modified time at the last fetch. Transfers are skipped
//! when the watermark says nothing changed, unless forced.


use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{AppError, AppResult, StorageError};
use crate::poll::Poller;
use crate::retry::{RetryPolicy, attempt_with_policy};
use crate::storage::{ObjectStorage, TagSet, key_filename};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncedFileOptions {
    pub filename: String,
    /// Storage folder relative to the key-space prefix, without a trailing
    /// slash. Empty for the root.
    pub folder: String,
    pub local_directory: PathBuf,
    /// Tags written on upload; `None` writes only the configured defaults.
    pub tags: Option<TagSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedFile {
    filename: String,
    folder: String,
    local_directory: PathBuf,
    tags: Option<TagSet>,
    last_modified_local: Option<DateTime<Utc>>,
    last_modified_remote: Option<DateTime<Utc>>,
    remote_url: Option<String>,
}

impl SyncedFile {
    #[must_use]
    pub fn new(options: SyncedFileOptions) -> Self {
        Self {
            filename: options.filename,
            folder: options.folder.trim_matches('/').to_owned(),
            local_directory: options.local_directory,
            tags: options.tags,
            last_modified_local: None,
            last_modified_remote: None,
            remote_url: None,
        }
    }

    /// Handles for every object in `folder`, optionally filtered by
    /// extension. Watermarks start empty, so the first download always
    /// transfers.
    ///
    /// # Errors
    ///
    /// Returns an error when the listing fails.
    pub async fn list_remote(
        storage: &ObjectStorage,
        folder: &str,
        extension: Option<&str>,
        local_directory: &Path,
    ) -> AppResult<Vec<Self>> {
        let folder = folder.trim_matches('/');
        let objects = storage.list_files(folder, extension, None).await?;
        Ok(objects
            .iter()
            .map(|object| {
                Self::new(SyncedFileOptions {
                    filename: key_filename(&object.key).to_owned(),
                    folder: folder.to_owned(),
                    local_directory: local_directory.to_path_buf(),
                    tags: None,
                })
            })
            .collect())
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    #[must_use]
    pub const fn tags(&self) -> Option<&TagSet> {
        self.tags.as_ref()
    }

    #[must_use]
    pub fn storage_key(&self) -> String {
        if self.folder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.folder, self.filename)
        }
    }

    #[must_use]
    pub fn local_path(&self) -> PathBuf {
        self.local_directory.join(&self.filename)
    }

    #[must_use]
    pub const fn last_modified_local(&self) -> Option<DateTime<Utc>> {
        self.last_modified_local
    }

    #[must_use]
    pub const fn last_modified_remote(&self) -> Option<DateTime<Utc>> {
        self.last_modified_remote
    }

    /// Set after the first successful upload.
    #[must_use]
    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub async fn exists_local(&self) -> bool {
        tokio::fs::metadata(self.local_path())
            .await
            .is_ok_and(|metadata| metadata.is_file())
    }

    /// # Errors
    ///
    /// Returns an error when the listing fails.
    pub async fn exists_remote(&self, storage: &ObjectStorage) -> AppResult<bool> {
        let key = self.storage_key();
        let found = storage.list_all(&key, None, Some(1)).await?;
        Ok(found.iter().any(|object| object.key == key))
    }

    /// Fetches the remote object into the local directory when it is newer
    /// than the last fetch, or unconditionally with `force`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for a missing object, or a local
    /// write failure.
    pub async fn download(&mut self, storage: &ObjectStorage, force: bool) -> AppResult<DownloadOutcome> {
        let since = if force { None } else { self.last_modified_remote };
        tokio::fs::create_dir_all(&self.local_directory)
            .await
            .map_err(|err| local_file_error(&self.local_directory, err))?;
        let key = self.storage_key();
        let Some((path, last_modified)) = storage.get_file(&key, &self.local_directory, since).await?
        else {
            debug!("{} unchanged since {:?}", key, since);
            return Ok(DownloadOutcome::Unchanged);
        };
        self.last_modified_remote = Some(last_modified);
        self.last_modified_local = Some(local_mtime(&path).await?);
        info!("Downloaded {} to {}", key, path.display());
        Ok(DownloadOutcome::Downloaded)
    }

    /// Uploads the local file when its modification time differs from the
    /// last transfer, or unconditionally with `force`. With `retry`, failed
    /// uploads are retried per the policy; without it, once.
    ///
    /// # Errors
    ///
    /// Returns an error when the local file is missing or the final attempt
    /// fails.
    pub async fn upload(
        &mut self,
        storage: &ObjectStorage,
        force: bool,
        retry: Option<&RetryPolicy>,
    ) -> AppResult<UploadOutcome> {
        let path = self.local_path();
        let modified = local_mtime(&path).await?;
        if !force && self.last_modified_local == Some(modified) {
            debug!("{} unchanged since last upload", path.display());
            return Ok(UploadOutcome::Unchanged);
        }

        let key = self.storage_key();
        let tags = self.tags.clone().unwrap_or_default();
        let once = RetryPolicy::once();
        let policy = retry.unwrap_or(&once);
        attempt_with_policy(policy, "upload", |_| storage.upload_file(&key, &path, &tags)).await?;

        self.last_modified_local = Some(modified);
        self.remote_url = Some(storage.remote_url(&key).await?);
        info!("Uploaded {} to {}", path.display(), key);
        Ok(UploadOutcome::Uploaded)
    }

    /// Server-side copy into `destination_folder`, keeping the file name.
    /// Without `tags` the copy inherits the source's tags.
    ///
    /// # Errors
    ///
    /// Returns `CopyToSelf` without any service call when the destination is
    /// this file's own folder.
    pub async fn copy(
        &self,
        storage: &ObjectStorage,
        destination_folder: &str,
        tags: Option<&TagSet>,
    ) -> AppResult<Self> {
        let destination = Self::new(SyncedFileOptions {
            filename: self.filename.clone(),
            folder: destination_folder.to_owned(),
            local_directory: self.local_directory.clone(),
            tags: tags.cloned().or_else(|| self.tags.clone()),
        });
        if destination.folder == self.folder {
            return Err(AppError::storage(StorageError::CopyToSelf {
                folder: self.folder.clone(),
                filename: self.filename.clone(),
            }));
        }
        storage
            .copy_file(&self.storage_key(), &destination.storage_key(), tags)
            .await?;
        Ok(destination)
    }

    /// Remote contents when changed since the last fetch, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing object or a non UTF-8 body.
    pub async fn read_contents(
        &mut self,
        storage: &ObjectStorage,
        max_length: Option<usize>,
    ) -> AppResult<Option<String>> {
        let Some(contents) = storage
            .get_file_contents(&self.storage_key(), self.last_modified_remote, max_length)
            .await?
        else {
            return Ok(None);
        };
        self.last_modified_remote = Some(contents.last_modified);
        Ok(Some(contents.contents))
    }

    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn delete_remote(&mut self, storage: &ObjectStorage) -> AppResult<()> {
        storage.delete_object(&self.storage_key()).await?;
        self.last_modified_remote = None;
        self.remote_url = None;
        Ok(())
    }

    /// Waits for the object to show up in listings. Listing failures count
    /// as "not yet".
    ///
    /// # Errors
    ///
    /// Returns a poll error on timeout or cancellation.
    pub async fn wait_until_remote(
        &self,
        storage: &ObjectStorage,
        poller: &Poller,
        timeout: Duration,
    ) -> AppResult<()> {
        let key = self.storage_key();
        let key_ref = key.as_str();
        let on_timeout = |waited: Duration| {
            format!("{} did not appear within {}ms", key_ref, waited.as_millis())
        };
        poller
            .poll(
                move || async move {
                    match self.exists_remote(storage).await {
                        Ok(true) => Some(()),
                        Ok(false) => None,
                        Err(err) => {
                            debug!("Listing {} failed while waiting: {}", key_ref, err);
                            None
                        }
                    }
                },
                timeout,
                Some(&on_timeout),
            )
            .await
    }
}

async fn local_mtime(path: &Path) -> AppResult<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| local_file_error(path, err))?;
    let modified = metadata
        .modified()
        .map_err(|err| local_file_error(path, err))?;
    Ok(DateTime::<Utc>::from(modified))
}

fn local_file_error(path: &Path, err: std::io::Error) -> AppError {
    AppError::storage(StorageError::LocalFile {
        path: path.to_path_buf(),
        source: err,
    })
}
