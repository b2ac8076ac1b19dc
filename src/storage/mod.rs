//! Object-storage primitives.
//!
//! [`ObjectStorage`] owns the bucket settings and the key-space prefix, gzips
//! every write, gunzips reads, and turns the service's "not modified" answer
//! into [`GetOutcome::NotModified`] instead of an error.

mod gzip;
pub mod memory;
#[cfg(feature = "aws")]
pub mod s3;
mod tags;

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::access::{AccessChannel, AccessHook};
use crate::config::EnvResolver;
use crate::error::{AppError, AppResult, ConfigError, StorageError};

pub use gzip::GZIP_ENCODING;
pub use tags::{TEST_TAG_KEY, TagSet, default_test_file_tags};

pub const BUCKET_NAME: &str = "BUCKET_NAME";
pub const BUCKET_URL: &str = "BUCKET_URL";
pub const KEYSPACE_PREFIX: &str = "KEYSPACE_PREFIX";

const LIST_PAGE_SIZE: i32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub last_modified: DateTime<Utc>,
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
}

/// Result of a conditional fetch. Missing objects are errors, not outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    Found(StoredObject),
    NotModified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub content_encoding: Option<String>,
    /// URL-encoded `k=v&k=v`.
    pub tagging: Option<String>,
}

/// Text body of a fetched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContents {
    pub contents: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStoreApi: Send + Sync + fmt::Debug {
    async fn list_objects(&self, bucket: &str, request: &ListRequest) -> AppResult<ListPage>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> AppResult<GetOutcome>;

    async fn put_object(&self, bucket: &str, request: PutRequest) -> AppResult<()>;

    /// `None` tagging keeps the source's tags; `Some` replaces them.
    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
        tagging: Option<String>,
    ) -> AppResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> AppResult<()>;

    async fn get_tags(&self, bucket: &str, key: &str) -> AppResult<TagSet>;

    async fn put_tags(&self, bucket: &str, key: &str, tags: &TagSet) -> AppResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub bucket: String,
    pub bucket_url: Url,
    /// Empty, or ends with `/`.
    pub keyspace_prefix: String,
}

impl StorageLocation {
    /// # Errors
    ///
    /// Returns a configuration error when the bucket is unset or the bucket
    /// URL does not parse.
    pub fn from_env(env: &EnvResolver) -> AppResult<Self> {
        let bucket = env.require(BUCKET_NAME)?;
        let bucket_url = env
            .get(BUCKET_URL)
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", bucket));
        let bucket_url = Url::parse(&bucket_url).map_err(|err| {
            AppError::config(ConfigError::InvalidBucketUrl {
                value: bucket_url.clone(),
                source: err,
            })
        })?;
        let keyspace_prefix = env
            .get(KEYSPACE_PREFIX)
            .map(|prefix| normalize_prefix(&prefix))
            .unwrap_or_default();
        Ok(Self {
            bucket,
            bucket_url,
            keyspace_prefix,
        })
    }

    #[must_use]
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.keyspace_prefix, key)
    }

    fn relative_key(&self, key: &str) -> String {
        key.strip_prefix(&self.keyspace_prefix)
            .unwrap_or(key)
            .to_owned()
    }

    #[must_use]
    pub fn remote_url(&self, key: &str) -> String {
        let base = self.bucket_url.as_str().trim_end_matches('/');
        format!("{}/{}", base, self.full_key(key))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Content type by file extension; unknown extensions are octet streams.
#[must_use]
pub fn content_type_for(key: &str) -> &'static str {
    let extension = Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("json" | "msg" | "info") => "application/json",
        Some("yaml" | "yml") => "text/x-yaml",
        Some("csv") => "text/csv",
        Some("txt" | "log") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Last path segment of a key.
#[must_use]
pub fn key_filename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[derive(Debug)]
pub struct ObjectStorage {
    api: Arc<dyn ObjectStoreApi>,
    env: EnvResolver,
    default_tags: TagSet,
    access: AccessHook,
    location: OnceCell<StorageLocation>,
}

impl ObjectStorage {
    #[must_use]
    pub fn new(
        api: Arc<dyn ObjectStoreApi>,
        env: EnvResolver,
        default_tags: TagSet,
        access: AccessHook,
    ) -> Self {
        Self {
            api,
            env,
            default_tags,
            access,
            location: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: StorageLocation) -> Self {
        self.location = OnceCell::new_with(Some(location));
        self
    }

    #[must_use]
    pub const fn default_tags(&self) -> &TagSet {
        &self.default_tags
    }

    /// Resolves bucket settings once per process.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `BUCKET_NAME` is missing.
    pub async fn init(&self) -> AppResult<&StorageLocation> {
        self.location
            .get_or_try_init(|| async {
                StorageLocation::from_env(&self.env).inspect(|location| {
                    info!(
                        "Object storage ready: bucket={} prefix='{}'",
                        location.bucket, location.keyspace_prefix
                    );
                })
            })
            .await
    }

    /// Public URL of `key`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when storage is not configured.
    pub async fn remote_url(&self, key: &str) -> AppResult<String> {
        Ok(self.init().await?.remote_url(key))
    }

    /// One page of objects under `prefix`; returned keys are relative to the
    /// key-space prefix.
    ///
    /// # Errors
    ///
    /// Returns an error when the listing fails.
    pub async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
    ) -> AppResult<ListPage> {
        let location = self.init().await?;
        let request = ListRequest {
            prefix: location.full_key(prefix),
            continuation_token,
            max_keys,
        };
        let mut page = self.api.list_objects(&location.bucket, &request).await?;
        self.access.notify(AccessChannel::Storage);
        for object in &mut page.objects {
            object.key = location.relative_key(&object.key);
        }
        Ok(page)
    }

    /// Every object under `prefix`, optionally filtered by extension and
    /// capped at `max_files`. Nothing found is an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error when any page fails.
    pub async fn list_all(
        &self,
        prefix: &str,
        extension: Option<&str>,
        max_files: Option<usize>,
    ) -> AppResult<Vec<ObjectSummary>> {
        if max_files == Some(0) {
            return Ok(Vec::new());
        }
        let extension = extension.map(|ext| ext.trim_start_matches('.'));
        let mut found = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .list_objects(prefix, token.take(), Some(LIST_PAGE_SIZE))
                .await?;
            for object in page.objects {
                let matches = extension.is_none_or(|ext| {
                    Path::new(&object.key)
                        .extension()
                        .and_then(|found| found.to_str())
                        .is_some_and(|found| found == ext)
                });
                if matches {
                    found.push(object);
                }
                if max_files.is_some_and(|max| found.len() >= max) {
                    debug!("Listing of {} capped at {} file(s)", prefix, found.len());
                    return Ok(found);
                }
            }
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => return Ok(found),
            }
        }
    }

    /// [`Self::list_all`] for a folder; a trailing `/` is added if missing.
    ///
    /// # Errors
    ///
    /// Returns an error when any page fails.
    pub async fn list_files(
        &self,
        folder: &str,
        extension: Option<&str>,
        max_files: Option<usize>,
    ) -> AppResult<Vec<ObjectSummary>> {
        let prefix = if folder.is_empty() || folder.ends_with('/') {
            folder.to_owned()
        } else {
            format!("{}/", folder)
        };
        self.list_all(&prefix, extension, max_files).await
    }

    /// Conditional fetch; gzip bodies come back decoded.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for a missing key, or a decode error.
    pub async fn get_object(
        &self,
        key: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> AppResult<GetOutcome> {
        let location = self.init().await?;
        let outcome = self
            .api
            .get_object(&location.bucket, &location.full_key(key), if_modified_since)
            .await?;
        self.access.notify(AccessChannel::Storage);
        match outcome {
            GetOutcome::NotModified => {
                debug!("{} not modified since {:?}", key, if_modified_since);
                Ok(GetOutcome::NotModified)
            }
            GetOutcome::Found(mut object) => {
                if object.content_encoding.as_deref() == Some(GZIP_ENCODING) {
                    object.body = Bytes::from(gzip::decompress(key, &object.body)?);
                }
                Ok(GetOutcome::Found(object))
            }
        }
    }

    /// Text contents of `key`, or `None` when not modified since the
    /// watermark. Bodies longer than `max_length` bytes are truncated.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing key or a non UTF-8 body.
    pub async fn get_file_contents(
        &self,
        key: &str,
        if_modified_since: Option<DateTime<Utc>>,
        max_length: Option<usize>,
    ) -> AppResult<Option<FileContents>> {
        let GetOutcome::Found(object) = self.get_object(key, if_modified_since).await? else {
            return Ok(None);
        };
        let mut contents = String::from_utf8(object.body.to_vec()).map_err(|err| {
            AppError::storage(StorageError::InvalidUtf8 {
                key: key.to_owned(),
                source: err,
            })
        })?;
        let max_length = max_length.unwrap_or(usize::MAX);
        if contents.len() > max_length {
            let mut cut = max_length;
            while !contents.is_char_boundary(cut) {
                cut = cut.saturating_sub(1);
            }
            info!(
                "Truncating {} from {} to {} bytes",
                key,
                contents.len(),
                cut
            );
            contents.truncate(cut);
        }
        Ok(Some(FileContents {
            contents,
            last_modified: object.last_modified,
        }))
    }

    /// Downloads `key` into `local_directory`, named after the key's last
    /// segment. Returns `None` when not modified.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing key or a local write failure.
    pub async fn get_file(
        &self,
        key: &str,
        local_directory: &Path,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> AppResult<Option<(PathBuf, DateTime<Utc>)>> {
        let GetOutcome::Found(object) = self.get_object(key, if_modified_since).await? else {
            return Ok(None);
        };
        let path = local_directory.join(key_filename(key));
        tokio::fs::write(&path, &object.body).await.map_err(|err| {
            AppError::storage(StorageError::LocalFile {
                path: path.clone(),
                source: err,
            })
        })?;
        debug!("Downloaded {} to {}", key, path.display());
        Ok(Some((path, object.last_modified)))
    }

    /// Uploads a local file under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or the upload fails.
    pub async fn upload_file(&self, key: &str, local_path: &Path, tags: &TagSet) -> AppResult<()> {
        let body = tokio::fs::read(local_path).await.map_err(|err| {
            AppError::storage(StorageError::LocalFile {
                path: local_path.to_path_buf(),
                source: err,
            })
        })?;
        self.upload_file_contents(key, Bytes::from(body), None, tags)
            .await
    }

    /// Gzips and writes `contents`, merging the configured default tags under
    /// `tags`.
    ///
    /// # Errors
    ///
    /// Returns an error when compression or the upload fails.
    pub async fn upload_file_contents(
        &self,
        key: &str,
        contents: Bytes,
        content_type: Option<&str>,
        tags: &TagSet,
    ) -> AppResult<()> {
        let location = self.init().await?;
        let body = gzip::compress(key, &contents)?;
        let tags = tags.clone().with_defaults(&self.default_tags);
        let request = PutRequest {
            key: location.full_key(key),
            body: Bytes::from(body),
            content_type: content_type.unwrap_or_else(|| content_type_for(key)).to_owned(),
            content_encoding: Some(GZIP_ENCODING.to_owned()),
            tagging: (!tags.is_empty()).then(|| tags.to_query_string()),
        };
        self.api.put_object(&location.bucket, request).await?;
        self.access.notify(AccessChannel::Storage);
        debug!("Uploaded {} ({} bytes)", key, contents.len());
        Ok(())
    }

    /// Server-side copy. Without `tags` the copy keeps the source's tags.
    ///
    /// # Errors
    ///
    /// Returns `CopyToSelf` without calling the service when both keys match.
    pub async fn copy_file(
        &self,
        source_key: &str,
        destination_key: &str,
        tags: Option<&TagSet>,
    ) -> AppResult<()> {
        if source_key == destination_key {
            let (folder, filename) = destination_key
                .rsplit_once('/')
                .unwrap_or(("", destination_key));
            return Err(AppError::storage(StorageError::CopyToSelf {
                folder: folder.to_owned(),
                filename: filename.to_owned(),
            }));
        }
        let location = self.init().await?;
        let tagging = tags.map(|tags| {
            tags.clone()
                .with_defaults(&self.default_tags)
                .to_query_string()
        });
        self.api
            .copy_object(
                &location.bucket,
                &location.full_key(source_key),
                &location.full_key(destination_key),
                tagging,
            )
            .await?;
        self.access.notify(AccessChannel::Storage);
        debug!("Copied {} to {}", source_key, destination_key);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn delete_object(&self, key: &str) -> AppResult<()> {
        let location = self.init().await?;
        self.api
            .delete_object(&location.bucket, &location.full_key(key))
            .await?;
        self.access.notify(AccessChannel::Storage);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error for a missing key.
    pub async fn get_tags(&self, key: &str) -> AppResult<TagSet> {
        let location = self.init().await?;
        let tags = self
            .api
            .get_tags(&location.bucket, &location.full_key(key))
            .await?;
        self.access.notify(AccessChannel::Storage);
        Ok(tags)
    }

    /// Replaces the tag set of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing key.
    pub async fn put_tags(&self, key: &str, tags: &TagSet) -> AppResult<()> {
        let location = self.init().await?;
        self.api
            .put_tags(&location.bucket, &location.full_key(key), tags)
            .await?;
        self.access.notify(AccessChannel::Storage);
        Ok(())
    }

    /// Adds `tags` and the configured defaults to the object's existing tags
    /// without overwriting any key. Writes only when something was added;
    /// returns whether it wrote.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing key.
    pub async fn update_tags(&self, key: &str, tags: &TagSet) -> AppResult<bool> {
        let current = self.get_tags(key).await?;
        let wanted = tags.clone().with_defaults(&self.default_tags);
        let merged = current.clone().with_defaults(&wanted);
        if merged == current {
            debug!("Tags on {} already up to date", key);
            return Ok(false);
        }
        self.put_tags(key, &merged).await?;
        Ok(true)
    }

    /// Deletes `key`, logging instead of failing.
    pub async fn delete_object_best_effort(&self, key: &str) {
        if let Err(err) = self.delete_object(key).await {
            warn!("Best-effort delete of {} failed: {}", key, err);
        }
    }
}
