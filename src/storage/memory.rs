//! In-process object store for local runs and tests.
//!
//! Behaves like the real service where the sync layer depends on it:
//! strictly increasing modification times, "not modified" for conditional
//! gets at or after the object's timestamp, and copy-with-or-without tags.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::{AppError, AppResult, StorageError};

use super::{
    GetOutcome, ListPage, ListRequest, ObjectStoreApi, ObjectSummary, PutRequest, StoredObject,
    TagSet,
};

const DEFAULT_MAX_KEYS: usize = 1000;

/// Calls made against the store, by operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageOperationCounts {
    pub lists: u64,
    pub gets: u64,
    pub puts: u64,
    pub copies: u64,
    pub deletes: u64,
    pub tag_reads: u64,
    pub tag_writes: u64,
}

impl StorageOperationCounts {
    /// Every call, reads included.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.lists
            .saturating_add(self.gets)
            .saturating_add(self.puts)
            .saturating_add(self.copies)
            .saturating_add(self.deletes)
            .saturating_add(self.tag_reads)
            .saturating_add(self.tag_writes)
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Bytes,
    last_modified: DateTime<Utc>,
    content_encoding: Option<String>,
    content_type: Option<String>,
    tags: TagSet,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: BTreeMap<String, BTreeMap<String, MemoryObject>>,
    last_issued: Option<DateTime<Utc>>,
    counts: StorageOperationCounts,
}

impl MemoryState {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_issued {
            Some(previous) if now <= previous => previous
                .checked_add_signed(ChronoDuration::milliseconds(1))
                .unwrap_or(previous),
            _ => now,
        };
        self.last_issued = Some(next);
        next
    }

    fn object(&self, bucket: &str, key: &str) -> AppResult<&MemoryObject> {
        self.buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| not_found(key))
    }

    fn object_mut(&mut self, bucket: &str, key: &str) -> AppResult<&mut MemoryObject> {
        self.buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
            .ok_or_else(|| not_found(key))
    }
}

fn not_found(key: &str) -> AppError {
    AppError::storage(StorageError::NotFound {
        key: key.to_owned(),
    })
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<MemoryState>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn counts(&self) -> StorageOperationCounts {
        self.state().counts
    }

    #[must_use]
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.state().object(bucket, key).is_ok()
    }

    /// Stored bytes, without decoding.
    #[must_use]
    pub fn raw_body(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state()
            .object(bucket, key)
            .ok()
            .map(|object| object.body.clone())
    }

    #[must_use]
    pub fn last_modified(&self, bucket: &str, key: &str) -> Option<DateTime<Utc>> {
        self.state()
            .object(bucket, key)
            .ok()
            .map(|object| object.last_modified)
    }

    /// Stores bytes as-is, bypassing encoding. Not counted as a put.
    pub fn insert_raw(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Bytes>,
        content_encoding: Option<&str>,
    ) {
        let mut state = self.state();
        let last_modified = state.next_timestamp();
        state.buckets.entry(bucket.to_owned()).or_default().insert(
            key.to_owned(),
            MemoryObject {
                body: body.into(),
                last_modified,
                content_encoding: content_encoding.map(str::to_owned),
                content_type: None,
                tags: TagSet::new(),
            },
        );
    }
}

#[async_trait]
impl ObjectStoreApi for MemoryObjectStore {
    async fn list_objects(&self, bucket: &str, request: &ListRequest) -> AppResult<ListPage> {
        let mut state = self.state();
        state.counts.lists = state.counts.lists.saturating_add(1);
        let max_keys = request
            .max_keys
            .and_then(|max| usize::try_from(max).ok())
            .filter(|max| *max > 0)
            .unwrap_or(DEFAULT_MAX_KEYS);
        let Some(objects) = state.buckets.get(bucket) else {
            return Ok(ListPage::default());
        };
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&request.prefix))
            .filter(|(key, _)| {
                request
                    .continuation_token
                    .as_ref()
                    .is_none_or(|after| key.as_str() > after.as_str())
            })
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                last_modified: object.last_modified,
                size: u64::try_from(object.body.len()).unwrap_or(u64::MAX),
            });
        let page: Vec<ObjectSummary> = matching.by_ref().take(max_keys).collect();
        let next_continuation_token = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };
        Ok(ListPage {
            objects: page,
            next_continuation_token,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> AppResult<GetOutcome> {
        let mut state = self.state();
        state.counts.gets = state.counts.gets.saturating_add(1);
        let object = state.object(bucket, key)?;
        if if_modified_since.is_some_and(|since| object.last_modified <= since) {
            return Ok(GetOutcome::NotModified);
        }
        Ok(GetOutcome::Found(StoredObject {
            body: object.body.clone(),
            last_modified: object.last_modified,
            content_encoding: object.content_encoding.clone(),
            content_type: object.content_type.clone(),
        }))
    }

    async fn put_object(&self, bucket: &str, request: PutRequest) -> AppResult<()> {
        let mut state = self.state();
        state.counts.puts = state.counts.puts.saturating_add(1);
        let last_modified = state.next_timestamp();
        let tags = request
            .tagging
            .as_deref()
            .map(TagSet::from_query_string)
            .unwrap_or_default();
        state.buckets.entry(bucket.to_owned()).or_default().insert(
            request.key,
            MemoryObject {
                body: request.body,
                last_modified,
                content_encoding: request.content_encoding,
                content_type: Some(request.content_type),
                tags,
            },
        );
        Ok(())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
        tagging: Option<String>,
    ) -> AppResult<()> {
        let mut state = self.state();
        state.counts.copies = state.counts.copies.saturating_add(1);
        let mut copy = state.object(bucket, source_key)?.clone();
        if let Some(tagging) = tagging.as_deref() {
            copy.tags = TagSet::from_query_string(tagging);
        }
        copy.last_modified = state.next_timestamp();
        state
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .insert(destination_key.to_owned(), copy);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> AppResult<()> {
        let mut state = self.state();
        state.counts.deletes = state.counts.deletes.saturating_add(1);
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> AppResult<TagSet> {
        let mut state = self.state();
        state.counts.tag_reads = state.counts.tag_reads.saturating_add(1);
        Ok(state.object(bucket, key)?.tags.clone())
    }

    async fn put_tags(&self, bucket: &str, key: &str, tags: &TagSet) -> AppResult<()> {
        let mut state = self.state();
        state.counts.tag_writes = state.counts.tag_writes.saturating_add(1);
        state.object_mut(bucket, key)?.tags = tags.clone();
        Ok(())
    }
}
