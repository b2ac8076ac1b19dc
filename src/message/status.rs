//! Per-test status records written by agents and read by the controller.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, MessageError};
use crate::storage::{ObjectStorage, TagSet, default_test_file_tags};
use crate::test_id::TestIdentifier;

pub const STATUS_SUFFIX: &str = ".info";
const STATUS_EXTENSION: &str = "info";

/// Lifecycle state. Unknown values survive a read/write cycle as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestStatus {
    #[default]
    Created,
    Running,
    Checking,
    Finished,
    Failed,
    Unknown,
    Other(String),
}

impl TestStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            TestStatus::Created => "Created",
            TestStatus::Running => "Running",
            TestStatus::Checking => "Checking",
            TestStatus::Finished => "Finished",
            TestStatus::Failed => "Failed",
            TestStatus::Unknown => "Unknown",
            TestStatus::Other(value) => value,
        }
    }

    /// True for `Finished` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Finished | TestStatus::Failed)
    }
}

impl From<String> for TestStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Created" => TestStatus::Created,
            "Running" => TestStatus::Running,
            "Checking" => TestStatus::Checking,
            "Finished" => TestStatus::Finished,
            "Failed" => TestStatus::Failed,
            "Unknown" => TestStatus::Unknown,
            _ => TestStatus::Other(value),
        }
    }
}

impl From<TestStatus> for String {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Other(value) => value,
            known @ (TestStatus::Created
            | TestStatus::Running
            | TestStatus::Checking
            | TestStatus::Finished
            | TestStatus::Failed
            | TestStatus::Unknown) => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON body of a status record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStatusData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub results_filenames: Vec<String>,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestStatusRecord {
    pub test: TestIdentifier,
    pub data: TestStatusData,
    pub tags: TagSet,
    last_modified_remote: DateTime<Utc>,
}

impl TestStatusRecord {
    #[must_use]
    pub fn new(test: TestIdentifier, data: TestStatusData) -> Self {
        Self {
            test,
            data,
            tags: default_test_file_tags(),
            last_modified_remote: DateTime::UNIX_EPOCH,
        }
    }

    #[must_use]
    pub fn key_for(test: &TestIdentifier) -> String {
        format!("{}/{}{}", test.storage_folder(), test.test_id(), STATUS_SUFFIX)
    }

    #[must_use]
    pub fn key(&self) -> String {
        Self::key_for(&self.test)
    }

    /// The Unix epoch until the record has been fetched.
    #[must_use]
    pub const fn last_modified_remote(&self) -> DateTime<Utc> {
        self.last_modified_remote
    }

    /// # Errors
    ///
    /// Returns a configuration error when storage is not configured.
    pub async fn remote_url(&self, storage: &ObjectStorage) -> AppResult<String> {
        storage.remote_url(&self.key()).await
    }

    /// Writes the record and returns its URL.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or the upload fails.
    pub async fn write(&self, storage: &ObjectStorage) -> AppResult<String> {
        let body = serde_json::to_vec(&self.data).map_err(|err| {
            AppError::message(MessageError::Serialize {
                context: "test status",
                source: err,
            })
        })?;
        let key = self.key();
        storage
            .upload_file_contents(&key, Bytes::from(body), Some("application/json"), &self.tags)
            .await?;
        debug!("Wrote status {} for {}", self.data.status, self.test);
        storage.remote_url(&key).await
    }

    /// Refreshes from storage when the remote copy is newer than the last
    /// fetch. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing record or an unparseable body.
    pub async fn read(&mut self, storage: &ObjectStorage) -> AppResult<bool> {
        let since = (self.last_modified_remote > DateTime::UNIX_EPOCH)
            .then_some(self.last_modified_remote);
        let Some(contents) = storage.get_file_contents(&self.key(), since, None).await? else {
            return Ok(false);
        };
        self.data = parse_status(&contents.contents)?;
        self.last_modified_remote = contents.last_modified;
        Ok(true)
    }

    /// Fetches the record for `test`; `None` when none was written.
    ///
    /// # Errors
    ///
    /// Returns an error for storage failures or an unparseable body.
    pub async fn get_status(storage: &ObjectStorage, test: &TestIdentifier) -> AppResult<Option<Self>> {
        let mut record = Self::new(test.clone(), TestStatusData::default());
        match record.read(storage).await {
            Ok(_) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Every status record under `prefix`, fetched concurrently. Folders in
    /// `ignore_list` are skipped; unreadable records are logged and skipped.
    /// `max_files` caps the records fetched once ignored folders are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error when the listing fails.
    pub async fn get_all_status(
        storage: &ObjectStorage,
        prefix: &str,
        max_files: Option<usize>,
        ignore_list: &[String],
    ) -> AppResult<Vec<Self>> {
        let objects = storage
            .list_all(prefix, Some(STATUS_EXTENSION), None)
            .await?;
        let tests: Vec<TestIdentifier> = objects
            .iter()
            .filter_map(|object| {
                let folder = object.key.rsplit_once('/').map(|(folder, _)| folder)?;
                if ignore_list.iter().any(|ignored| {
                    folder == ignored.trim_end_matches('/')
                }) {
                    return None;
                }
                match TestIdentifier::parse_from_folder(folder) {
                    Ok(test) => Some(test),
                    Err(err) => {
                        warn!("Skipping status {}: {}", object.key, err);
                        None
                    }
                }
            })
            .take(max_files.unwrap_or(usize::MAX))
            .collect();

        let fetched = join_all(tests.iter().map(|test| Self::get_status(storage, test))).await;
        let mut records = Vec::with_capacity(fetched.len());
        for (test, result) in tests.iter().zip(fetched) {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!("Status for {} disappeared before read", test),
                Err(err) => warn!("Failed to read status for {}: {}", test, err),
            }
        }
        Ok(records)
    }
}

fn parse_status(contents: &str) -> AppResult<TestStatusData> {
    serde_json::from_str(contents).map_err(|err| {
        AppError::message(MessageError::Deserialize {
            context: "test status",
            source: err,
        })
    })
}
