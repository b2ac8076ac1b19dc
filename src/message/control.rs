//! Controller-to-agent control messages kept in object storage.
//!
//! A control message lives at `{storage_folder}/{test_id}.msg`. Agents poll
//! for it; malformed payloads are logged and read as "no message".

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, MessageError};
use crate::storage::{ObjectStorage, default_test_file_tags};
use crate::test_id::TestIdentifier;

use super::MessageType;

pub const CONTROL_MESSAGE_SUFFIX: &str = ".msg";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlWire {
    test_id: String,
    message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub test: TestIdentifier,
    pub message_type: MessageType,
    pub message_data: Option<Value>,
    persisted: bool,
}

impl ControlMessage {
    #[must_use]
    pub const fn new(test: TestIdentifier, message_type: MessageType, message_data: Option<Value>) -> Self {
        Self {
            test,
            message_type,
            message_data,
            persisted: false,
        }
    }

    #[must_use]
    pub fn key_for(test: &TestIdentifier) -> String {
        format!(
            "{}/{}{}",
            test.storage_folder(),
            test.test_id(),
            CONTROL_MESSAGE_SUFFIX
        )
    }

    #[must_use]
    pub fn key(&self) -> String {
        Self::key_for(&self.test)
    }

    /// True once written to storage and not since deleted.
    #[must_use]
    pub const fn persisted(&self) -> bool {
        self.persisted
    }

    /// Writes the message, replacing any earlier one for the test.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or the upload fails.
    pub async fn send(&mut self, storage: &ObjectStorage) -> AppResult<String> {
        let wire = ControlWire {
            test_id: self.test.test_id(),
            message_type: Some(self.message_type.as_str().to_owned()),
            message_data: self.message_data.clone(),
        };
        let body = serde_json::to_vec(&wire).map_err(|err| {
            AppError::message(MessageError::Serialize {
                context: "control message",
                source: err,
            })
        })?;
        let key = self.key();
        storage
            .upload_file_contents(
                &key,
                Bytes::from(body),
                Some("application/json"),
                &default_test_file_tags(),
            )
            .await?;
        self.persisted = true;
        info!("Sent {} control message for {}", self.message_type, self.test);
        storage.remote_url(&key).await
    }

    /// Reads the pending control message for `test`, if any.
    ///
    /// An empty object is a corrupt leftover: it is deleted (best effort) and
    /// read as no message. Unparseable payloads are logged and read as no
    /// message.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn get_message(storage: &ObjectStorage, test: &TestIdentifier) -> AppResult<Option<Self>> {
        let key = Self::key_for(test);
        if storage.list_all(&key, None, Some(1)).await?.is_empty() {
            return Ok(None);
        }
        let contents = match storage.get_file_contents(&key, None, None).await {
            Ok(Some(contents)) => contents.contents,
            Ok(None) => return Ok(None),
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        if contents.trim().is_empty() {
            warn!("Removing empty control message {}", key);
            storage.delete_object_best_effort(&key).await;
            return Ok(None);
        }
        let wire: ControlWire = match serde_json::from_str(&contents) {
            Ok(wire) => wire,
            Err(err) => {
                warn!("Ignoring unparseable control message {}: {}", key, err);
                return Ok(None);
            }
        };
        let Some(raw_type) = wire.message_type else {
            warn!("Ignoring control message {} without messageType", key);
            return Ok(None);
        };
        let message_type = match raw_type.parse::<MessageType>() {
            Ok(message_type) => message_type,
            Err(err) => {
                warn!("Ignoring control message {}: {}", key, err);
                return Ok(None);
            }
        };
        if wire.test_id != test.test_id() {
            warn!(
                "Control message {} names test {}; using it for {}",
                key, wire.test_id, test
            );
        }
        Ok(Some(Self {
            test: test.clone(),
            message_type,
            message_data: wire.message_data,
            persisted: true,
        }))
    }

    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn delete(&mut self, storage: &ObjectStorage) -> AppResult<()> {
        storage.delete_object(&self.key()).await?;
        self.persisted = false;
        Ok(())
    }
}
