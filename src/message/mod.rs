//! Typed message envelopes exchanged between controller and agents.
//!
//! Queue envelopes carry their payload in named attributes. Decoding walks
//! the attribute map once through [`KnownAttribute`]; names outside the
//! reserved set are logged and skipped.

pub mod communications;
pub mod control;
pub mod dispatch;
pub mod status;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, MessageError};
use crate::queue::{AttributeValue, MessageAttributes, QueueType, Queues, ReceivedMessage};

pub use communications::CommunicationsMessage;
pub use control::ControlMessage;
pub use dispatch::{DispatchParams, TestDispatchMessage};
pub use status::{TestStatus, TestStatusData, TestStatusRecord};

pub const TEST_ID_ATTRIBUTE: &str = "TestId";
pub const MESSAGE_TYPE_ATTRIBUTE: &str = "MessageType";
pub const MESSAGE_DATA_ATTRIBUTE: &str = "MessageData";
pub const TEST_MESSAGE_ATTRIBUTE: &str = "TestMessage";
pub const UNIT_TEST_MESSAGE_ATTRIBUTE: &str = "UnitTestMessage";
pub const SCALE_ATTRIBUTE: &str = "Scale";

const SYNTHETIC_MARKER: &str = "true";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    StopTest,
    KillTest,
    UpdateYaml,
    TestStatus,
    TestError,
    TestFinished,
    TestFailed,
}

impl MessageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageType::StopTest => "StopTest",
            MessageType::KillTest => "KillTest",
            MessageType::UpdateYaml => "UpdateYaml",
            MessageType::TestStatus => "TestStatus",
            MessageType::TestError => "TestError",
            MessageType::TestFinished => "TestFinished",
            MessageType::TestFailed => "TestFailed",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = match value {
            "StopTest" => MessageType::StopTest,
            "KillTest" => MessageType::KillTest,
            "UpdateYaml" => MessageType::UpdateYaml,
            "TestStatus" => MessageType::TestStatus,
            "TestError" => MessageType::TestError,
            "TestFinished" => MessageType::TestFinished,
            "TestFailed" => MessageType::TestFailed,
            other => {
                return Err(AppError::message(MessageError::UnknownMessageType {
                    value: other.to_owned(),
                }));
            }
        };
        Ok(parsed)
    }
}

/// The reserved attribute names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KnownAttribute {
    TestId,
    MessageType,
    MessageData,
    TestMessage,
    UnitTestMessage,
    Scale,
}

impl KnownAttribute {
    pub(crate) fn parse(name: &str) -> Option<Self> {
        match name {
            TEST_ID_ATTRIBUTE => Some(KnownAttribute::TestId),
            MESSAGE_TYPE_ATTRIBUTE => Some(KnownAttribute::MessageType),
            MESSAGE_DATA_ATTRIBUTE => Some(KnownAttribute::MessageData),
            TEST_MESSAGE_ATTRIBUTE => Some(KnownAttribute::TestMessage),
            UNIT_TEST_MESSAGE_ATTRIBUTE => Some(KnownAttribute::UnitTestMessage),
            SCALE_ATTRIBUTE => Some(KnownAttribute::Scale),
            _ => None,
        }
    }
}

/// Where a received message came from; needed to delete or extend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub queue_url: String,
    pub receipt_handle: String,
    pub message_id: String,
}

impl Receipt {
    pub(crate) fn from_received(queue_url: String, message: &ReceivedMessage) -> Self {
        Self {
            queue_url,
            receipt_handle: message.receipt_handle.clone(),
            message_id: message.message_id.clone(),
        }
    }
}

pub(crate) fn string_attribute(
    envelope: &'static str,
    attribute: &'static str,
    value: &AttributeValue,
) -> AppResult<String> {
    match value {
        AttributeValue::String(text) => Ok(text.clone()),
        AttributeValue::Binary(_) => Err(AppError::message(MessageError::AttributeKind {
            envelope,
            attribute,
            expected: "String",
        })),
    }
}

pub(crate) fn json_attribute(
    envelope: &'static str,
    attribute: &'static str,
    value: &AttributeValue,
) -> AppResult<serde_json::Value> {
    let AttributeValue::Binary(bytes) = value else {
        return Err(AppError::message(MessageError::AttributeKind {
            envelope,
            attribute,
            expected: "Binary",
        }));
    };
    let text = std::str::from_utf8(bytes).map_err(|err| {
        AppError::message(MessageError::AttributeUtf8 {
            envelope,
            attribute,
            source: err,
        })
    })?;
    serde_json::from_str(text).map_err(|err| {
        AppError::message(MessageError::Deserialize {
            context: attribute,
            source: err,
        })
    })
}

pub(crate) fn json_binary(context: &'static str, value: &impl Serialize) -> AppResult<AttributeValue> {
    let encoded = serde_json::to_vec(value).map_err(|err| {
        AppError::message(MessageError::Serialize {
            context,
            source: err,
        })
    })?;
    Ok(AttributeValue::Binary(Bytes::from(encoded)))
}

pub(crate) fn mark_synthetic(attributes: &mut MessageAttributes) {
    attributes.insert(
        UNIT_TEST_MESSAGE_ATTRIBUTE.to_owned(),
        AttributeValue::String(SYNTHETIC_MARKER.to_owned()),
    );
}

pub(crate) fn is_synthetic(attributes: &MessageAttributes) -> bool {
    matches!(
        attributes.get(UNIT_TEST_MESSAGE_ATTRIBUTE),
        Some(AttributeValue::String(marker)) if marker == SYNTHETIC_MARKER
    )
}

pub(crate) fn log_unknown_attribute(envelope: &'static str, name: &str) {
    warn!("{} ignoring unknown attribute {}", envelope, name);
}

/// Receives one envelope. Synthetic traffic is deleted and reported as
/// "no message".
pub(crate) async fn receive_envelope(
    queues: &Queues,
    queue_type: QueueType,
    name: Option<&str>,
    visibility_timeout_secs: Option<i32>,
) -> AppResult<Option<(String, ReceivedMessage)>> {
    let queue_url = queues.get_queue_url(queue_type, name).await?;
    let Some(message) = queues
        .receive(queue_type, name, visibility_timeout_secs)
        .await?
    else {
        return Ok(None);
    };
    if is_synthetic(&message.attributes) {
        debug!(
            "Discarding synthetic {} message {}",
            queue_type, message.message_id
        );
        if let Err(err) = queues
            .delete_by_handle(&queue_url, &message.receipt_handle)
            .await
        {
            warn!(
                "Failed to delete synthetic message {}: {}",
                message.message_id, err
            );
        }
        return Ok(None);
    }
    Ok(Some((queue_url, message)))
}

/// Deletes a received message and forgets its receipt.
pub(crate) async fn delete_received(
    queues: &Queues,
    receipt: &mut Option<Receipt>,
) -> AppResult<()> {
    let Some(current) = receipt.as_ref() else {
        return Err(AppError::message(MessageError::NotReceived {
            operation: "delete",
        }));
    };
    queues
        .delete_by_handle(&current.queue_url, &current.receipt_handle)
        .await?;
    *receipt = None;
    Ok(())
}

pub(crate) async fn extend_received(
    queues: &Queues,
    receipt: Option<&Receipt>,
    visibility_timeout_secs: i32,
) -> AppResult<()> {
    let Some(receipt) = receipt else {
        return Err(AppError::message(MessageError::NotReceived {
            operation: "extend visibility of",
        }));
    };
    queues
        .change_visibility_by_handle(
            &receipt.queue_url,
            &receipt.receipt_handle,
            visibility_timeout_secs,
        )
        .await
}
