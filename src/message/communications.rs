use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::error::{AppError, AppResult, MessageError};
use crate::queue::{AttributeValue, MessageAttributes, OutgoingMessage, QueueType, Queues, ReceivedMessage};

use super::{
    KnownAttribute, MESSAGE_DATA_ATTRIBUTE, MESSAGE_TYPE_ATTRIBUTE, MessageType, Receipt,
    TEST_ID_ATTRIBUTE, delete_received, extend_received, json_attribute, json_binary,
    log_unknown_attribute, receive_envelope, string_attribute,
};

const ENVELOPE: &str = "CommunicationsMessage";

/// Agent-to-controller notification on the shared communications queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicationsMessage {
    pub test_id: String,
    pub message_type: MessageType,
    pub message_data: Option<Value>,
    receipt: Option<Receipt>,
    synthetic: bool,
}

impl CommunicationsMessage {
    #[must_use]
    pub fn new(test_id: impl Into<String>, message_type: MessageType, message_data: Option<Value>) -> Self {
        Self {
            test_id: test_id.into(),
            message_type,
            message_data,
            receipt: None,
            synthetic: false,
        }
    }

    /// Marks the message as test traffic that receivers discard.
    #[must_use]
    pub const fn mark_synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    /// Present only between receive and delete.
    #[must_use]
    pub const fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    /// # Errors
    ///
    /// Returns an error when the message data cannot be serialized.
    pub fn to_outgoing(&self) -> AppResult<OutgoingMessage> {
        let mut attributes: MessageAttributes = BTreeMap::new();
        attributes.insert(
            TEST_ID_ATTRIBUTE.to_owned(),
            AttributeValue::String(self.test_id.clone()),
        );
        attributes.insert(
            MESSAGE_TYPE_ATTRIBUTE.to_owned(),
            AttributeValue::String(self.message_type.as_str().to_owned()),
        );
        if let Some(data) = self.message_data.as_ref() {
            attributes.insert(
                MESSAGE_DATA_ATTRIBUTE.to_owned(),
                json_binary("communications message data", data)?,
            );
        }
        if self.synthetic {
            super::mark_synthetic(&mut attributes);
        }
        Ok(OutgoingMessage {
            body: format!("{} for test {}", self.message_type, self.test_id),
            attributes,
        })
    }

    /// # Errors
    ///
    /// Returns a decode error when `TestId` or `MessageType` is missing or
    /// mistyped, or the data is not JSON.
    pub fn decode(queue_url: String, message: &ReceivedMessage) -> AppResult<Self> {
        let mut test_id = None;
        let mut message_type = None;
        let mut message_data = None;
        for (name, value) in &message.attributes {
            match KnownAttribute::parse(name) {
                Some(KnownAttribute::TestId) => {
                    test_id = Some(string_attribute(ENVELOPE, TEST_ID_ATTRIBUTE, value)?);
                }
                Some(KnownAttribute::MessageType) => {
                    let raw = string_attribute(ENVELOPE, MESSAGE_TYPE_ATTRIBUTE, value)?;
                    message_type = Some(raw.parse::<MessageType>()?);
                }
                Some(KnownAttribute::MessageData) => {
                    message_data = Some(json_attribute(ENVELOPE, MESSAGE_DATA_ATTRIBUTE, value)?);
                }
                Some(
                    KnownAttribute::TestMessage
                    | KnownAttribute::UnitTestMessage
                    | KnownAttribute::Scale,
                )
                | None => log_unknown_attribute(ENVELOPE, name),
            }
        }
        let test_id = test_id.ok_or_else(|| missing(TEST_ID_ATTRIBUTE))?;
        let message_type = message_type.ok_or_else(|| missing(MESSAGE_TYPE_ATTRIBUTE))?;
        Ok(Self {
            test_id,
            message_type,
            message_data,
            receipt: Some(Receipt::from_received(queue_url, message)),
            synthetic: false,
        })
    }

    /// # Errors
    ///
    /// Returns an error when encoding or the send fails.
    pub async fn send(&self, queues: &Queues) -> AppResult<String> {
        let message_id = queues
            .send(QueueType::Communications, None, self.to_outgoing()?)
            .await?;
        info!(
            "Sent {} for {} as {}",
            self.message_type, self.test_id, message_id
        );
        Ok(message_id)
    }

    /// # Errors
    ///
    /// Returns an error when the receive fails or the envelope is malformed.
    pub async fn receive(queues: &Queues) -> AppResult<Option<Self>> {
        let Some((queue_url, message)) =
            receive_envelope(queues, QueueType::Communications, None, None).await?
        else {
            return Ok(None);
        };
        Self::decode(queue_url, &message).map(Some)
    }

    /// # Errors
    ///
    /// Returns `NotReceived` for a message that was never received.
    pub async fn delete(&mut self, queues: &Queues) -> AppResult<()> {
        delete_received(queues, &mut self.receipt).await
    }

    /// # Errors
    ///
    /// Returns `NotReceived` for a message that was never received.
    pub async fn extend_visibility(&self, queues: &Queues, visibility_timeout_secs: i32) -> AppResult<()> {
        extend_received(queues, self.receipt.as_ref(), visibility_timeout_secs).await
    }
}

fn missing(attribute: &'static str) -> AppError {
    AppError::message(MessageError::MissingAttribute {
        envelope: ENVELOPE,
        attribute,
    })
}
