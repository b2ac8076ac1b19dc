//! SQS-backed [`QueueApi`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::primitives::Blob;
use aws_sdk_sqs::types::{MessageAttributeValue, QueueAttributeName};
use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::aws::{boxed_error, load_sdk_config};
use crate::config::AwsConfig;
use crate::error::{AppError, AppResult, QueueError};

use super::{AttributeValue, MessageAttributes, OutgoingMessage, QueueApi, ReceiveRequest, ReceivedMessage};

#[derive(Debug)]
pub struct SqsQueueApi {
    aws: AwsConfig,
    client: OnceCell<Client>,
}

impl SqsQueueApi {
    #[must_use]
    pub fn new(aws: AwsConfig) -> Self {
        Self {
            aws,
            client: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            aws: AwsConfig::default(),
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let shared = load_sdk_config(&self.aws).await;
                Client::new(&shared)
            })
            .await
    }
}

fn service_error(
    operation: &'static str,
    queue_url: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> AppError {
    AppError::queue(QueueError::Service {
        operation,
        queue_url: queue_url.to_owned(),
        source,
    })
}

fn to_sdk_attributes(
    queue_url: &str,
    attributes: MessageAttributes,
) -> AppResult<HashMap<String, MessageAttributeValue>> {
    let mut converted = HashMap::with_capacity(attributes.len());
    for (name, value) in attributes {
        let builder = MessageAttributeValue::builder();
        let builder = match value {
            AttributeValue::String(text) => builder.data_type("String").string_value(text),
            AttributeValue::Binary(bytes) => builder
                .data_type("Binary")
                .binary_value(Blob::new(bytes.to_vec())),
        };
        let built = builder
            .build()
            .map_err(|err| service_error("build attribute", queue_url, Box::new(err)))?;
        converted.insert(name, built);
    }
    Ok(converted)
}

fn from_sdk_attributes(attributes: Option<&HashMap<String, MessageAttributeValue>>) -> MessageAttributes {
    let mut converted = MessageAttributes::new();
    for (name, value) in attributes.into_iter().flatten() {
        let attribute = value
            .string_value()
            .map(|text| AttributeValue::String(text.to_owned()))
            .or_else(|| {
                value
                    .binary_value()
                    .map(|blob| AttributeValue::Binary(Bytes::copy_from_slice(blob.as_ref())))
            });
        let Some(attribute) = attribute else {
            warn!("Ignoring attribute {} with data type {}", name, value.data_type());
            continue;
        };
        converted.insert(name.clone(), attribute);
    }
    converted
}

#[async_trait]
impl QueueApi for SqsQueueApi {
    async fn send_message(&self, queue_url: &str, message: OutgoingMessage) -> AppResult<String> {
        let attributes = to_sdk_attributes(queue_url, message.attributes)?;
        let output = self
            .client()
            .await
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body)
            .set_message_attributes(Some(attributes))
            .send()
            .await
            .map_err(|err| service_error("send_message", queue_url, boxed_error(&err)))?;
        Ok(output.message_id().unwrap_or_default().to_owned())
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> AppResult<Option<ReceivedMessage>> {
        let output = self
            .client()
            .await
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(request.wait_time_secs)
            .set_visibility_timeout(request.visibility_timeout_secs)
            .set_message_attribute_names(Some(request.attribute_names.clone()))
            .send()
            .await
            .map_err(|err| service_error("receive_message", queue_url, boxed_error(&err)))?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };
        let Some(receipt_handle) = message.receipt_handle() else {
            warn!("Received message without a receipt handle on {}", queue_url);
            return Ok(None);
        };
        let received = ReceivedMessage {
            message_id: message.message_id().unwrap_or_default().to_owned(),
            receipt_handle: receipt_handle.to_owned(),
            body: message.body().unwrap_or_default().to_owned(),
            attributes: from_sdk_attributes(message.message_attributes()),
        };
        debug!("SQS receive on {} returned {}", queue_url, received.message_id);
        Ok(Some(received))
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> AppResult<()> {
        self.client()
            .await
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|err| service_error("delete_message", queue_url, boxed_error(&err)))?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: i32,
    ) -> AppResult<()> {
        self.client()
            .await
            .change_message_visibility()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(visibility_timeout_secs)
            .send()
            .await
            .map_err(|err| {
                service_error("change_message_visibility", queue_url, boxed_error(&err))
            })?;
        Ok(())
    }

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> AppResult<BTreeMap<String, String>> {
        let names = names.iter().map(|name| QueueAttributeName::from(*name)).collect();
        let output = self
            .client()
            .await
            .get_queue_attributes()
            .queue_url(queue_url)
            .set_attribute_names(Some(names))
            .send()
            .await
            .map_err(|err| service_error("get_queue_attributes", queue_url, boxed_error(&err)))?;
        Ok(output
            .attributes()
            .into_iter()
            .flatten()
            .map(|(name, value)| (name.as_str().to_owned(), value.clone()))
            .collect())
    }
}
