//! Queue primitives.
//!
//! [`Queues`] resolves the three logical queues (test dispatch, scale
//! protection, communications) from the environment once, then passes calls
//! straight through to a [`QueueApi`] backend. Every successful call notifies
//! the access hook.

pub mod memory;
mod registry;
#[cfg(feature = "aws")]
pub mod sqs;


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::access::{AccessChannel, AccessHook};
use crate::config::{EnvResolver, FleetRole};
use crate::error::AppResult;

pub use registry::QueueRegistry;

pub const ALL_ATTRIBUTES: &str = "All";
pub const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
pub const APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE: &str =
    "ApproximateNumberOfMessagesNotVisible";

const DEFAULT_WAIT_TIME_SECS: i32 = 20;
const DEFAULT_CLEANUP_WAIT_SECS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueType {
    Test,
    Scale,
    Communications,
}

impl QueueType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            QueueType::Test => "test",
            QueueType::Scale => "scale",
            QueueType::Communications => "communications",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Binary(Bytes),
}

impl AttributeValue {
    #[must_use]
    pub const fn data_type(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "String",
            AttributeValue::Binary(_) => "Binary",
        }
    }
}

pub type MessageAttributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: String,
    pub attributes: MessageAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// `None` keeps the queue's own default.
    pub visibility_timeout_secs: Option<i32>,
    pub wait_time_secs: i32,
    pub attribute_names: Vec<String>,
}

impl ReceiveRequest {
    #[must_use]
    pub fn all_attributes(wait_time_secs: i32, visibility_timeout_secs: Option<i32>) -> Self {
        Self {
            visibility_timeout_secs,
            wait_time_secs,
            attribute_names: vec![ALL_ATTRIBUTES.to_owned()],
        }
    }

    #[must_use]
    pub fn wants(&self, name: &str) -> bool {
        self.attribute_names
            .iter()
            .any(|wanted| wanted == ALL_ATTRIBUTES || wanted == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTiming {
    /// Long-poll wait for ordinary receives.
    pub wait_time_secs: i32,
    pub visibility_timeout_secs: Option<i32>,
    /// Short wait used while draining.
    pub cleanup_wait_secs: i32,
}

impl Default for QueueTiming {
    fn default() -> Self {
        Self {
            wait_time_secs: DEFAULT_WAIT_TIME_SECS,
            visibility_timeout_secs: None,
            cleanup_wait_secs: DEFAULT_CLEANUP_WAIT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub visible: u64,
    pub in_flight: u64,
}

#[async_trait]
pub trait QueueApi: Send + Sync + fmt::Debug {
    /// Returns the service-assigned message id.
    async fn send_message(&self, queue_url: &str, message: OutgoingMessage) -> AppResult<String>;

    /// Receives at most one message.
    async fn receive_message(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> AppResult<Option<ReceivedMessage>>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> AppResult<()>;

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: i32,
    ) -> AppResult<()>;

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> AppResult<BTreeMap<String, String>>;
}

#[derive(Debug)]
pub struct Queues {
    api: Arc<dyn QueueApi>,
    env: EnvResolver,
    role: FleetRole,
    timing: QueueTiming,
    access: AccessHook,
    registry: OnceCell<QueueRegistry>,
}

impl Queues {
    #[must_use]
    pub fn new(
        api: Arc<dyn QueueApi>,
        env: EnvResolver,
        role: FleetRole,
        timing: QueueTiming,
        access: AccessHook,
    ) -> Self {
        Self {
            api,
            env,
            role,
            timing,
            access,
            registry: OnceCell::new(),
        }
    }

    /// Skips environment resolution and uses `registry` as-is.
    #[must_use]
    pub fn with_registry(mut self, registry: QueueRegistry) -> Self {
        self.registry = OnceCell::new_with(Some(registry));
        self
    }

    #[must_use]
    pub const fn role(&self) -> FleetRole {
        self.role
    }

    #[must_use]
    pub const fn timing(&self) -> QueueTiming {
        self.timing
    }

    /// Resolves queue URLs on first use; concurrent first callers share one
    /// resolution and later calls are free.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a required URL is missing.
    pub async fn init(&self) -> AppResult<&QueueRegistry> {
        self.registry
            .get_or_try_init(|| async {
                QueueRegistry::from_env(&self.env, self.role).inspect(|registry| {
                    info!(
                        "Queue registry ready: test={:?} scale={:?}",
                        registry.names(QueueType::Test),
                        registry.names(QueueType::Scale)
                    );
                })
            })
            .await
    }

    /// # Errors
    ///
    /// Returns an error if a group name is required but missing, or unknown.
    pub async fn get_queue_url(&self, queue_type: QueueType, name: Option<&str>) -> AppResult<String> {
        Ok(self.init().await?.url(queue_type, name)?.to_owned())
    }

    /// # Errors
    ///
    /// Returns an error when the queue cannot be resolved or the send fails.
    pub async fn send(
        &self,
        queue_type: QueueType,
        name: Option<&str>,
        message: OutgoingMessage,
    ) -> AppResult<String> {
        let queue_url = self.get_queue_url(queue_type, name).await?;
        let message_id = self.api.send_message(&queue_url, message).await?;
        self.access.notify(AccessChannel::Queue);
        debug!("Sent {} message {}", queue_type, message_id);
        Ok(message_id)
    }

    /// Receives one message with every attribute, long-polling for the
    /// configured wait time.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue cannot be resolved or the receive fails.
    pub async fn receive(
        &self,
        queue_type: QueueType,
        name: Option<&str>,
        visibility_timeout_secs: Option<i32>,
    ) -> AppResult<Option<ReceivedMessage>> {
        let request = ReceiveRequest::all_attributes(
            self.timing.wait_time_secs,
            visibility_timeout_secs.or(self.timing.visibility_timeout_secs),
        );
        self.receive_with(queue_type, name, &request).await
    }

    /// # Errors
    ///
    /// Returns an error when the queue cannot be resolved or the receive fails.
    pub async fn receive_with(
        &self,
        queue_type: QueueType,
        name: Option<&str>,
        request: &ReceiveRequest,
    ) -> AppResult<Option<ReceivedMessage>> {
        let queue_url = self.get_queue_url(queue_type, name).await?;
        let message = self.api.receive_message(&queue_url, request).await?;
        self.access.notify(AccessChannel::Queue);
        if let Some(message) = message.as_ref() {
            debug!("Received {} message {}", queue_type, message.message_id);
        }
        Ok(message)
    }

    /// # Errors
    ///
    /// Returns an error when the queue cannot be resolved or the delete fails.
    pub async fn delete(
        &self,
        queue_type: QueueType,
        name: Option<&str>,
        receipt_handle: &str,
    ) -> AppResult<()> {
        let queue_url = self.get_queue_url(queue_type, name).await?;
        self.delete_by_handle(&queue_url, receipt_handle).await
    }

    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn delete_by_handle(&self, queue_url: &str, receipt_handle: &str) -> AppResult<()> {
        self.api.delete_message(queue_url, receipt_handle).await?;
        self.access.notify(AccessChannel::Queue);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error when the queue cannot be resolved or the change fails.
    pub async fn change_visibility(
        &self,
        queue_type: QueueType,
        name: Option<&str>,
        receipt_handle: &str,
        visibility_timeout_secs: i32,
    ) -> AppResult<()> {
        let queue_url = self.get_queue_url(queue_type, name).await?;
        self.change_visibility_by_handle(&queue_url, receipt_handle, visibility_timeout_secs)
            .await
    }

    /// # Errors
    ///
    /// Returns an error when the receipt is stale or the call fails.
    pub async fn change_visibility_by_handle(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: i32,
    ) -> AppResult<()> {
        self.api
            .change_visibility(queue_url, receipt_handle, visibility_timeout_secs)
            .await?;
        self.access.notify(AccessChannel::Queue);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error when the queue cannot be resolved or the call fails.
    pub async fn get_attributes(
        &self,
        queue_type: QueueType,
        name: Option<&str>,
        names: &[&str],
    ) -> AppResult<BTreeMap<String, String>> {
        let queue_url = self.get_queue_url(queue_type, name).await?;
        let attributes = self.api.get_attributes(&queue_url, names).await?;
        self.access.notify(AccessChannel::Queue);
        Ok(attributes)
    }

    /// Approximate depth of every configured queue, keyed by `type:name`.
    ///
    /// # Errors
    ///
    /// Returns the first failure; counts that do not parse read as zero.
    pub async fn get_queue_attributes_map(&self) -> AppResult<BTreeMap<String, QueueDepth>> {
        let registry = self.init().await?;
        let mut depths = BTreeMap::new();
        for (queue_type, name, queue_url) in registry.entries() {
            let attributes = self
                .api
                .get_attributes(
                    queue_url,
                    &[
                        APPROXIMATE_NUMBER_OF_MESSAGES,
                        APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE,
                    ],
                )
                .await?;
            let count = |key: &str| {
                attributes
                    .get(key)
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(0)
            };
            depths.insert(
                format!("{}:{}", queue_type, name),
                QueueDepth {
                    visible: count(APPROXIMATE_NUMBER_OF_MESSAGES),
                    in_flight: count(APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE),
                },
            );
        }
        self.access.notify(AccessChannel::Queue);
        Ok(depths)
    }

    /// Drains a queue with short receives and deletes. Test isolation only.
    ///
    /// # Errors
    ///
    /// Returns the first receive or delete failure.
    pub async fn clean_up_queue(&self, queue_type: QueueType, name: Option<&str>) -> AppResult<usize> {
        let queue_url = self.get_queue_url(queue_type, name).await?;
        let request = ReceiveRequest::all_attributes(self.timing.cleanup_wait_secs, None);
        let mut drained = 0_usize;
        while let Some(message) = self.api.receive_message(&queue_url, &request).await? {
            self.api
                .delete_message(&queue_url, &message.receipt_handle)
                .await?;
            drained = drained.saturating_add(1);
        }
        if drained > 0 {
            info!("Drained {} message(s) from {} queue {}", drained, queue_type, queue_url);
        }
        Ok(drained)
    }

    /// Drains every configured queue.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn clean_up_queues(&self) -> AppResult<usize> {
        let registry = self.init().await?;
        let mut drained = 0_usize;
        for (queue_type, name, _) in registry.entries() {
            let name = (queue_type != QueueType::Communications).then_some(name);
            drained = drained.saturating_add(self.clean_up_queue(queue_type, name).await?);
        }
        Ok(drained)
    }
}
