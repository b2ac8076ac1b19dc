//! In-process queue with visibility timeouts, for local runs and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AppError, AppResult, QueueError};

use super::{
    APPROXIMATE_NUMBER_OF_MESSAGES, APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE, OutgoingMessage,
    QueueApi, ReceiveRequest, ReceivedMessage,
};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const FAR_FUTURE: Duration = Duration::from_secs(946_080_000);

/// Write-side call counts across all queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOperationCounts {
    pub sent: u64,
    pub received: u64,
    pub deleted: u64,
    pub visibility_changes: u64,
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    message: OutgoingMessage,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: BTreeMap<String, Vec<StoredMessage>>,
    next_id: u64,
    counts: QueueOperationCounts,
}

#[derive(Debug, Default)]
pub struct MemoryQueueApi {
    state: Mutex<MemoryState>,
}

impl MemoryQueueApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages on `queue_url`, visible or not.
    #[must_use]
    pub fn message_count(&self, queue_url: &str) -> usize {
        self.state().queues.get(queue_url).map_or(0, Vec::len)
    }

    /// Ids of the messages on `queue_url`, oldest first.
    #[must_use]
    pub fn message_ids(&self, queue_url: &str) -> Vec<String> {
        self.state()
            .queues
            .get(queue_url)
            .map(|messages| {
                messages
                    .iter()
                    .map(|stored| stored.message_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn counts(&self) -> QueueOperationCounts {
        self.state().counts
    }
}

/// Clamps instead of overflowing when `delay` reaches past the clock's range.
fn hidden_until(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[async_trait]
impl QueueApi for MemoryQueueApi {
    async fn send_message(&self, queue_url: &str, message: OutgoingMessage) -> AppResult<String> {
        let mut state = self.state();
        state.next_id = state.next_id.saturating_add(1);
        let message_id = format!("msg-{:06}", state.next_id);
        state.counts.sent = state.counts.sent.saturating_add(1);
        state
            .queues
            .entry(queue_url.to_owned())
            .or_default()
            .push(StoredMessage {
                message_id: message_id.clone(),
                message,
                visible_at: Instant::now(),
                receipt_handle: None,
                receive_count: 0,
            });
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> AppResult<Option<ReceivedMessage>> {
        let now = Instant::now();
        let visibility = request
            .visibility_timeout_secs
            .map_or(DEFAULT_VISIBILITY_TIMEOUT, |secs| {
                Duration::from_secs(u64::try_from(secs).unwrap_or(0))
            });
        let mut state = self.state();
        let Some(stored) = state
            .queues
            .get_mut(queue_url)
            .and_then(|messages| messages.iter_mut().find(|stored| stored.visible_at <= now))
        else {
            return Ok(None);
        };

        stored.receive_count = stored.receive_count.saturating_add(1);
        stored.visible_at = hidden_until(now, visibility);
        let receipt_handle = format!("{}:{}", stored.message_id, stored.receive_count);
        stored.receipt_handle = Some(receipt_handle.clone());
        let received = ReceivedMessage {
            message_id: stored.message_id.clone(),
            receipt_handle,
            body: stored.message.body.clone(),
            attributes: stored
                .message
                .attributes
                .iter()
                .filter(|(name, _)| request.wants(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        };
        state.counts.received = state.counts.received.saturating_add(1);
        Ok(Some(received))
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> AppResult<()> {
        let mut state = self.state();
        if let Some(messages) = state.queues.get_mut(queue_url) {
            messages.retain(|stored| stored.receipt_handle.as_deref() != Some(receipt_handle));
        }
        state.counts.deleted = state.counts.deleted.saturating_add(1);
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: i32,
    ) -> AppResult<()> {
        let mut state = self.state();
        let stored = state.queues.get_mut(queue_url).and_then(|messages| {
            messages
                .iter_mut()
                .find(|stored| stored.receipt_handle.as_deref() == Some(receipt_handle))
        });
        let Some(stored) = stored else {
            return Err(AppError::queue(QueueError::ReceiptNotFound {
                queue_url: queue_url.to_owned(),
                receipt_handle: receipt_handle.to_owned(),
            }));
        };
        let secs = u64::try_from(visibility_timeout_secs).unwrap_or(0);
        stored.visible_at = hidden_until(Instant::now(), Duration::from_secs(secs));
        state.counts.visibility_changes = state.counts.visibility_changes.saturating_add(1);
        Ok(())
    }

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> AppResult<BTreeMap<String, String>> {
        let now = Instant::now();
        let state = self.state();
        let (visible, in_flight) = state.queues.get(queue_url).map_or((0, 0), |messages| {
            let visible = messages
                .iter()
                .filter(|stored| stored.visible_at <= now)
                .count();
            (visible, messages.len().saturating_sub(visible))
        });
        let mut attributes = BTreeMap::new();
        for name in names {
            match *name {
                APPROXIMATE_NUMBER_OF_MESSAGES => {
                    attributes.insert((*name).to_owned(), visible.to_string());
                }
                APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE => {
                    attributes.insert((*name).to_owned(), in_flight.to_string());
                }
                _ => {}
            }
        }
        Ok(attributes)
    }
}
