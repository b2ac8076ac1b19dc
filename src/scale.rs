//! Scale-protection keepalive.
//!
//! While an agent is busy it keeps exactly one message on its group's scale
//! queue; the autoscaler reads the queue depth and will not shrink the fleet
//! below it. A refresh always sends the new message before deleting the old
//! one, so the queue is never observed empty mid-refresh.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::message::SCALE_ATTRIBUTE;
use crate::queue::{
    AttributeValue, MessageAttributes, OutgoingMessage, QueueType, Queues, ReceivedMessage,
    ReceiveRequest,
};

pub const KEEPALIVE_BODY: &str = "Need an instance";

#[derive(Debug, Clone)]
pub struct ScaleKeepalive {
    queues: Arc<Queues>,
    group: Option<String>,
}

impl ScaleKeepalive {
    /// `group` may be omitted when only one scale queue is configured.
    #[must_use]
    pub const fn new(queues: Arc<Queues>, group: Option<String>) -> Self {
        Self { queues, group }
    }

    /// Replaces the current keepalive with a fresh one and returns the new
    /// message id. A failed lookup or delete of the old message is logged.
    ///
    /// # Errors
    ///
    /// Returns an error when the scale queue cannot be resolved or the send
    /// fails.
    pub async fn refresh(&self) -> AppResult<String> {
        let queue_url = self
            .queues
            .get_queue_url(QueueType::Scale, self.group())
            .await?;
        let previous = self.peek().await.unwrap_or_else(|err| {
            warn!("Could not read current keepalive from {}: {}", queue_url, err);
            None
        });

        let message_id = self
            .queues
            .send(QueueType::Scale, self.group(), self.keepalive_message())
            .await?;
        debug!("Sent keepalive {} to {}", message_id, queue_url);

        if let Some(previous) = previous
            && let Err(err) = self
                .queues
                .delete_by_handle(&queue_url, &previous.receipt_handle)
                .await
        {
            warn!(
                "Could not delete previous keepalive {}: {}",
                previous.message_id, err
            );
        }
        Ok(message_id)
    }

    /// Removes the current keepalive, if any, and returns its message id.
    /// Failures are logged and read as `None`.
    pub async fn delete_keepalive(&self) -> Option<String> {
        let queue_url = match self.queues.get_queue_url(QueueType::Scale, self.group()).await {
            Ok(url) => url,
            Err(err) => {
                warn!("Scale queue unavailable: {}", err);
                return None;
            }
        };
        let current = match self.peek().await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!("No keepalive on {} to delete", queue_url);
                return None;
            }
            Err(err) => {
                warn!("Could not read keepalive from {}: {}", queue_url, err);
                return None;
            }
        };
        match self
            .queues
            .delete_by_handle(&queue_url, &current.receipt_handle)
            .await
        {
            Ok(()) => {
                info!("Deleted keepalive {}", current.message_id);
                Some(current.message_id)
            }
            Err(err) => {
                warn!("Could not delete keepalive {}: {}", current.message_id, err);
                None
            }
        }
    }

    fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn keepalive_message(&self) -> OutgoingMessage {
        let mut attributes = MessageAttributes::new();
        attributes.insert(
            SCALE_ATTRIBUTE.to_owned(),
            AttributeValue::String(self.group().unwrap_or("default").to_owned()),
        );
        OutgoingMessage {
            body: KEEPALIVE_BODY.to_owned(),
            attributes,
        }
    }

    /// Receives with a zero visibility timeout so the message stays visible
    /// to the autoscaler.
    async fn peek(&self) -> AppResult<Option<ReceivedMessage>> {
        let request = ReceiveRequest::all_attributes(0, Some(0));
        self.queues
            .receive_with(QueueType::Scale, self.group(), &request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessHook;
    use crate::config::{EnvResolver, FleetRole, MapEnv, NamingConfig};
    use crate::error::AppError;
    use crate::queue::memory::MemoryQueueApi;
    use crate::queue::{QueueApi, QueueTiming};
    use crate::test_support::run_async_test;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::{Mutex, PoisonError};

    const SCALE_URL: &str = "https://queue.local/scale";

    /// Logs each call with the scale queue depth right after it.
    #[derive(Debug, Default)]
    struct RecordingQueueApi {
        inner: MemoryQueueApi,
        calls: Mutex<Vec<(&'static str, usize)>>,
    }

    impl RecordingQueueApi {
        fn record(&self, call: &'static str) {
            let depth = self.inner.message_count(SCALE_URL);
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((call, depth));
        }

        fn take_calls(&self) -> Vec<(&'static str, usize)> {
            std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
        }
    }

    #[async_trait]
    impl QueueApi for RecordingQueueApi {
        async fn send_message(&self, queue_url: &str, message: OutgoingMessage) -> AppResult<String> {
            let sent = self.inner.send_message(queue_url, message).await;
            self.record("send");
            sent
        }

        async fn receive_message(
            &self,
            queue_url: &str,
            request: &ReceiveRequest,
        ) -> AppResult<Option<ReceivedMessage>> {
            let received = self.inner.receive_message(queue_url, request).await;
            self.record("receive");
            received
        }

        async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> AppResult<()> {
            let deleted = self.inner.delete_message(queue_url, receipt_handle).await;
            self.record("delete");
            deleted
        }

        async fn change_visibility(
            &self,
            queue_url: &str,
            receipt_handle: &str,
            visibility_timeout_secs: i32,
        ) -> AppResult<()> {
            self.inner
                .change_visibility(queue_url, receipt_handle, visibility_timeout_secs)
                .await
        }

        async fn get_attributes(
            &self,
            queue_url: &str,
            names: &[&str],
        ) -> AppResult<BTreeMap<String, String>> {
            self.inner.get_attributes(queue_url, names).await
        }
    }

    fn keepalive_with<A>(api: &Arc<A>) -> ScaleKeepalive
    where
        A: QueueApi + 'static,
    {
        let env = MapEnv::new()
            .with("FLEETAGENT_DEV_QUEUE_URL_COMMUNICATION", "https://queue.local/comms")
            .with("FLEETAGENT_DEV_QUEUE_URL_TEST", "https://queue.local/test")
            .with("FLEETAGENT_DEV_QUEUE_URL_SCALE", SCALE_URL);
        let api: Arc<dyn QueueApi> = api.clone();
        let queues = Queues::new(
            api,
            EnvResolver::new(Arc::new(env), &NamingConfig::default()),
            FleetRole::Agent,
            QueueTiming::default(),
            AccessHook::default(),
        );
        ScaleKeepalive::new(Arc::new(queues), None)
    }

    #[test]
    fn empty_queue_is_a_no_op() -> AppResult<()> {
        run_async_test(async {
            let api = Arc::new(MemoryQueueApi::new());
            let keepalive = keepalive_with(&api);
            if keepalive.delete_keepalive().await.is_some() {
                return Err(AppError::queue("nothing should be deleted"));
            }
            if api.counts().deleted != 0 {
                return Err(AppError::queue("no delete call expected"));
            }
            Ok(())
        })
    }

    #[test]
    fn two_refreshes_leave_one_message() -> AppResult<()> {
        run_async_test(async {
            let api = Arc::new(MemoryQueueApi::new());
            let keepalive = keepalive_with(&api);
            let first = keepalive.refresh().await?;
            let second = keepalive.refresh().await?;
            if first == second {
                return Err(AppError::queue("refresh should send a new message"));
            }
            if api.message_ids(SCALE_URL) != [second.clone()] {
                return Err(AppError::queue(format!(
                    "expected only {}, found {:?}",
                    second,
                    api.message_ids(SCALE_URL)
                )));
            }

            if keepalive.delete_keepalive().await.as_deref() != Some(second.as_str()) {
                return Err(AppError::queue("delete should return the live id"));
            }
            if api.message_count(SCALE_URL) != 0 {
                return Err(AppError::queue("queue should be empty"));
            }
            Ok(())
        })
    }

    #[test]
    fn first_refresh_leaves_exactly_one_message() -> AppResult<()> {
        run_async_test(async {
            let api = Arc::new(MemoryQueueApi::new());
            let keepalive = keepalive_with(&api);
            let sent = keepalive.refresh().await?;
            if api.message_ids(SCALE_URL) != [sent] {
                return Err(AppError::queue(format!(
                    "expected one keepalive, found {:?}",
                    api.message_ids(SCALE_URL)
                )));
            }
            if api.counts().deleted != 0 {
                return Err(AppError::queue("nothing to delete on an empty queue"));
            }
            Ok(())
        })
    }

    #[test]
    fn refresh_sends_before_deleting() -> AppResult<()> {
        run_async_test(async {
            let api = Arc::new(RecordingQueueApi::default());
            let keepalive = keepalive_with(&api);
            keepalive.refresh().await?;
            api.take_calls();

            keepalive.refresh().await?;
            let calls = api.take_calls();
            let order: Vec<&str> = calls.iter().map(|(call, _)| *call).collect();
            if order != ["receive", "send", "delete"] {
                return Err(AppError::queue(format!("unexpected call order {:?}", order)));
            }
            if calls.iter().any(|(_, depth)| *depth == 0) {
                return Err(AppError::queue(format!(
                    "scale queue emptied during refresh: {:?}",
                    calls
                )));
            }
            if api.inner.message_count(SCALE_URL) != 1 {
                return Err(AppError::queue("refresh should leave one keepalive"));
            }
            Ok(())
        })
    }
}
