use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("A {queue_type} queue name is required; configured names: {available}.")]
    NameRequired {
        queue_type: &'static str,
        available: String,
    },
    #[error("No {queue_type} queue named '{name}'; configured names: {available}.")]
    UnknownName {
        queue_type: &'static str,
        name: String,
        available: String,
    },
    #[error("Queue service error during {operation} on {queue_url}: {source}")]
    Service {
        operation: &'static str,
        queue_url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Receipt handle '{receipt_handle}' does not match any in-flight message on {queue_url}.")]
    ReceiptNotFound {
        queue_url: String,
        receipt_handle: String,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
