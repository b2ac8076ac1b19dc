use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{message}")]
    TimedOut { message: String },
    #[error("Polling was cancelled.")]
    Cancelled,
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
