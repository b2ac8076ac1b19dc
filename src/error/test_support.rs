use super::{ConfigError, MessageError, PollError, QueueError, StorageError, TestIdError};

macro_rules! impl_test_expectation {
    ($($error:ident),* $(,)?) => {
        $(
            impl From<&'static str> for $error {
                fn from(message: &'static str) -> Self {
                    $error::TestExpectation { message }
                }
            }

            impl From<String> for $error {
                fn from(value: String) -> Self {
                    $error::TestExpectationValue {
                        message: "Test expectation failed",
                        value,
                    }
                }
            }
        )*
    };
}

impl_test_expectation!(
    ConfigError,
    MessageError,
    PollError,
    QueueError,
    StorageError,
    TestIdError,
);
