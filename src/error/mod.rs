mod app;
mod config;
mod message;
mod poll;
mod queue;
mod storage;
mod test_id;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use message::MessageError;
pub use poll::PollError;
pub use queue::QueueError;
pub use storage::StorageError;
pub use test_id::TestIdError;
