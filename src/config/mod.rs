//! Configuration loading and environment resolution.
pub mod env;
mod loader;
mod parse;
pub mod types;

#[cfg(test)]
mod tests;

use std::time::Duration;

pub use env::{EnvResolver, EnvSource, MapEnv, ProcessEnv};
pub use loader::load_config;
pub use types::{AwsConfig, ConfigFile, FleetRole, NamingConfig};

#[cfg(test)]
pub(crate) use loader::load_config_file;
pub(crate) use parse::parse_duration_value;

use crate::error::{AppError, AppResult, ConfigError};
use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::queue::QueueTiming;
use crate::retry::{Jitter, RetryPolicy};
use crate::storage::TagSet;

/// Resolved process settings: file values merged over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub role: FleetRole,
    pub naming: NamingConfig,
    pub poll_interval: Duration,
    pub upload_retry: RetryPolicy,
    pub queue_timing: QueueTiming,
    pub default_tags: TagSet,
    pub aws: AwsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            role: FleetRole::default(),
            naming: NamingConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            upload_retry: RetryPolicy::default(),
            queue_timing: QueueTiming::default(),
            default_tags: TagSet::new(),
            aws: AwsConfig::default(),
        }
    }
}

impl Settings {
    /// Builds settings for `role` with every other value defaulted.
    #[must_use]
    pub fn for_role(role: FleetRole) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    /// Merges an optional config file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when a duration or numeric value is out of range.
    pub fn from_config(config: Option<ConfigFile>) -> AppResult<Self> {
        let mut settings = Self::default();
        let Some(config) = config else {
            return Ok(settings);
        };

        if let Some(role) = config.role {
            settings.role = role;
        }
        if let Some(naming) = config.naming {
            settings.naming = naming;
        }
        if let Some(interval) = config.poll.and_then(|poll| poll.interval) {
            settings.poll_interval = interval.to_duration("poll.interval")?;
        }
        if let Some(retry) = config.retry {
            if let Some(max_attempts) = retry.max_attempts {
                if max_attempts == 0 {
                    return Err(AppError::config(ConfigError::InvalidValue {
                        key: "retry.max_attempts".to_owned(),
                        value: max_attempts.to_string(),
                        reason: "Must be at least 1.".to_owned(),
                    }));
                }
                settings.upload_retry.max_attempts = max_attempts;
            }
            if let Some(base_delay) = retry.base_delay {
                settings.upload_retry.base_delay = base_delay.to_duration("retry.base_delay")?;
            }
            if let Some(jitter_ms) = retry.max_jitter_ms {
                settings.upload_retry.jitter = if jitter_ms == 0 {
                    Jitter::None
                } else {
                    Jitter::UpTo(Duration::from_millis(jitter_ms))
                };
            }
        }
        if let Some(queue) = config.queue {
            if let Some(wait) = queue.wait_time_secs {
                settings.queue_timing.wait_time_secs = check_wait_time("queue.wait_time_secs", wait)?;
            }
            if let Some(wait) = queue.cleanup_wait_secs {
                settings.queue_timing.cleanup_wait_secs =
                    check_wait_time("queue.cleanup_wait_secs", wait)?;
            }
            if let Some(visibility) = queue.visibility_timeout_secs {
                if visibility < 0 {
                    return Err(AppError::config(ConfigError::InvalidValue {
                        key: "queue.visibility_timeout_secs".to_owned(),
                        value: visibility.to_string(),
                        reason: "Must not be negative.".to_owned(),
                    }));
                }
                settings.queue_timing.visibility_timeout_secs = Some(visibility);
            }
        }
        if let Some(tags) = config.tags {
            settings.default_tags = TagSet::from(tags);
        }
        if let Some(aws) = config.aws {
            settings.aws = aws;
        }
        Ok(settings)
    }
}

// The queue service caps long polling at 20 seconds.
fn check_wait_time(key: &'static str, value: i32) -> AppResult<i32> {
    if (0..=20).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::config(ConfigError::InvalidValue {
            key: key.to_owned(),
            value: value.to_string(),
            reason: "Must be between 0 and 20 seconds.".to_owned(),
        }))
    }
}
