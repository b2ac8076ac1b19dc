use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};

/// Which side of the fleet this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetRole {
    Controller,
    #[default]
    Agent,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub role: Option<FleetRole>,
    pub naming: Option<NamingConfig>,
    pub poll: Option<PollConfig>,
    pub retry: Option<RetryConfig>,
    pub queue: Option<QueueConfig>,
    pub tags: Option<BTreeMap<String, String>>,
    pub aws: Option<AwsConfig>,
}

/// Overrides for the environment prefix inputs.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct NamingConfig {
    pub application_name: Option<String>,
    pub system_name: Option<String>,
    pub service_name: Option<String>,
    pub controller_application_name: Option<String>,
    pub controller_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollConfig {
    pub interval: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<DurationValue>,
    pub max_jitter_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueConfig {
    pub wait_time_secs: Option<i32>,
    pub visibility_timeout_secs: Option<i32>,
    pub cleanup_wait_secs: Option<i32>,
}

/// Static credentials and endpoint overrides; everything else comes from the
/// default AWS provider chain.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Millis(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self, key: &'static str) -> AppResult<Duration> {
        match self {
            DurationValue::Millis(0) => Err(AppError::config(ConfigError::InvalidValue {
                key: key.to_owned(),
                value: "0".to_owned(),
                reason: "Duration must be > 0.".to_owned(),
            })),
            DurationValue::Millis(millis) => Ok(Duration::from_millis(*millis)),
            DurationValue::Text(text) => super::parse_duration_value(text).map_err(|reason| {
                AppError::config(ConfigError::InvalidValue {
                    key: key.to_owned(),
                    value: text.clone(),
                    reason,
                })
            }),
        }
    }
}
