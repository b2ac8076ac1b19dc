//! Environment-scoped configuration keys.
//!
//! Every deployment-specific value is read from `{PREFIX}_{KEY}`, where the
//! prefix is derived from the application/system/service naming triple, or from
//! an explicit controller environment when one is set.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AppError, AppResult, ConfigError};

use super::types::NamingConfig;

pub const APPLICATION_NAME_VAR: &str = "APPLICATION_NAME";
pub const SYSTEM_NAME_VAR: &str = "SYSTEM_NAME";
pub const SERVICE_NAME_VAR: &str = "SERVICE_NAME";
pub const CONTROLLER_APPLICATION_NAME_VAR: &str = "CONTROLLER_APPLICATION_NAME";
pub const CONTROLLER_ENV_VAR: &str = "CONTROLLER_ENV";

const DEFAULT_APPLICATION_NAME: &str = "fleetagent";
const DEFAULT_SYSTEM_NAME: &str = "dev";
const DEFAULT_CONTROLLER_APPLICATION_NAME: &str = "fleetcontroller";

/// Read-only view of a process environment.
pub trait EnvSource: Send + Sync + fmt::Debug {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed key/value environment, used by tests and embedders that do not want
/// to touch the real process environment.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    values: BTreeMap<String, String>,
}

impl MapEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct EnvResolver {
    source: Arc<dyn EnvSource>,
    prefix: String,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(Arc::new(ProcessEnv), &NamingConfig::default())
    }
}

impl EnvResolver {
    /// Builds a resolver; explicit naming values win over the environment.
    #[must_use]
    pub fn new(source: Arc<dyn EnvSource>, naming: &NamingConfig) -> Self {
        let prefix = derive_prefix(source.as_ref(), naming);
        Self { source, prefix }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn key(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    /// Looks up `{PREFIX}_{name}`; blank values count as unset.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        non_blank(self.source.var(&self.key(name)))
    }

    /// Looks up `{PREFIX}_{name}`.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnv` when the key is unset or blank.
    pub fn require(&self, name: &str) -> AppResult<String> {
        self.get(name).ok_or_else(|| {
            AppError::config(ConfigError::MissingEnv {
                key: self.key(name),
            })
        })
    }
}

/// Upper-cases and replaces everything that is not ASCII alphanumeric with `_`.
#[must_use]
pub fn env_segment(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn derive_prefix(source: &dyn EnvSource, naming: &NamingConfig) -> String {
    let lookup = |configured: &Option<String>, var: &str| {
        non_blank(configured.clone()).or_else(|| non_blank(source.var(var)))
    };

    if let Some(controller_env) = lookup(&naming.controller_env, CONTROLLER_ENV_VAR) {
        let application = lookup(
            &naming.controller_application_name,
            CONTROLLER_APPLICATION_NAME_VAR,
        )
        .unwrap_or_else(|| DEFAULT_CONTROLLER_APPLICATION_NAME.to_owned());
        return format!("{}_{}", env_segment(&application), env_segment(&controller_env));
    }

    let application = lookup(&naming.application_name, APPLICATION_NAME_VAR)
        .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_owned());
    let system = lookup(&naming.system_name, SYSTEM_NAME_VAR)
        .unwrap_or_else(|| DEFAULT_SYSTEM_NAME.to_owned());
    let mut prefix = format!("{}_{}", env_segment(&application), env_segment(&system));
    if let Some(service) = lookup(&naming.service_name, SERVICE_NAME_VAR) {
        prefix.push('_');
        prefix.push_str(&env_segment(&service));
    }
    prefix
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
