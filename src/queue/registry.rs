use std::collections::BTreeMap;

use crate::config::FleetRole;
use crate::config::env::{EnvResolver, env_segment};
use crate::error::{AppError, AppResult, ConfigError, QueueError};

use super::QueueType;

pub const QUEUE_URL_COMMUNICATION: &str = "QUEUE_URL_COMMUNICATION";
pub const QUEUE_URL_TEST: &str = "QUEUE_URL_TEST";
pub const QUEUE_URL_SCALE: &str = "QUEUE_URL_SCALE";
pub const AGENT_GROUP: &str = "AGENT_GROUP";
pub const AGENT_GROUPS: &str = "AGENT_GROUPS";
pub const DEFAULT_AGENT_GROUP: &str = "default";

/// Queue URLs by family and agent group. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRegistry {
    test: BTreeMap<String, String>,
    scale: BTreeMap<String, String>,
    communications: String,
}

impl QueueRegistry {
    #[must_use]
    pub fn new(
        test: BTreeMap<String, String>,
        scale: BTreeMap<String, String>,
        communications: impl Into<String>,
    ) -> Self {
        Self {
            test,
            scale,
            communications: communications.into(),
        }
    }

    /// Agents get one test and one scale queue for their own group; the
    /// controller gets one of each per entry in `AGENT_GROUPS`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing key.
    pub fn from_env(env: &EnvResolver, role: FleetRole) -> AppResult<Self> {
        let communications = env.require(QUEUE_URL_COMMUNICATION)?;
        let mut test = BTreeMap::new();
        let mut scale = BTreeMap::new();

        match role {
            FleetRole::Agent => {
                let group = env
                    .get(AGENT_GROUP)
                    .unwrap_or_else(|| DEFAULT_AGENT_GROUP.to_owned());
                test.insert(group.clone(), env.require(QUEUE_URL_TEST)?);
                scale.insert(group, env.require(QUEUE_URL_SCALE)?);
            }
            FleetRole::Controller => {
                let groups = env.require(AGENT_GROUPS)?;
                let groups: Vec<&str> = groups
                    .split(',')
                    .map(str::trim)
                    .filter(|group| !group.is_empty())
                    .collect();
                if groups.is_empty() {
                    return Err(AppError::config(ConfigError::EmptyAgentGroups {
                        key: env.key(AGENT_GROUPS),
                    }));
                }
                for group in groups {
                    let suffix = env_segment(group);
                    test.insert(
                        group.to_owned(),
                        env.require(&format!("{}_{}", QUEUE_URL_TEST, suffix))?,
                    );
                    scale.insert(
                        group.to_owned(),
                        env.require(&format!("{}_{}", QUEUE_URL_SCALE, suffix))?,
                    );
                }
            }
        }

        Ok(Self {
            test,
            scale,
            communications,
        })
    }

    /// A single-entry family needs no name.
    ///
    /// # Errors
    ///
    /// Returns `NameRequired` or `UnknownName` for the test and scale families.
    pub fn url(&self, queue_type: QueueType, name: Option<&str>) -> AppResult<&str> {
        let family = match queue_type {
            QueueType::Communications => return Ok(self.communications.as_str()),
            QueueType::Test => &self.test,
            QueueType::Scale => &self.scale,
        };
        name.map_or_else(
            || {
                let mut urls = family.values();
                match (urls.next(), urls.next()) {
                    (Some(url), None) => Ok(url.as_str()),
                    _ => Err(AppError::queue(QueueError::NameRequired {
                        queue_type: queue_type.as_str(),
                        available: available(family),
                    })),
                }
            },
            |name| {
                family.get(name).map(String::as_str).ok_or_else(|| {
                    AppError::queue(QueueError::UnknownName {
                        queue_type: queue_type.as_str(),
                        name: name.to_owned(),
                        available: available(family),
                    })
                })
            },
        )
    }

    #[must_use]
    pub fn names(&self, queue_type: QueueType) -> Vec<&str> {
        match queue_type {
            QueueType::Test => self.test.keys().map(String::as_str).collect(),
            QueueType::Scale => self.scale.keys().map(String::as_str).collect(),
            QueueType::Communications => vec![QueueType::Communications.as_str()],
        }
    }

    /// Every queue as `(type, name, url)`.
    #[must_use]
    pub fn entries(&self) -> Vec<(QueueType, &str, &str)> {
        let test = self
            .test
            .iter()
            .map(|(name, url)| (QueueType::Test, name.as_str(), url.as_str()));
        let scale = self
            .scale
            .iter()
            .map(|(name, url)| (QueueType::Scale, name.as_str(), url.as_str()));
        test.chain(scale)
            .chain(std::iter::once((
                QueueType::Communications,
                QueueType::Communications.as_str(),
                self.communications.as_str(),
            )))
            .collect()
    }
}

fn available(family: &BTreeMap<String, String>) -> String {
    if family.is_empty() {
        return "(none)".to_owned();
    }
    family.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}
