//! Process-wide handles, built once and shared by `Arc`.

use std::sync::Arc;

use tracing::info;

use crate::access::{AccessCallback, AccessHook};
use crate::cancel::CancelToken;
use crate::config::{EnvResolver, EnvSource, ProcessEnv, Settings, load_config};
use crate::error::AppResult;
#[cfg(not(feature = "aws"))]
use crate::error::{AppError, ConfigError};
use crate::poll::Poller;
use crate::queue::{QueueApi, Queues};
use crate::scale::ScaleKeepalive;
use crate::storage::{ObjectStorage, ObjectStoreApi};

#[derive(Debug, Clone)]
pub struct FleetContext {
    pub settings: Settings,
    pub queues: Arc<Queues>,
    pub storage: Arc<ObjectStorage>,
    pub poller: Poller,
    pub cancel: CancelToken,
}

impl FleetContext {
    #[must_use]
    pub fn builder(settings: Settings) -> FleetContextBuilder {
        FleetContextBuilder::new(settings)
    }

    /// Loads the optional config file and builds a context over the
    /// process environment and the default service backends.
    ///
    /// # Errors
    ///
    /// Returns an error for an unreadable config file or when no backend is
    /// available.
    pub fn load(config_path: Option<&str>, cancel: CancelToken) -> AppResult<Self> {
        let settings = Settings::from_config(load_config(config_path)?)?;
        Self::builder(settings).cancel_token(cancel).build()
    }

    /// Resolves queue URLs and storage settings now instead of on first use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any missing required key.
    pub async fn init(&self) -> AppResult<()> {
        self.queues.init().await?;
        self.storage.init().await?;
        info!("Fleet context ready for {:?}", self.settings.role);
        Ok(())
    }

    #[must_use]
    pub fn keepalive(&self, group: Option<String>) -> ScaleKeepalive {
        ScaleKeepalive::new(Arc::clone(&self.queues), group)
    }
}

pub struct FleetContextBuilder {
    settings: Settings,
    env_source: Option<Arc<dyn EnvSource>>,
    queue_api: Option<Arc<dyn QueueApi>>,
    object_store: Option<Arc<dyn ObjectStoreApi>>,
    access_callback: Option<AccessCallback>,
    cancel: CancelToken,
}

impl FleetContextBuilder {
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self {
            settings,
            env_source: None,
            queue_api: None,
            object_store: None,
            access_callback: None,
            cancel: CancelToken::never(),
        }
    }

    #[must_use]
    pub fn env_source(mut self, source: Arc<dyn EnvSource>) -> Self {
        self.env_source = Some(source);
        self
    }

    #[must_use]
    pub fn queue_api(mut self, api: Arc<dyn QueueApi>) -> Self {
        self.queue_api = Some(api);
        self
    }

    #[must_use]
    pub fn object_store(mut self, api: Arc<dyn ObjectStoreApi>) -> Self {
        self.object_store = Some(api);
        self
    }

    #[must_use]
    pub fn access_callback(mut self, callback: AccessCallback) -> Self {
        self.access_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Nothing is resolved or connected here; see [`FleetContext::init`].
    ///
    /// # Errors
    ///
    /// Without the `aws` feature, returns `MissingBackend` when a queue or
    /// storage backend was not supplied.
    pub fn build(self) -> AppResult<FleetContext> {
        let source = self
            .env_source
            .unwrap_or_else(|| Arc::new(ProcessEnv) as Arc<dyn EnvSource>);
        let env = EnvResolver::new(source, &self.settings.naming);
        let access = self
            .access_callback
            .map(AccessHook::new)
            .unwrap_or_default();

        let queue_api = match self.queue_api {
            Some(api) => api,
            None => default_queue_api(&self.settings)?,
        };
        let object_store = match self.object_store {
            Some(api) => api,
            None => default_object_store(&self.settings)?,
        };

        let queues = Queues::new(
            queue_api,
            env.clone(),
            self.settings.role,
            self.settings.queue_timing,
            access.clone(),
        );
        let storage = ObjectStorage::new(
            object_store,
            env,
            self.settings.default_tags.clone(),
            access,
        );
        let poller = Poller::new(self.settings.poll_interval, self.cancel.clone());
        Ok(FleetContext {
            settings: self.settings,
            queues: Arc::new(queues),
            storage: Arc::new(storage),
            poller,
            cancel: self.cancel,
        })
    }
}

#[cfg(feature = "aws")]
#[expect(
    clippy::unnecessary_wraps,
    reason = "Signature shared with the build without the aws feature"
)]
fn default_queue_api(settings: &Settings) -> AppResult<Arc<dyn QueueApi>> {
    Ok(Arc::new(crate::queue::sqs::SqsQueueApi::new(settings.aws.clone())))
}

#[cfg(not(feature = "aws"))]
fn default_queue_api(_settings: &Settings) -> AppResult<Arc<dyn QueueApi>> {
    Err(AppError::config(ConfigError::MissingBackend { backend: "queue" }))
}

#[cfg(feature = "aws")]
#[expect(
    clippy::unnecessary_wraps,
    reason = "Signature shared with the build without the aws feature"
)]
fn default_object_store(settings: &Settings) -> AppResult<Arc<dyn ObjectStoreApi>> {
    Ok(Arc::new(crate::storage::s3::S3ObjectStore::new(settings.aws.clone())))
}

#[cfg(not(feature = "aws"))]
fn default_object_store(_settings: &Settings) -> AppResult<Arc<dyn ObjectStoreApi>> {
    Err(AppError::config(ConfigError::MissingBackend { backend: "storage" }))
}
