//! Last-successful-access notification.
//!
//! Hosts use this to feed a health check: every successful queue or storage
//! call reports the channel and time. A failing callback is logged and never
//! fails the call that triggered it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

pub type AccessCallback = Arc<dyn Fn(AccessChannel, DateTime<Utc>) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessChannel {
    Queue,
    Storage,
}

impl AccessChannel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AccessChannel::Queue => "queue",
            AccessChannel::Storage => "storage",
        }
    }
}

#[derive(Clone, Default)]
pub struct AccessHook {
    callback: Option<AccessCallback>,
}

impl fmt::Debug for AccessHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessHook")
            .field("installed", &self.callback.is_some())
            .finish()
    }
}

impl AccessHook {
    #[must_use]
    pub const fn new(callback: AccessCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn notify(&self, channel: AccessChannel) {
        let Some(callback) = self.callback.as_ref() else {
            return;
        };
        if let Err(err) = callback(channel, Utc::now()) {
            warn!("{} access callback failed: {}", channel.as_str(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn failing_callback_is_swallowed() -> Result<(), String> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let hook = AccessHook::new(Arc::new(move |channel, _at| {
            recorder
                .lock()
                .map_err(|err| err.to_string())?
                .push(channel);
            Err("health endpoint down".to_owned())
        }));
        hook.notify(AccessChannel::Queue);
        hook.notify(AccessChannel::Storage);
        let seen = seen.lock().map_err(|err| err.to_string())?;
        if *seen != [AccessChannel::Queue, AccessChannel::Storage] {
            return Err(format!("unexpected notifications: {:?}", seen));
        }
        Ok(())
    }

    #[test]
    fn empty_hook_is_noop() {
        AccessHook::default().notify(AccessChannel::Queue);
    }
}
