//! Cooperative cancellation for long-running waits.
//!
//! A [`CancelToken`] is threaded through the poller and anything else that
//! sleeps. Cancelling never aborts an in-flight service call; waiters observe
//! the flag at their next suspension point.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[derive(Debug, Clone)]
pub struct CancelSender {
    inner: Arc<watch::Sender<bool>>,
}

impl CancelSender {
    pub fn cancel(&self) {
        self.inner.send_replace(true);
    }

    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.inner.subscribe()),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.borrow()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub const fn never() -> Self {
        Self { rx: None }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Pends forever when the sender
    /// is gone without cancelling.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            std::future::pending::<()>().await;
            return;
        };
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[must_use]
pub fn cancel_channel() -> (CancelSender, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelSender {
            inner: Arc::new(tx),
        },
        CancelToken { rx: Some(rx) },
    )
}

/// Cancels on Ctrl+C or SIGTERM; exits quietly if cancelled elsewhere first.
pub fn setup_signal_cancel_handler(cancel: &CancelSender) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let mut token = cancel.token();

        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!("Failed to register SIGTERM handler: {}", err);
                None
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
                () = token.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, cancelling");
                    cancel.cancel();
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    info!("SIGTERM received, cancelling");
                    cancel.cancel();
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                () = token.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, cancelling");
                    cancel.cancel();
                }
            }
        }
    })
}
