//! How the monitoring engine obtains a [`MonitorContext`] from its host.
//!
//! The host builds its context during startup and publishes it through
//! [`HostReadiness`] once startup has finished. Anything that runs during
//! startup must be handed the context directly; waiting on readiness from
//! inside the startup path would never complete.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::monitor::{MonitorContext, MonitorError};

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn acquire(&self) -> Result<MonitorContext, MonitorError>;
}

#[async_trait]
impl ContextProvider for MonitorContext {
    async fn acquire(&self) -> Result<MonitorContext, MonitorError> {
        Ok(self.clone())
    }
}

pub struct HostReadiness {
    tx: watch::Sender<Option<MonitorContext>>,
}

impl Default for HostReadiness {
    fn default() -> Self {
        Self::new()
    }
}

impl HostReadiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Marks the host ready. Pending and future acquisitions get `ctx`.
    pub fn publish(&self, ctx: MonitorContext) {
        self.tx.send_replace(Some(ctx));
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn provider(&self) -> ReadyContextProvider {
        ReadyContextProvider {
            rx: self.tx.subscribe(),
        }
    }
}

/// Waits for the host to publish its context.
#[derive(Clone)]
pub struct ReadyContextProvider {
    rx: watch::Receiver<Option<MonitorContext>>,
}

#[async_trait]
impl ContextProvider for ReadyContextProvider {
    async fn acquire(&self) -> Result<MonitorContext, MonitorError> {
        let mut rx = self.rx.clone();
        let ready = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| MonitorError::ContextUnavailable("host shut down before becoming ready".to_string()))?;
        ready
            .as_ref()
            .cloned()
            .ok_or_else(|| MonitorError::ContextUnavailable("host context missing".to_string()))
    }
}
