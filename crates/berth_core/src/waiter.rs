//! Poll-until-ready for asynchronously provisioned resources.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use berth_provider::{CloudProvider, ProviderError, RemoteResource, ResourceKind};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Poll interval and overall bound for a wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            timeout_ms: 600_000,
        }
    }
}

impl WaitSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Why a wait ended without the resource becoming ready.
#[derive(Debug)]
pub enum WaitError {
    Timeout {
        waited: Duration,
        last: Option<RemoteResource>,
    },
    Cancelled,
    Provider(ProviderError),
}

/// Resolves once the signal reads `true`. Never resolves if the sender is
/// dropped without cancelling, or if there is no signal.
pub(crate) fn cancellation(signal: Option<watch::Receiver<bool>>) -> impl Future<Output = ()> {
    async move {
        let Some(mut rx) = signal else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Generic poll-until-ready primitive.
#[derive(Clone)]
pub struct Waiter {
    provider: Arc<dyn CloudProvider>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Waiter {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider, cancel: None }
    }

    /// Abort waits when the signal turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Poll `id` every `interval` until `predicate` holds or `timeout` elapses.
    ///
    /// Transient poll errors are logged and polling continues.
    pub async fn wait_until_ready<P>(
        &self,
        kind: ResourceKind,
        id: &str,
        predicate: P,
        interval: Duration,
        timeout: Duration,
    ) -> Result<RemoteResource, WaitError>
    where
        P: Fn(&RemoteResource) -> bool,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let cancelled = cancellation(self.cancel.clone());
        tokio::pin!(cancelled);

        let mut last = None;
        let mut polls = 0u32;
        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut cancelled => return Err(WaitError::Cancelled),
                polled = tokio::time::timeout_at(deadline, self.provider.poll(kind, id)) => polled,
            };
            polls += 1;

            match polled {
                Ok(Ok(resource)) => {
                    if predicate(&resource) {
                        debug!("{} {} ready after {} poll(s)", kind, id, polls);
                        return Ok(resource);
                    }
                    debug!("{} {} not ready (state {:?})", kind, id, resource.state);
                    last = Some(resource);
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("Transient error polling {} {}: {}", kind, id, e);
                }
                Ok(Err(e)) => return Err(WaitError::Provider(e)),
                Err(_elapsed) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    waited: now - started,
                    last,
                });
            }

            let wake = (now + interval).min(deadline);
            tokio::select! {
                biased;
                _ = &mut cancelled => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
