//! Supervised background execution
//!
//! Each Active addon that declares a background task gets its own spawned
//! task driving `Addon::tick` on a fixed interval. An invocation that
//! exceeds its budget is abandoned and logged; after a configurable number
//! of consecutive failures the addon is suspended and waits for the host to
//! resume or unload it. A stuck tick can therefore never block the host,
//! the inference worker, or other addons.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lantern_core::bus::{EventBus, EventPayload};
use lantern_core::config::AddonConfig;
use lantern_core::Error;

use crate::{Addon, AddonState, AddonStateMap};

/// Background execution request from an addon; unset fields fall back to
/// the host configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundSpec {
    pub interval: Option<Duration>,
    pub invocation_timeout: Option<Duration>,
    pub failure_threshold: Option<u32>,
}

/// Host defaults for supervised tasks, taken from `[addons]` config
#[derive(Debug, Clone, Copy)]
pub struct SupervisorDefaults {
    pub interval: Duration,
    pub invocation_timeout: Duration,
    pub failure_threshold: u32,
}

impl From<&AddonConfig> for SupervisorDefaults {
    fn from(config: &AddonConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            invocation_timeout: Duration::from_millis(config.invocation_timeout_ms),
            failure_threshold: config.failure_threshold,
        }
    }
}

impl BackgroundSpec {
    fn resolve(&self, defaults: &SupervisorDefaults) -> SupervisorDefaults {
        SupervisorDefaults {
            interval: self.interval.unwrap_or(defaults.interval),
            invocation_timeout: self.invocation_timeout.unwrap_or(defaults.invocation_timeout),
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
        }
    }
}

/// Handle the registry keeps for one supervised task
pub(crate) struct SupervisorHandle {
    cancel: CancellationToken,
    resume: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn notify_resume(&self) {
        self.resume.notify_one();
    }

    /// Wait for the task to exit; aborts it after the grace period
    pub(crate) async fn join(self, grace: Duration) {
        self.cancel.cancel();
        let mut join = self.join;
        if timeout(grace, &mut join).await.is_err() {
            warn!("background task did not stop within grace period; aborting");
            join.abort();
        }
    }
}

/// Spawn the supervised loop for one addon
pub(crate) fn spawn(
    name: String,
    addon: Arc<dyn Addon>,
    spec: BackgroundSpec,
    defaults: SupervisorDefaults,
    states: AddonStateMap,
    bus: Arc<EventBus>,
) -> SupervisorHandle {
    let resolved = spec.resolve(&defaults);
    let cancel = CancellationToken::new();
    let resume = Arc::new(Notify::new());

    let task_cancel = cancel.clone();
    let task_resume = Arc::clone(&resume);
    let join = tokio::spawn(async move {
        run_loop(name, addon, resolved, states, bus, task_cancel, task_resume).await;
    });

    SupervisorHandle { cancel, resume, join }
}

async fn run_loop(
    name: String,
    addon: Arc<dyn Addon>,
    spec: SupervisorDefaults,
    states: AddonStateMap,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    resume: Arc<Notify>,
) {
    let mut ticker = interval(spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if states.get(&name) == Some(AddonState::Suspended) {
            debug!(addon = %name, "suspended; waiting for resume");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = resume.notified() => {
                    failures = 0;
                    continue;
                }
            }
        }

        let last_error = match timeout(spec.invocation_timeout, addon.tick()).await {
            Ok(Ok(())) => {
                failures = 0;
                continue;
            }
            Ok(Err(error)) => {
                warn!(addon = %name, %error, "background tick failed");
                error
            }
            Err(_) => {
                let error = Error::Timeout(spec.invocation_timeout.as_millis() as u64);
                warn!(addon = %name, %error, "background tick abandoned");
                error
            }
        };

        failures += 1;
        if failures >= spec.failure_threshold && states.get(&name) == Some(AddonState::Active) {
            warn!(
                addon = %name,
                failures,
                "suspending addon after consecutive background failures"
            );
            states.set(&name, AddonState::Suspended);
            bus.publish_payload(EventPayload::AddonStatus {
                name: name.clone(),
                state: AddonState::Suspended.to_string(),
                error: Some(last_error.to_string()),
            });
        }
    }
    debug!(addon = %name, "background task stopped");
}
