//! Addon registry and loader
//!
//! The registry is the sole owner of addon instances. It discovers
//! candidates, validates their manifests, resolves entry points against the
//! catalog, drives the lifecycle state machine, and tears addons down
//! best-effort: an addon whose shutdown hook fails still ends up out of the
//! host, with its subscriptions dropped and its grants revoked.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use lantern_core::bus::{Event, EventBus, EventPayload, SubscriptionHandle};
use lantern_core::config::AddonConfig;
use lantern_core::session::SessionManager;
use lantern_core::{Error, Result};

use crate::catalog::AddonCatalog;
use crate::gateway::CapabilityGateway;
use crate::host::AddonHost;
use crate::manifest::{self, AddonManifest};
use crate::supervisor::{self, SupervisorDefaults, SupervisorHandle};
use crate::{Addon, AddonState, AddonStateMap, UiPanel};

/// A loaded addon and everything needed to tear it down
struct AddonInstance {
    descriptor: AddonManifest,
    addon: Arc<dyn Addon>,
    subscriptions: Arc<StdMutex<Vec<SubscriptionHandle>>>,
    supervisor: Option<SupervisorHandle>,
}

/// Summary of one registered addon for the status surface
#[derive(Debug, Clone)]
pub struct AddonOverview {
    pub name: String,
    pub version: String,
    pub state: AddonState,
    pub ui_panel: Option<UiPanel>,
}

/// Owner of all addon instances
pub struct AddonRegistry {
    bus: Arc<EventBus>,
    gateway: Arc<CapabilityGateway>,
    session: Arc<SessionManager>,
    catalog: AddonCatalog,
    defaults: SupervisorDefaults,
    shutdown_grace: Duration,
    states: AddonStateMap,
    instances: Mutex<HashMap<String, AddonInstance>>,
}

impl AddonRegistry {
    pub fn new(
        bus: Arc<EventBus>,
        gateway: Arc<CapabilityGateway>,
        session: Arc<SessionManager>,
        catalog: AddonCatalog,
        states: AddonStateMap,
        config: &AddonConfig,
    ) -> Self {
        Self {
            bus,
            gateway,
            session,
            catalog,
            defaults: SupervisorDefaults::from(config),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            states,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Shared state view (also held by the gateway)
    pub fn states(&self) -> AddonStateMap {
        self.states.clone()
    }

    /// Discover addons under `dir` and load each candidate
    ///
    /// Individual failures are isolated: a broken manifest or a failing
    /// load is reported and skipped, and discovery continues. Returns the
    /// number of addons that reached Active.
    pub async fn discover_and_load(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for discovery in manifest::discover(dir)? {
            let name = discovery.name();
            match discovery.result {
                Ok(descriptor) => match self.load(descriptor).await {
                    Ok(()) => loaded += 1,
                    Err(error) => {
                        warn!(addon = %name, %error, "addon failed to load");
                    }
                },
                Err(error) => {
                    warn!(
                        addon = %name,
                        dir = %discovery.dir.display(),
                        %error,
                        "invalid addon manifest; skipping"
                    );
                    self.bus.publish_payload(EventPayload::AddonStatus {
                        name,
                        state: AddonState::Failed.to_string(),
                        error: Some(error.to_string()),
                    });
                }
            }
        }
        Ok(loaded)
    }

    /// Load one addon from its descriptor
    pub async fn load(&self, descriptor: AddonManifest) -> Result<()> {
        let name = descriptor.name.clone();
        let mut instances = self.instances.lock().await;
        if instances.contains_key(&name) {
            return Err(Error::AddonAlreadyLoaded(name));
        }

        self.states.set(&name, AddonState::Loading);
        info!(addon = %name, version = %descriptor.version, "loading addon");

        let subscriptions = Arc::new(StdMutex::new(Vec::new()));
        let host = AddonHost::new(
            name.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.gateway),
            Arc::clone(&self.session),
            Arc::clone(&subscriptions),
        );

        let addon = match self.catalog.instantiate(&descriptor.entry, host.clone()) {
            Ok(addon) => addon,
            Err(error) => {
                self.fail_load(&name, &error);
                return Err(error);
            }
        };

        // Deny-by-default: only declared capabilities become grants.
        self.gateway.seed_grants(&name, &descriptor.capabilities);

        for topic in addon.subscriptions() {
            let subscriber = Arc::clone(&addon);
            host.subscribe(topic, Box::new(move |event: &Event| subscriber.on_event(event)));
        }

        if let Err(error) = addon.initialize().await {
            self.teardown_wiring(&name, &subscriptions);
            self.fail_load(&name, &error);
            return Err(error);
        }

        // The supervisor checks the state map, so Active must be visible
        // before the first tick.
        self.states.set(&name, AddonState::Active);

        let supervisor = addon.background().map(|spec| {
            supervisor::spawn(
                name.clone(),
                Arc::clone(&addon),
                spec,
                self.defaults,
                self.states.clone(),
                Arc::clone(&self.bus),
            )
        });

        instances.insert(
            name.clone(),
            AddonInstance { descriptor, addon, subscriptions, supervisor },
        );

        info!(addon = %name, "addon active");
        self.bus.publish_payload(EventPayload::AddonStatus {
            name,
            state: AddonState::Active.to_string(),
            error: None,
        });
        Ok(())
    }

    /// Unload an addon, best-effort
    ///
    /// Always reaches Unloaded (or Failed when the shutdown hook fails),
    /// never leaves subscriptions or grants behind.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let instance = {
            let mut instances = self.instances.lock().await;
            instances
                .remove(name)
                .ok_or_else(|| Error::AddonNotFound(name.to_string()))?
        };

        if let Some(supervisor) = instance.supervisor {
            supervisor.join(self.shutdown_grace).await;
        }

        let shutdown_result = timeout(self.shutdown_grace, instance.addon.shutdown()).await;
        let final_state = match &shutdown_result {
            Ok(Ok(())) => AddonState::Unloaded,
            Ok(Err(error)) => {
                warn!(addon = %name, %error, "addon shutdown hook failed");
                AddonState::Failed
            }
            Err(_) => {
                warn!(addon = %name, "addon shutdown hook timed out");
                AddonState::Failed
            }
        };

        self.teardown_wiring(name, &instance.subscriptions);

        if final_state == AddonState::Unloaded {
            self.states.remove(name);
        } else {
            self.states.set(name, final_state);
        }

        info!(addon = %name, state = %final_state, "addon unloaded");
        let error = match shutdown_result {
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "shutdown exceeded {} ms grace period",
                self.shutdown_grace.as_millis()
            )),
            Ok(Ok(())) => None,
        };
        self.bus
            .publish(Event::addon_unloaded(name, &final_state.to_string(), error));
        Ok(())
    }

    /// Reload: unload followed by load of the same descriptor
    pub async fn reload(&self, name: &str) -> Result<()> {
        let descriptor = {
            let instances = self.instances.lock().await;
            instances
                .get(name)
                .map(|instance| instance.descriptor.clone())
                .ok_or_else(|| Error::AddonNotFound(name.to_string()))?
        };
        self.unload(name).await?;
        self.load(descriptor).await
    }

    /// Resume a suspended addon, resetting its failure counter
    pub async fn resume(&self, name: &str) -> Result<()> {
        let instances = self.instances.lock().await;
        let instance = instances
            .get(name)
            .ok_or_else(|| Error::AddonNotFound(name.to_string()))?;

        if self.states.get(name) != Some(AddonState::Suspended) {
            return Err(Error::NotReady {
                required: AddonState::Suspended.to_string(),
                actual: self
                    .states
                    .get(name)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }

        self.states.set(name, AddonState::Active);
        if let Some(supervisor) = &instance.supervisor {
            supervisor.notify_resume();
        }
        info!(addon = %name, "addon resumed");
        self.bus.publish_payload(EventPayload::AddonStatus {
            name: name.to_string(),
            state: AddonState::Active.to_string(),
            error: None,
        });
        Ok(())
    }

    /// Unload every addon (host shutdown)
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = {
            let instances = self.instances.lock().await;
            instances.keys().cloned().collect()
        };
        for name in names {
            if let Err(error) = self.unload(&name).await {
                warn!(addon = %name, %error, "failed to unload addon during shutdown");
            }
        }
    }

    /// Snapshot of registered addons for the status surface
    pub async fn overview(&self) -> Vec<AddonOverview> {
        let instances = self.instances.lock().await;
        let mut entries: Vec<AddonOverview> = instances
            .values()
            .map(|instance| AddonOverview {
                name: instance.descriptor.name.clone(),
                version: instance.descriptor.version.clone(),
                state: self
                    .states
                    .get(&instance.descriptor.name)
                    .unwrap_or(AddonState::Unloaded),
                ui_panel: instance.addon.ui_panel(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    fn teardown_wiring(&self, name: &str, subscriptions: &Arc<StdMutex<Vec<SubscriptionHandle>>>) {
        let handles: Vec<SubscriptionHandle> = subscriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            self.bus.unsubscribe(handle);
        }
        self.gateway.revoke_all(name);
    }

    fn fail_load(&self, name: &str, error: &Error) {
        warn!(addon = %name, %error, "addon load failed");
        self.states.set(name, AddonState::Failed);
        self.bus.publish_payload(EventPayload::AddonStatus {
            name: name.to_string(),
            state: AddonState::Failed.to_string(),
            error: Some(error.to_string()),
        });
    }
}

impl std::fmt::Debug for AddonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonRegistry")
            .field("states", &self.states)
            .finish()
    }
}
