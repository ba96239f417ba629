//! The host handle addons are given at registration
//!
//! Deliberately narrow: event bus subscribe/publish, capability gateway
//! calls under the addon's own identity, and read-only session status.
//! Nothing else of the host is reachable from an addon.

use std::sync::{Arc, Mutex};

use lantern_core::bus::{EventBus, EventHandler, EventPayload, SubscriptionHandle, Topic};
use lantern_core::session::{SamplingParams, SessionManager, SessionMetadata, SessionStatus};
use lantern_core::session::TokenStream;
use lantern_core::Result;

use crate::gateway::{CapabilityGateway, ClipboardGuard};

/// Per-addon facade over the bus, the gateway, and session status
#[derive(Clone)]
pub struct AddonHost {
    name: String,
    bus: Arc<EventBus>,
    gateway: Arc<CapabilityGateway>,
    session: Arc<SessionManager>,
    subscriptions: Arc<Mutex<Vec<SubscriptionHandle>>>,
}

impl AddonHost {
    pub(crate) fn new(
        name: String,
        bus: Arc<EventBus>,
        gateway: Arc<CapabilityGateway>,
        session: Arc<SessionManager>,
        subscriptions: Arc<Mutex<Vec<SubscriptionHandle>>>,
    ) -> Self {
        Self { name, bus, gateway, session, subscriptions }
    }

    /// The identity this handle acts under
    pub fn addon_name(&self) -> &str {
        &self.name
    }

    /// Publish an event on its natural topic
    pub fn publish(&self, payload: EventPayload) {
        self.bus.publish_payload(payload);
    }

    /// Subscribe to a topic; the registry releases the subscription when
    /// the addon is unloaded
    pub fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionHandle {
        let handle = self.bus.subscribe(topic, handler);
        self.subscriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
        handle
    }

    /// Read-only model session status
    pub fn session_status(&self) -> (SessionStatus, Option<SessionMetadata>) {
        self.session.status()
    }

    /// Gateway: read the global text selection
    pub fn read_selection(&self) -> Result<String> {
        self.gateway.read_selection(&self.name)
    }

    /// Gateway: read the clipboard
    pub fn read_clipboard(&self) -> Result<String> {
        self.gateway.read_clipboard(&self.name)
    }

    /// Gateway: write the clipboard for the duration of the returned guard
    pub fn scoped_clipboard_write(&self, text: &str) -> Result<ClipboardGuard<'_>> {
        self.gateway.scoped_clipboard_write(&self.name, text)
    }

    /// Gateway: run an inference against the active model
    pub async fn infer(&self, prompt: &str, sampling: SamplingParams) -> Result<TokenStream> {
        self.gateway.infer(&self.name, prompt, sampling).await
    }
}

impl std::fmt::Debug for AddonHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonHost").field("name", &self.name).finish()
    }
}
