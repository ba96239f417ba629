//! Lantern Addon Runtime
//!
//! Provides the addon system for the Lantern host:
//! - Manifest discovery and validation
//! - Registry-owned addon lifecycle (load, unload, reload)
//! - Supervised background execution with crash containment
//! - Capability gateway mediating access to sensitive host resources
//!
//! Addons never receive host internals. Everything they can touch flows
//! through an [`AddonHost`] handle: event bus subscribe/publish, capability
//! gateway calls, and read-only model session status.

pub mod assistant;
pub mod catalog;
pub mod gateway;
pub mod host;
pub mod manifest;
pub mod registry;
pub mod supervisor;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use lantern_core::bus::{Event, Topic};
use lantern_core::Result;

pub use catalog::{AddonCatalog, AddonFactory};
pub use gateway::CapabilityGateway;
pub use host::AddonHost;
pub use manifest::AddonManifest;
pub use registry::AddonRegistry;
pub use supervisor::BackgroundSpec;

/// A class of sensitive access an addon must declare and be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Clipboard,
    GlobalTextSelection,
    ModelInference,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Clipboard => "clipboard",
            Capability::GlobalTextSelection => "global-text-selection",
            Capability::ModelInference => "model-inference",
        };
        f.write_str(name)
    }
}

/// Addon lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonState {
    Unloaded,
    Loading,
    Active,
    Suspended,
    Failed,
}

impl std::fmt::Display for AddonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddonState::Unloaded => "unloaded",
            AddonState::Loading => "loading",
            AddonState::Active => "active",
            AddonState::Suspended => "suspended",
            AddonState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared read view of addon states
///
/// The registry and supervisor write it on every transition; the gateway
/// reads it to enforce that grants are only exercised by Active addons.
#[derive(Clone, Default)]
pub struct AddonStateMap {
    inner: Arc<RwLock<HashMap<String, AddonState>>>,
}

impl AddonStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<AddonState> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .copied()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.get(name) == Some(AddonState::Active)
    }

    pub fn snapshot(&self) -> Vec<(String, AddonState)> {
        let mut entries: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub(crate) fn set(&self, name: &str, state: AddonState) {
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), state);
    }

    pub(crate) fn remove(&self, name: &str) {
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name);
    }
}

impl std::fmt::Debug for AddonStateMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

/// Descriptor of a UI panel an addon contributes; rendering is the UI
/// layer's concern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiPanel {
    pub title: String,
    pub description: String,
}

/// The capability set every addon implements
///
/// `initialize` and `shutdown` frame the lifecycle; the rest are optional
/// hooks with no-op defaults. Addons take `&self` and manage their own
/// interior state, since event delivery and background ticks run on
/// different execution contexts.
#[async_trait]
pub trait Addon: Send + Sync {
    /// Called once after subscriptions are wired, before Active
    async fn initialize(&self) -> Result<()>;

    /// Called during unload; failure is logged, never fatal to the host
    async fn shutdown(&self) -> Result<()>;

    /// Topics this addon wants delivered to `on_event`
    fn subscriptions(&self) -> Vec<Topic> {
        Vec::new()
    }

    /// Event delivery; must not block
    fn on_event(&self, _event: &Event) {}

    /// Background execution request; `None` for event-only addons
    fn background(&self) -> Option<BackgroundSpec> {
        None
    }

    /// One supervised background invocation
    async fn tick(&self) -> Result<()> {
        Ok(())
    }

    /// Optional UI contribution
    fn ui_panel(&self) -> Option<UiPanel> {
        None
    }
}
