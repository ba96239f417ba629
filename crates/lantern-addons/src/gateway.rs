//! Capability gateway
//!
//! Every sensitive call an addon makes — clipboard, global text selection,
//! model inference — is routed through here. The gateway checks that the
//! addon is Active and holds a grant for the capability, records the access,
//! and only then forwards to the real resource. Grants default to denied:
//! only capabilities declared in the manifest are seeded at load time, and
//! the host can revoke any grant at any moment. Revocation applies to the
//! next call; an in-flight call is never aborted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use lantern_core::session::{SamplingParams, SessionManager, TokenStream};
use lantern_core::{Error, Result};

use crate::{AddonStateMap, Capability};

/// Audit records kept in memory for the status surface
const AUDIT_CAPACITY: usize = 256;

/// Host clipboard contract (provided by the excluded UI layer)
pub trait ClipboardAccessor: Send + Sync {
    fn read(&self) -> Result<String>;
    fn write(&self, text: &str) -> Result<()>;
    fn restore(&self, previous: &str) -> Result<()>;
}

/// Host global-text-selection contract
pub trait SelectionAccessor: Send + Sync {
    fn read(&self) -> Result<String>;
}

/// In-memory clipboard, used by tests and headless runs
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new(initial: &str) -> Self {
        Self { contents: Mutex::new(initial.to_string()) }
    }

    pub fn contents(&self) -> String {
        self.contents.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ClipboardAccessor for MemoryClipboard {
    fn read(&self) -> Result<String> {
        Ok(self.contents())
    }

    fn write(&self, text: &str) -> Result<()> {
        *self.contents.lock().unwrap_or_else(|p| p.into_inner()) = text.to_string();
        Ok(())
    }

    fn restore(&self, previous: &str) -> Result<()> {
        self.write(previous)
    }
}

/// In-memory selection source; the host sets it, addons read it
#[derive(Debug, Default)]
pub struct MemorySelection {
    contents: Mutex<String>,
}

impl MemorySelection {
    pub fn set(&self, text: &str) {
        *self.contents.lock().unwrap_or_else(|p| p.into_inner()) = text.to_string();
    }
}

impl SelectionAccessor for MemorySelection {
    fn read(&self) -> Result<String> {
        Ok(self.contents.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

/// One logged gateway access
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub addon: String,
    pub capability: Capability,
    pub timestamp: DateTime<Utc>,
}

/// Mediator between addons and sensitive host resources
pub struct CapabilityGateway {
    grants: RwLock<HashMap<(String, Capability), bool>>,
    states: AddonStateMap,
    session: Arc<SessionManager>,
    clipboard: Arc<dyn ClipboardAccessor>,
    selection: Arc<dyn SelectionAccessor>,
    audit: Mutex<VecDeque<AccessRecord>>,
}

impl CapabilityGateway {
    pub fn new(
        states: AddonStateMap,
        session: Arc<SessionManager>,
        clipboard: Arc<dyn ClipboardAccessor>,
        selection: Arc<dyn SelectionAccessor>,
    ) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            states,
            session,
            clipboard,
            selection,
            audit: Mutex::new(VecDeque::with_capacity(AUDIT_CAPACITY)),
        }
    }

    /// Seed grants for a freshly loaded addon from its declared
    /// capabilities; anything undeclared stays denied
    pub fn seed_grants(&self, addon: &str, capabilities: &[Capability]) {
        let mut grants = self.grants.write().unwrap_or_else(|p| p.into_inner());
        for capability in capabilities {
            grants.insert((addon.to_string(), *capability), true);
        }
    }

    /// Grant a capability to an addon
    pub fn grant(&self, addon: &str, capability: Capability) {
        info!(%addon, %capability, "capability granted");
        self.grants
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((addon.to_string(), capability), true);
    }

    /// Revoke a capability; takes effect on the next gateway call
    pub fn revoke(&self, addon: &str, capability: Capability) {
        info!(%addon, %capability, "capability revoked");
        self.grants
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((addon.to_string(), capability), false);
    }

    /// Drop every grant an addon holds (part of unload teardown)
    pub fn revoke_all(&self, addon: &str) {
        self.grants
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(name, _), _| name != addon);
    }

    pub fn is_granted(&self, addon: &str, capability: Capability) -> bool {
        self.grants
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(addon.to_string(), capability))
            .copied()
            .unwrap_or(false)
    }

    /// Recent access records, newest last
    pub fn recent_accesses(&self, count: usize) -> Vec<AccessRecord> {
        let audit = self.audit.lock().unwrap_or_else(|p| p.into_inner());
        audit.iter().rev().take(count).rev().cloned().collect()
    }

    /// Read the global text selection on behalf of an addon
    pub fn read_selection(&self, addon: &str) -> Result<String> {
        self.authorize(addon, Capability::GlobalTextSelection)?;
        self.selection.read()
    }

    /// Read the clipboard on behalf of an addon
    pub fn read_clipboard(&self, addon: &str) -> Result<String> {
        self.authorize(addon, Capability::Clipboard)?;
        self.clipboard.read()
    }

    /// Write the clipboard on behalf of an addon, returning a guard that
    /// restores the previous contents when the addon's operation completes,
    /// even if that operation fails
    pub fn scoped_clipboard_write(&self, addon: &str, text: &str) -> Result<ClipboardGuard<'_>> {
        self.authorize(addon, Capability::Clipboard)?;
        let previous = self.clipboard.read()?;
        self.clipboard.write(text)?;
        Ok(ClipboardGuard {
            clipboard: self.clipboard.as_ref(),
            previous: Some(previous),
        })
    }

    /// Run an inference on behalf of an addon
    pub async fn infer(
        &self,
        addon: &str,
        prompt: &str,
        sampling: SamplingParams,
    ) -> Result<TokenStream> {
        self.authorize(addon, Capability::ModelInference)?;
        self.session.infer(prompt, sampling).await
    }

    fn authorize(&self, addon: &str, capability: Capability) -> Result<()> {
        if !self.states.is_active(addon) {
            return Err(Error::CapabilityDenied {
                addon: addon.to_string(),
                capability: format!("{capability} (addon is not active)"),
            });
        }
        if !self.is_granted(addon, capability) {
            warn!(%addon, %capability, "capability check failed");
            return Err(Error::CapabilityDenied {
                addon: addon.to_string(),
                capability: capability.to_string(),
            });
        }

        info!(%addon, %capability, "gateway access");
        let mut audit = self.audit.lock().unwrap_or_else(|p| p.into_inner());
        if audit.len() == AUDIT_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(AccessRecord {
            addon: addon.to_string(),
            capability,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for CapabilityGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let grants = self.grants.read().unwrap_or_else(|p| p.into_inner());
        f.debug_struct("CapabilityGateway")
            .field("grants", &grants.len())
            .finish()
    }
}

/// Restores the pre-call clipboard contents on drop
pub struct ClipboardGuard<'a> {
    clipboard: &'a dyn ClipboardAccessor,
    previous: Option<String>,
}

impl Drop for ClipboardGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(error) = self.clipboard.restore(&previous) {
                warn!(%error, "failed to restore clipboard");
            }
        }
    }
}
