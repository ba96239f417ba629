//! Addon entry-point catalog
//!
//! Manifest entry points are resolved against a catalog of registration
//! functions known at compile time, so an addon's shape is checked by the
//! type system rather than at runtime. Host builds register their bundled
//! addons here; a manifest naming an unknown entry point fails to load.

use std::collections::HashMap;
use std::sync::Arc;

use lantern_core::{Error, Result};

use crate::assistant::{self, SmartFloatingAssistant};
use crate::{Addon, AddonHost};

/// Registration function: receives the addon's host handle, returns the
/// addon object
pub type AddonFactory = Box<dyn Fn(AddonHost) -> Result<Arc<dyn Addon>> + Send + Sync>;

/// Catalog of known entry points
#[derive(Default)]
pub struct AddonCatalog {
    factories: HashMap<String, AddonFactory>,
}

impl AddonCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the addons bundled with the host
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(assistant::ENTRY_POINT, |host| {
            Ok(Arc::new(SmartFloatingAssistant::new(host)))
        });
        catalog
    }

    /// Register an entry point
    pub fn register<F>(&mut self, entry: &str, factory: F)
    where
        F: Fn(AddonHost) -> Result<Arc<dyn Addon>> + Send + Sync + 'static,
    {
        self.factories.insert(entry.to_string(), Box::new(factory));
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.contains_key(entry)
    }

    /// Invoke an entry point
    pub fn instantiate(&self, entry: &str, host: AddonHost) -> Result<Arc<dyn Addon>> {
        let factory = self.factories.get(entry).ok_or_else(|| {
            Error::ManifestInvalid(format!("unknown entry point: {entry}"))
        })?;
        factory(host)
    }
}

impl std::fmt::Debug for AddonCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<_> = self.factories.keys().collect();
        entries.sort();
        f.debug_struct("AddonCatalog").field("entries", &entries).finish()
    }
}
