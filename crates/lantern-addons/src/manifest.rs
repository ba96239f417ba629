//! Addon manifest loading and discovery
//!
//! Each addon lives in its own directory under the addon tree and carries
//! an `addon.json` manifest naming its identity, entry point, and declared
//! capabilities. Discovery failures are isolated per addon: a malformed
//! manifest is reported and skipped without aborting the scan.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use lantern_core::{Error, Result};

use crate::Capability;

/// Manifest file name inside each addon directory
pub const MANIFEST_FILE: &str = "addon.json";

/// Manifests larger than this are rejected outright
const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

/// Persisted addon manifest; doubles as the immutable addon descriptor
/// once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonManifest {
    pub name: String,
    pub version: String,
    /// Entry point reference, resolved against the addon catalog
    pub entry: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Load and parse an addon manifest from disk (JSON)
pub fn load_manifest(path: &Path) -> Result<AddonManifest> {
    let metadata = fs::metadata(path)?;
    if metadata.len() > MAX_MANIFEST_BYTES {
        return Err(Error::ManifestInvalid("manifest file too large".to_string()));
    }

    let data = fs::read_to_string(path)?;
    let manifest: AddonManifest = serde_json::from_str(&data)
        .map_err(|e| Error::ManifestInvalid(format!("invalid manifest JSON: {e}")))?;

    validate_manifest(&manifest)?;
    Ok(manifest)
}

fn validate_manifest(manifest: &AddonManifest) -> Result<()> {
    if manifest.name.trim().is_empty() || manifest.version.trim().is_empty() {
        return Err(Error::ManifestInvalid(
            "manifest name and version cannot be empty".to_string(),
        ));
    }
    if manifest.entry.trim().is_empty() {
        return Err(Error::ManifestInvalid(
            "manifest is missing an entry point".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for capability in &manifest.capabilities {
        if !seen.insert(capability) {
            return Err(Error::ManifestInvalid(format!(
                "duplicate capability declaration: {capability}"
            )));
        }
    }

    Ok(())
}

/// Resolve the addon directory: explicit override, `LANTERN_ADDON_DIR`,
/// then `~/.lantern/addons`; created if missing
pub fn addon_base_dir(configured: Option<&Path>) -> Result<PathBuf> {
    let base = if let Some(dir) = configured {
        dir.to_path_buf()
    } else if let Ok(dir) = std::env::var("LANTERN_ADDON_DIR") {
        PathBuf::from(dir)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".lantern").join("addons")
    } else {
        return Err(Error::ManifestInvalid(
            "unable to resolve addon directory".to_string(),
        ));
    };

    fs::create_dir_all(&base)?;
    Ok(base)
}

/// One discovery outcome: the addon directory and its manifest or error
#[derive(Debug)]
pub struct Discovery {
    pub dir: PathBuf,
    pub result: Result<AddonManifest>,
}

impl Discovery {
    /// The addon identity if known, otherwise the directory name
    pub fn name(&self) -> String {
        match &self.result {
            Ok(manifest) => manifest.name.clone(),
            Err(_) => self
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.dir.display().to_string()),
        }
    }
}

/// Scan the addon tree for candidates
///
/// Every subdirectory containing a manifest file yields one `Discovery`;
/// entries without a manifest are ignored. Results are sorted by directory
/// name so load order is stable.
pub fn discover(dir: &Path) -> Result<Vec<Discovery>> {
    let mut discoveries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            debug!(dir = %path.display(), "no manifest, skipping");
            continue;
        }
        let result = load_manifest(&manifest_path);
        discoveries.push(Discovery { dir: path, result });
    }
    discoveries.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(discoveries)
}
