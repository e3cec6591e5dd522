//! Publisher manifest reading for the stowage plugin inventory.
//!
//! Publishers describe what to register in YAML manifests. Two document
//! shapes exist: the plugin manifest (what binaries exist, for which
//! targets, at which versions, on which platforms) and the plugin-group
//! manifest (which published plugins a group bundles).
//!
//! # Example
//!
//! ```
//! use stowage_manifest::PluginManifest;
//!
//! let manifest: PluginManifest = serde_yaml::from_str(r#"
//! plugins:
//!   - name: management-cluster
//!     target: kubernetes
//!     description: Manage clusters
//!     versions: [v0.28.0]
//! "#).expect("parse");
//!
//! assert_eq!(manifest.plugins.len(), 1);
//! assert_eq!(manifest.os_arch().len(), 3); // defaults to the minimum set
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use stowage_types::{OsArch, PluginGroupPluginEntry, Target, is_valid_version};

/// One plugin as declared by a publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifestEntry {
    /// Plugin name.
    pub name: String,
    /// Plugin target.
    pub target: Target,
    /// Human-readable description.
    pub description: String,
    /// Versions to register.
    pub versions: Vec<String>,
}

/// A publisher's plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Platforms the listed versions are built for. Omitted means exactly
    /// the minimum required set.
    #[serde(rename = "osArch", default)]
    pub os_arch: Vec<OsArch>,
    /// Plugins to register.
    pub plugins: Vec<PluginManifestEntry>,
}

impl PluginManifest {
    /// The platforms this manifest covers, defaulting to the minimum set.
    pub fn os_arch(&self) -> Vec<OsArch> {
        if self.os_arch.is_empty() {
            OsArch::minimum_required()
        } else {
            self.os_arch.clone()
        }
    }

    /// Minimum-required `(os, arch)` pairs this manifest does not list.
    pub fn missing_required_os_arch(&self) -> Vec<OsArch> {
        let listed = self.os_arch();
        OsArch::minimum_required()
            .into_iter()
            .filter(|required| !listed.contains(required))
            .collect()
    }

    /// Reject manifests the inventory could not register.
    pub fn validate(&self) -> Result<()> {
        if self.plugins.is_empty() {
            anyhow::bail!("plugin manifest lists no plugins");
        }

        for plugin in &self.plugins {
            if plugin.name.is_empty() {
                anyhow::bail!("plugin manifest entry is missing a name");
            }
            if plugin.description.is_empty() {
                anyhow::bail!("plugin {} is missing a description", plugin.name);
            }
            if plugin.versions.is_empty() {
                anyhow::bail!("plugin {} lists no versions", plugin.name);
            }
            for version in &plugin.versions {
                if !is_valid_version(version) {
                    anyhow::bail!(
                        "plugin {} version {version} is not a semantic version",
                        plugin.name
                    );
                }
            }
        }

        let missing = self.missing_required_os_arch();
        if !missing.is_empty() {
            let rendered: Vec<String> = missing.iter().map(ToString::to_string).collect();
            anyhow::bail!(
                "plugin manifest is missing required os/arch combinations: {}",
                rendered.join(", ")
            );
        }

        Ok(())
    }
}

/// One plugin reference as declared in a group manifest.
///
/// Context-scoped plugins only activate inside a matching context, so they
/// are not mandatory members of the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupManifestEntry {
    /// Referenced plugin name.
    pub name: String,
    /// Referenced plugin target.
    pub target: Target,
    /// Referenced plugin version.
    pub version: String,
    /// Whether the plugin only applies within a context.
    #[serde(rename = "isContextScoped", default)]
    pub is_context_scoped: bool,
}

impl GroupManifestEntry {
    /// Convert to the inventory's group-member record.
    pub fn to_group_entry(&self) -> PluginGroupPluginEntry {
        PluginGroupPluginEntry {
            name: self.name.clone(),
            target: self.target,
            version: self.version.clone(),
            mandatory: !self.is_context_scoped,
        }
    }
}

/// A publisher's plugin-group manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginGroupManifest {
    /// Plugins bundled by the group version being registered.
    pub plugins: Vec<GroupManifestEntry>,
}

impl PluginGroupManifest {
    /// Reject manifests the inventory could not register.
    pub fn validate(&self) -> Result<()> {
        if self.plugins.is_empty() {
            anyhow::bail!("plugin-group manifest lists no plugins");
        }
        for plugin in &self.plugins {
            if plugin.name.is_empty() {
                anyhow::bail!("plugin-group manifest entry is missing a name");
            }
            if !is_valid_version(&plugin.version) {
                anyhow::bail!(
                    "plugin {} version {} is not a semantic version",
                    plugin.name,
                    plugin.version
                );
            }
        }
        Ok(())
    }

    /// All members converted to inventory group-member records.
    pub fn group_entries(&self) -> Vec<PluginGroupPluginEntry> {
        self.plugins.iter().map(GroupManifestEntry::to_group_entry).collect()
    }
}

/// Read and validate a plugin manifest from disk.
pub fn read_plugin_manifest(path: &Path) -> Result<PluginManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plugin manifest {}", path.display()))?;
    let manifest: PluginManifest = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse plugin manifest {}", path.display()))?;
    manifest
        .validate()
        .with_context(|| format!("invalid plugin manifest {}", path.display()))?;
    Ok(manifest)
}

/// Read and validate a plugin-group manifest from disk.
pub fn read_plugin_group_manifest(path: &Path) -> Result<PluginGroupManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plugin-group manifest {}", path.display()))?;
    let manifest: PluginGroupManifest = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse plugin-group manifest {}", path.display()))?;
    manifest
        .validate()
        .with_context(|| format!("invalid plugin-group manifest {}", path.display()))?;
    Ok(manifest)
}
