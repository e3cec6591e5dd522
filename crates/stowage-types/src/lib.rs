//! Core domain types for the stowage plugin inventory.
//!
//! This crate defines the records that flow between the manifest reader,
//! the inventory store, and the lifecycle engine:
//! - [`PluginInventoryEntry`] - one publishable plugin, keyed by `(name, target)`
//! - [`PluginGroup`] - a named, versioned bundle of plugin references
//! - [`Artifact`] - one concrete `(os, arch)` binary inside a plugin version
//! - [`PluginFilter`] / [`PluginGroupFilter`] - conjunctive query filters
//!
//! # Example
//!
//! ```
//! use stowage_types::{Artifact, PluginInventoryEntry, Target};
//!
//! let mut entry = PluginInventoryEntry::new("management-cluster", Target::Kubernetes);
//! entry.add_artifact(
//!     "v0.28.0",
//!     Artifact::new("linux", "amd64", "sha256:d0", "vmware/tkg/linux/amd64/kubernetes/management-cluster:v0.28.0"),
//! );
//! assert_eq!(entry.versions(), vec!["v0.28.0".to_string()]);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Sentinel version accepted by query filters. Resolved by the store to the
/// semver-maximum of the matching entry's versions, never passed to SQL.
pub const LATEST: &str = "LATEST";

/// The `(os, arch)` pairs every published plugin must cover.
pub const MINIMUM_REQUIRED_OS_ARCH: [(&str, &str); 3] = [
    ("linux", "amd64"),
    ("darwin", "amd64"),
    ("windows", "amd64"),
];

/// The domain a plugin operates against.
///
/// This is a closed set: the inventory schema stores the kebab-case names
/// and query filters match on them exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    /// Not bound to any managed endpoint.
    Global,
    /// Operates against a Kubernetes cluster.
    Kubernetes,
    /// Operates against a mission-control endpoint.
    MissionControl,
}

impl Target {
    /// All valid targets, in stored order.
    pub fn all() -> [Target; 3] {
        [Target::Global, Target::Kubernetes, Target::MissionControl]
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Global => write!(f, "global"),
            Target::Kubernetes => write!(f, "kubernetes"),
            Target::MissionControl => write!(f, "mission-control"),
        }
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "global" => Ok(Target::Global),
            "kubernetes" => Ok(Target::Kubernetes),
            "mission-control" => Ok(Target::MissionControl),
            other => Err(anyhow::anyhow!(
                "unknown target: {other} (expected global, kubernetes, or mission-control)"
            )),
        }
    }
}

/// An operating-system / architecture pair, rendered as `os/arch`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OsArch {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `amd64`.
    pub arch: String,
}

impl OsArch {
    /// Create a new pair.
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    /// The minimum set of pairs a plugin release must cover.
    pub fn minimum_required() -> Vec<OsArch> {
        MINIMUM_REQUIRED_OS_ARCH
            .iter()
            .map(|(os, arch)| OsArch::new(os, arch))
            .collect()
    }
}

impl fmt::Display for OsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for OsArch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(OsArch::new(os, arch)),
            _ => Err(anyhow::anyhow!("invalid os/arch pair: {s}")),
        }
    }
}

impl TryFrom<String> for OsArch {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<OsArch> for String {
    fn from(value: OsArch) -> Self {
        value.to_string()
    }
}

/// One concrete plugin binary: where it lives and what it hashes to.
///
/// `image_path` is stored *relative* to the inventory's repository; the
/// absolute URI is composed at query time by prefixing the repository URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Operating system the binary targets.
    pub os: String,
    /// CPU architecture the binary targets.
    pub arch: String,
    /// SHA-256 digest of the binary inside the image.
    pub digest: String,
    /// Image path relative to the inventory repository.
    pub image_path: String,
}

impl Artifact {
    /// Create a new artifact record.
    pub fn new(os: &str, arch: &str, digest: &str, image_path: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            digest: digest.to_string(),
            image_path: image_path.to_string(),
        }
    }
}

/// Identity of one published plugin version, used for group references and
/// metadata rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginIdentifier {
    /// Plugin name.
    pub name: String,
    /// Plugin target.
    pub target: Target,
    /// Plugin version.
    pub version: String,
}

impl PluginIdentifier {
    /// Create a new identifier.
    pub fn new(name: &str, target: Target, version: &str) -> Self {
        Self {
            name: name.to_string(),
            target,
            version: version.to_string(),
        }
    }
}

impl fmt::Display for PluginIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.name, self.target, self.version)
    }
}

/// One plugin as catalogued in the inventory.
///
/// Identity is `(name, target)`. The `artifacts` map carries one entry per
/// published version, each listing the `(os, arch)` binaries for that
/// version. The `(version, os, arch)` triple is unique per plugin; the
/// store's primary key enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInventoryEntry {
    /// Plugin name.
    pub name: String,
    /// Plugin target.
    pub target: Target,
    /// Human-readable description.
    pub description: String,
    /// Publishing vendor, e.g. `vmware`.
    pub vendor: String,
    /// Publisher within the vendor, e.g. `tkg`.
    pub publisher: String,
    /// Version clients should install absent an explicit choice. Empty means
    /// "derive as the semver-maximum of `artifacts` keys at query time".
    pub recommended_version: String,
    /// Suppressed from default queries when true.
    pub hidden: bool,
    /// Version -> artifacts published for that version.
    pub artifacts: BTreeMap<String, Vec<Artifact>>,
}

impl PluginInventoryEntry {
    /// Create an empty entry for `(name, target)`.
    pub fn new(name: &str, target: Target) -> Self {
        Self {
            name: name.to_string(),
            target,
            description: String::new(),
            vendor: String::new(),
            publisher: String::new(),
            recommended_version: String::new(),
            hidden: false,
            artifacts: BTreeMap::new(),
        }
    }

    /// Attach one artifact to a version, creating the version on first use.
    pub fn add_artifact(&mut self, version: &str, artifact: Artifact) {
        self.artifacts
            .entry(version.to_string())
            .or_default()
            .push(artifact);
    }

    /// All versions present, ascending semver order.
    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.artifacts.keys().cloned().collect();
        sort_versions(&mut versions);
        versions
    }

    /// The identifier of one version of this plugin.
    pub fn identifier_for(&self, version: &str) -> PluginIdentifier {
        PluginIdentifier::new(&self.name, self.target, version)
    }
}

/// One plugin reference inside a plugin-group version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginGroupPluginEntry {
    /// Referenced plugin name.
    pub name: String,
    /// Referenced plugin target.
    pub target: Target,
    /// Referenced plugin version.
    pub version: String,
    /// Installed unconditionally when true; context-scoped plugins are not
    /// mandatory.
    pub mandatory: bool,
}

impl PluginGroupPluginEntry {
    /// The `(name, target, version)` identity this entry points at.
    pub fn identifier(&self) -> PluginIdentifier {
        PluginIdentifier::new(&self.name, self.target, &self.version)
    }
}

/// Identity of one plugin-group version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginGroupIdentifier {
    /// Publishing vendor.
    pub vendor: String,
    /// Publisher within the vendor.
    pub publisher: String,
    /// Group name.
    pub name: String,
    /// Group version.
    pub version: String,
}

impl fmt::Display for PluginGroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}/{}:{}",
            self.vendor, self.publisher, self.name, self.version
        )
    }
}

/// A named, versioned bundle of plugin references, presented to end users as
/// a one-shot install set.
///
/// Identity is `(vendor, publisher, name)`, rendered `vendor-publisher/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginGroup {
    /// Publishing vendor.
    pub vendor: String,
    /// Publisher within the vendor.
    pub publisher: String,
    /// Group name.
    pub name: String,
    /// Description of the recommended version (per-version descriptions are
    /// stored alongside each version's rows).
    pub description: String,
    /// Suppressed from default queries when true.
    pub hidden: bool,
    /// Version clients should install absent an explicit choice. Empty means
    /// "derive at query time".
    pub recommended_version: String,
    /// Group version -> plugins bundled in that version.
    pub versions: BTreeMap<String, Vec<PluginGroupPluginEntry>>,
}

impl PluginGroup {
    /// Create an empty group for `(vendor, publisher, name)`.
    pub fn new(vendor: &str, publisher: &str, name: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            publisher: publisher.to_string(),
            name: name.to_string(),
            description: String::new(),
            hidden: false,
            recommended_version: String::new(),
            versions: BTreeMap::new(),
        }
    }

    /// The user-facing `vendor-publisher/name` rendering.
    pub fn group_id(&self) -> String {
        format!("{}-{}/{}", self.vendor, self.publisher, self.name)
    }

    /// The identifier of one version of this group.
    pub fn identifier_for(&self, version: &str) -> PluginGroupIdentifier {
        PluginGroupIdentifier {
            vendor: self.vendor.clone(),
            publisher: self.publisher.clone(),
            name: self.name.clone(),
            version: version.to_string(),
        }
    }

    /// All group versions present, ascending semver order.
    pub fn versions_sorted(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.versions.keys().cloned().collect();
        sort_versions(&mut versions);
        versions
    }
}

/// Conjunctive filter over plugin rows. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    /// Match on plugin name.
    pub name: Option<String>,
    /// Match on target.
    pub target: Option<Target>,
    /// Match on version; [`LATEST`] resolves to the semver-maximum.
    pub version: Option<String>,
    /// Match on artifact OS.
    pub os: Option<String>,
    /// Match on artifact architecture.
    pub arch: Option<String>,
    /// Match on publisher.
    pub publisher: Option<String>,
    /// Match on vendor.
    pub vendor: Option<String>,
    /// Return hidden rows too. Default queries see visible rows only.
    pub include_hidden: bool,
}

impl PluginFilter {
    /// Filter on `(name, target)` identity.
    pub fn by_identity(name: &str, target: Target) -> Self {
        Self {
            name: Some(name.to_string()),
            target: Some(target),
            ..Self::default()
        }
    }
}

/// Conjunctive filter over plugin-group rows. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginGroupFilter {
    /// Match on vendor.
    pub vendor: Option<String>,
    /// Match on publisher.
    pub publisher: Option<String>,
    /// Match on group name.
    pub name: Option<String>,
    /// Match on group version; [`LATEST`] resolves to the semver-maximum.
    pub version: Option<String>,
    /// Return hidden rows too.
    pub include_hidden: bool,
}

/// Parse a version string as semver, accepting a leading `v` or `V`.
pub fn parse_version(version: &str) -> Result<semver::Version> {
    let trimmed = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);
    semver::Version::parse(trimmed)
        .map_err(|e| anyhow::anyhow!("invalid semantic version {version}: {e}"))
}

/// True if the string parses as semver (leading `v` accepted).
pub fn is_valid_version(version: &str) -> bool {
    parse_version(version).is_ok()
}

/// Sort versions ascending by semver. Strings that do not parse sort first,
/// lexically, so the maximum is always a real version when one exists.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| match (parse_version(a), parse_version(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
        (Err(_), Ok(_)) => std::cmp::Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    });
}

/// The semver-maximum of `versions`, or `None` when empty.
pub fn latest_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .max_by(|a, b| match (parse_version(a), parse_version(b)) {
            (Ok(va), Ok(vb)) => va.cmp(&vb),
            (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
            (Err(_), Ok(_)) => std::cmp::Ordering::Less,
            (Err(_), Err(_)) => a.cmp(b),
        })
}
