//! Relational plugin inventory and metadata stores for stowage.
//!
//! The inventory is one self-contained SQLite file with two tables,
//! `PluginBinaries` and `PluginGroups`; that file is what gets pushed to a
//! registry as the `plugin-inventory:<tag>` artifact. [`InventoryStore`]
//! owns its schema, queries, and mutations. [`MetadataStore`] is the
//! smaller "visible set" catalog used to prune a full inventory down to
//! what a downstream distribution offers.
//!
//! Read paths use a single ordered SELECT per query and walk the result set
//! with identity cursors; that ordering is load-bearing for
//! recommended-version derivation and group aggregation, so both stores
//! treat it as part of their contract.
//!
//! # Example
//!
//! ```
//! use stowage_inventory::InventoryStore;
//! use stowage_types::{Artifact, PluginInventoryEntry, PluginFilter, Target};
//!
//! let dir = tempfile::tempdir().expect("tempdir");
//! let mut store = InventoryStore::open(&dir.path().join("plugin_inventory.db")).expect("open");
//! store.create_schema().expect("schema");
//!
//! let mut entry = PluginInventoryEntry::new("management-cluster", Target::Kubernetes);
//! entry.description = "Manage clusters".to_string();
//! entry.vendor = "vmware".to_string();
//! entry.publisher = "tkg".to_string();
//! entry.add_artifact("v0.28.0", Artifact::new("linux", "amd64", "d0", "path"));
//! store.insert_plugin(&entry).expect("insert");
//!
//! let found = store
//!     .get_plugins(&PluginFilter::by_identity("management-cluster", Target::Kubernetes))
//!     .expect("query");
//! assert_eq!(found.len(), 1);
//! ```

use std::env;

mod error;
mod metadata;
mod statement_log;
mod store;


pub use error::InventoryError;
pub use metadata::{METADATA_DB_FILE, MetadataStore};
pub use statement_log::SQL_STATEMENTS_LOG_ENV;
pub use store::{INVENTORY_DB_FILE, InventoryStore};

/// Environment variable allowing plugin groups to reference deactivated
/// plugins. Test-only escape hatch; production publishes leave it unset.
pub const INCLUDE_DEACTIVATED_PLUGINS_ENV: &str =
    "STOWAGE_INCLUDE_DEACTIVATED_PLUGINS_TEST_ONLY";

/// True when the test-only override permits group references to hidden
/// plugins.
pub fn include_deactivated_plugins_override() -> bool {
    env::var(INCLUDE_DEACTIVATED_PLUGINS_ENV)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "true" || v == "1"
        })
        .unwrap_or(false)
}
