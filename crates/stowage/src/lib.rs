//! # Stowage
//!
//! A distribution layer for CLI plugins over OCI registries.
//!
//! Stowage lets publishers package plugin binaries for multiple platforms,
//! push them as OCI artifacts, and register them in a central, versioned
//! plugin inventory that is itself published as an OCI artifact. Clients
//! consult that inventory to discover, filter, and install plugins.
//!
//! ## Pipeline
//!
//! The publisher flow is **pull → mutate → push**:
//!
//! 1. [`engine::init_inventory`] publishes a fresh, empty inventory under
//!    `<repo>/plugin-inventory:<tag>`.
//! 2. [`engine::add_plugin`] pulls the current inventory, verifies every
//!    plugin binary by digest, registers the manifest's plugins in one
//!    transaction, and pushes the inventory back.
//! 3. [`engine::add_plugin_group`] registers a named, versioned bundle of
//!    already-published plugins.
//! 4. The activation flows flip visibility without deleting rows.
//!
//! Clients run read-only queries against the embedded store
//! ([`stowage_inventory::InventoryStore`]) after pulling the artifact.
//!
//! ## Modules
//!
//! - [`engine`] — Inventory lifecycle: init, plugin add, group add,
//!   activation flips, publish-back with retained-on-failure semantics
//! - [`config`] — `.stowage.toml` loading and merging
//!
//! Registry access goes through the [`stowage_oci::ImageClient`] capability
//! trait, selected at construction time; interactive authentication lives
//! in the `stowage-login` crate.

/// Inventory lifecycle: init, plugin add, group add, activation flips.
pub mod engine;

/// Configuration file (`.stowage.toml`) loading and merging.
pub mod config;

/// Relational inventory and metadata stores.
/// Re-exported from the stowage-inventory microcrate.
pub use stowage_inventory as inventory;

/// OCI image client capability and implementations.
/// Re-exported from the stowage-oci microcrate.
pub use stowage_oci as oci;

/// Publisher manifest reading.
/// Re-exported from the stowage-manifest microcrate.
pub use stowage_manifest as manifest;

/// Core domain types.
/// Re-exported from the stowage-types microcrate.
pub use stowage_types as types;
