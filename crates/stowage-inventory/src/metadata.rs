use std::path::{Path, PathBuf};

use rusqlite::Connection;

use stowage_types::{PluginGroupIdentifier, PluginIdentifier};

use crate::error::InventoryError;
use crate::statement_log::StatementLog;

/// File name of the metadata database inside its published artifact.
pub const METADATA_DB_FILE: &str = "plugin_inventory_metadata.db";

const CREATE_AVAILABLE_BINARIES: &str = "\
CREATE TABLE IF NOT EXISTS AvailablePluginBinaries (
    PluginName TEXT NOT NULL,
    Target     TEXT NOT NULL,
    Version    TEXT NOT NULL,
    PRIMARY KEY (PluginName, Target, Version)
)";

const CREATE_AVAILABLE_GROUPS: &str = "\
CREATE TABLE IF NOT EXISTS AvailablePluginGroups (
    Vendor       TEXT NOT NULL,
    Publisher    TEXT NOT NULL,
    GroupName    TEXT NOT NULL,
    GroupVersion TEXT NOT NULL,
    PRIMARY KEY (Vendor, Publisher, GroupName, GroupVersion)
)";

const INSERT_BINARY_ID: &str = "\
INSERT INTO AvailablePluginBinaries (PluginName, Target, Version) VALUES (?, ?, ?)";

const INSERT_GROUP_ID: &str = "\
INSERT INTO AvailablePluginGroups (Vendor, Publisher, GroupName, GroupVersion) \
VALUES (?, ?, ?, ?)";

/// The "visible set" catalog: identifier-only tables naming what a
/// downstream distribution offers.
///
/// Merging unions two publishers' visible sets; pruning deletes everything
/// from a full inventory that the visible set does not name.
pub struct MetadataStore {
    db_path: PathBuf,
    conn: Connection,
    audit: StatementLog,
}

impl MetadataStore {
    /// Open (or create) the metadata database at `path`.
    pub fn open(path: &Path) -> Result<Self, InventoryError> {
        let conn = Connection::open(path).map_err(|source| InventoryError::DbOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            db_path: path.to_path_buf(),
            conn,
            audit: StatementLog::from_env(),
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Create both identifier tables. Idempotent.
    pub fn create_schema(&self) -> Result<(), InventoryError> {
        self.conn
            .execute(CREATE_AVAILABLE_BINARIES, [])
            .map_err(InventoryError::Schema)?;
        self.conn
            .execute(CREATE_AVAILABLE_GROUPS, [])
            .map_err(InventoryError::Schema)?;
        Ok(())
    }

    /// Record one plugin version as available.
    pub fn insert_plugin_identifier(
        &mut self,
        identifier: &PluginIdentifier,
    ) -> Result<(), InventoryError> {
        let params = [
            identifier.name.clone(),
            identifier.target.to_string(),
            identifier.version.clone(),
        ];
        self.conn
            .execute(INSERT_BINARY_ID, rusqlite::params_from_iter(params.iter()))
            .map_err(|e| InventoryError::from_insert(e, format!("plugin {identifier}")))?;
        self.audit.record(INSERT_BINARY_ID, &params);
        Ok(())
    }

    /// Record one plugin-group version as available.
    pub fn insert_plugin_group_identifier(
        &mut self,
        identifier: &PluginGroupIdentifier,
    ) -> Result<(), InventoryError> {
        let params = [
            identifier.vendor.clone(),
            identifier.publisher.clone(),
            identifier.name.clone(),
            identifier.version.clone(),
        ];
        self.conn
            .execute(INSERT_GROUP_ID, rusqlite::params_from_iter(params.iter()))
            .map_err(|e| InventoryError::from_insert(e, format!("plugin group {identifier}")))?;
        self.audit.record(INSERT_GROUP_ID, &params);
        Ok(())
    }

    /// Union another metadata file's identifiers into this one.
    ///
    /// The copy itself runs inside one transaction; rows already present
    /// are replaced, so merging is idempotent.
    pub fn merge(&mut self, other: &Path) -> Result<(), InventoryError> {
        self.attach(other, "incoming")?;
        let result = self.merge_attached();
        let detach = self.conn.execute("DETACH DATABASE incoming", []);
        result?;
        detach?;
        Ok(())
    }

    fn merge_attached(&mut self) -> Result<(), InventoryError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO AvailablePluginBinaries \
             SELECT PluginName, Target, Version FROM incoming.AvailablePluginBinaries",
            [],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO AvailablePluginGroups \
             SELECT Vendor, Publisher, GroupName, GroupVersion \
             FROM incoming.AvailablePluginGroups",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete from a full inventory every plugin row and group row whose
    /// identifier is absent from this metadata. Both deletes run inside one
    /// transaction, so readers of the inventory see all-or-nothing.
    pub fn prune_inventory(&mut self, inventory: &Path) -> Result<(), InventoryError> {
        self.attach(inventory, "inv")?;
        let result = self.prune_attached();
        let detach = self.conn.execute("DETACH DATABASE inv", []);
        result?;
        detach?;
        Ok(())
    }

    fn prune_attached(&mut self) -> Result<(), InventoryError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM inv.PluginBinaries WHERE NOT EXISTS (\
                SELECT 1 FROM main.AvailablePluginBinaries AS a \
                WHERE a.PluginName = PluginBinaries.PluginName \
                AND a.Target = PluginBinaries.Target \
                AND a.Version = PluginBinaries.Version)",
            [],
        )?;
        tx.execute(
            "DELETE FROM inv.PluginGroups WHERE NOT EXISTS (\
                SELECT 1 FROM main.AvailablePluginGroups AS a \
                WHERE a.Vendor = PluginGroups.Vendor \
                AND a.Publisher = PluginGroups.Publisher \
                AND a.GroupName = PluginGroups.GroupName \
                AND a.GroupVersion = PluginGroups.GroupVersion)",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn attach(&self, path: &Path, alias: &str) -> Result<(), InventoryError> {
        // ATTACH cannot run inside a transaction, so it brackets the
        // transactional work instead.
        self.conn.execute(
            &format!("ATTACH DATABASE ? AS {alias}"),
            rusqlite::params![path.to_string_lossy().into_owned()],
        )?;
        Ok(())
    }
}
