use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use stowage_types::{
    Artifact, LATEST, PluginFilter, PluginGroup, PluginGroupFilter, PluginGroupPluginEntry,
    PluginInventoryEntry, Target, latest_version,
};

use crate::error::InventoryError;
use crate::include_deactivated_plugins_override;
use crate::statement_log::StatementLog;

/// File name of the inventory database inside the published artifact.
pub const INVENTORY_DB_FILE: &str = "plugin_inventory.db";

const CREATE_PLUGIN_BINARIES: &str = "\
CREATE TABLE IF NOT EXISTS PluginBinaries (
    PluginName         TEXT NOT NULL,
    Target             TEXT NOT NULL,
    RecommendedVersion TEXT NOT NULL,
    Version            TEXT NOT NULL,
    Hidden             TEXT NOT NULL,
    Description        TEXT NOT NULL,
    Publisher          TEXT NOT NULL,
    Vendor             TEXT NOT NULL,
    OS                 TEXT NOT NULL,
    Architecture       TEXT NOT NULL,
    Digest             TEXT NOT NULL,
    URI                TEXT NOT NULL,
    PRIMARY KEY (PluginName, Target, Version, OS, Architecture)
)";

const CREATE_PLUGIN_GROUPS: &str = "\
CREATE TABLE IF NOT EXISTS PluginGroups (
    Vendor        TEXT NOT NULL,
    Publisher     TEXT NOT NULL,
    GroupName     TEXT NOT NULL,
    GroupVersion  TEXT NOT NULL,
    Description   TEXT NOT NULL,
    PluginName    TEXT NOT NULL,
    Target        TEXT NOT NULL,
    PluginVersion TEXT NOT NULL,
    Mandatory     TEXT NOT NULL,
    Hidden        TEXT NOT NULL,
    PRIMARY KEY (Vendor, Publisher, GroupName, GroupVersion, PluginName, Target)
)";

const PLUGIN_SELECT: &str = "\
SELECT PluginName, Target, RecommendedVersion, Version, Hidden, Description, \
Publisher, Vendor, OS, Architecture, Digest, URI FROM PluginBinaries";

// The strict ordering is a contract: the result-set walker below depends on
// identity columns arriving grouped and versions arriving contiguously.
const PLUGIN_ORDER: &str = " ORDER BY PluginName, Target, Version, OS, Architecture";

const GROUP_SELECT: &str = "\
SELECT Vendor, Publisher, GroupName, GroupVersion, Description, PluginName, \
Target, PluginVersion, Mandatory, Hidden FROM PluginGroups";

const GROUP_ORDER: &str = " ORDER BY Vendor, Publisher, GroupName, GroupVersion, PluginName, Target";

const INSERT_PLUGIN_ROW: &str = "\
INSERT INTO PluginBinaries (PluginName, Target, RecommendedVersion, Version, Hidden, \
Description, Publisher, Vendor, OS, Architecture, Digest, URI) \
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_GROUP_ROW: &str = "\
INSERT INTO PluginGroups (Vendor, Publisher, GroupName, GroupVersion, Description, \
PluginName, Target, PluginVersion, Mandatory, Hidden) \
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const DELETE_GROUP_VERSION: &str = "\
DELETE FROM PluginGroups WHERE Vendor = ? AND Publisher = ? AND GroupName = ? AND GroupVersion = ?";

fn bool_text(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn parse_bool_text(value: &str, column: &str) -> Result<bool, InventoryError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(InventoryError::CorruptRow(format!(
            "{column} holds {other:?}, expected \"true\" or \"false\""
        ))),
    }
}

fn parse_target(value: &str) -> Result<Target, InventoryError> {
    value
        .parse()
        .map_err(|_| InventoryError::CorruptRow(format!("Target holds unknown value {value:?}")))
}

/// The relational catalog of plugins and plugin groups.
///
/// One store wraps one SQLite file. All mutations run inside a transaction;
/// readers observe either the pre- or post-state of a logical operation.
pub struct InventoryStore {
    db_path: PathBuf,
    conn: Connection,
    audit: StatementLog,
}

impl InventoryStore {
    /// Open (or create) the inventory database at `path`.
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

    /// Create both tables. Idempotent.
    pub fn create_schema(&self) -> Result<(), InventoryError> {
        self.conn
            .execute(CREATE_PLUGIN_BINARIES, [])
            .map_err(InventoryError::Schema)?;
        self.conn
            .execute(CREATE_PLUGIN_GROUPS, [])
            .map_err(InventoryError::Schema)?;
        Ok(())
    }

    /// All plugins visible to default queries.
    pub fn get_all_plugins(&self) -> Result<Vec<PluginInventoryEntry>, InventoryError> {
        self.get_plugins(&PluginFilter::default())
    }

    /// Plugins matching the conjunction of the filter's non-empty fields.
    ///
    /// A `version` of [`LATEST`] first enumerates all versions of each
    /// matching plugin, picks the semver-maximum as the recommended version,
    /// and re-filters with that version.
    pub fn get_plugins(
        &self,
        filter: &PluginFilter,
    ) -> Result<Vec<PluginInventoryEntry>, InventoryError> {
        if filter.version.as_deref() == Some(LATEST) {
            let mut base = filter.clone();
            base.version = None;
            let entries = self.query_plugins(&base)?;
            return Ok(entries
                .into_iter()
                .filter_map(|mut entry| {
                    let recommended = entry.recommended_version.clone();
                    entry.artifacts.retain(|version, _| *version == recommended);
                    if entry.artifacts.is_empty() {
                        None
                    } else {
                        Some(entry)
                    }
                })
                .collect());
        }

        self.query_plugins(filter)
    }

    /// Plugin groups matching the conjunction of the filter's non-empty
    /// fields. [`LATEST`] resolves as for [`InventoryStore::get_plugins`].
    pub fn get_plugin_groups(
        &self,
        filter: &PluginGroupFilter,
    ) -> Result<Vec<PluginGroup>, InventoryError> {
        if filter.version.as_deref() == Some(LATEST) {
            let mut base = filter.clone();
            base.version = None;
            let groups = self.query_plugin_groups(&base)?;
            return Ok(groups
                .into_iter()
                .filter_map(|mut group| {
                    let recommended = group.recommended_version.clone();
                    group.versions.retain(|version, _| *version == recommended);
                    if group.versions.is_empty() { None } else { Some(group) }
                })
                .collect());
        }

        self.query_plugin_groups(filter)
    }

    /// Insert one row per `(version, os, arch)` of the entry, in one
    /// transaction. A primary-key collision fails the whole insert.
    pub fn insert_plugin(&mut self, entry: &PluginInventoryEntry) -> Result<(), InventoryError> {
        self.insert_plugins(std::slice::from_ref(entry))
    }

    /// Insert several entries in one transaction: either every row of every
    /// entry lands, or none do.
    pub fn insert_plugins(
        &mut self,
        entries: &[PluginInventoryEntry],
    ) -> Result<(), InventoryError> {
        let audit = self.audit.clone();
        let tx = self.conn.transaction()?;

        for entry in entries {
            insert_plugin_rows(&tx, &audit, entry)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Insert one row per `(group_version, plugin_name, target)` of the
    /// group, in one transaction.
    ///
    /// With `override_version`, all rows for each exact
    /// `(vendor, publisher, name, group_version)` are deleted first. Every
    /// referenced plugin must already exist (visible, unless the test-only
    /// override is set); the description is mandatory for a brand-new group
    /// and reused from storage otherwise.
    pub fn insert_plugin_group(
        &mut self,
        group: &PluginGroup,
        override_version: bool,
    ) -> Result<(), InventoryError> {
        let audit = self.audit.clone();
        let allow_hidden = include_deactivated_plugins_override();
        let tx = self.conn.transaction()?;

        let description = resolve_group_description(&tx, group)?;

        for (group_version, entries) in &group.versions {
            if override_version {
                let params = [
                    group.vendor.clone(),
                    group.publisher.clone(),
                    group.name.clone(),
                    group_version.clone(),
                ];
                tx.execute(DELETE_GROUP_VERSION, rusqlite::params_from_iter(params.iter()))?;
                audit.record(DELETE_GROUP_VERSION, &params);
            }

            for entry in entries {
                ensure_plugin_exists(&tx, entry, allow_hidden)?;

                let params = [
                    group.vendor.clone(),
                    group.publisher.clone(),
                    group.name.clone(),
                    group_version.clone(),
                    description.clone(),
                    entry.name.clone(),
                    entry.target.to_string(),
                    entry.version.clone(),
                    bool_text(entry.mandatory).to_string(),
                    bool_text(group.hidden).to_string(),
                ];
                tx.execute(INSERT_GROUP_ROW, rusqlite::params_from_iter(params.iter()))
                    .map_err(|e| {
                        InventoryError::from_insert(
                            e,
                            format!(
                                "plugin {} in group {}",
                                entry.identifier(),
                                group.identifier_for(group_version)
                            ),
                        )
                    })?;
                audit.record(INSERT_GROUP_ROW, &params);
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Flip the hidden flag for every `(name, target, version, publisher,
    /// vendor)` row named by the entry's artifact versions. Fails with
    /// not-found when any version matches no rows.
    pub fn update_plugin_activation_state(
        &mut self,
        entry: &PluginInventoryEntry,
    ) -> Result<(), InventoryError> {
        self.update_plugins_activation_state(std::slice::from_ref(entry))
    }

    /// Activation flip across several entries in one transaction.
    pub fn update_plugins_activation_state(
        &mut self,
        entries: &[PluginInventoryEntry],
    ) -> Result<(), InventoryError> {
        const UPDATE: &str = "\
UPDATE PluginBinaries SET Hidden = ? WHERE PluginName = ? AND Target = ? AND Version = ? \
AND Publisher = ? AND Vendor = ?";

        let audit = self.audit.clone();
        let tx = self.conn.transaction()?;

        for entry in entries {
            for version in entry.artifacts.keys() {
                let params = [
                    bool_text(entry.hidden).to_string(),
                    entry.name.clone(),
                    entry.target.to_string(),
                    version.clone(),
                    entry.publisher.clone(),
                    entry.vendor.clone(),
                ];
                let changed = tx.execute(UPDATE, rusqlite::params_from_iter(params.iter()))?;
                if changed == 0 {
                    return Err(InventoryError::NotFound(format!(
                        "plugin {} from {}/{}",
                        entry.identifier_for(version),
                        entry.vendor,
                        entry.publisher
                    )));
                }
                audit.record(UPDATE, &params);
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Flip the hidden flag for every `(vendor, publisher, name,
    /// group_version)` named by the group's versions. Fails with not-found
    /// when any version matches no rows.
    pub fn update_plugin_group_activation_state(
        &mut self,
        group: &PluginGroup,
    ) -> Result<(), InventoryError> {
        const UPDATE: &str = "\
UPDATE PluginGroups SET Hidden = ? WHERE Vendor = ? AND Publisher = ? AND GroupName = ? \
AND GroupVersion = ?";

        let audit = self.audit.clone();
        let tx = self.conn.transaction()?;

        for group_version in group.versions.keys() {
            let params = [
                bool_text(group.hidden).to_string(),
                group.vendor.clone(),
                group.publisher.clone(),
                group.name.clone(),
                group_version.clone(),
            ];
            let changed = tx.execute(UPDATE, rusqlite::params_from_iter(params.iter()))?;
            if changed == 0 {
                return Err(InventoryError::NotFound(format!(
                    "plugin group {}",
                    group.identifier_for(group_version)
                )));
            }
            audit.record(UPDATE, &params);
        }

        tx.commit()?;
        Ok(())
    }

    fn query_plugins(
        &self,
        filter: &PluginFilter,
    ) -> Result<Vec<PluginInventoryEntry>, InventoryError> {
        let (clause, params) = plugin_where_clause(filter);
        let sql = format!("{PLUGIN_SELECT}{clause}{PLUGIN_ORDER}");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

        let mut entries: Vec<PluginInventoryEntry> = Vec::new();
        let mut current: Option<PluginEntryCursor> = None;

        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let target = parse_target(&row.get::<_, String>(1)?)?;
            let recommended: String = row.get(2)?;
            let version: String = row.get(3)?;
            let hidden = parse_bool_text(&row.get::<_, String>(4)?, "Hidden")?;
            let description: String = row.get(5)?;
            let publisher: String = row.get(6)?;
            let vendor: String = row.get(7)?;
            let os: String = row.get(8)?;
            let arch: String = row.get(9)?;
            let digest: String = row.get(10)?;
            let uri: String = row.get(11)?;

            let same_entry = current
                .as_ref()
                .is_some_and(|c| c.entry.name == name && c.entry.target == target);
            if !same_entry {
                if let Some(cursor) = current.take() {
                    entries.push(cursor.finish());
                }
                let mut entry = PluginInventoryEntry::new(&name, target);
                entry.description = description.clone();
                entry.vendor = vendor.clone();
                entry.publisher = publisher.clone();
                entry.recommended_version = recommended.clone();
                current = Some(PluginEntryCursor {
                    entry,
                    all_hidden: true,
                });
            }

            if let Some(cursor) = current.as_mut() {
                // Ordered scan: rows for one version arrive contiguously.
                cursor
                    .entry
                    .add_artifact(&version, Artifact::new(&os, &arch, &digest, &uri));
                cursor.all_hidden &= hidden;
                if !recommended.is_empty() {
                    cursor.entry.recommended_version = recommended;
                }
            }
        }

        if let Some(cursor) = current.take() {
            entries.push(cursor.finish());
        }

        Ok(entries)
    }

    fn query_plugin_groups(
        &self,
        filter: &PluginGroupFilter,
    ) -> Result<Vec<PluginGroup>, InventoryError> {
        let (clause, params) = group_where_clause(filter);
        let sql = format!("{GROUP_SELECT}{clause}{GROUP_ORDER}");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

        let mut groups: Vec<PluginGroup> = Vec::new();
        let mut current: Option<GroupCursor> = None;

        while let Some(row) = rows.next()? {
            let vendor: String = row.get(0)?;
            let publisher: String = row.get(1)?;
            let name: String = row.get(2)?;
            let group_version: String = row.get(3)?;
            let description: String = row.get(4)?;
            let plugin_name: String = row.get(5)?;
            let target = parse_target(&row.get::<_, String>(6)?)?;
            let plugin_version: String = row.get(7)?;
            let mandatory = parse_bool_text(&row.get::<_, String>(8)?, "Mandatory")?;
            let hidden = parse_bool_text(&row.get::<_, String>(9)?, "Hidden")?;

            let same_group = current.as_ref().is_some_and(|c| {
                c.group.vendor == vendor && c.group.publisher == publisher && c.group.name == name
            });
            if !same_group {
                if let Some(cursor) = current.take() {
                    groups.push(cursor.finish());
                }
                current = Some(GroupCursor {
                    group: PluginGroup::new(&vendor, &publisher, &name),
                    descriptions: BTreeMap::new(),
                    all_hidden: true,
                });
            }

            if let Some(cursor) = current.as_mut() {
                cursor
                    .group
                    .versions
                    .entry(group_version.clone())
                    .or_default()
                    .push(PluginGroupPluginEntry {
                        name: plugin_name,
                        target,
                        version: plugin_version,
                        mandatory,
                    });
                cursor.descriptions.insert(group_version, description);
                cursor.all_hidden &= hidden;
            }
        }

        if let Some(cursor) = current.take() {
            groups.push(cursor.finish());
        }

        Ok(groups)
    }
}

struct PluginEntryCursor {
    entry: PluginInventoryEntry,
    all_hidden: bool,
}

impl PluginEntryCursor {
    fn finish(mut self) -> PluginInventoryEntry {
        if self.entry.recommended_version.is_empty() {
            if let Some(max) =
                latest_version(self.entry.artifacts.keys().map(String::as_str))
            {
                self.entry.recommended_version = max.to_string();
            }
        }
        self.entry.hidden = self.all_hidden;
        self.entry
    }
}

struct GroupCursor {
    group: PluginGroup,
    descriptions: BTreeMap<String, String>,
    all_hidden: bool,
}

impl GroupCursor {
    fn finish(mut self) -> PluginGroup {
        if self.group.recommended_version.is_empty() {
            if let Some(max) = latest_version(self.group.versions.keys().map(String::as_str)) {
                self.group.recommended_version = max.to_string();
            }
        }
        // The group's description is the recommended version's description.
        if let Some(description) = self.descriptions.get(&self.group.recommended_version) {
            self.group.description = description.clone();
        }
        self.group.hidden = self.all_hidden;
        self.group
    }
}

fn insert_plugin_rows(
    tx: &rusqlite::Transaction<'_>,
    audit: &StatementLog,
    entry: &PluginInventoryEntry,
) -> Result<(), InventoryError> {
    for (version, artifacts) in &entry.artifacts {
        for artifact in artifacts {
            let params = [
                entry.name.clone(),
                entry.target.to_string(),
                entry.recommended_version.clone(),
                version.clone(),
                bool_text(entry.hidden).to_string(),
                entry.description.clone(),
                entry.publisher.clone(),
                entry.vendor.clone(),
                artifact.os.clone(),
                artifact.arch.clone(),
                artifact.digest.clone(),
                artifact.image_path.clone(),
            ];
            tx.execute(INSERT_PLUGIN_ROW, rusqlite::params_from_iter(params.iter()))
                .map_err(|e| {
                    InventoryError::from_insert(
                        e,
                        format!(
                            "plugin {} at {}/{}",
                            entry.identifier_for(version),
                            artifact.os,
                            artifact.arch
                        ),
                    )
                })?;
            audit.record(INSERT_PLUGIN_ROW, &params);
        }
    }
    Ok(())
}

fn plugin_where_clause(filter: &PluginFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    let mut push = |column: &str, value: Option<String>| {
        if let Some(value) = value {
            clauses.push(format!("{column} = ?"));
            params.push(value);
        }
    };

    push("PluginName", filter.name.clone());
    push("Target", filter.target.map(|t| t.to_string()));
    push("Version", filter.version.clone());
    push("OS", filter.os.clone());
    push("Architecture", filter.arch.clone());
    push("Publisher", filter.publisher.clone());
    push("Vendor", filter.vendor.clone());

    if !filter.include_hidden {
        clauses.push("Hidden = 'false'".to_string());
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

fn group_where_clause(filter: &PluginGroupFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    let mut push = |column: &str, value: Option<String>| {
        if let Some(value) = value {
            clauses.push(format!("{column} = ?"));
            params.push(value);
        }
    };

    push("Vendor", filter.vendor.clone());
    push("Publisher", filter.publisher.clone());
    push("GroupName", filter.name.clone());
    push("GroupVersion", filter.version.clone());

    if !filter.include_hidden {
        clauses.push("Hidden = 'false'".to_string());
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

fn resolve_group_description(
    tx: &rusqlite::Transaction<'_>,
    group: &PluginGroup,
) -> Result<String, InventoryError> {
    if !group.description.is_empty() {
        return Ok(group.description.clone());
    }

    let existing: Option<String> = tx
        .query_row(
            "SELECT Description FROM PluginGroups WHERE Vendor = ? AND Publisher = ? \
             AND GroupName = ? LIMIT 1",
            rusqlite::params![group.vendor, group.publisher, group.name],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(InventoryError::Sql(other)),
        })?;

    existing.ok_or_else(|| {
        InventoryError::InvalidInput(format!(
            "a description is required for new plugin group {}",
            group.group_id()
        ))
    })
}

fn ensure_plugin_exists(
    tx: &rusqlite::Transaction<'_>,
    entry: &PluginGroupPluginEntry,
    allow_hidden: bool,
) -> Result<(), InventoryError> {
    let mut sql = String::from(
        "SELECT COUNT(*) FROM PluginBinaries WHERE PluginName = ? AND Target = ? AND Version = ?",
    );
    if !allow_hidden {
        sql.push_str(" AND Hidden = 'false'");
    }

    let count: i64 = tx.query_row(
        &sql,
        rusqlite::params![entry.name, entry.target.to_string(), entry.version],
        |row| row.get(0),
    )?;

    if count == 0 {
        return Err(InventoryError::MissingReference {
            identifier: entry.identifier(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use crate::INCLUDE_DEACTIVATED_PLUGINS_ENV;

    use super::*;

    fn open_store(dir: &Path) -> InventoryStore {
        let mut path = dir.to_path_buf();
        path.push(INVENTORY_DB_FILE);
        let store = InventoryStore::open(&path).expect("open");
        store.create_schema().expect("schema");
        store
    }

    fn sample_entry(name: &str, target: Target, versions: &[&str]) -> PluginInventoryEntry {
        let mut entry = PluginInventoryEntry::new(name, target);
        entry.description = format!("{name} description");
        entry.vendor = "vmware".to_string();
        entry.publisher = "tkg".to_string();
        for version in versions {
            // Same order the store returns rows in, so maps compare equal.
            for (os, arch) in [("darwin", "amd64"), ("linux", "amd64"), ("windows", "amd64")] {
                entry.add_artifact(
                    version,
                    Artifact::new(
                        os,
                        arch,
                        &format!("sha256:{name}-{version}-{os}"),
                        &format!("vmware/tkg/{os}/{arch}/{target}/{name}:{version}"),
                    ),
                );
            }
        }
        entry
    }

    fn sample_group(name: &str, version: &str, members: &[(&str, Target, &str)]) -> PluginGroup {
        let mut group = PluginGroup::new("vmware", "tkg", name);
        group.description = format!("{name} group");
        group.versions.insert(
            version.to_string(),
            members
                .iter()
                .map(|(plugin, target, plugin_version)| PluginGroupPluginEntry {
                    name: plugin.to_string(),
                    target: *target,
                    version: plugin_version.to_string(),
                    mandatory: true,
                })
                .collect(),
        );
        group
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let td = tempdir().expect("tempdir");
        let store = open_store(td.path());
        store.create_schema().expect("second create");
    }

    #[test]
    fn plugin_round_trips_through_the_store() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let entry = sample_entry("management-cluster", Target::Kubernetes, &["v0.28.0"]);
        store.insert_plugin(&entry).expect("insert");

        let found = store
            .get_plugins(&PluginFilter::by_identity("management-cluster", Target::Kubernetes))
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, entry.name);
        assert_eq!(found[0].target, entry.target);
        assert_eq!(found[0].description, entry.description);
        assert_eq!(found[0].vendor, entry.vendor);
        assert_eq!(found[0].publisher, entry.publisher);
        assert_eq!(found[0].artifacts, entry.artifacts);
        // Empty stored recommendation comes back derived.
        assert_eq!(found[0].recommended_version, "v0.28.0");
    }

    #[test]
    fn duplicate_insert_is_rejected_without_merging() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let entry = sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]);
        store.insert_plugin(&entry).expect("insert");

        let mut conflicting = entry.clone();
        conflicting.description = "a different description".to_string();
        let err = store.insert_plugin(&conflicting).expect_err("duplicate");
        assert!(matches!(err, InventoryError::AlreadyExists(_)));

        // The original description survives untouched.
        let found = store
            .get_plugins(&PluginFilter::by_identity("cluster", Target::Kubernetes))
            .expect("query");
        assert_eq!(found[0].description, "cluster description");
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("apps", Target::Global, &["v1.0.0"]))
            .expect("insert");

        // Second entry collides, so the first must not land either.
        let batch = [
            sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]),
            sample_entry("apps", Target::Global, &["v1.0.0"]),
        ];
        let err = store.insert_plugins(&batch).expect_err("collision");
        assert!(matches!(err, InventoryError::AlreadyExists(_)));

        let found = store
            .get_plugins(&PluginFilter::by_identity("cluster", Target::Kubernetes))
            .expect("query");
        assert!(found.is_empty());
    }

    #[test]
    fn recommended_version_is_semver_max() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let entry = sample_entry(
            "cluster",
            Target::Kubernetes,
            &["v1.0.0", "v0.26.0", "v0.28.0"],
        );
        store.insert_plugin(&entry).expect("insert");

        let found = store
            .get_plugins(&PluginFilter::by_identity("cluster", Target::Kubernetes))
            .expect("query");
        assert_eq!(found[0].recommended_version, "v1.0.0");
    }

    #[test]
    fn hidden_versions_drop_out_of_recommendation() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let visible = sample_entry("cluster", Target::Kubernetes, &["v0.26.0", "v0.28.0"]);
        store.insert_plugin(&visible).expect("insert");

        let mut hidden = sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]);
        hidden.hidden = true;
        store.insert_plugin(&hidden).expect("insert hidden");

        let found = store
            .get_plugins(&PluginFilter::by_identity("cluster", Target::Kubernetes))
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].recommended_version, "v0.28.0");
        assert!(!found[0].artifacts.contains_key("v1.0.0"));

        // With hidden rows included, the hidden maximum wins.
        let mut all = PluginFilter::by_identity("cluster", Target::Kubernetes);
        all.include_hidden = true;
        let found = store.get_plugins(&all).expect("query");
        assert_eq!(found[0].recommended_version, "v1.0.0");
        assert!(found[0].artifacts.contains_key("v1.0.0"));
    }

    #[test]
    fn fully_hidden_plugins_are_invisible_by_default() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let mut entry = sample_entry("secret", Target::Global, &["v1.0.0"]);
        entry.hidden = true;
        store.insert_plugin(&entry).expect("insert");

        assert!(store.get_all_plugins().expect("query").is_empty());

        let mut filter = PluginFilter::default();
        filter.include_hidden = true;
        let found = store.get_plugins(&filter).expect("query");
        assert_eq!(found.len(), 1);
        assert!(found[0].hidden);
    }

    #[test]
    fn exact_filter_returns_single_artifact_digest() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("management-cluster", Target::Kubernetes, &["v0.28.0"]))
            .expect("insert");

        let filter = PluginFilter {
            name: Some("management-cluster".to_string()),
            target: Some(Target::Kubernetes),
            version: Some("v0.28.0".to_string()),
            os: Some("windows".to_string()),
            arch: Some("amd64".to_string()),
            ..PluginFilter::default()
        };
        let found = store.get_plugins(&filter).expect("query");
        assert_eq!(found.len(), 1);
        let artifacts = &found[0].artifacts["v0.28.0"];
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].digest, "sha256:management-cluster-v0.28.0-windows");
    }

    #[test]
    fn latest_sentinel_resolves_to_semver_max() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v0.28.0", "v1.0.0"]))
            .expect("insert");

        let filter = PluginFilter {
            name: Some("cluster".to_string()),
            target: Some(Target::Kubernetes),
            version: Some(LATEST.to_string()),
            ..PluginFilter::default()
        };
        let found = store.get_plugins(&filter).expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].artifacts.len(), 1);
        assert!(found[0].artifacts.contains_key("v1.0.0"));
    }

    #[test]
    fn stored_recommendation_pins_latest() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let mut entry = sample_entry("cluster", Target::Kubernetes, &["v0.28.0", "v1.0.0"]);
        entry.recommended_version = "v0.28.0".to_string();
        store.insert_plugin(&entry).expect("insert");

        let found = store
            .get_plugins(&PluginFilter::by_identity("cluster", Target::Kubernetes))
            .expect("query");
        assert_eq!(found[0].recommended_version, "v0.28.0");
    }

    #[test]
    fn filters_compose_as_a_conjunction() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]))
            .expect("insert");
        let mut other = sample_entry("cluster", Target::Global, &["v1.0.0"]);
        other.publisher = "tap".to_string();
        store.insert_plugin(&other).expect("insert");

        let filter = PluginFilter {
            name: Some("cluster".to_string()),
            publisher: Some("tap".to_string()),
            ..PluginFilter::default()
        };
        let found = store.get_plugins(&filter).expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target, Target::Global);
    }

    #[test]
    fn ordered_scan_separates_interleaved_identities() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        // Same name under two targets, inserted interleaved; the ordered
        // scan must still produce two clean entries.
        store
            .insert_plugin(&sample_entry("cluster", Target::MissionControl, &["v1.0.0"]))
            .expect("insert");
        store
            .insert_plugin(&sample_entry("cluster", Target::Global, &["v2.0.0"]))
            .expect("insert");
        store
            .insert_plugin(&sample_entry("apps", Target::Global, &["v0.1.0"]))
            .expect("insert");

        let found = store.get_all_plugins().expect("query");
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].name, "apps");
        assert_eq!(found[1].name, "cluster");
        assert_eq!(found[1].target, Target::Global);
        assert_eq!(found[2].target, Target::MissionControl);
    }

    #[test]
    fn group_insert_requires_existing_visible_plugins() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let group = sample_group(
            "default",
            "v1.0.0",
            &[("cluster", Target::Kubernetes, "v1.0.0")],
        );
        let err = store.insert_plugin_group(&group, false).expect_err("missing plugin");
        match &err {
            InventoryError::MissingReference { identifier } => {
                assert_eq!(identifier.name, "cluster");
                assert_eq!(identifier.target, Target::Kubernetes);
                assert_eq!(identifier.version, "v1.0.0");
            }
            other => panic!("expected MissingReference, got {other:?}"),
        }

        // Nothing was written for the failed group.
        let groups = store
            .get_plugin_groups(&PluginGroupFilter::default())
            .expect("query");
        assert!(groups.is_empty());
    }

    #[test]
    #[serial]
    fn hidden_plugins_are_missing_unless_override_set() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let mut hidden = sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]);
        hidden.hidden = true;
        store.insert_plugin(&hidden).expect("insert");

        let group = sample_group(
            "default",
            "v1.0.0",
            &[("cluster", Target::Kubernetes, "v1.0.0")],
        );

        temp_env::with_var(INCLUDE_DEACTIVATED_PLUGINS_ENV, None::<String>, || {
            let err = store.insert_plugin_group(&group, false).expect_err("hidden");
            assert!(matches!(err, InventoryError::MissingReference { .. }));
        });

        temp_env::with_var(INCLUDE_DEACTIVATED_PLUGINS_ENV, Some("true"), || {
            store.insert_plugin_group(&group, false).expect("override allows hidden");
        });
    }

    #[test]
    fn group_round_trips_and_derives_description() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0", "v2.0.0"]))
            .expect("insert");

        let mut v1 = sample_group("default", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        v1.description = "first release".to_string();
        store.insert_plugin_group(&v1, false).expect("insert v1");

        let mut v2 = sample_group("default", "v2.0.0", &[("cluster", Target::Kubernetes, "v2.0.0")]);
        v2.description = "second release".to_string();
        store.insert_plugin_group(&v2, false).expect("insert v2");

        let groups = store
            .get_plugin_groups(&PluginGroupFilter::default())
            .expect("query");
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.group_id(), "vmware-tkg/default");
        assert_eq!(group.recommended_version, "v2.0.0");
        // The group reports the recommended version's description.
        assert_eq!(group.description, "second release");
        assert_eq!(group.versions.len(), 2);
        assert!(group.versions["v1.0.0"][0].mandatory);
    }

    #[test]
    fn new_group_requires_description_and_reuses_it_later() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0", "v2.0.0"]))
            .expect("insert");

        let mut group = sample_group("default", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        group.description = String::new();
        let err = store.insert_plugin_group(&group, false).expect_err("no description");
        assert!(matches!(err, InventoryError::InvalidInput(_)));

        group.description = "stored description".to_string();
        store.insert_plugin_group(&group, false).expect("insert");

        // Later versions may omit the description and inherit the stored one.
        let mut next = sample_group("default", "v2.0.0", &[("cluster", Target::Kubernetes, "v2.0.0")]);
        next.description = String::new();
        store.insert_plugin_group(&next, false).expect("insert without description");

        let groups = store
            .get_plugin_groups(&PluginGroupFilter::default())
            .expect("query");
        assert_eq!(groups[0].description, "stored description");
    }

    #[test]
    fn group_override_replaces_exactly_one_version() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]))
            .expect("insert");
        store
            .insert_plugin(&sample_entry("apps", Target::Global, &["v1.0.0"]))
            .expect("insert");

        let g = sample_group("default", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        store.insert_plugin_group(&g, false).expect("insert");
        let other_version =
            sample_group("default", "v0.9.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        store.insert_plugin_group(&other_version, false).expect("insert v0.9.0");

        // Same identity and version, different plugin list, override on.
        let replacement = sample_group("default", "v1.0.0", &[("apps", Target::Global, "v1.0.0")]);
        store.insert_plugin_group(&replacement, true).expect("override");

        let groups = store
            .get_plugin_groups(&PluginGroupFilter::default())
            .expect("query");
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        let v1 = &group.versions["v1.0.0"];
        assert_eq!(v1.len(), 1);
        assert_eq!(v1[0].name, "apps");
        // The untouched version keeps its original member list.
        assert_eq!(group.versions["v0.9.0"][0].name, "cluster");
    }

    #[test]
    fn group_duplicate_without_override_is_rejected() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]))
            .expect("insert");

        let group = sample_group("default", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        store.insert_plugin_group(&group, false).expect("insert");
        let err = store.insert_plugin_group(&group, false).expect_err("duplicate");
        assert!(matches!(err, InventoryError::AlreadyExists(_)));
    }

    #[test]
    fn activation_state_flips_hidden_rows() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let mut entry = sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]);
        store.insert_plugin(&entry).expect("insert");

        entry.hidden = true;
        store.update_plugin_activation_state(&entry).expect("deactivate");
        assert!(store.get_all_plugins().expect("query").is_empty());

        entry.hidden = false;
        store.update_plugin_activation_state(&entry).expect("activate");
        assert_eq!(store.get_all_plugins().expect("query").len(), 1);
    }

    #[test]
    fn activation_of_unknown_plugin_is_not_found() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let entry = sample_entry("ghost", Target::Global, &["v1.0.0"]);
        let err = store.update_plugin_activation_state(&entry).expect_err("missing");
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[test]
    fn group_activation_flips_hidden_rows() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]))
            .expect("insert");
        let mut group = sample_group("default", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        store.insert_plugin_group(&group, false).expect("insert");

        group.hidden = true;
        store.update_plugin_group_activation_state(&group).expect("deactivate");
        assert!(store
            .get_plugin_groups(&PluginGroupFilter::default())
            .expect("query")
            .is_empty());

        let mut filter = PluginGroupFilter::default();
        filter.include_hidden = true;
        assert_eq!(store.get_plugin_groups(&filter).expect("query").len(), 1);

        group.hidden = false;
        store.update_plugin_group_activation_state(&group).expect("activate");
        assert_eq!(
            store
                .get_plugin_groups(&PluginGroupFilter::default())
                .expect("query")
                .len(),
            1
        );
    }

    #[test]
    fn group_activation_of_unknown_group_is_not_found() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        let group = sample_group("ghost", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]);
        let err = store
            .update_plugin_group_activation_state(&group)
            .expect_err("missing");
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[test]
    fn group_latest_sentinel_keeps_recommended_version_only() {
        let td = tempdir().expect("tempdir");
        let mut store = open_store(td.path());

        store
            .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0", "v2.0.0"]))
            .expect("insert");
        store
            .insert_plugin_group(
                &sample_group("default", "v1.0.0", &[("cluster", Target::Kubernetes, "v1.0.0")]),
                false,
            )
            .expect("insert");
        store
            .insert_plugin_group(
                &sample_group("default", "v2.0.0", &[("cluster", Target::Kubernetes, "v2.0.0")]),
                false,
            )
            .expect("insert");

        let filter = PluginGroupFilter {
            version: Some(LATEST.to_string()),
            ..PluginGroupFilter::default()
        };
        let groups = store.get_plugin_groups(&filter).expect("query");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].versions.len(), 1);
        assert!(groups[0].versions.contains_key("v2.0.0"));
    }

    #[test]
    #[serial]
    fn mutations_are_audited_when_log_file_is_set() {
        let td = tempdir().expect("tempdir");
        let audit_path = td.path().join("audit.sql");

        temp_env::with_var(
            crate::SQL_STATEMENTS_LOG_ENV,
            Some(audit_path.to_str().expect("utf8")),
            || {
                let mut store = open_store(td.path());
                store
                    .insert_plugin(&sample_entry("cluster", Target::Kubernetes, &["v1.0.0"]))
                    .expect("insert");
            },
        );

        let content = std::fs::read_to_string(&audit_path).expect("read audit");
        assert!(content.contains("INSERT INTO PluginBinaries"));
        assert!(content.contains("'cluster'"));
    }
}
