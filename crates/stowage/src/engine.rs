use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use stowage_inventory::{INVENTORY_DB_FILE, InventoryStore};
use stowage_manifest::{read_plugin_group_manifest, read_plugin_manifest};
use stowage_oci::ImageClient;
use stowage_types::{Artifact, PluginGroup, PluginInventoryEntry, Target};

/// Image name of the inventory artifact under a repository.
pub const INVENTORY_IMAGE_NAME: &str = "plugin-inventory";

/// Progress sink injected into every engine entry point.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Compose `<repo>/plugin-inventory:<tag>`.
pub fn inventory_image_ref(repository: &str, tag: &str) -> String {
    format!(
        "{}/{INVENTORY_IMAGE_NAME}:{tag}",
        repository.trim_end_matches('/')
    )
}

/// The path of one plugin binary image relative to its repository:
/// `<vendor>/<publisher>/<os>/<arch>/<target>/<name>:<version>`.
///
/// This relative form is what the inventory stores as the artifact URI;
/// clients prefix the repository to obtain the absolute reference.
pub fn plugin_image_path(
    vendor: &str,
    publisher: &str,
    os: &str,
    arch: &str,
    target: Target,
    name: &str,
    version: &str,
) -> String {
    format!("{vendor}/{publisher}/{os}/{arch}/{target}/{name}:{version}")
}

/// The binary file name inside a plugin image.
pub fn plugin_binary_name(name: &str, os: &str) -> String {
    if os == "windows" {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Options for [`init_inventory`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Repository to publish under, e.g. `registry.example/plugins`.
    pub repository: String,
    /// Inventory image tag.
    pub tag: String,
    /// Replace an existing inventory instead of failing.
    pub override_existing: bool,
}

/// Options for [`add_plugin`] and [`update_plugin_activation_state`].
#[derive(Debug, Clone)]
pub struct PluginAddOptions {
    /// Repository holding the inventory and the plugin binaries.
    pub repository: String,
    /// Inventory image tag.
    pub tag: String,
    /// Path of the plugin manifest.
    pub manifest_path: PathBuf,
    /// Publishing vendor.
    pub vendor: String,
    /// Publisher within the vendor.
    pub publisher: String,
    /// Register the plugins as deactivated (hidden).
    pub deactivate: bool,
    /// Validate the manifest and inventory mutation, then discard.
    pub validate_only: bool,
    /// Mutate this local database file instead of pulling and pushing.
    pub local_db: Option<PathBuf>,
}

/// Options for [`add_plugin_group`].
#[derive(Debug, Clone)]
pub struct PluginGroupAddOptions {
    /// Repository holding the inventory.
    pub repository: String,
    /// Inventory image tag.
    pub tag: String,
    /// Group name.
    pub name: String,
    /// Group version being registered.
    pub version: String,
    /// Group description; required the first time a group is registered.
    pub description: String,
    /// Path of the plugin-group manifest.
    pub manifest_path: PathBuf,
    /// Publishing vendor.
    pub vendor: String,
    /// Publisher within the vendor.
    pub publisher: String,
    /// Register the group version as deactivated (hidden).
    pub deactivate: bool,
    /// Replace the exact group version if it already exists.
    pub override_existing: bool,
    /// Mutate this local database file instead of pulling and pushing.
    pub local_db: Option<PathBuf>,
}

/// Options for [`update_plugin_group_activation_state`].
#[derive(Debug, Clone)]
pub struct PluginGroupActivationOptions {
    /// Repository holding the inventory.
    pub repository: String,
    /// Inventory image tag.
    pub tag: String,
    /// Group name.
    pub name: String,
    /// Group version to flip.
    pub version: String,
    /// Publishing vendor.
    pub vendor: String,
    /// Publisher within the vendor.
    pub publisher: String,
    /// Deactivate (hide) instead of activate.
    pub deactivate: bool,
    /// Mutate this local database file instead of pulling and pushing.
    pub local_db: Option<PathBuf>,
}

/// Create and publish a fresh, empty inventory.
///
/// Fails when the tag already resolves and `override_existing` is off.
pub fn init_inventory(
    client: &dyn ImageClient,
    opts: &InitOptions,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let image = inventory_image_ref(&opts.repository, &opts.tag);

    if !opts.override_existing && client.resolve(&image).is_ok() {
        bail!("inventory {image} already exists; use override to replace it");
    }

    let scratch = tempfile::tempdir().context("failed to create scratch dir for inventory")?;
    let db_path = scratch.path().join(INVENTORY_DB_FILE);

    let store = InventoryStore::open(&db_path)?;
    store.create_schema()?;
    drop(store);

    reporter.info(&format!("publishing empty inventory to {image}"));
    client
        .push(&image, &[db_path])
        .with_context(|| format!("failed to publish inventory image {image}"))?;
    reporter.info(&format!("initialized inventory {image}"));
    Ok(())
}

/// Register every plugin of a manifest in the inventory.
///
/// For each `(plugin, os/arch, version)` tuple the plugin binary image is
/// verified via its file digest (skipped under `validate_only`), then all
/// entries land in one database transaction before any push.
pub fn add_plugin(
    client: &dyn ImageClient,
    opts: &PluginAddOptions,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let manifest = read_plugin_manifest(&opts.manifest_path)?;
    let image = inventory_image_ref(&opts.repository, &opts.tag);
    let mut db = acquire_inventory_db(client, &image, opts.local_db.clone())?;
    if opts.validate_only {
        // Validation trials the mutation on a scratch copy; the caller's
        // file and the registry stay untouched.
        db = db.into_scratch_copy()?;
    }

    let mut store = InventoryStore::open(db.path())?;
    store.create_schema()?;

    let os_arch = manifest.os_arch();
    let mut entries: Vec<PluginInventoryEntry> = Vec::new();

    for plugin in &manifest.plugins {
        let mut entry = PluginInventoryEntry::new(&plugin.name, plugin.target);
        entry.description = plugin.description.clone();
        entry.vendor = opts.vendor.clone();
        entry.publisher = opts.publisher.clone();
        entry.hidden = opts.deactivate;

        for version in &plugin.versions {
            for pair in &os_arch {
                let relative_path = plugin_image_path(
                    &opts.vendor,
                    &opts.publisher,
                    &pair.os,
                    &pair.arch,
                    plugin.target,
                    &plugin.name,
                    version,
                );
                let binary_image =
                    format!("{}/{relative_path}", opts.repository.trim_end_matches('/'));

                let digest = if opts.validate_only {
                    String::new()
                } else {
                    reporter.info(&format!("verifying plugin binary {binary_image}"));
                    client
                        .file_digest_in_image(
                            &binary_image,
                            &plugin_binary_name(&plugin.name, &pair.os),
                        )
                        .with_context(|| {
                            format!("failed to verify plugin binary {binary_image}")
                        })?
                };

                entry.add_artifact(
                    version,
                    Artifact::new(&pair.os, &pair.arch, &digest, &relative_path),
                );
            }
        }

        entries.push(entry);
    }

    store
        .insert_plugins(&entries)
        .context("failed to insert plugins into the inventory")?;

    if opts.validate_only {
        reporter.info("validation succeeded; discarding changes");
        return Ok(());
    }
    drop(store);
    retain_or_publish(client, &image, db, reporter)
}

/// Flip the activation state of every plugin version named by a manifest.
pub fn update_plugin_activation_state(
    client: &dyn ImageClient,
    opts: &PluginAddOptions,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let manifest = read_plugin_manifest(&opts.manifest_path)?;
    let image = inventory_image_ref(&opts.repository, &opts.tag);
    let db = acquire_inventory_db(client, &image, opts.local_db.clone())?;

    let mut store = InventoryStore::open(db.path())?;

    let entries: Vec<PluginInventoryEntry> = manifest
        .plugins
        .iter()
        .map(|plugin| {
            let mut entry = PluginInventoryEntry::new(&plugin.name, plugin.target);
            entry.vendor = opts.vendor.clone();
            entry.publisher = opts.publisher.clone();
            entry.hidden = opts.deactivate;
            for version in &plugin.versions {
                entry.artifacts.insert(version.clone(), Vec::new());
            }
            entry
        })
        .collect();

    store
        .update_plugins_activation_state(&entries)
        .context("failed to update plugin activation state")?;

    let action = if opts.deactivate { "deactivated" } else { "activated" };
    reporter.info(&format!("{action} {} plugin(s)", entries.len()));

    drop(store);
    retain_or_publish(client, &image, db, reporter)
}

/// Register one plugin-group version in the inventory.
pub fn add_plugin_group(
    client: &dyn ImageClient,
    opts: &PluginGroupAddOptions,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let manifest = read_plugin_group_manifest(&opts.manifest_path)?;
    let image = inventory_image_ref(&opts.repository, &opts.tag);
    let db = acquire_inventory_db(client, &image, opts.local_db.clone())?;

    let mut store = InventoryStore::open(db.path())?;
    store.create_schema()?;

    let mut group = PluginGroup::new(&opts.vendor, &opts.publisher, &opts.name);
    group.description = opts.description.clone();
    group.hidden = opts.deactivate;
    group
        .versions
        .insert(opts.version.clone(), manifest.group_entries());

    store
        .insert_plugin_group(&group, opts.override_existing)
        .with_context(|| format!("failed to insert plugin group {}", group.group_id()))?;
    reporter.info(&format!(
        "registered plugin group {}:{}",
        group.group_id(),
        opts.version
    ));

    drop(store);
    retain_or_publish(client, &image, db, reporter)
}

/// Flip the activation state of one plugin-group version.
pub fn update_plugin_group_activation_state(
    client: &dyn ImageClient,
    opts: &PluginGroupActivationOptions,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let image = inventory_image_ref(&opts.repository, &opts.tag);
    let db = acquire_inventory_db(client, &image, opts.local_db.clone())?;

    let mut store = InventoryStore::open(db.path())?;

    let mut group = PluginGroup::new(&opts.vendor, &opts.publisher, &opts.name);
    group.hidden = opts.deactivate;
    group.versions.insert(opts.version.clone(), Vec::new());

    store
        .update_plugin_group_activation_state(&group)
        .with_context(|| format!("failed to update plugin group {}", group.group_id()))?;

    let action = if opts.deactivate { "deactivated" } else { "activated" };
    reporter.info(&format!(
        "{action} plugin group {}:{}",
        group.group_id(),
        opts.version
    ));

    drop(store);
    retain_or_publish(client, &image, db, reporter)
}

/// The inventory database an operation mutates: either the caller's local
/// file, or a pulled copy in a scratch directory.
struct WorkingDb {
    path: PathBuf,
    scratch: Option<tempfile::TempDir>,
}

impl WorkingDb {
    fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn is_local(&self) -> bool {
        self.scratch.is_none()
    }

    /// Copy the database into a fresh scratch directory, detaching the
    /// result from the original file.
    fn into_scratch_copy(self) -> Result<WorkingDb> {
        let scratch =
            tempfile::tempdir().context("failed to create scratch dir for validation")?;
        let copy = scratch.path().join(INVENTORY_DB_FILE);
        std::fs::copy(&self.path, &copy).with_context(|| {
            format!("failed to copy inventory {} for validation", self.path.display())
        })?;
        Ok(WorkingDb {
            path: copy,
            scratch: Some(scratch),
        })
    }
}

fn acquire_inventory_db(
    client: &dyn ImageClient,
    image: &str,
    local_db: Option<PathBuf>,
) -> Result<WorkingDb> {
    if let Some(path) = local_db {
        return Ok(WorkingDb {
            path,
            scratch: None,
        });
    }

    let scratch = tempfile::tempdir().context("failed to create scratch dir for inventory")?;
    client
        .pull(image, scratch.path())
        .with_context(|| format!("failed to pull inventory image {image}"))?;

    let path = scratch.path().join(INVENTORY_DB_FILE);
    if !path.is_file() {
        bail!("inventory image {image} does not contain {INVENTORY_DB_FILE}");
    }
    Ok(WorkingDb {
        path,
        scratch: Some(scratch),
    })
}

/// Local-file mode keeps the mutated file; registry mode pushes it back.
/// A failed push retains the mutated file on disk and reports its path, so
/// the publish can be retried without repeating the mutation.
fn retain_or_publish(
    client: &dyn ImageClient,
    image: &str,
    db: WorkingDb,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    if db.is_local() {
        reporter.info(&format!("updated local inventory {}", db.path.display()));
        return Ok(());
    }

    match client.push(image, &[db.path.clone()]) {
        Ok(()) => {
            reporter.info(&format!("published inventory {image}"));
            Ok(())
        }
        Err(err) => {
            let kept = match db.scratch {
                Some(scratch) => scratch.keep().join(INVENTORY_DB_FILE),
                None => db.path,
            };
            reporter.error(&format!(
                "publish failed; the mutated inventory is kept at {}",
                kept.display()
            ));
            Err(err.context(format!("failed to publish inventory image {image}")))
        }
    }
}
