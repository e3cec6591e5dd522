//! End-to-end tests for the `stowage` binary.
//!
//! These exercise the CLI surface without a registry: local-database flows,
//! validation paths, read-only queries, and the refresh-token login against
//! a mock issuer.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

use stowage::inventory::{INVENTORY_DB_FILE, InventoryStore};
use stowage::types::{Artifact, PluginInventoryEntry, Target};

const PLUGIN_MANIFEST: &str = "\
osArch: [linux/amd64, darwin/amd64, windows/amd64]
plugins:
  - name: management-cluster
    target: kubernetes
    description: Manage clusters
    versions: [v0.28.0]
";

fn stowage(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("stowage").expect("binary");
    cmd.current_dir(dir);
    cmd
}

fn seed_inventory_db(dir: &Path) -> PathBuf {
    let path = dir.join(INVENTORY_DB_FILE);
    let mut store = InventoryStore::open(&path).expect("open");
    store.create_schema().expect("schema");

    let mut entry = PluginInventoryEntry::new("management-cluster", Target::Kubernetes);
    entry.description = "Manage clusters".to_string();
    entry.vendor = "vmware".to_string();
    entry.publisher = "tkg".to_string();
    for version in ["v0.28.0", "v1.0.0"] {
        entry.add_artifact(
            version,
            Artifact::new(
                "linux",
                "amd64",
                &format!("sha256:{version}"),
                &format!("vmware/tkg/linux/amd64/kubernetes/management-cluster:{version}"),
            ),
        );
    }
    store.insert_plugin(&entry).expect("insert");

    let mut hidden = PluginInventoryEntry::new("experimental", Target::Global);
    hidden.description = "Not released yet".to_string();
    hidden.vendor = "vmware".to_string();
    hidden.publisher = "tkg".to_string();
    hidden.hidden = true;
    hidden.add_artifact("v0.1.0", Artifact::new("linux", "amd64", "d", "p"));
    store.insert_plugin(&hidden).expect("insert hidden");

    path
}

#[test]
fn help_lists_the_command_surface() {
    let td = tempfile::tempdir().expect("tempdir");
    stowage(td.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("inventory"))
        .stdout(predicate::str::contains("plugin"))
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn init_without_repository_fails_with_guidance() {
    let td = tempfile::tempdir().expect("tempdir");
    stowage(td.path())
        .args(["inventory", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--repository"));
}

#[test]
fn plugin_add_validate_rejects_duplicates_without_mutation() {
    let td = tempfile::tempdir().expect("tempdir");
    let db = seed_inventory_db(td.path());
    let manifest = td.path().join("plugin_manifest.yaml");
    std::fs::write(&manifest, PLUGIN_MANIFEST).expect("write manifest");

    // The manifest re-declares an existing plugin version, which validation
    // must reject through the primary key, without touching the file.
    let before = std::fs::read(&db).expect("read");
    stowage(td.path())
        .args([
            "inventory",
            "plugin",
            "add",
            "--repository",
            "registry.example/test",
            "--vendor",
            "vmware",
            "--publisher",
            "tkg",
            "--manifest",
        ])
        .arg(&manifest)
        .arg("--validate")
        .arg("--local-db")
        .arg(&db)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read(&db).expect("read"), before);
}

#[test]
fn plugin_add_validate_accepts_a_new_plugin() {
    let td = tempfile::tempdir().expect("tempdir");
    let db = seed_inventory_db(td.path());
    let manifest = td.path().join("plugin_manifest.yaml");
    std::fs::write(
        &manifest,
        "plugins:\n  - name: apps\n    target: global\n    description: Apps\n    versions: [v0.1.0]\n",
    )
    .expect("write manifest");

    stowage(td.path())
        .args([
            "inventory",
            "plugin",
            "add",
            "--repository",
            "registry.example/test",
            "--vendor",
            "vmware",
            "--publisher",
            "tkg",
            "--manifest",
        ])
        .arg(&manifest)
        .arg("--validate")
        .arg("--local-db")
        .arg(&db)
        .assert()
        .success();

    // Validation discards: the new plugin is not in the file.
    let store = InventoryStore::open(&db).expect("open");
    assert!(
        store
            .get_plugins(&stowage::types::PluginFilter::by_identity("apps", Target::Global))
            .expect("query")
            .is_empty()
    );
}

#[test]
fn incomplete_os_arch_coverage_is_rejected() {
    let td = tempfile::tempdir().expect("tempdir");
    let db = seed_inventory_db(td.path());
    let manifest = td.path().join("plugin_manifest.yaml");
    std::fs::write(
        &manifest,
        "osArch: [linux/amd64]\nplugins:\n  - name: apps\n    target: global\n    description: Apps\n    versions: [v0.1.0]\n",
    )
    .expect("write manifest");

    stowage(td.path())
        .args([
            "inventory",
            "plugin",
            "add",
            "--repository",
            "registry.example/test",
            "--vendor",
            "vmware",
            "--publisher",
            "tkg",
            "--manifest",
        ])
        .arg(&manifest)
        .arg("--validate")
        .arg("--local-db")
        .arg(&db)
        .assert()
        .failure()
        .stderr(predicate::str::contains("os/arch"));
}

#[test]
fn plugin_list_shows_visible_plugins_only() {
    let td = tempfile::tempdir().expect("tempdir");
    let db = seed_inventory_db(td.path());

    stowage(td.path())
        .args(["plugin", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("management-cluster/kubernetes"))
        .stdout(predicate::str::contains("recommended=v1.0.0"))
        .stdout(predicate::str::contains("experimental").not());

    stowage(td.path())
        .args(["plugin", "--include-hidden", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("experimental/global (hidden)").or(
            predicate::str::contains("experimental/global"),
        ));
}

#[test]
fn plugin_list_latest_filter_and_absolute_uris() {
    let td = tempfile::tempdir().expect("tempdir");
    let db = seed_inventory_db(td.path());

    stowage(td.path())
        .args([
            "plugin",
            "--name",
            "management-cluster",
            "--target",
            "kubernetes",
            "--version",
            "LATEST",
            "--show-artifacts",
            "--repository",
            "registry.example/test",
            "--db",
        ])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "registry.example/test/vmware/tkg/linux/amd64/kubernetes/management-cluster:v1.0.0",
        ))
        .stdout(predicate::str::contains("v0.28.0").not());
}

#[test]
fn login_refresh_path_prints_the_token() {
    let td = tempfile::tempdir().expect("tempdir");

    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind mock issuer");
    let addr = server.server_addr().to_ip().expect("ip");
    let issuer = format!("http://{addr}");
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let body = r#"{"access_token":"A","refresh_token":"R","expires_in":3600,"id_token":"I"}"#;
            let response = tiny_http::Response::from_string(body).with_header(
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .expect("header"),
            );
            let _ = request.respond(response);
        }
    });

    stowage(td.path())
        .args([
            "login",
            "--issuer",
            &issuer,
            "--client-id",
            "stowage-cli",
            "--idp-type",
            "uaa",
            "--refresh-token",
            "old",
            "--non-interactive",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"accessToken\": \"A\""))
        .stdout(predicate::str::contains("\"tokenType\": \"id-token\""));
}

#[test]
fn login_without_issuer_fails_with_guidance() {
    let td = tempfile::tempdir().expect("tempdir");
    stowage(td.path())
        .args(["login", "--client-id", "c"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--issuer"));
}

#[test]
fn doctor_reports_configuration() {
    let td = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        td.path().join(".stowage.toml"),
        "[registry]\nrepository = \"registry.example/plugins\"\n",
    )
    .expect("write config");

    stowage(td.path())
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("registry.example/plugins"));
}
