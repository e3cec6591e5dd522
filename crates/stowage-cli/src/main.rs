use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use stowage::config::{self, Config};
use stowage::engine::{self, Reporter};
use stowage::inventory::InventoryStore;
use stowage::oci::{DirImageClient, ImageClient, ImgpkgClient};
use stowage::types::{PluginFilter, PluginGroupFilter, Target};
use stowage_login::{IdpType, LoginConfig, LoginHandler, well_known_idp_type};

#[derive(Parser, Debug)]
#[command(name = "stowage", version)]
#[command(about = "Publish and discover CLI plugins through OCI registries")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the plugin inventory artifact in a registry.
    #[command(subcommand)]
    Inventory(InventoryCommands),
    /// Query plugins in a local inventory database file.
    Plugin(PluginListArgs),
    /// Query plugin groups in a local inventory database file.
    #[command(name = "plugin-group")]
    PluginGroup(GroupListArgs),
    /// Obtain an identity token from an OAuth2 issuer.
    Login(LoginArgs),
    /// Print environment and configuration diagnostics.
    Doctor,
}

#[derive(Subcommand, Debug)]
enum InventoryCommands {
    /// Publish a fresh, empty inventory.
    Init(InitArgs),
    /// Manage plugins in the inventory.
    #[command(subcommand)]
    Plugin(InventoryPluginCommands),
    /// Manage plugin groups in the inventory.
    #[command(subcommand, name = "plugin-group")]
    PluginGroup(InventoryGroupCommands),
}

#[derive(Subcommand, Debug)]
enum InventoryPluginCommands {
    /// Register the plugins of a manifest, verifying each binary's digest.
    Add(PluginAddArgs),
    /// Make previously deactivated plugin versions visible again.
    Activate(PluginActivationArgs),
    /// Hide plugin versions from default queries without deleting them.
    Deactivate(PluginActivationArgs),
}

#[derive(Subcommand, Debug)]
enum InventoryGroupCommands {
    /// Register one plugin-group version.
    Add(GroupAddArgs),
    /// Make a previously deactivated group version visible again.
    Activate(GroupActivationArgs),
    /// Hide a group version from default queries without deleting it.
    Deactivate(GroupActivationArgs),
}

#[derive(Args, Debug)]
struct RegistryArgs {
    /// Repository holding the inventory, e.g. registry.example/plugins.
    #[arg(long)]
    repository: Option<String>,

    /// Inventory image tag (default: latest).
    #[arg(long = "plugin-inventory-image-tag")]
    tag: Option<String>,

    /// OCI provider binary to shell out to (default: imgpkg).
    #[arg(long)]
    provider_binary: Option<String>,

    /// Per-invocation provider timeout in seconds.
    #[arg(long)]
    provider_timeout_secs: Option<u64>,

    /// Publish into this directory instead of a registry (air-gapped mode).
    #[arg(long)]
    offline_root: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InitArgs {
    #[command(flatten)]
    registry: RegistryArgs,

    /// Replace an existing inventory instead of failing.
    #[arg(long = "override")]
    override_existing: bool,
}

#[derive(Args, Debug)]
struct PluginAddArgs {
    #[command(flatten)]
    registry: RegistryArgs,

    /// Publishing vendor, e.g. vmware.
    #[arg(long)]
    vendor: String,

    /// Publisher within the vendor, e.g. tkg.
    #[arg(long)]
    publisher: String,

    /// Plugin manifest file.
    #[arg(long)]
    manifest: PathBuf,

    /// Register the plugins as deactivated (hidden).
    #[arg(long)]
    deactivate: bool,

    /// Validate the manifest and the inventory mutation, then discard.
    #[arg(long = "validate")]
    validate_only: bool,

    /// Mutate this local inventory database instead of pulling and pushing.
    #[arg(long)]
    local_db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PluginActivationArgs {
    #[command(flatten)]
    registry: RegistryArgs,

    /// Publishing vendor.
    #[arg(long)]
    vendor: String,

    /// Publisher within the vendor.
    #[arg(long)]
    publisher: String,

    /// Plugin manifest naming the versions to flip.
    #[arg(long)]
    manifest: PathBuf,

    /// Mutate this local inventory database instead of pulling and pushing.
    #[arg(long)]
    local_db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GroupAddArgs {
    #[command(flatten)]
    registry: RegistryArgs,

    /// Group name.
    #[arg(long)]
    name: String,

    /// Group version being registered.
    #[arg(long = "version")]
    version: String,

    /// Group description; required the first time a group is registered.
    #[arg(long)]
    description: Option<String>,

    /// Plugin-group manifest file.
    #[arg(long)]
    manifest: PathBuf,

    /// Publishing vendor.
    #[arg(long)]
    vendor: String,

    /// Publisher within the vendor.
    #[arg(long)]
    publisher: String,

    /// Register the group version as deactivated (hidden).
    #[arg(long)]
    deactivate: bool,

    /// Replace the exact group version if it already exists.
    #[arg(long = "override")]
    override_existing: bool,

    /// Mutate this local inventory database instead of pulling and pushing.
    #[arg(long)]
    local_db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GroupActivationArgs {
    #[command(flatten)]
    registry: RegistryArgs,

    /// Group name.
    #[arg(long)]
    name: String,

    /// Group version to flip.
    #[arg(long = "version")]
    version: String,

    /// Publishing vendor.
    #[arg(long)]
    vendor: String,

    /// Publisher within the vendor.
    #[arg(long)]
    publisher: String,

    /// Mutate this local inventory database instead of pulling and pushing.
    #[arg(long)]
    local_db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PluginListArgs {
    /// Local inventory database file to query.
    #[arg(long)]
    db: PathBuf,

    /// Match on plugin name.
    #[arg(long)]
    name: Option<String>,

    /// Match on target: global, kubernetes, or mission-control.
    #[arg(long)]
    target: Option<String>,

    /// Match on version; LATEST resolves to the recommended version.
    #[arg(long)]
    version: Option<String>,

    /// Match on artifact OS.
    #[arg(long)]
    os: Option<String>,

    /// Match on artifact architecture.
    #[arg(long)]
    arch: Option<String>,

    /// Match on publisher.
    #[arg(long)]
    publisher: Option<String>,

    /// Match on vendor.
    #[arg(long)]
    vendor: Option<String>,

    /// Include deactivated (hidden) plugins.
    #[arg(long)]
    include_hidden: bool,

    /// Repository URI used to compose absolute artifact URIs.
    #[arg(long)]
    repository: Option<String>,

    /// Print each artifact (os/arch/digest/uri) under its plugin.
    #[arg(long)]
    show_artifacts: bool,
}

#[derive(Args, Debug)]
struct GroupListArgs {
    /// Local inventory database file to query.
    #[arg(long)]
    db: PathBuf,

    /// Match on vendor.
    #[arg(long)]
    vendor: Option<String>,

    /// Match on publisher.
    #[arg(long)]
    publisher: Option<String>,

    /// Match on group name.
    #[arg(long)]
    name: Option<String>,

    /// Match on group version; LATEST resolves to the recommended version.
    #[arg(long)]
    version: Option<String>,

    /// Include deactivated (hidden) groups.
    #[arg(long)]
    include_hidden: bool,

    /// Print each member plugin under its group version.
    #[arg(long)]
    show_members: bool,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// OAuth2 issuer base URL.
    #[arg(long)]
    issuer: Option<String>,

    /// OAuth2 client identifier.
    #[arg(long)]
    client_id: Option<String>,

    /// Issuer family: csp or uaa.
    #[arg(long)]
    idp_type: Option<String>,

    /// Refresh token to try before any interactive flow.
    #[arg(long)]
    refresh_token: Option<String>,

    /// Organization to log in to.
    #[arg(long)]
    org_id: Option<String>,

    /// Never attempt browser login; fail if refresh fails.
    #[arg(long)]
    non_interactive: bool,

    /// Print the authorization URL instead of opening a browser.
    #[arg(long)]
    no_browser: bool,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_default_config()?;
    let mut reporter = CliReporter;

    match cli.cmd {
        Commands::Inventory(cmd) => run_inventory(cmd, &config, &mut reporter),
        Commands::Plugin(args) => run_plugin_list(&args),
        Commands::PluginGroup(args) => run_group_list(&args),
        Commands::Login(args) => run_login(&args, &config),
        Commands::Doctor => run_doctor(&config, &mut reporter),
    }
}

fn run_inventory(
    cmd: InventoryCommands,
    config: &Config,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    match cmd {
        InventoryCommands::Init(args) => {
            let client = image_client(&args.registry, config);
            let opts = engine::InitOptions {
                repository: resolve_repository(args.registry.repository.as_deref(), config)?,
                tag: resolve_tag(args.registry.tag.as_deref(), config),
                override_existing: args.override_existing,
            };
            engine::init_inventory(client.as_ref(), &opts, reporter)
        }
        InventoryCommands::Plugin(cmd) => match cmd {
            InventoryPluginCommands::Add(args) => {
                let client = image_client(&args.registry, config);
                let opts = engine::PluginAddOptions {
                    repository: resolve_repository(args.registry.repository.as_deref(), config)?,
                    tag: resolve_tag(args.registry.tag.as_deref(), config),
                    manifest_path: args.manifest,
                    vendor: args.vendor,
                    publisher: args.publisher,
                    deactivate: args.deactivate,
                    validate_only: args.validate_only,
                    local_db: args.local_db,
                };
                engine::add_plugin(client.as_ref(), &opts, reporter)
            }
            InventoryPluginCommands::Activate(args) => {
                run_plugin_activation(args, false, config, reporter)
            }
            InventoryPluginCommands::Deactivate(args) => {
                run_plugin_activation(args, true, config, reporter)
            }
        },
        InventoryCommands::PluginGroup(cmd) => match cmd {
            InventoryGroupCommands::Add(args) => {
                let client = image_client(&args.registry, config);
                let opts = engine::PluginGroupAddOptions {
                    repository: resolve_repository(args.registry.repository.as_deref(), config)?,
                    tag: resolve_tag(args.registry.tag.as_deref(), config),
                    name: args.name,
                    version: args.version,
                    description: args.description.unwrap_or_default(),
                    manifest_path: args.manifest,
                    vendor: args.vendor,
                    publisher: args.publisher,
                    deactivate: args.deactivate,
                    override_existing: args.override_existing,
                    local_db: args.local_db,
                };
                engine::add_plugin_group(client.as_ref(), &opts, reporter)
            }
            InventoryGroupCommands::Activate(args) => {
                run_group_activation(args, false, config, reporter)
            }
            InventoryGroupCommands::Deactivate(args) => {
                run_group_activation(args, true, config, reporter)
            }
        },
    }
}

fn run_plugin_activation(
    args: PluginActivationArgs,
    deactivate: bool,
    config: &Config,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let client = image_client(&args.registry, config);
    let opts = engine::PluginAddOptions {
        repository: resolve_repository(args.registry.repository.as_deref(), config)?,
        tag: resolve_tag(args.registry.tag.as_deref(), config),
        manifest_path: args.manifest,
        vendor: args.vendor,
        publisher: args.publisher,
        deactivate,
        validate_only: false,
        local_db: args.local_db,
    };
    engine::update_plugin_activation_state(client.as_ref(), &opts, reporter)
}

fn run_group_activation(
    args: GroupActivationArgs,
    deactivate: bool,
    config: &Config,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let client = image_client(&args.registry, config);
    let opts = engine::PluginGroupActivationOptions {
        repository: resolve_repository(args.registry.repository.as_deref(), config)?,
        tag: resolve_tag(args.registry.tag.as_deref(), config),
        name: args.name,
        version: args.version,
        vendor: args.vendor,
        publisher: args.publisher,
        deactivate,
        local_db: args.local_db,
    };
    engine::update_plugin_group_activation_state(client.as_ref(), &opts, reporter)
}

fn run_plugin_list(args: &PluginListArgs) -> Result<()> {
    let target = args
        .target
        .as_deref()
        .map(str::parse::<Target>)
        .transpose()?;

    let filter = PluginFilter {
        name: args.name.clone(),
        target,
        version: args.version.clone(),
        os: args.os.clone(),
        arch: args.arch.clone(),
        publisher: args.publisher.clone(),
        vendor: args.vendor.clone(),
        include_hidden: args.include_hidden,
    };

    let store = InventoryStore::open(&args.db)?;
    let plugins = store.get_plugins(&filter)?;

    for plugin in &plugins {
        println!(
            "{}/{} recommended={} publisher={}/{}{}",
            plugin.name,
            plugin.target,
            plugin.recommended_version,
            plugin.vendor,
            plugin.publisher,
            if plugin.hidden { " (hidden)" } else { "" },
        );
        if args.show_artifacts {
            for (version, artifacts) in &plugin.artifacts {
                for artifact in artifacts {
                    // The stored URI is relative; prefix the repository to
                    // obtain the absolute reference.
                    let uri = match &args.repository {
                        Some(repository) => {
                            format!("{}/{}", repository.trim_end_matches('/'), artifact.image_path)
                        }
                        None => artifact.image_path.clone(),
                    };
                    println!(
                        "  {version} {}/{} {} {uri}",
                        artifact.os, artifact.arch, artifact.digest
                    );
                }
            }
        }
    }

    if plugins.is_empty() {
        eprintln!("no plugins matched");
    }
    Ok(())
}

fn run_group_list(args: &GroupListArgs) -> Result<()> {
    let filter = PluginGroupFilter {
        vendor: args.vendor.clone(),
        publisher: args.publisher.clone(),
        name: args.name.clone(),
        version: args.version.clone(),
        include_hidden: args.include_hidden,
    };

    let store = InventoryStore::open(&args.db)?;
    let groups = store.get_plugin_groups(&filter)?;

    for group in &groups {
        println!(
            "{} recommended={} {}{}",
            group.group_id(),
            group.recommended_version,
            group.description,
            if group.hidden { " (hidden)" } else { "" },
        );
        if args.show_members {
            for (version, members) in &group.versions {
                for member in members {
                    println!(
                        "  {version} {}/{}:{}{}",
                        member.name,
                        member.target,
                        member.version,
                        if member.mandatory { "" } else { " (context-scoped)" },
                    );
                }
            }
        }
    }

    if groups.is_empty() {
        eprintln!("no plugin groups matched");
    }
    Ok(())
}

fn run_login(args: &LoginArgs, config: &Config) -> Result<()> {
    let issuer = args
        .issuer
        .as_deref()
        .or_else(|| config.issuer())
        .context("no issuer given; pass --issuer or set login.issuer in .stowage.toml")?;
    let client_id = args
        .client_id
        .as_deref()
        .or_else(|| config.client_id())
        .context("no client id given; pass --client-id or set login.client_id in .stowage.toml")?;

    let idp_type = match args.idp_type.as_deref().or_else(|| config.idp_type()) {
        Some(value) => parse_idp_type(value)?,
        None => well_known_idp_type(issuer).unwrap_or_default(),
    };

    let mut login_config = LoginConfig::for_issuer(issuer, client_id, idp_type);
    login_config.refresh_token = args.refresh_token.clone();
    login_config.org_id = args.org_id.clone().or_else(|| config.org_id().map(str::to_string));
    login_config.suppress_interactive = args.non_interactive;

    let mut handler = LoginHandler::new(login_config);
    if args.no_browser {
        handler = handler.with_browser(|url: &str| {
            eprintln!("Open this URL to continue the login:\n  {url}");
            Ok(())
        });
    }

    let token = handler.login()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&token).context("failed to render token")?
    );
    Ok(())
}

fn run_doctor(config: &Config, reporter: &mut dyn Reporter) -> Result<()> {
    println!("repository: {}", config.repository().unwrap_or("(unset)"));
    println!(
        "tag: {}",
        config.tag().unwrap_or(engine_default_tag())
    );
    println!("issuer: {}", config.issuer().unwrap_or("(unset)"));

    let binary = config.provider_binary().unwrap_or("imgpkg").to_string();
    print_cmd_version(&binary, reporter);

    for env in [
        stowage::inventory::SQL_STATEMENTS_LOG_ENV,
        stowage::inventory::INCLUDE_DEACTIVATED_PLUGINS_ENV,
        stowage_login::OAUTH_LISTENER_PORT_ENV,
    ] {
        match std::env::var(env) {
            Ok(value) if !value.is_empty() => println!("{env}: {value}"),
            _ => println!("{env}: (unset)"),
        }
    }

    Ok(())
}

fn print_cmd_version(cmd: &str, reporter: &mut dyn Reporter) {
    let out = Command::new(cmd).arg("--version").output();
    match out {
        Ok(o) if o.status.success() => {
            let version = String::from_utf8_lossy(&o.stdout).trim().to_string();
            println!("{cmd}: {version}");
        }
        Ok(o) => {
            reporter.warn(&format!(
                "{cmd} --version failed: {}",
                String::from_utf8_lossy(&o.stderr).trim()
            ));
        }
        Err(e) => {
            reporter.warn(&format!("unable to run {cmd} --version: {e}"));
        }
    }
}

fn engine_default_tag() -> &'static str {
    "latest"
}

fn resolve_repository(flag: Option<&str>, config: &Config) -> Result<String> {
    flag.or_else(|| config.repository())
        .map(str::to_string)
        .context("no repository given; pass --repository or set registry.repository in .stowage.toml")
}

fn resolve_tag(flag: Option<&str>, config: &Config) -> String {
    flag.or_else(|| config.tag())
        .unwrap_or(engine_default_tag())
        .to_string()
}

fn image_client(args: &RegistryArgs, config: &Config) -> Box<dyn ImageClient> {
    if let Some(root) = &args.offline_root {
        return Box::new(DirImageClient::new(root));
    }

    let mut client = ImgpkgClient::new();
    if let Some(binary) = args.provider_binary.as_deref().or_else(|| config.provider_binary()) {
        client = client.with_binary(binary);
    }
    if let Some(secs) = args.provider_timeout_secs.or_else(|| config.provider_timeout_secs()) {
        client = client.with_timeout(Duration::from_secs(secs));
    }
    Box::new(client)
}

fn parse_idp_type(value: &str) -> Result<IdpType> {
    match value.to_ascii_lowercase().as_str() {
        "csp" => Ok(IdpType::Csp),
        "uaa" => Ok(IdpType::Uaa),
        other => Err(anyhow::anyhow!("unknown idp type: {other} (expected csp or uaa)")),
    }
}

#[cfg(test)]
mod tests {
    use stowage::types::LATEST;

    use super::*;

    #[test]
    fn cli_parses_the_documented_surface() {
        Cli::try_parse_from([
            "stowage",
            "inventory",
            "init",
            "--repository",
            "registry.example/test",
            "--plugin-inventory-image-tag",
            "latest",
            "--override",
        ])
        .expect("init");

        Cli::try_parse_from([
            "stowage",
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
            "plugin_manifest.yaml",
            "--deactivate",
            "--validate",
        ])
        .expect("plugin add");

        Cli::try_parse_from([
            "stowage",
            "inventory",
            "plugin-group",
            "add",
            "--repository",
            "registry.example/test",
            "--name",
            "default",
            "--version",
            "v1.0.0",
            "--vendor",
            "vmware",
            "--publisher",
            "tkg",
            "--manifest",
            "group.yaml",
            "--override",
        ])
        .expect("group add");

        Cli::try_parse_from([
            "stowage",
            "plugin",
            "--db",
            "plugin_inventory.db",
            "--version",
            LATEST,
            "--include-hidden",
        ])
        .expect("plugin list");

        Cli::try_parse_from(["stowage", "login", "--issuer", "https://u.example", "--client-id", "c"])
            .expect("login");
    }

    #[test]
    fn missing_required_flags_fail_parsing() {
        assert!(Cli::try_parse_from(["stowage", "inventory", "plugin", "add"]).is_err());
        assert!(Cli::try_parse_from(["stowage", "plugin"]).is_err());
    }

    #[test]
    fn repository_resolution_prefers_the_flag() {
        let config = Config::new();
        assert!(resolve_repository(None, &config).is_err());
        assert_eq!(
            resolve_repository(Some("registry.example/x"), &config).expect("resolve"),
            "registry.example/x"
        );
    }

    #[test]
    fn tag_defaults_to_latest() {
        let config = Config::new();
        assert_eq!(resolve_tag(None, &config), "latest");
        assert_eq!(resolve_tag(Some("v2"), &config), "v2");
    }

    #[test]
    fn idp_type_parsing() {
        assert_eq!(parse_idp_type("csp").expect("csp"), IdpType::Csp);
        assert_eq!(parse_idp_type("UAA").expect("uaa"), IdpType::Uaa);
        assert!(parse_idp_type("ldap").is_err());
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut reporter = CliReporter;
        reporter.info("info");
        reporter.warn("warn");
        reporter.error("error");
    }
}
