use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::process::run_command;
use crate::{ImageClient, copy_dir_contents};

/// Default provider binary name, resolved through `PATH`.
pub const DEFAULT_BINARY: &str = "imgpkg";

/// Default per-invocation timeout for registry operations.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// [`ImageClient`] backed by an `imgpkg`-compatible CLI.
///
/// Each operation is one provider invocation with captured output; on a
/// non-zero exit the provider's stderr is carried into the returned error.
#[derive(Debug, Clone)]
pub struct ImgpkgClient {
    binary: String,
    timeout: Duration,
}

impl ImgpkgClient {
    /// Create a client using the default `imgpkg` binary from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Use a specific provider binary (name or absolute path).
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    /// Set the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The provider binary this client invokes.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn invoke(&self, operation: &str, image: &str, args: &[&str]) -> Result<String> {
        let output = run_command(&self.binary, args, Some(self.timeout))
            .with_context(|| format!("failed to run {} {operation}", self.binary))?;

        if !output.success() {
            anyhow::bail!(
                "{} {operation} failed for {image}: {}",
                self.binary,
                output.stderr.trim()
            );
        }

        Ok(output.stdout)
    }
}

impl Default for ImgpkgClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageClient for ImgpkgClient {
    fn resolve(&self, image: &str) -> Result<()> {
        self.invoke("tag resolve", image, &["tag", "resolve", "-i", image])?;
        Ok(())
    }

    fn push(&self, image: &str, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            anyhow::bail!("nothing to push to {image}: no files given");
        }

        let mut args: Vec<&str> = vec!["push", "-i", image];
        let file_args: Vec<String> = files
            .iter()
            .map(|f| f.to_string_lossy().to_string())
            .collect();
        for file in &file_args {
            args.push("-f");
            args.push(file);
        }

        self.invoke("push", image, &args)?;
        Ok(())
    }

    fn pull(&self, image: &str, dir: &Path) -> Result<()> {
        // Stage into a scratch dir so a failed pull leaves `dir` untouched.
        let scratch = tempfile::tempdir().context("failed to create scratch dir for pull")?;
        let scratch_str = scratch.path().to_string_lossy().to_string();

        self.invoke("pull", image, &["pull", "-i", image, "-o", &scratch_str])?;
        copy_dir_contents(scratch.path(), dir)
            .with_context(|| format!("failed to place pulled content for {image}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let client = ImgpkgClient::new();
        assert_eq!(client.binary(), DEFAULT_BINARY);
        assert_eq!(client.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn builder_overrides() {
        let client = ImgpkgClient::new()
            .with_binary("/opt/tools/imgpkg")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(client.binary(), "/opt/tools/imgpkg");
        assert_eq!(client.timeout, Duration::from_secs(5));
    }

    #[test]
    fn push_with_no_files_is_rejected() {
        let client = ImgpkgClient::new();
        let err = client
            .push("registry.example/test/plugin-inventory:latest", &[])
            .expect_err("no files");
        assert!(err.to_string().contains("no files"));
    }

    #[test]
    fn missing_provider_binary_surfaces_operation() {
        let client = ImgpkgClient::new().with_binary("stowage-no-such-provider");
        let err = client
            .resolve("registry.example/test/plugin-inventory:latest")
            .expect_err("missing binary");
        assert!(err.to_string().contains("tag resolve"));
    }

    // A fake provider script lets the full invoke path run without a registry.
    #[cfg(unix)]
    #[test]
    fn provider_stderr_is_captured_in_errors() {
        use std::os::unix::fs::PermissionsExt;

        let td = tempfile::tempdir().expect("tempdir");
        let fake = td.path().join("imgpkg-fake");
        std::fs::write(&fake, "#!/usr/bin/env sh\necho 'tag not found' >&2\nexit 1\n")
            .expect("write");
        let mut perms = std::fs::metadata(&fake).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&fake, perms).expect("chmod");

        let client = ImgpkgClient::new().with_binary(fake.to_str().expect("utf8"));
        let err = client
            .resolve("registry.example/test/plugin-inventory:latest")
            .expect_err("fake provider fails");
        assert!(err.to_string().contains("tag not found"));
        assert!(err
            .to_string()
            .contains("registry.example/test/plugin-inventory:latest"));
    }
}
