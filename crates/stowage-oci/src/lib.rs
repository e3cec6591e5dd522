//! OCI image client capability for the stowage plugin inventory.
//!
//! The inventory lifecycle engine talks to a registry through one small
//! capability set: resolve a tag, push files as an artifact, pull an
//! artifact, and digest a single file inside an artifact. Implementations
//! are selected at construction time:
//! - [`ImgpkgClient`] shells out to an `imgpkg`-compatible binary
//! - [`DirImageClient`] uses a plain directory tree (air-gapped workflows)
//! - [`MemoryImageClient`] keeps artifacts in memory for tests and embedders
//!
//! All operations are side-effect-free on failure: a failed pull never
//! leaves partial content in the destination directory.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use stowage_oci::{ImageClient, MemoryImageClient};
//!
//! let client = MemoryImageClient::new();
//! assert!(client.resolve("registry.example/test/plugin-inventory:latest").is_err());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

mod dir;
mod imgpkg;
mod memory;
mod process;

pub use dir::DirImageClient;
pub use imgpkg::ImgpkgClient;
pub use memory::MemoryImageClient;

/// Registry operations the inventory lifecycle needs.
///
/// Retries are the caller's responsibility; implementations surface a single
/// error per operation with the provider's stderr captured for diagnostics.
pub trait ImageClient: Send + Sync {
    /// Succeeds iff the tag currently exists in the registry.
    fn resolve(&self, image: &str) -> Result<()>;

    /// Upload the given files as the content of the artifact.
    fn push(&self, image: &str, files: &[PathBuf]) -> Result<()>;

    /// Download the artifact's content into `dir`.
    fn pull(&self, image: &str, dir: &Path) -> Result<()>;

    /// Pull the image to a scratch area, compute the SHA-256 of the named
    /// file inside it, and discard the scratch area.
    ///
    /// Fails when the image cannot be pulled or when the file is absent from
    /// the pulled content.
    fn file_digest_in_image(&self, image: &str, file_name: &str) -> Result<String> {
        let scratch = tempfile::tempdir().context("failed to create scratch dir for digest")?;
        self.pull(image, scratch.path())
            .with_context(|| format!("image not found: {image}"))?;

        let path = scratch.path().join(file_name);
        if !path.is_file() {
            anyhow::bail!("file {file_name} not found in image {image}");
        }
        stowage_digest::sha256_file(&path)
            .with_context(|| format!("failed to digest {file_name} from image {image}"))
    }
}

/// Copy the contents of `src` into `dst`, creating `dst` if needed.
///
/// Used by pull paths that stage into a scratch directory first so the
/// destination only ever sees a complete artifact.
pub(crate) fn copy_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("failed to read directory {}", src.display()))?
    {
        let entry = entry.context("failed to read directory entry")?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir_contents(&from, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
        }
    }

    Ok(())
}
