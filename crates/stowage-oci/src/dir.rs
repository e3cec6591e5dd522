use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{ImageClient, copy_dir_contents};

/// [`ImageClient`] backed by a plain directory tree.
///
/// Each image reference maps to one subdirectory holding the artifact's
/// files. Used for air-gapped workflows: publish into a directory, move the
/// directory across the gap, and re-publish from there with a real
/// registry client.
#[derive(Debug, Clone)]
pub struct DirImageClient {
    root: PathBuf,
}

impl DirImageClient {
    /// Create a client rooted at `root`. The directory is created on the
    /// first push.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The root directory artifacts live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn image_dir(&self, image: &str) -> PathBuf {
        self.root.join(sanitize_ref(image))
    }
}

/// Map an image reference to a single path component. `/` and `:` are the
/// only separators appearing in composed references.
fn sanitize_ref(image: &str) -> String {
    image.replace(['/', ':'], "_")
}

impl ImageClient for DirImageClient {
    fn resolve(&self, image: &str) -> Result<()> {
        if self.image_dir(image).is_dir() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("image not found: {image}"))
        }
    }

    fn push(&self, image: &str, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            anyhow::bail!("nothing to push to {image}: no files given");
        }

        // Stage fully, then swap, so readers never see a partial artifact.
        let staging = tempfile::tempdir_in(
            self.root
                .parent()
                .filter(|p| p.is_dir())
                .unwrap_or(Path::new(".")),
        )
        .context("failed to create staging dir for push")?;
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("file has no name: {}", file.display()))?;
            fs::copy(file, staging.path().join(name))
                .with_context(|| format!("failed to stage {} for push", file.display()))?;
        }

        let dir = self.image_dir(image);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to replace artifact for {image}"))?;
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create registry root {}", self.root.display()))?;
        copy_dir_contents(staging.path(), &dir)
            .with_context(|| format!("failed to place artifact for {image}"))
    }

    fn pull(&self, image: &str, dir: &Path) -> Result<()> {
        let source = self.image_dir(image);
        if !source.is_dir() {
            anyhow::bail!("image not found: {image}");
        }
        copy_dir_contents(&source, dir)
            .with_context(|| format!("failed to place pulled content for {image}"))
    }
}
