use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::ImageClient;

/// In-process [`ImageClient`] holding artifacts in a mutexed map.
///
/// Used as the test double across the workspace and usable by embedders
/// that want to exercise inventory flows without a registry. Pushes can be
/// made to fail on demand to exercise publish-failure paths.
#[derive(Debug, Default)]
pub struct MemoryImageClient {
    images: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    fail_pushes: AtomicBool,
}

impl MemoryImageClient {
    /// Create an empty in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent push fail, as an unreachable registry would.
    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    /// Tags currently present.
    pub fn image_refs(&self) -> Vec<String> {
        self.images
            .lock()
            .expect("image map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Raw bytes of one file inside a stored artifact, if present.
    pub fn file_bytes(&self, image: &str, file_name: &str) -> Option<Vec<u8>> {
        self.images
            .lock()
            .expect("image map poisoned")
            .get(image)
            .and_then(|files| files.get(file_name))
            .cloned()
    }
}

impl ImageClient for MemoryImageClient {
    fn resolve(&self, image: &str) -> Result<()> {
        if self.images.lock().expect("image map poisoned").contains_key(image) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("image not found: {image}"))
        }
    }

    fn push(&self, image: &str, files: &[PathBuf]) -> Result<()> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            anyhow::bail!("push failed for {image}: registry unreachable");
        }
        if files.is_empty() {
            anyhow::bail!("nothing to push to {image}: no files given");
        }

        let mut content = BTreeMap::new();
        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| anyhow::anyhow!("file has no name: {}", file.display()))?;
            let bytes = fs::read(file)
                .with_context(|| format!("failed to read {} for push", file.display()))?;
            content.insert(name, bytes);
        }

        self.images
            .lock()
            .expect("image map poisoned")
            .insert(image.to_string(), content);
        Ok(())
    }

    fn pull(&self, image: &str, dir: &Path) -> Result<()> {
        let images = self.images.lock().expect("image map poisoned");
        let content = images
            .get(image)
            .ok_or_else(|| anyhow::anyhow!("image not found: {image}"))?;

        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
        for (name, bytes) in content {
            fs::write(dir.join(name), bytes)
                .with_context(|| format!("failed to write pulled file {name}"))?;
        }
        Ok(())
    }

    fn file_digest_in_image(&self, image: &str, file_name: &str) -> Result<String> {
        let images = self.images.lock().expect("image map poisoned");
        let content = images
            .get(image)
            .ok_or_else(|| anyhow::anyhow!("image not found: {image}"))?;
        let bytes = content
            .get(file_name)
            .ok_or_else(|| anyhow::anyhow!("file {file_name} not found in image {image}"))?;
        Ok(stowage_digest::sha256_bytes(bytes))
    }
}
