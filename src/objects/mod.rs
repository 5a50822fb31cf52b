//! Filesystem-backed object store for uploaded photos and event posters.
//!
//! Logical keys use `/`-separated namespaces (`pending/`, `approved/`,
//! `events/posters/`) that double as coarse moderation-state markers. Each
//! object is a flat file under the configured root plus a `.meta` sidecar
//! holding the content type.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub struct ObjectStore {
    root: PathBuf,
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && !key.ends_with('/')
        && !key.split('/').any(|segment| {
            segment.is_empty() || segment == "." || segment == ".." || segment.ends_with(".meta")
        })
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
}

impl ObjectStore {
    pub async fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .await
            .with_context(|| format!("failed to create object root {}", root.display()))?;
        info!("Object storage directory: {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if !valid_key(key) {
            bail!("invalid object key: {key}");
        }
        Ok(self.root.join(key))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf> {
        let mut os = self.object_path(key)?.into_os_string();
        os.push(".meta");
        Ok(PathBuf::from(os))
    }

    pub async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write object {key}"))?;
        fs::write(self.meta_path(key)?, content_type.as_bytes())
            .await
            .with_context(|| format!("failed to write object metadata for {key}"))?;
        Ok(())
    }

    /// Write an object and hand back a guard for the copy-then-commit
    /// pattern: callers `keep()` once the paired row mutation lands, or
    /// `discard()` to compensate when it does not.
    pub async fn put_staged<'a>(
        &'a self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Staged<'a>> {
        self.put(key, bytes, content_type).await?;
        Ok(Staged {
            store: self,
            key: key.to_string(),
        })
    }

    pub async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, String)>> {
        let path = self.object_path(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read object {key}")),
        };
        let content_type = match fs::read_to_string(self.meta_path(key)?).await {
            Ok(meta) => meta.trim().to_string(),
            Err(_) => "application/octet-stream".to_string(),
        };
        Ok(Some((bytes, content_type)))
    }

    /// Delete an object. Missing objects are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("object {key} already gone");
            }
            Err(e) => return Err(e).with_context(|| format!("failed to delete object {key}")),
        }
        let _ = fs::remove_file(self.meta_path(key)?).await;
        Ok(())
    }

    /// Copy `src` to `dst`, returning a staged guard for `dst`.
    pub async fn copy_staged<'a>(&'a self, src: &str, dst: &str) -> Result<Staged<'a>> {
        let Some((bytes, content_type)) = self.get(src).await? else {
            bail!("source object {src} does not exist");
        };
        self.put_staged(dst, &bytes, &content_type).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }
}

/// A freshly written object whose fate depends on a later step.
#[must_use = "staged objects must be kept or discarded"]
pub struct Staged<'a> {
    store: &'a ObjectStore,
    key: String,
}

impl Staged<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The paired mutation landed; the object stays.
    pub fn keep(self) {}

    /// Compensating delete after the paired mutation failed. Best effort:
    /// a leaked object is preferable to masking the original error.
    pub async fn discard(self) {
        if let Err(err) = self.store.delete(&self.key).await {
            warn!("failed to discard staged object {}: {err}", self.key);
        }
    }
}
