//! Directory-backed file store for activity photos

use std::path::{Component, Path, PathBuf};

use crate::error::RemoteError;
use crate::remote::{FileStore, RemoteResult};

/// Writes uploads under `root` and reports them as `{public_base_url}/{path}`
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
    public_base_url: String,
}

impl DiskFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> RemoteResult<PathBuf> {
        let relative = Path::new(path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !clean {
            return Err(RemoteError::storage(format!("invalid object path: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

impl FileStore for DiskFileStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> RemoteResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        tracing::debug!(path = %path, size = bytes.len(), "Stored file");
        Ok(format!("{}/{}", self.public_base_url, path))
    }

    async fn delete(&self, path: &str) -> RemoteResult<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base_url)?
            .strip_prefix('/')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}
