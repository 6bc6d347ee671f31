//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use mirror_core::fs::{FileSystem, FsError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Vault rooted at a directory on disk
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    async fn create_parent(&self, path: &str) -> Result<PathBuf> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FsError::Io(e.to_string()))?;
        }
        Ok(full_path)
    }
}

fn map_io(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        ErrorKind::InvalidData => FsError::InvalidUtf8(path.to_string()),
        ErrorKind::IsADirectory => FsError::IsDirectory(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn read(&self, path: &str) -> Result<String> {
        let full_path = self.full_path(path);
        if full_path.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        fs::read_to_string(&full_path)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full_path = self.create_parent(path).await?;
        fs::write(&full_path, content)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn write_binary(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.create_parent(path).await?;
        fs::write(&full_path, content)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))
            .await
            .map_err(|e| map_io(path, e))
    }
}
