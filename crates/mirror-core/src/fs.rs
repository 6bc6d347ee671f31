//! FileSystem trait abstraction for vault file operations.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in mirror-daemon) - Uses tokio::fs
//!
//! Paths are vault-relative and `/`-separated. The merge logic above this
//! layer decides create-vs-modify semantics, so `write` on an existing path
//! must replace the content rather than fail.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Vault file-system port used by the history store, the note writer and
/// the converter.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check if a file or folder exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a text file
    async fn read(&self, path: &str) -> Result<String>;

    /// Write a text file, replacing any existing content
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Write a binary file, replacing any existing content
    async fn write_binary(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Create a folder (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;
}

/// Join vault-relative path segments with a single `/`.
pub fn join_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Parent folder of a vault-relative path, or `None` for top-level entries.
pub fn parent_folder(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    trimmed
        .rfind('/')
        .map(|pos| &trimmed[..pos])
        .filter(|parent| !parent.is_empty())
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    /// Path prefixes whose writes fail with `FsError::Io`
    failing_prefixes: RwLock<Vec<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            failing_prefixes: RwLock::new(Vec::new()),
        }
    }

    /// Make every write under `prefix` fail, for exercising error paths
    pub fn fail_writes_under(&self, prefix: &str) {
        let prefix = Self::normalize_path(prefix);
        self.failing_prefixes.write().unwrap().push(prefix);
    }

    /// Number of files currently stored
    pub fn file_count(&self) -> usize {
        self.files.read().unwrap().len()
    }

    /// All stored file paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.read().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn check_writable(&self, path: &str) -> Result<()> {
        let failing = self.failing_prefixes.read().unwrap();
        if failing.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return Err(FsError::Io(format!("write rejected: {}", path)));
        }
        if self.dirs.read().unwrap().contains(path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        Ok(())
    }

    fn insert_file(&self, path: &str, content: Vec<u8>) -> Result<()> {
        let path = Self::normalize_path(path);
        self.check_writable(&path)?;

        // Create parent directories
        if let Some(parent) = parent_folder(&path) {
            self.insert_dirs(parent);
        }

        self.files.write().unwrap().insert(path, content);
        Ok(())
    }

    fn insert_dirs(&self, path: &str) {
        let mut dirs = self.dirs.write().unwrap();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            dirs.insert(current.clone());
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        let dirs = self.dirs.read().unwrap();
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn read(&self, path: &str) -> Result<String> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        let bytes = files
            .get(&path)
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        String::from_utf8(bytes.clone()).map_err(|_| FsError::InvalidUtf8(path))
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        self.insert_file(path, content.as_bytes().to_vec())
    }

    async fn write_binary(&self, path: &str, content: &[u8]) -> Result<()> {
        self.insert_file(path, content.to_vec())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if self.files.read().unwrap().contains_key(&path) {
            return Err(FsError::Io(format!("file exists at {}", path)));
        }
        self.insert_dirs(&path);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This lets the engine, history store and writer share one filesystem
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn read(&self, path: &str) -> Result<String> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn write_binary(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write_binary(path, content).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }
}
