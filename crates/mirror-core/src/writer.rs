//! Writes synced notes without losing the user's local notes.
//!
//! Callers hand over the remote region (header, start marker, body, end
//! marker). The writer decides what follows it:
//! - new file or legacy file without markers: the local notes template
//! - existing file with a non-empty user section: that section, verbatim
//! - existing file with an empty user section: the template again

use crate::fs::{join_path, parent_folder, FileSystem, FsError};
use crate::regions::{parse_file_content, DEFAULT_LOCAL_NOTES_TEMPLATE};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Invalid file path: path traversal detected in {0}")]
    PathTraversal(String),

    #[error("File operation failed on {path}: {source}")]
    Fs {
        path: String,
        #[source]
        source: FsError,
    },
}

pub type Result<T> = std::result::Result<T, WriteError>;

/// Reject absolute paths and any `..` segment, on either separator
fn validate_path(path: &str) -> Result<()> {
    let absolute = path.starts_with('/')
        || path.starts_with('\\')
        || path.as_bytes().get(1) == Some(&b':');
    let escapes = path.split(['/', '\\']).any(|segment| segment == "..");

    if absolute || escapes {
        return Err(WriteError::PathTraversal(path.to_string()));
    }
    Ok(())
}

/// Note writer over a vault file system
#[derive(Clone)]
pub struct NoteWriter<F: FileSystem> {
    fs: F,
}

impl<F: FileSystem> NoteWriter<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    fn fs_error(path: &str) -> impl FnOnce(FsError) -> WriteError + '_ {
        move |source| WriteError::Fs {
            path: path.to_string(),
            source,
        }
    }

    async fn ensure_parent(&self, path: &str) -> Result<()> {
        if let Some(folder) = parent_folder(path) {
            let exists = self.fs.exists(folder).await.map_err(Self::fs_error(folder))?;
            if !exists {
                self.fs.mkdir(folder).await.map_err(Self::fs_error(folder))?;
            }
        }
        Ok(())
    }

    /// Write a note, keeping whatever the user wrote below the end marker.
    pub async fn write(&self, path: &str, new_remote_content: &str) -> Result<()> {
        validate_path(path)?;
        self.ensure_parent(path).await?;

        let exists = self.fs.exists(path).await.map_err(Self::fs_error(path))?;
        let content = if exists {
            let current = self.fs.read(path).await.map_err(Self::fs_error(path))?;
            let parsed = parse_file_content(&current);

            if parsed.has_markers && !parsed.user_section.is_empty() {
                debug!("Preserving local notes in {}", path);
                format!("{}\n{}\n", new_remote_content, parsed.user_section)
            } else {
                debug!("No local notes in {}, adding template", path);
                format!("{}\n{}", new_remote_content, DEFAULT_LOCAL_NOTES_TEMPLATE)
            }
        } else {
            format!("{}\n{}", new_remote_content, DEFAULT_LOCAL_NOTES_TEMPLATE)
        };

        self.fs
            .write(path, &content)
            .await
            .map_err(Self::fs_error(path))?;
        info!("File saved: {}", path);
        Ok(())
    }

    /// Write raw bytes, replacing any existing file
    pub async fn write_binary(&self, path: &str, bytes: &[u8]) -> Result<()> {
        validate_path(path)?;
        self.ensure_parent(path).await?;
        self.fs
            .write_binary(path, bytes)
            .await
            .map_err(Self::fs_error(path))
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        validate_path(path)?;
        self.fs.read(path).await.map_err(Self::fs_error(path))
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        self.fs.exists(path).await.map_err(Self::fs_error(path))
    }

    /// First free `slug.md`, `slug-2.md`, `slug-3.md`, ... in `folder`.
    ///
    /// Returns the file name only, not the joined path.
    pub async fn ensure_unique_file_name(&self, slug: &str, folder: &str) -> Result<String> {
        let mut name = format!("{}.md", slug);
        let mut counter = 2;

        while self.file_exists(&join_path(folder, &name)).await? {
            name = format!("{}-{}.md", slug, counter);
            counter += 1;
        }

        Ok(name)
    }
}
