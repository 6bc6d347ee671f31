//! YAML header for synced notes.

use crate::model::RemoteDocument;
use crate::regions::{CONFLUENCE_END_MARKER, CONFLUENCE_START_MARKER, escape_markers};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Frontmatter serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Header fields, serialized in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteFrontmatter {
    pub title: String,
    pub confluence_id: String,
    pub confluence_space: String,
    pub confluence_url: String,
    pub author: String,
    pub created: String,
    pub updated: String,
    pub tags: Vec<String>,
}

impl NoteFrontmatter {
    pub fn from_document(document: &RemoteDocument) -> Self {
        // The listing carries no creation time
        let modified = document.last_modified_rfc3339();
        Self {
            title: document.title.clone(),
            confluence_id: document.id.clone(),
            confluence_space: document.space_key.clone(),
            confluence_url: document.url.clone(),
            author: document.author.clone(),
            created: modified.clone(),
            updated: modified,
            tags: document.labels.clone(),
        }
    }
}

/// Render the `---` delimited header for a document
pub fn build_frontmatter(document: &RemoteDocument) -> Result<String> {
    let yaml = serde_yaml::to_string(&NoteFrontmatter::from_document(document))?;
    Ok(format!("---\n{}---", yaml))
}

/// Header, then the converted body wrapped in the region markers.
///
/// Marker text already present in either part is escaped, so the only
/// markers in the result are the two added here.
pub fn combine_content(header: &str, body: &str) -> String {
    format!(
        "{}\n\n{}\n{}\n{}\n",
        escape_markers(header),
        CONFLUENCE_START_MARKER,
        escape_markers(body),
        CONFLUENCE_END_MARKER
    )
}
