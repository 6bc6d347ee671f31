//! Remote document snapshots and the sync ledger record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A file attached to a remote page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub title: String,
    pub media_type: String,
    pub file_size: u64,
    /// Absolute or site-relative download reference
    pub download_url: String,
    pub page_id: String,
}

/// A remote page as returned by one listing call.
///
/// Snapshots are immutable for the duration of a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: String,
    pub title: String,
    pub space_key: String,
    /// Raw storage-format markup
    pub content: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub author: String,
    /// Canonical web URL of the page
    pub url: String,
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl RemoteDocument {
    /// `last_modified` as an RFC 3339 string (`2025-11-22T10:30:00Z`)
    pub fn last_modified_rfc3339(&self) -> String {
        format_instant(&self.last_modified)
    }
}

/// One ledger entry per page ever synced.
///
/// Field names match the JSON layout of existing `sync-history.json` files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryRecord {
    pub page_id: String,
    /// When the local write happened
    pub last_synced_at: DateTime<Utc>,
    /// Remote modification time seen at sync time
    pub last_modified: DateTime<Utc>,
    /// Vault-relative path of the note
    pub file_path: String,
}

/// Format an instant the way the ledger and note headers store it
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
