//! Sync behaviour settings.

use crate::history::DEFAULT_HISTORY_PATH;
use crate::query::SyncFilters;
use serde::{Deserialize, Serialize};

/// What to sync and where to put it.
///
/// Stored as camelCase JSON; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Vault folder for synced notes
    pub sync_path: String,
    /// Vault folder for downloaded attachments
    pub attachments_path: String,
    /// Vault-relative location of the sync history ledger
    pub history_path: String,
    pub force_full_sync: bool,
    pub filters: Option<SyncFilters>,
    pub show_notifications: bool,
    pub download_attachments: bool,
    /// Maximum pages returned by one listing
    pub search_limit: usize,
    /// Default tracing filter, e.g. `info` or `mirror_core=debug`
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_path: "confluence/".to_string(),
            attachments_path: "attachments/".to_string(),
            history_path: DEFAULT_HISTORY_PATH.to_string(),
            force_full_sync: false,
            filters: None,
            show_notifications: true,
            download_attachments: false,
            search_limit: 100,
            log_level: "info".to_string(),
        }
    }
}
