//! Sync history ledger.
//!
//! Maps page id to the last sync of that page. Stored as a flat JSON object
//! at `.obsidian/plugins/confluence-sync/sync-history.json` by default:
//! ```json
//! {
//!   "123": {
//!     "pageId": "123",
//!     "lastSyncedAt": "2025-11-22T11:00:00Z",
//!     "lastModified": "2025-11-22T10:30:00Z",
//!     "filePath": "confluence/page.md"
//!   }
//! }
//! ```
//!
//! Loaded once at the start of a pass and saved once at the end.

use crate::fs::{parent_folder, FileSystem, FsError};
use crate::model::SyncHistoryRecord;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Vault-relative location of the ledger
pub const DEFAULT_HISTORY_PATH: &str = ".obsidian/plugins/confluence-sync/sync-history.json";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to save sync history: {0}")]
    Fs(#[from] FsError),

    #[error("Failed to serialize sync history: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// In-memory ledger backed by a JSON file in the vault
pub struct SyncHistoryStore<F: FileSystem> {
    fs: F,
    path: String,
    records: HashMap<String, SyncHistoryRecord>,
}

impl<F: FileSystem> SyncHistoryStore<F> {
    pub fn new(fs: F) -> Self {
        Self::with_path(fs, DEFAULT_HISTORY_PATH)
    }

    pub fn with_path(fs: F, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
            records: HashMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Load the ledger from disk, replacing the in-memory state.
    ///
    /// A missing file is an empty ledger. An unreadable or corrupt file is
    /// also treated as empty so that sync is never blocked by a bad cache.
    pub async fn load_history(&mut self) -> &HashMap<String, SyncHistoryRecord> {
        self.records = match self.read_records().await {
            Ok(Some(records)) => {
                info!("Loaded {} sync history records", records.len());
                records
            }
            Ok(None) => {
                debug!("No sync history at {}, starting fresh", self.path);
                HashMap::new()
            }
            Err(e) => {
                warn!("Ignoring unreadable sync history at {}: {}", self.path, e);
                HashMap::new()
            }
        };
        &self.records
    }

    async fn read_records(
        &self,
    ) -> std::result::Result<Option<HashMap<String, SyncHistoryRecord>>, String> {
        if !self.fs.exists(&self.path).await.map_err(|e| e.to_string())? {
            return Ok(None);
        }
        let content = self.fs.read(&self.path).await.map_err(|e| e.to_string())?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// Write the whole ledger, creating its folder if needed.
    pub async fn save_history(&self) -> Result<()> {
        // Sorted for stable diffs
        let sorted: BTreeMap<&String, &SyncHistoryRecord> = self.records.iter().collect();
        let content = serde_json::to_string_pretty(&sorted)?;

        if let Some(folder) = parent_folder(&self.path) {
            if !self.fs.exists(folder).await? {
                self.fs.mkdir(folder).await?;
            }
        }

        self.fs.write(&self.path, &content).await?;
        info!("Saved {} sync history records", self.records.len());
        Ok(())
    }

    /// Empty the ledger and persist the empty state
    pub async fn clear_history(&mut self) -> Result<()> {
        self.records.clear();
        self.save_history().await?;
        info!("Sync history cleared");
        Ok(())
    }

    pub fn get_record(&self, page_id: &str) -> Option<&SyncHistoryRecord> {
        self.records.get(page_id)
    }

    /// Upsert a record. In memory only until `save_history`.
    pub fn update_record(&mut self, page_id: impl Into<String>, record: SyncHistoryRecord) {
        self.records.insert(page_id.into(), record);
    }

    pub fn all(&self) -> &HashMap<String, SyncHistoryRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Page id to note path, for rewriting links between synced pages
    pub fn page_files(&self) -> HashMap<String, String> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.file_path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::sync::Arc;

    fn record(id: &str, modified: &str) -> SyncHistoryRecord {
        SyncHistoryRecord {
            page_id: id.into(),
            last_synced_at: "2025-11-22T12:00:00Z".parse().unwrap(),
            last_modified: modified.parse().unwrap(),
            file_path: format!("confluence/{}.md", id),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let mut store = SyncHistoryStore::new(InMemoryFs::new());
        assert!(store.load_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_history() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write(DEFAULT_HISTORY_PATH, "{ not json").await.unwrap();

        let mut store = SyncHistoryStore::new(fs.clone());
        assert!(store.load_history().await.is_empty());

        // Bad timestamps are corruption too
        fs.write(
            DEFAULT_HISTORY_PATH,
            r#"{"1":{"pageId":"1","lastSyncedAt":"yesterday","lastModified":"x","filePath":"a.md"}}"#,
        )
        .await
        .unwrap();
        assert!(store.load_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let fs = Arc::new(InMemoryFs::new());

        let mut store = SyncHistoryStore::new(fs.clone());
        store.update_record("1", record("1", "2025-11-22T10:00:00Z"));
        store.update_record("2", record("2", "2025-11-22T10:30:00Z"));
        store.save_history().await.unwrap();

        assert!(fs.exists(".obsidian/plugins/confluence-sync").await.unwrap());

        let mut reloaded = SyncHistoryStore::new(fs.clone());
        reloaded.load_history().await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get_record("2"),
            Some(&record("2", "2025-11-22T10:30:00Z"))
        );
    }

    #[tokio::test]
    async fn test_saved_layout_is_flat_object() {
        let fs = Arc::new(InMemoryFs::new());
        let mut store = SyncHistoryStore::with_path(fs.clone(), "state/history.json");
        store.update_record("42", record("42", "2025-11-22T10:00:00Z"));
        store.save_history().await.unwrap();

        let raw = fs.read("state/history.json").await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["42"]["filePath"], "confluence/42.md");
        assert_eq!(json["42"]["lastModified"], "2025-11-22T10:00:00Z");
    }

    #[tokio::test]
    async fn test_update_overwrites_record() {
        let mut store = SyncHistoryStore::new(InMemoryFs::new());
        store.update_record("1", record("1", "2025-11-22T10:00:00Z"));
        store.update_record("1", record("1", "2025-11-23T10:00:00Z"));

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get_record("1").unwrap().last_modified,
            "2025-11-23T10:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_clear_history_persists_empty_state() {
        let fs = Arc::new(InMemoryFs::new());
        let mut store = SyncHistoryStore::new(fs.clone());
        store.update_record("1", record("1", "2025-11-22T10:00:00Z"));
        store.save_history().await.unwrap();

        store.clear_history().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(fs.read(DEFAULT_HISTORY_PATH).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let fs = Arc::new(InMemoryFs::new());
        fs.fail_writes_under(".obsidian");

        let store = SyncHistoryStore::new(fs);
        assert!(matches!(
            store.save_history().await,
            Err(HistoryError::Fs(FsError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn test_page_files() {
        let mut store = SyncHistoryStore::new(InMemoryFs::new());
        store.update_record("7", record("7", "2025-11-22T10:00:00Z"));

        let files = store.page_files();
        assert_eq!(files.get("7").map(String::as_str), Some("confluence/7.md"));
    }
}
