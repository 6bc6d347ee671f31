//! Decides which remote pages need to be written.

use crate::model::{RemoteDocument, SyncHistoryRecord};
use std::collections::HashMap;
use tracing::debug;

/// Timestamp-based change detection with a force override.
///
/// A page is changed when it has no history record or when its remote
/// modification time is strictly later than the one recorded at the last
/// sync. Equal instants count as unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    force_sync: bool,
}

impl ChangeDetector {
    pub fn new(force_sync: bool) -> Self {
        Self { force_sync }
    }

    pub fn set_force_sync(&mut self, force: bool) {
        self.force_sync = force;
    }

    pub fn force_sync(&self) -> bool {
        self.force_sync
    }

    pub fn needs_update(&self, document: &RemoteDocument, record: Option<&SyncHistoryRecord>) -> bool {
        if self.force_sync {
            debug!("Force sync enabled, updating page {}", document.id);
            return true;
        }

        let Some(record) = record else {
            debug!("New page detected: {} ({})", document.id, document.title);
            return true;
        };

        let changed = document.last_modified > record.last_modified;
        if changed {
            debug!(
                "Page changed: {} ({}) remote={} local={}",
                document.id, document.title, document.last_modified, record.last_modified
            );
        } else {
            debug!("No changes: {} ({})", document.id, document.title);
        }
        changed
    }

    /// Keep the documents that need an update, in input order
    pub fn filter_changed_pages<'a>(
        &self,
        documents: &'a [RemoteDocument],
        history: &HashMap<String, SyncHistoryRecord>,
    ) -> Vec<&'a RemoteDocument> {
        let changed: Vec<&RemoteDocument> = documents
            .iter()
            .filter(|doc| self.needs_update(doc, history.get(&doc.id)))
            .collect();

        debug!(
            "Filtered: {}/{} pages need update",
            changed.len(),
            documents.len()
        );
        changed
    }
}
