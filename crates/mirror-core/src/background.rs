//! Read-only change polling between sync passes.

use crate::client::RemoteClient;
use crate::detector::ChangeDetector;
use crate::events::{EventBus, SyncEvent};
use crate::fs::FileSystem;
use crate::history::SyncHistoryStore;
use crate::query::{build_search_query, validate_filters, SyncFilters};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Listing size used when polling
pub const BACKGROUND_SEARCH_LIMIT: usize = 100;

/// Counts remote pages changed since their last sync without writing anything.
pub struct BackgroundChangeDetector<C: RemoteClient, F: FileSystem> {
    client: C,
    history: SyncHistoryStore<F>,
    detector: ChangeDetector,
    filters: Option<SyncFilters>,
    events: Option<Arc<EventBus>>,
}

impl<C: RemoteClient, F: FileSystem> BackgroundChangeDetector<C, F> {
    pub fn new(client: C, history: SyncHistoryStore<F>, filters: Option<SyncFilters>) -> Self {
        Self {
            client,
            history,
            detector: ChangeDetector::new(false),
            filters,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Number of pages that a sync pass would write.
    ///
    /// Never fails: any error is logged and counts as no changes.
    pub async fn check_for_changes(&mut self) -> usize {
        if let Some(filters) = &self.filters {
            if !validate_filters(filters) {
                debug!("Skipping change check: filters are invalid");
                return 0;
            }
        }
        let query = build_search_query(self.filters.as_ref());

        self.history.load_history().await;

        let documents = match self
            .client
            .search_documents(&query, BACKGROUND_SEARCH_LIMIT)
            .await
        {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Change check failed: {}", e);
                return 0;
            }
        };

        let count = self
            .detector
            .filter_changed_pages(&documents, self.history.all())
            .len();

        if count > 0 {
            info!("{} pages changed since last sync", count);
            if let Some(bus) = &self.events {
                bus.emit(SyncEvent::ChangesDetected { count });
            }
        } else {
            debug!("No remote changes");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{self, RemoteError};
    use crate::fs::InMemoryFs;
    use crate::model::{Attachment, RemoteDocument, SyncHistoryRecord};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Listing(client::Result<Vec<RemoteDocument>>);

    #[async_trait]
    impl RemoteClient for Listing {
        async fn search_documents(
            &self,
            _query: &str,
            limit: usize,
        ) -> client::Result<Vec<RemoteDocument>> {
            assert_eq!(limit, BACKGROUND_SEARCH_LIMIT);
            self.0.clone()
        }

        async fn get_attachments(&self, _page_id: &str) -> client::Result<Vec<Attachment>> {
            Ok(vec![])
        }

        async fn download_attachment(&self, _url: &str) -> client::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn doc(id: &str, modified: &str) -> RemoteDocument {
        RemoteDocument {
            id: id.into(),
            title: format!("Page {}", id),
            space_key: "DEV".into(),
            content: "<p>x</p>".into(),
            version: 1,
            last_modified: modified.parse().unwrap(),
            author: String::new(),
            url: String::new(),
            labels: vec![],
            parent_id: None,
            attachments: vec![],
        }
    }

    async fn history_with(fs: &Arc<InMemoryFs>, id: &str, modified: &str) -> SyncHistoryStore<Arc<InMemoryFs>> {
        let mut store = SyncHistoryStore::new(fs.clone());
        store.update_record(
            id,
            SyncHistoryRecord {
                page_id: id.into(),
                last_synced_at: modified.parse().unwrap(),
                last_modified: modified.parse().unwrap(),
                file_path: format!("confluence/page-{}.md", id),
            },
        );
        store.save_history().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_counts_changed_pages_and_notifies() {
        let fs = Arc::new(InMemoryFs::new());
        let history = history_with(&fs, "1", "2025-11-20T00:00:00Z").await;
        let client = Listing(Ok(vec![
            doc("1", "2025-11-20T00:00:00Z"),
            doc("2", "2025-11-21T00:00:00Z"),
        ]));

        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe(move |event| sink.lock().unwrap().push(event));

        let mut detector = BackgroundChangeDetector::new(client, history, None).with_events(bus.clone());
        assert_eq!(detector.check_for_changes().await, 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncEvent::ChangesDetected { count: 1 }]
        );
    }

    #[tokio::test]
    async fn test_does_not_write_history() {
        let fs = Arc::new(InMemoryFs::new());
        let client = Listing(Ok(vec![doc("1", "2025-11-20T00:00:00Z")]));
        let mut detector =
            BackgroundChangeDetector::new(client, SyncHistoryStore::new(fs.clone()), None);

        assert_eq!(detector.check_for_changes().await, 1);
        assert_eq!(fs.file_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_count_as_no_changes() {
        let fs = Arc::new(InMemoryFs::new());
        let client = Listing(Err(RemoteError::Network("offline".into())));
        let mut detector =
            BackgroundChangeDetector::new(client, SyncHistoryStore::new(fs.clone()), None);

        assert_eq!(detector.check_for_changes().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_filters_count_as_no_changes() {
        let fs = Arc::new(InMemoryFs::new());
        let client = Listing(Ok(vec![doc("1", "2025-11-20T00:00:00Z")]));
        let filters = SyncFilters {
            enabled: true,
            ..Default::default()
        };
        let mut detector =
            BackgroundChangeDetector::new(client, SyncHistoryStore::new(fs.clone()), Some(filters));

        assert_eq!(detector.check_for_changes().await, 0);
    }
}
