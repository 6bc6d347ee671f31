//! Incremental sync engine.
//!
//! [`SyncEngine`] drives one pass from the remote listing to the vault.
//!
//! ## Sync Flow
//!
//! 1. **Validate** the filters and build the search query
//! 2. **Load** the sync history
//! 3. **List** pages; an empty listing finishes the pass
//! 4. **Filter** to pages changed since their last sync
//! 5. **Per page**: convert, rewrite links, add the header, merge-write,
//!    record. A failing page is recorded in the result and skipped.
//! 6. **Save** the history once
//!
//! Listing errors abort the pass. A history save failure is returned even
//! when every page succeeded.

use crate::attachments::{replace_attachment_urls, AttachmentDownloader};
use crate::client::{RemoteClient, RemoteError};
use crate::convert::{ConversionError, DiagramOutput, MarkupConverter};
use crate::detector::ChangeDetector;
use crate::events::{EventBus, SyncEvent, SyncPhase};
use crate::fs::{join_path, parent_folder, FileSystem};
use crate::history::{HistoryError, SyncHistoryStore};
use crate::links::transform_links;
use crate::metadata::{build_frontmatter, combine_content, MetadataError};
use crate::model::{RemoteDocument, SyncHistoryRecord};
use crate::query::{build_search_query, validate_filters};
use crate::settings::Settings;
use crate::slug::generate_slug;
use crate::writer::{NoteWriter, WriteError};

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid sync filters: enable at least one space, label or numeric page id")]
    InvalidFilters,

    #[error("Failed to list pages: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A page that could not be synced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub page_id: String,
    pub page_title: String,
    pub error: String,
}

/// Summary of a sync pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// True when no page failed
    pub success: bool,
    /// Pages in the listing
    pub total_pages: usize,
    /// Pages selected for writing
    pub updated_pages: usize,
    /// Pages unchanged since their last sync
    pub skipped_pages: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<SyncFailure>,
}

/// Mirrors remote pages into the vault
pub struct SyncEngine<C: RemoteClient, F: FileSystem + Clone> {
    client: C,
    writer: NoteWriter<F>,
    history: SyncHistoryStore<F>,
    converter: MarkupConverter,
    detector: ChangeDetector,
    settings: Settings,
    events: Option<Arc<EventBus>>,
}

impl<C: RemoteClient, F: FileSystem + Clone> SyncEngine<C, F> {
    pub fn new(client: C, fs: F, settings: Settings) -> Self {
        Self {
            client,
            writer: NoteWriter::new(fs.clone()),
            history: SyncHistoryStore::with_path(fs, settings.history_path.clone()),
            converter: MarkupConverter::new(),
            detector: ChangeDetector::new(settings.force_full_sync),
            settings,
            events: None,
        }
    }

    /// Publish progress to `bus`
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn set_force_sync(&mut self, force: bool) {
        self.detector.set_force_sync(force);
    }

    pub fn history(&self) -> &SyncHistoryStore<F> {
        &self.history
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }

    fn enter(&self, phase: SyncPhase) {
        debug!("Sync phase: {:?}", phase);
        self.emit(SyncEvent::Phase { phase });
    }

    fn finish(&self, result: &SyncResult) {
        self.enter(SyncPhase::Done);
        self.emit(SyncEvent::SyncFinished {
            success_count: result.success_count,
            failure_count: result.failure_count,
            skipped_pages: result.skipped_pages,
        });
    }

    /// Run one sync pass.
    pub async fn sync_all(&mut self) -> Result<SyncResult> {
        self.enter(SyncPhase::Idle);

        let filters = self.settings.filters.as_ref();
        if let Some(filters) = filters {
            if !validate_filters(filters) {
                return Err(SyncError::InvalidFilters);
            }
        }
        let query = build_search_query(filters);

        self.history.load_history().await;
        self.enter(SyncPhase::HistoryLoaded);

        info!("Listing pages: {}", query);
        let documents = self
            .client
            .search_documents(&query, self.settings.search_limit)
            .await?;
        self.enter(SyncPhase::Listed);

        let mut result = SyncResult {
            success: true,
            total_pages: documents.len(),
            ..Default::default()
        };

        if documents.is_empty() {
            info!("No pages to sync");
            self.finish(&result);
            return Ok(result);
        }

        let changed = self
            .detector
            .filter_changed_pages(&documents, self.history.all());
        self.enter(SyncPhase::Filtered);

        result.updated_pages = changed.len();
        result.skipped_pages = documents.len() - changed.len();

        if changed.is_empty() {
            info!("All {} pages are up to date", documents.len());
            self.finish(&result);
            return Ok(result);
        }

        info!(
            "Syncing {} pages ({} skipped)",
            changed.len(),
            result.skipped_pages
        );
        self.enter(SyncPhase::PerDocumentLoop);

        let mut page_files = self.history.page_files();
        for document in changed {
            let existing_path = self
                .history
                .get_record(&document.id)
                .map(|record| record.file_path.clone());

            match self.sync_page(document, existing_path, &page_files).await {
                Ok(file_path) => {
                    result.success_count += 1;
                    page_files.insert(document.id.clone(), file_path.clone());
                    self.emit(SyncEvent::DocumentSynced {
                        page_id: document.id.clone(),
                        title: document.title.clone(),
                        path: file_path.clone(),
                    });
                    self.history.update_record(
                        document.id.clone(),
                        SyncHistoryRecord {
                            page_id: document.id.clone(),
                            last_synced_at: Utc::now(),
                            last_modified: document.last_modified,
                            file_path,
                        },
                    );
                }
                Err(e) => {
                    error!("Failed to sync page {}: {}", document.id, e);
                    result.failure_count += 1;
                    self.emit(SyncEvent::DocumentFailed {
                        page_id: document.id.clone(),
                        title: document.title.clone(),
                        error: e.to_string(),
                    });
                    result.errors.push(SyncFailure {
                        page_id: document.id.clone(),
                        page_title: document.title.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.history.save_history().await?;
        self.enter(SyncPhase::HistorySaved);

        result.success = result.failure_count == 0;
        if result.success {
            info!(
                "Synced {} pages ({} skipped)",
                result.success_count, result.skipped_pages
            );
        } else {
            warn!(
                "Sync finished: {} succeeded, {} failed, {} skipped",
                result.success_count, result.failure_count, result.skipped_pages
            );
        }
        self.finish(&result);
        Ok(result)
    }

    /// Convert and write one page, returning its vault path
    async fn sync_page(
        &self,
        document: &RemoteDocument,
        existing_path: Option<String>,
        page_files: &HashMap<String, String>,
    ) -> Result<String> {
        let path = match existing_path {
            Some(path) => path,
            None => {
                let slug = generate_slug(&document.title);
                let name = self
                    .writer
                    .ensure_unique_file_name(&slug, &self.settings.sync_path)
                    .await?;
                join_path(&self.settings.sync_path, &name)
            }
        };

        let file_name = path.rsplit('/').next().unwrap_or(&path);
        let page_slug = file_name.strip_suffix(".md").unwrap_or(file_name);
        let folder = parent_folder(&path).unwrap_or("");

        let output = DiagramOutput {
            writer: &self.writer,
            folder,
            page_slug,
        };
        let mut markdown = self.converter.convert_document(document, &output).await?;

        if self.settings.download_attachments {
            let downloader = AttachmentDownloader::new(
                &self.client,
                &self.writer,
                &self.settings.attachments_path,
            );
            let local_paths = downloader
                .download_attachments(&document.id, page_slug)
                .await;
            markdown = replace_attachment_urls(&markdown, &local_paths);
        }

        let markdown = transform_links(&markdown, page_files);
        let header = build_frontmatter(document)?;
        self.writer
            .write(&path, &combine_content(&header, &markdown))
            .await?;

        debug!("Synced page {} to {}", document.id, path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::fs::InMemoryFs;
    use crate::model::Attachment;
    use crate::query::SyncFilters;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticClient {
        documents: Vec<RemoteDocument>,
        searches: AtomicUsize,
    }

    impl StaticClient {
        fn new(documents: Vec<RemoteDocument>) -> Self {
            Self {
                documents,
                searches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteClient for StaticClient {
        async fn search_documents(
            &self,
            _query: &str,
            _limit: usize,
        ) -> client::Result<Vec<RemoteDocument>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(self.documents.clone())
        }

        async fn get_attachments(&self, _page_id: &str) -> client::Result<Vec<Attachment>> {
            Ok(vec![])
        }

        async fn download_attachment(&self, _url: &str) -> client::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn doc(id: &str, title: &str, content: &str) -> RemoteDocument {
        RemoteDocument {
            id: id.into(),
            title: title.into(),
            space_key: "DEV".into(),
            content: content.into(),
            version: 1,
            last_modified: "2025-11-22T10:00:00Z".parse().unwrap(),
            author: "someone".into(),
            url: format!("https://x.atlassian.net/wiki/spaces/DEV/pages/{}", id),
            labels: vec![],
            parent_id: None,
            attachments: vec![],
        }
    }

    fn engine(
        client: StaticClient,
        fs: &Arc<InMemoryFs>,
    ) -> SyncEngine<Arc<StaticClient>, Arc<InMemoryFs>> {
        SyncEngine::new(Arc::new(client), fs.clone(), Settings::default())
    }

    #[tokio::test]
    async fn test_empty_listing_is_a_no_op() {
        let fs = Arc::new(InMemoryFs::new());
        let mut engine = engine(StaticClient::new(vec![]), &fs);

        let result = engine.sync_all().await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_pages, 0);
        assert_eq!(fs.file_count(), 0);
    }

    #[tokio::test]
    async fn test_phases_are_emitted_in_order() {
        let fs = Arc::new(InMemoryFs::new());
        let bus = Arc::new(EventBus::new());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        let _sub = bus.subscribe(move |event| {
            if let SyncEvent::Phase { phase } = event {
                sink.lock().unwrap().push(phase);
            }
        });

        let mut engine = engine(StaticClient::new(vec![doc("1", "One", "<p>1</p>")]), &fs)
            .with_events(bus.clone());
        engine.sync_all().await.unwrap();

        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                SyncPhase::Idle,
                SyncPhase::HistoryLoaded,
                SyncPhase::Listed,
                SyncPhase::Filtered,
                SyncPhase::PerDocumentLoop,
                SyncPhase::HistorySaved,
                SyncPhase::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_resync_reuses_recorded_path() {
        let fs = Arc::new(InMemoryFs::new());
        let client = Arc::new(StaticClient::new(vec![doc("1", "Same Title", "<p>v1</p>")]));
        let mut engine = SyncEngine::new(client, fs.clone(), Settings::default());
        engine.set_force_sync(true);

        engine.sync_all().await.unwrap();
        engine.sync_all().await.unwrap();

        assert!(fs.exists("confluence/same-title.md").await.unwrap());
        assert!(!fs.exists("confluence/same-title-2.md").await.unwrap());
        assert_eq!(
            engine.history().get_record("1").unwrap().file_path,
            "confluence/same-title.md"
        );
    }

    #[tokio::test]
    async fn test_same_titles_get_distinct_files() {
        let fs = Arc::new(InMemoryFs::new());
        let mut engine = engine(
            StaticClient::new(vec![doc("1", "Notes", "<p>a</p>"), doc("2", "Notes", "<p>b</p>")]),
            &fs,
        );

        engine.sync_all().await.unwrap();

        assert_eq!(engine.history().get_record("1").unwrap().file_path, "confluence/notes.md");
        assert_eq!(engine.history().get_record("2").unwrap().file_path, "confluence/notes-2.md");
    }

    #[tokio::test]
    async fn test_links_between_pages_in_one_pass_become_wikilinks() {
        let fs = Arc::new(InMemoryFs::new());
        let mut engine = engine(
            StaticClient::new(vec![
                doc("1", "Target", "<p>target</p>"),
                doc(
                    "2",
                    "Source",
                    r#"<p><a href="/wiki/spaces/DEV/pages/1/Target">the target</a></p>"#,
                ),
            ]),
            &fs,
        );

        engine.sync_all().await.unwrap();

        let source = fs.read("confluence/source.md").await.unwrap();
        assert!(source.contains("[[target|the target]]"));
    }

    #[tokio::test]
    async fn test_invalid_filters_rejected_before_listing() {
        let fs = Arc::new(InMemoryFs::new());
        let client = Arc::new(StaticClient::new(vec![doc("1", "One", "<p>1</p>")]));
        let settings = Settings {
            filters: Some(SyncFilters {
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut engine = SyncEngine::new(client.clone(), fs.clone(), settings);

        assert!(matches!(
            engine.sync_all().await,
            Err(SyncError::InvalidFilters)
        ));
        assert_eq!(client.searches.load(Ordering::SeqCst), 0);
        assert_eq!(fs.file_count(), 0);
    }
}
