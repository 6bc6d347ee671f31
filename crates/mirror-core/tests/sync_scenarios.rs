//! End-to-end sync passes against an in-memory vault.
//!
//! Drives `SyncEngine` with a scripted remote and checks what lands in the
//! vault and in the sync history.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mirror_core::client::{self, RemoteClient, RemoteError};
use mirror_core::history::DEFAULT_HISTORY_PATH;
use mirror_core::regions::{CONFLUENCE_END_MARKER, DEFAULT_LOCAL_NOTES_TEMPLATE};
use mirror_core::{
    Attachment, FileSystem, InMemoryFs, RemoteDocument, Settings, SyncEngine, SyncError,
    SyncFilters,
};

/// Remote whose listing can be swapped between passes.
struct ScriptedRemote {
    documents: Mutex<Vec<RemoteDocument>>,
    listing_error: Mutex<Option<RemoteError>>,
    searches: AtomicUsize,
}

impl ScriptedRemote {
    fn new(documents: Vec<RemoteDocument>) -> Arc<Self> {
        Arc::new(Self {
            documents: Mutex::new(documents),
            listing_error: Mutex::new(None),
            searches: AtomicUsize::new(0),
        })
    }

    fn set_documents(&self, documents: Vec<RemoteDocument>) {
        *self.documents.lock().unwrap() = documents;
    }

    fn fail_listing(&self, error: RemoteError) {
        *self.listing_error.lock().unwrap() = Some(error);
    }

    fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn search_documents(
        &self,
        _query: &str,
        _limit: usize,
    ) -> client::Result<Vec<RemoteDocument>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.listing_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn get_attachments(&self, page_id: &str) -> client::Result<Vec<Attachment>> {
        Ok(vec![Attachment {
            id: format!("att-{}", page_id),
            title: "chart.png".into(),
            media_type: "image/png".into(),
            file_size: 3,
            download_url: format!("/download/attachments/{}/chart.png", page_id),
            page_id: page_id.into(),
        }])
    }

    async fn download_attachment(&self, _url: &str) -> client::Result<Vec<u8>> {
        Ok(vec![1, 2, 3])
    }
}

fn page(id: &str, title: &str, content: &str, modified: &str) -> RemoteDocument {
    RemoteDocument {
        id: id.into(),
        title: title.into(),
        space_key: "ENG".into(),
        content: content.into(),
        version: 1,
        last_modified: modified.parse().unwrap(),
        author: "Ada".into(),
        url: format!("https://example.atlassian.net/wiki/spaces/ENG/pages/{}", id),
        labels: vec!["docs".into()],
        parent_id: None,
        attachments: vec![],
    }
}

fn three_pages() -> Vec<RemoteDocument> {
    vec![
        page("1", "Getting Started", "<h1>Start</h1><p>Hello</p>", "2025-11-20T10:00:00Z"),
        page("2", "API Design", "<ul><li>REST</li><li>gRPC</li></ul>", "2025-11-21T10:00:00Z"),
        page("3", "Runbook", "<p>Restart the <code>worker</code></p>", "2025-11-22T10:00:00Z"),
    ]
}

async fn history_keys(fs: &Arc<InMemoryFs>) -> Vec<String> {
    let raw = fs.read(DEFAULT_HISTORY_PATH).await.unwrap();
    let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw).unwrap();
    parsed.keys().cloned().collect()
}

#[tokio::test]
async fn test_first_sync_writes_every_page() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(three_pages());
    let mut engine = SyncEngine::new(remote, fs.clone(), Settings::default());

    let result = engine.sync_all().await.unwrap();

    assert!(result.success);
    assert_eq!(result.total_pages, 3);
    assert_eq!(result.updated_pages, 3);
    assert_eq!(result.skipped_pages, 0);
    assert_eq!(result.success_count, 3);

    let note = fs.read("confluence/getting-started.md").await.unwrap();
    assert!(note.starts_with("---\n"));
    assert!(note.contains("confluence_id: '1'") || note.contains("confluence_id: \"1\""));
    assert!(note.contains("# Start\n\nHello"));
    assert!(note.ends_with(DEFAULT_LOCAL_NOTES_TEMPLATE));

    assert_eq!(history_keys(&fs).await, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_unchanged_pages_are_skipped() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(three_pages());
    let mut engine = SyncEngine::new(remote.clone(), fs.clone(), Settings::default());
    engine.sync_all().await.unwrap();

    let mut pages = three_pages();
    pages[1].last_modified = "2025-12-01T00:00:00Z".parse().unwrap();
    pages[1].content = "<p>Rewritten</p>".into();
    remote.set_documents(pages);

    let result = engine.sync_all().await.unwrap();
    assert_eq!(result.updated_pages, 1);
    assert_eq!(result.skipped_pages, 2);

    let note = fs.read("confluence/api-design.md").await.unwrap();
    assert!(note.contains("Rewritten"));
    assert!(!note.contains("gRPC"));
}

#[tokio::test]
async fn test_one_failing_page_does_not_stop_the_pass() {
    let fs = Arc::new(InMemoryFs::new());
    let mut pages = three_pages();
    pages[1].content = "<p>ok</p><!-- never closed".into();
    let remote = ScriptedRemote::new(pages);
    let mut engine = SyncEngine::new(remote, fs.clone(), Settings::default());

    let result = engine.sync_all().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].page_id, "2");
    assert_eq!(result.errors[0].page_title, "API Design");

    assert!(!fs.exists("confluence/api-design.md").await.unwrap());
    assert_eq!(history_keys(&fs).await, vec!["1", "3"]);
}

#[tokio::test]
async fn test_local_notes_survive_resync_once() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(three_pages());
    let mut engine = SyncEngine::new(remote.clone(), fs.clone(), Settings::default());
    engine.sync_all().await.unwrap();

    let path = "confluence/runbook.md";
    let note = fs.read(path).await.unwrap();
    let end = note.find(CONFLUENCE_END_MARKER).unwrap() + CONFLUENCE_END_MARKER.len();
    let edited = format!("{}\n\n## Local Notes\nMy thought\n", &note[..end]);
    fs.write(path, &edited).await.unwrap();

    let mut pages = three_pages();
    pages[2].last_modified = "2025-12-01T00:00:00Z".parse().unwrap();
    pages[2].content = "<p>Restart both workers</p>".into();
    remote.set_documents(pages);
    engine.sync_all().await.unwrap();

    let note = fs.read(path).await.unwrap();
    assert!(note.contains("Restart both workers"));
    assert_eq!(note.matches("## Local Notes\nMy thought").count(), 1);
    assert_eq!(note.matches("## Local Notes").count(), 1);
}

#[tokio::test]
async fn test_forced_resync_is_idempotent() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(three_pages());
    let mut engine = SyncEngine::new(remote, fs.clone(), Settings::default());
    engine.set_force_sync(true);

    engine.sync_all().await.unwrap();
    let first = fs.read("confluence/api-design.md").await.unwrap();

    let result = engine.sync_all().await.unwrap();
    let second = fs.read("confluence/api-design.md").await.unwrap();

    assert_eq!(result.updated_pages, 3);
    assert_eq!(first, second);
    assert!(!fs.exists("confluence/api-design-2.md").await.unwrap());
}

#[tokio::test]
async fn test_page_containing_end_marker_is_stable_across_resyncs() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(vec![page(
        "9",
        "Template",
        "<p>Notes go below</p><!-- CONFLUENCE_END --><p>remote tail</p>",
        "2025-11-20T10:00:00Z",
    )]);
    let mut engine = SyncEngine::new(remote, fs.clone(), Settings::default());
    engine.set_force_sync(true);

    let path = "confluence/template.md";
    let mut previous: Option<String> = None;
    for _ in 0..3 {
        engine.sync_all().await.unwrap();
        let note = fs.read(path).await.unwrap();

        assert_eq!(note.matches("remote tail").count(), 1);
        assert_eq!(note.matches(CONFLUENCE_END_MARKER).count(), 1);
        assert_eq!(note.matches("## Local Notes").count(), 1);
        if let Some(previous) = &previous {
            assert_eq!(previous, &note);
        }
        previous = Some(note);
    }
}

#[tokio::test]
async fn test_empty_enabled_filters_never_reach_the_remote() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(three_pages());
    let settings = Settings {
        filters: Some(SyncFilters {
            enabled: true,
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut engine = SyncEngine::new(remote.clone(), fs.clone(), settings);

    let err = engine.sync_all().await.unwrap_err();

    assert!(matches!(err, SyncError::InvalidFilters));
    assert_eq!(remote.searches(), 0);
    assert_eq!(fs.file_count(), 0);
}

#[tokio::test]
async fn test_listing_failure_aborts_without_writes() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(three_pages());
    remote.fail_listing(RemoteError::Authentication("token expired".into()));
    let mut engine = SyncEngine::new(remote, fs.clone(), Settings::default());

    let err = engine.sync_all().await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Remote(RemoteError::Authentication(_))
    ));
    assert_eq!(fs.file_count(), 0);
}

#[tokio::test]
async fn test_history_save_failure_is_reported() {
    let fs = Arc::new(InMemoryFs::new());
    fs.fail_writes_under(".obsidian");
    let remote = ScriptedRemote::new(three_pages());
    let mut engine = SyncEngine::new(remote, fs.clone(), Settings::default());

    let err = engine.sync_all().await.unwrap_err();

    assert!(matches!(err, SyncError::History(_)));
    assert!(fs.exists("confluence/runbook.md").await.unwrap());
}

#[tokio::test]
async fn test_attachments_downloaded_when_enabled() {
    let fs = Arc::new(InMemoryFs::new());
    let remote = ScriptedRemote::new(vec![page(
        "7",
        "Charts",
        r#"<p><img src="/download/attachments/7/chart.png" alt="chart"></p>"#,
        "2025-11-20T10:00:00Z",
    )]);
    let settings = Settings {
        download_attachments: true,
        ..Default::default()
    };
    let mut engine = SyncEngine::new(remote, fs.clone(), settings);

    engine.sync_all().await.unwrap();

    assert!(fs.exists("attachments/charts/chart.png").await.unwrap());
    let note = fs.read("confluence/charts.md").await.unwrap();
    assert!(note.contains("![chart](attachments/charts/chart.png)"));
}
