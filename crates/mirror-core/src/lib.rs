//! mirror-core: Incremental Confluence to Obsidian vault mirroring.
//!
//! This crate provides the core functionality for:
//! - Detecting pages changed since their last sync
//! - Converting storage-format markup to Markdown, keeping diagram macros
//! - Writing notes without losing the user's local notes
//! - Persisting the sync history ledger
//! - FileSystem and RemoteClient trait abstractions

pub mod attachments;
pub mod background;
pub mod client;
pub mod convert;
pub mod detector;
pub mod engine;
pub mod events;
pub mod fs;
pub mod history;
pub mod links;
pub mod metadata;
pub mod model;
pub mod query;
pub mod regions;
pub mod retry;
pub mod settings;
pub mod slug;
pub mod writer;

pub use background::BackgroundChangeDetector;
pub use client::{RemoteClient, RemoteError, RemoteErrorKind};
pub use convert::{ConversionError, MarkupConverter};
pub use detector::ChangeDetector;
pub use engine::{SyncEngine, SyncError, SyncFailure, SyncResult};
pub use events::{EventBus, Subscription, SyncEvent, SyncPhase};
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use history::SyncHistoryStore;
pub use model::{Attachment, RemoteDocument, SyncHistoryRecord};
pub use query::SyncFilters;
pub use settings::Settings;
pub use writer::NoteWriter;
