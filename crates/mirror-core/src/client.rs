//! RemoteClient trait: the authenticated capabilities the engine needs from
//! the remote wiki.
//!
//! Implementations:
//! - `ConfluenceHttpClient` (in mirror-daemon) - Confluence REST over reqwest
//! - Test doubles in this crate's tests

use crate::model::{Attachment, RemoteDocument};
use async_trait::async_trait;
use thiserror::Error;

/// Discriminant of [`RemoteError`], for callers that branch on the failure
/// class without caring about its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    Authentication,
    Permission,
    MalformedQuery,
    RateLimited,
    Api,
    Network,
    NotConnected,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// Token expired or rejected; recoverable by re-authenticating
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    /// The search query was rejected; the filter configuration must change
    #[error("Invalid CQL query: {0}")]
    MalformedQuery(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Confluence API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Client not connected: {0}")]
    NotConnected(String),
}

impl RemoteError {
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            RemoteError::Authentication(_) => RemoteErrorKind::Authentication,
            RemoteError::Permission(_) => RemoteErrorKind::Permission,
            RemoteError::MalformedQuery(_) => RemoteErrorKind::MalformedQuery,
            RemoteError::RateLimited { .. } => RemoteErrorKind::RateLimited,
            RemoteError::Api { .. } => RemoteErrorKind::Api,
            RemoteError::Network(_) => RemoteErrorKind::Network,
            RemoteError::NotConnected(_) => RemoteErrorKind::NotConnected,
        }
    }

    /// Whether retrying later (after backoff or re-auth) can succeed
    pub fn is_recoverable(&self) -> bool {
        match self.kind() {
            RemoteErrorKind::Authentication
            | RemoteErrorKind::RateLimited
            | RemoteErrorKind::Network => true,
            RemoteErrorKind::Permission
            | RemoteErrorKind::MalformedQuery
            | RemoteErrorKind::Api
            | RemoteErrorKind::NotConnected => false,
        }
    }

    /// Map an HTTP status code to the matching variant.
    ///
    /// `retry_after_secs` is only used for 429 responses.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after_secs: u64) -> Self {
        let message = message.into();
        match status {
            401 => RemoteError::Authentication(message),
            403 => RemoteError::Permission(message),
            400 => RemoteError::MalformedQuery(message),
            429 => RemoteError::RateLimited { retry_after_secs },
            _ => RemoteError::Api { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Authenticated access to the remote wiki.
///
/// Token refresh happens below this trait: a 401 has already been retried
/// once by the implementation before `Authentication` reaches the caller.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Search pages with a CQL query, returning at most `limit` documents
    async fn search_documents(&self, query: &str, limit: usize) -> Result<Vec<RemoteDocument>>;

    /// List the attachments of a page
    async fn get_attachments(&self, page_id: &str) -> Result<Vec<Attachment>>;

    /// Download an attachment by its download reference
    async fn download_attachment(&self, download_url: &str) -> Result<Vec<u8>>;

    /// Cheap authenticated request used as a connectivity diagnostic
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: RemoteClient + ?Sized> RemoteClient for std::sync::Arc<T> {
    async fn search_documents(&self, query: &str, limit: usize) -> Result<Vec<RemoteDocument>> {
        (**self).search_documents(query, limit).await
    }

    async fn get_attachments(&self, page_id: &str) -> Result<Vec<Attachment>> {
        (**self).get_attachments(page_id).await
    }

    async fn download_attachment(&self, download_url: &str) -> Result<Vec<u8>> {
        (**self).download_attachment(download_url).await
    }

    async fn test_connection(&self) -> Result<()> {
        (**self).test_connection().await
    }
}
