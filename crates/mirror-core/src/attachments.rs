//! Downloading page attachments into the vault.

use crate::client::RemoteClient;
use crate::fs::{join_path, FileSystem};
use crate::writer::NoteWriter;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Downloads the attachments of one page to `{attachments_path}/{page_slug}/`
pub struct AttachmentDownloader<'a, C: RemoteClient + ?Sized, F: FileSystem> {
    client: &'a C,
    writer: &'a NoteWriter<F>,
    attachments_path: &'a str,
}

impl<'a, C: RemoteClient + ?Sized, F: FileSystem> AttachmentDownloader<'a, C, F> {
    pub fn new(client: &'a C, writer: &'a NoteWriter<F>, attachments_path: &'a str) -> Self {
        Self {
            client,
            writer,
            attachments_path,
        }
    }

    /// Download every attachment of a page.
    ///
    /// Returns download URL and title, each mapped to the local path. A
    /// failed attachment is logged and left out; a failed listing yields an
    /// empty map.
    pub async fn download_attachments(
        &self,
        page_id: &str,
        page_slug: &str,
    ) -> BTreeMap<String, String> {
        let mut local_paths = BTreeMap::new();

        let attachments = match self.client.get_attachments(page_id).await {
            Ok(attachments) => attachments,
            Err(e) => {
                warn!("Failed to list attachments for page {}: {}", page_id, e);
                return local_paths;
            }
        };

        if attachments.is_empty() {
            debug!("No attachments found for page {}", page_id);
            return local_paths;
        }
        info!(
            "Downloading {} attachments for page {}",
            attachments.len(),
            page_id
        );

        let folder = join_path(self.attachments_path, page_slug);
        for attachment in &attachments {
            let path = join_path(&folder, &attachment.title.replace(['/', '\\'], "-"));

            let result = match self.client.download_attachment(&attachment.download_url).await {
                Ok(bytes) => self
                    .writer
                    .write_binary(&path, &bytes)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(()) => {
                    debug!("Downloaded {} -> {}", attachment.title, path);
                    local_paths.insert(attachment.download_url.clone(), path.clone());
                    local_paths.insert(attachment.title.clone(), path);
                }
                Err(e) => warn!("Failed to download {}: {}", attachment.title, e),
            }
        }

        local_paths
    }
}

/// Point Markdown links and `<img>` tags at the downloaded copies
pub fn replace_attachment_urls(markdown: &str, local_paths: &BTreeMap<String, String>) -> String {
    let mut result = markdown.to_string();
    for (url, path) in local_paths {
        result = result
            .replace(&format!("]({})", url), &format!("]({})", path))
            .replace(&format!("src=\"{}\"", url), &format!("src=\"{}\"", path));
    }
    result
}
