//! Converter orchestration: extract diagrams, transform, restore.

use super::extractor::{DrawioExtractor, MacroExtractor, PlantUmlExtractor};
use super::markdown::to_markdown;
use crate::fs::{join_path, FileSystem};
use crate::model::RemoteDocument;
use crate::writer::{NoteWriter, WriteError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Malformed markup at byte {position}: {message}")]
    Markup { position: usize, message: String },

    #[error("Failed to save diagram {path}: {source}")]
    Diagram {
        path: String,
        #[source]
        source: WriteError,
    },

    #[error("Markdown conversion failed for page {page_id}: {source}")]
    Document {
        page_id: String,
        #[source]
        source: Box<ConversionError>,
    },
}

impl ConversionError {
    /// Id of the page that failed, when known
    pub fn page_id(&self) -> Option<&str> {
        match self {
            ConversionError::Document { page_id, .. } => Some(page_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;

/// Where draw.io payloads are saved during a conversion
pub struct DiagramOutput<'a, F: FileSystem> {
    pub writer: &'a NoteWriter<F>,
    /// Vault folder the note lives in
    pub folder: &'a str,
    /// Slug of the note, used to name diagram files
    pub page_slug: &'a str,
}

/// Storage-format to Markdown converter
#[derive(Default)]
pub struct MarkupConverter {
    plantuml: PlantUmlExtractor,
    drawio: DrawioExtractor,
}

impl MarkupConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a page body, saving draw.io diagrams next to the note.
    ///
    /// Errors carry the page id.
    pub async fn convert_document<F: FileSystem>(
        &self,
        document: &RemoteDocument,
        output: &DiagramOutput<'_, F>,
    ) -> Result<String> {
        if document.content.trim().is_empty() {
            return Ok(String::new());
        }

        self.convert_content(&document.content, output)
            .await
            .map_err(|source| ConversionError::Document {
                page_id: document.id.clone(),
                source: Box::new(source),
            })
    }

    async fn convert_content<F: FileSystem>(
        &self,
        content: &str,
        output: &DiagramOutput<'_, F>,
    ) -> Result<String> {
        let mut markup = content.to_string();

        let plantuml = self.plantuml.extract_macros(&markup);
        if !plantuml.is_empty() {
            markup = self.plantuml.replace_with_placeholders(&markup, &plantuml);
        }

        let drawio = self.drawio.extract_macros(&markup);
        let mut diagram_files = Vec::with_capacity(drawio.len());
        for (index, diagram) in drawio.iter().enumerate() {
            let file_name = self.drawio.file_name(output.page_slug, index);
            let path = join_path(output.folder, &file_name);
            output
                .writer
                .write_binary(&path, diagram.payload.as_bytes())
                .await
                .map_err(|source| ConversionError::Diagram {
                    path: path.clone(),
                    source,
                })?;
            debug!("Saved draw.io diagram {}", path);
            diagram_files.push(file_name);
        }
        if !drawio.is_empty() {
            markup = self.drawio.replace_with_placeholders(&markup, &drawio);
        }

        let markdown = to_markdown(&markup)?;

        let code_blocks: Vec<String> = plantuml.iter().map(|m| self.plantuml.render(m)).collect();
        let markdown = self.plantuml.restore_placeholders(&markdown, &code_blocks);

        let embeds: Vec<String> = diagram_files
            .iter()
            .map(|file| self.drawio.embed(file))
            .collect();
        let markdown = self.drawio.restore_placeholders(&markdown, &embeds);

        Ok(markdown.trim().to_string())
    }
}
