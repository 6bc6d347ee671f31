//! Storage-format to Markdown conversion with diagram macro preservation.

mod converter;
pub mod extractor;
pub mod markdown;

pub use converter::{ConversionError, DiagramOutput, MarkupConverter};
pub use extractor::{DrawioExtractor, ExtractedMacro, MacroExtractor, PlantUmlExtractor};
