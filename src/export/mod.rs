//! Export products built from a finalized session: the Markdown report,
//! the archive container, and export file naming.

mod archive;
mod markdown;
mod names;

pub use archive::{crc32, ArchiveWriter};
pub use markdown::render_markdown;
pub use names::export_filename;

use thiserror::Error;

use crate::data::StoreError;

/// Error surfaced to an export caller. This is the one category the engine
/// propagates: the caller asked for a specific artifact, and silent partial
/// output would be misleading.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// A rendered Markdown report plus its generated filename.
#[derive(Debug, Clone)]
pub struct MarkdownExport {
    pub filename: String,
    pub markdown: String,
}

/// An encoded archive container plus its generated filename.
#[derive(Debug, Clone)]
pub struct ArchiveExport {
    pub filename: String,
    pub bytes: Vec<u8>,
}
