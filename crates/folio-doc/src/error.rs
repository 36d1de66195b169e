//! Error types for document mutations.

use thiserror::Error;

use folio_types::BlockId;

/// Errors from [`DocumentModel`](crate::DocumentModel) mutations.
///
/// A mutation that returns an error leaves the document untouched and does
/// not notify the listener.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DocError {
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    #[error("block already exists: {0:?}")]
    DuplicateBlock(BlockId),

    #[error("block is the notebook title and cannot be deleted: {0:?}")]
    ProtectedBlock(BlockId),

    #[error("index {index} out of bounds for document with {len} blocks")]
    IndexOutOfBounds { index: usize, len: usize },
}
