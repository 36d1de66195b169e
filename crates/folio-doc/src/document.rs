//! The in-memory ordered block list for one notebook.
//!
//! [`DocumentModel`] is the single owner of the block list. Every successful
//! mutation hands the full new snapshot to the registered listener before
//! returning; failed mutations leave the list untouched and stay silent.
//!
//! A document is never empty: deleting the last block synthesizes an empty
//! paragraph in its place.

use std::collections::HashSet;

use folio_types::{Block, BlockId, BlockPatch};
use tracing::trace;

use crate::{DocError, Result};

/// Callback invoked with the ordered snapshot after each mutation.
pub type SnapshotListener = Box<dyn FnMut(&[Block]) + Send + Sync>;

pub struct DocumentModel {
    blocks: Vec<Block>,
    /// Every id this document has ever held or issued.
    issued: HashSet<BlockId>,
    listener: Option<SnapshotListener>,
}

impl DocumentModel {
    /// A fresh document holding one empty paragraph.
    pub fn new() -> Self {
        Self::from_blocks(Vec::new())
    }

    /// Load existing blocks, e.g. the server's copy of a notebook.
    ///
    /// Duplicate ids keep their first occurrence. An empty list gets the
    /// default paragraph.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut doc = Self {
            blocks: Vec::with_capacity(blocks.len().max(1)),
            issued: HashSet::new(),
            listener: None,
        };
        for block in blocks {
            if doc.issued.insert(block.id) {
                doc.blocks.push(block);
            }
        }
        doc.ensure_not_empty();
        doc
    }

    /// Register the snapshot listener, replacing any previous one.
    pub fn set_listener(&mut self, listener: impl FnMut(&[Block]) + Send + Sync + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Independent copy of the current ordered block list.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.clone()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    pub fn first(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| &b.id == id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false for a constructed document; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Generate a block id never before seen by this document.
    pub fn new_block_id(&mut self) -> BlockId {
        loop {
            let id = BlockId::new();
            if self.issued.insert(id) {
                return id;
            }
        }
    }

    /// Insert `block` at `index`, or append when `index` is `None` or past the end.
    pub fn add_block(&mut self, block: Block, index: Option<usize>) -> Result<()> {
        if self.position(&block.id).is_some() {
            return Err(DocError::DuplicateBlock(block.id));
        }
        self.issued.insert(block.id);
        match index {
            Some(i) if i <= self.blocks.len() => self.blocks.insert(i, block),
            _ => self.blocks.push(block),
        }
        self.notify();
        Ok(())
    }

    /// Replace the fields present in `patch` on block `id`.
    pub fn update_block(&mut self, id: &BlockId, patch: BlockPatch) -> Result<()> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or(DocError::BlockNotFound(*id))?;
        block.apply(patch);
        self.notify();
        Ok(())
    }

    /// Remove block `id`.
    pub fn delete_block(&mut self, id: &BlockId) -> Result<()> {
        let index = self.position(id).ok_or(DocError::BlockNotFound(*id))?;
        self.blocks.remove(index);
        self.ensure_not_empty();
        self.notify();
        Ok(())
    }

    /// Move block `id` so it ends up at `new_index`.
    pub fn move_block(&mut self, id: &BlockId, new_index: usize) -> Result<()> {
        let current = self.position(id).ok_or(DocError::BlockNotFound(*id))?;
        let len = self.blocks.len();
        if new_index >= len {
            return Err(DocError::IndexOutOfBounds { index: new_index, len });
        }
        let block = self.blocks.remove(current);
        self.blocks.insert(new_index, block);
        self.notify();
        Ok(())
    }

    fn ensure_not_empty(&mut self) {
        if self.blocks.is_empty() {
            let id = self.new_block_id();
            self.blocks.push(Block::paragraph(id));
        }
    }

    fn notify(&mut self) {
        trace!(blocks = self.blocks.len(), "document changed");
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.blocks);
        }
    }
}

impl Default for DocumentModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocumentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentModel")
            .field("blocks", &self.blocks)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
