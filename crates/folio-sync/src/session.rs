//! One open notebook: its document, wired to the sync queue.
//!
//! Every document mutation is diffed against the last snapshot. Added and
//! changed blocks are queued as upserts; removed blocks are deleted remotely,
//! or just discarded when the store never saw them. A heading1 in first
//! position doubles as the notebook title and keeps the notebook name in step.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use folio_doc::{Baseline, ChangeDetector, DocError, DocumentModel};
use folio_types::{Block, BlockId, BlockKind, BlockPatch, Entity, EntityKey, NotebookId};

use crate::queue::SyncQueue;
use crate::status::OverallStatus;

/// Listener-side state, shared between the session and the document callback.
struct Tracker {
    notebook: NotebookId,
    queue: SyncQueue,
    baseline: Baseline,
    /// Blocks that came from the remote store when the notebook was opened.
    loaded: HashSet<BlockId>,
    title: String,
}

impl Tracker {
    fn on_snapshot(&mut self, blocks: &[Block]) {
        self.sync_title(blocks);

        let changes = self.baseline.advance(blocks);
        for id in &changes.removed {
            let key = EntityKey::block(self.notebook, *id);
            let known = self.loaded.remove(id);
            if known || self.queue.exists(&key) || self.queue.is_in_flight(&key) {
                self.queue.queue_delete(key).detach();
            } else {
                self.queue.discard(&key);
            }
        }
        for block in changes.upserts() {
            let key = EntityKey::block(self.notebook, block.id);
            let is_new = !self.loaded.contains(&block.id);
            self.queue.queue_upsert(key, Entity::Block(block.clone()), is_new);
        }
    }

    fn sync_title(&mut self, blocks: &[Block]) {
        let Some(first) = blocks.first().filter(|b| b.kind == BlockKind::Heading1) else {
            return;
        };
        if first.content.trim().is_empty() || first.content == self.title {
            return;
        }
        debug!(notebook = %self.notebook.short(), title = %first.content, "title follows heading");
        self.set_title(first.content.clone());
    }

    fn set_title(&mut self, title: String) {
        self.queue.queue_upsert(
            EntityKey::notebook_name(self.notebook),
            Entity::notebook_name(title.clone()),
            false,
        );
        self.title = title;
    }
}

/// An open notebook whose edits write back through a [`SyncQueue`].
pub struct NotebookSession {
    notebook: NotebookId,
    doc: DocumentModel,
    queue: SyncQueue,
    tracker: Arc<Mutex<Tracker>>,
}

impl NotebookSession {
    /// Open a notebook with the blocks the remote store returned for it.
    pub fn open(queue: SyncQueue, notebook: NotebookId, name: impl Into<String>, blocks: Vec<Block>) -> Self {
        let loaded = blocks.iter().map(|b| b.id).collect();
        // Baseline is what the server has; a synthesized default block shows
        // up as added on the next change.
        let baseline = Baseline::new(ChangeDetector::first_heading_protected(), &blocks);
        let tracker = Arc::new(Mutex::new(Tracker {
            notebook,
            queue: queue.clone(),
            baseline,
            loaded,
            title: name.into(),
        }));

        let mut doc = DocumentModel::from_blocks(blocks);
        let listener = tracker.clone();
        doc.set_listener(move |snapshot| listener.lock().on_snapshot(snapshot));

        debug!(notebook = %notebook.short(), blocks = doc.len(), "session opened");
        Self {
            notebook,
            doc,
            queue,
            tracker,
        }
    }

    pub fn id(&self) -> NotebookId {
        self.notebook
    }

    pub fn name(&self) -> String {
        self.tracker.lock().title.clone()
    }

    pub fn document(&self) -> &DocumentModel {
        &self.doc
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn new_block_id(&mut self) -> BlockId {
        self.doc.new_block_id()
    }

    pub fn add_block(&mut self, block: Block, index: Option<usize>) -> folio_doc::Result<()> {
        self.doc.add_block(block, index)
    }

    pub fn update_block(&mut self, id: &BlockId, patch: BlockPatch) -> folio_doc::Result<()> {
        self.doc.update_block(id, patch)
    }

    /// Remove block `id`. The leading heading1 is the notebook title and is
    /// refused with [`DocError::ProtectedBlock`].
    pub fn delete_block(&mut self, id: &BlockId) -> folio_doc::Result<()> {
        if self.doc.first().is_some_and(|b| &b.id == id && b.kind == BlockKind::Heading1) {
            return Err(DocError::ProtectedBlock(*id));
        }
        self.doc.delete_block(id)
    }

    pub fn move_block(&mut self, id: &BlockId, new_index: usize) -> folio_doc::Result<()> {
        self.doc.move_block(id, new_index)
    }

    /// Rename the notebook. A leading heading1 is rewritten to match.
    ///
    /// Returns false when `name` is blank or unchanged.
    pub fn rename(&mut self, name: &str) -> bool {
        let name = name.trim();
        {
            let mut tracker = self.tracker.lock();
            if name.is_empty() || name == tracker.title {
                return false;
            }
            tracker.set_title(name.to_string());
        }

        let heading = self
            .doc
            .first()
            .filter(|b| b.kind == BlockKind::Heading1 && b.content != name)
            .map(|b| b.id);
        if let Some(id) = heading {
            // Fires the listener; the title already matches so only the block is queued.
            if let Err(e) = self.doc.update_block(&id, BlockPatch::content(name)) {
                debug!(error = %e, "title block vanished during rename");
            }
        }
        true
    }

    /// Overall status of this notebook's keys.
    pub fn status(&self) -> OverallStatus {
        self.queue.overall_status_for(&self.notebook)
    }

    /// Send everything pending now and wait for it to settle.
    pub async fn flush(&self) {
        self.queue.force_flush(&self.notebook).await;
    }

    /// Flush, detach from the document, and release the notebook's keys
    /// from the queue.
    pub async fn close(mut self) {
        self.flush().await;
        self.doc.clear_listener();
        let released = self.queue.release_scope(&self.notebook);
        debug!(notebook = %self.notebook.short(), released, "session closed");
    }

    /// Drop unsent edits and detach. In-flight calls still complete; their
    /// keys stay in the queue until they settle.
    pub fn abandon(mut self) {
        self.doc.clear_listener();
        self.queue.cancel_scope(&self.notebook);
        self.queue.release_scope(&self.notebook);
        debug!(notebook = %self.notebook.short(), "session abandoned");
    }
}

impl std::fmt::Debug for NotebookSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookSession")
            .field("notebook", &self.notebook)
            .field("blocks", &self.doc.len())
            .finish()
    }
}
