//! Snapshot diffing.
//!
//! [`ChangeDetector`] compares a previous snapshot (ordered id → block map)
//! against a new ordered block list and sorts ids into added, changed, and
//! removed. A protected predicate can veto removals: a block it matches is
//! never reported as removed, whatever the new snapshot says.
//!
//! [`Baseline`] keeps the previous snapshot between calls so callers can feed
//! snapshots one after another.

use indexmap::IndexMap;

use folio_types::{Block, BlockId, BlockKind};

/// Previous-snapshot predicate: `(block, position in previous snapshot)`.
pub type ProtectedFn = Box<dyn Fn(&Block, usize) -> bool + Send + Sync>;

/// Ordered id → block snapshot.
pub type Snapshot = IndexMap<BlockId, Block>;

/// Build a [`Snapshot`] from an ordered list.
pub fn snapshot_of(blocks: &[Block]) -> Snapshot {
    blocks.iter().map(|b| (b.id, b.clone())).collect()
}

/// Result of one diff.
///
/// `added` and `changed` carry the new block values in document order;
/// `removed` carries ids in previous-snapshot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<Block>,
    pub changed: Vec<Block>,
    pub removed: Vec<BlockId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Added then changed blocks: everything that needs an upsert.
    pub fn upserts(&self) -> impl Iterator<Item = &Block> {
        self.added.iter().chain(self.changed.iter())
    }
}

#[derive(Default)]
pub struct ChangeDetector {
    protected: Option<ProtectedFn>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self { protected: None }
    }

    /// Use `predicate` to veto removals.
    pub fn with_protected(predicate: impl Fn(&Block, usize) -> bool + Send + Sync + 'static) -> Self {
        Self {
            protected: Some(Box::new(predicate)),
        }
    }

    /// The notebook rule: a heading1 in first position is the title block and
    /// is never reported as removed.
    pub fn first_heading_protected() -> Self {
        Self::with_protected(|block, position| position == 0 && block.kind == BlockKind::Heading1)
    }

    pub fn is_protected(&self, block: &Block, position: usize) -> bool {
        self.protected.as_ref().is_some_and(|p| p(block, position))
    }

    pub fn diff(&self, previous: &Snapshot, current: &[Block]) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for block in current {
            match previous.get(&block.id) {
                None => changes.added.push(block.clone()),
                Some(prev) if prev.differs_from(block) => changes.changed.push(block.clone()),
                Some(_) => {}
            }
        }

        let present: std::collections::HashSet<&BlockId> = current.iter().map(|b| &b.id).collect();
        for (position, (id, block)) in previous.iter().enumerate() {
            if !present.contains(id) && !self.is_protected(block, position) {
                changes.removed.push(*id);
            }
        }

        changes
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("protected", &self.protected.is_some())
            .finish()
    }
}

/// The previous snapshot, advanced on every diff.
#[derive(Debug)]
pub struct Baseline {
    detector: ChangeDetector,
    previous: Snapshot,
}

impl Baseline {
    pub fn new(detector: ChangeDetector, initial: &[Block]) -> Self {
        Self {
            detector,
            previous: snapshot_of(initial),
        }
    }

    /// Diff `current` against the stored snapshot, then make `current` the
    /// new baseline.
    pub fn advance(&mut self, current: &[Block]) -> ChangeSet {
        let changes = self.detector.diff(&self.previous, current);
        self.previous = snapshot_of(current);
        changes
    }

    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }
}
