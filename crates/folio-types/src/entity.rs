//! Addresses and payloads for remote writes.
//!
//! An [`EntityKey`] names exactly one slot in the sync queue: a notebook
//! scope plus either a block or a notebook attribute. The [`Entity`] is what
//! gets written into that slot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::ids::{BlockId, NotebookId};

/// Coarse kind of the thing a key addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Block,
    NotebookAttribute,
}

/// Notebook-level fields that sync independently from blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotebookAttribute {
    Name,
}

/// The entity within a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTarget {
    Block(BlockId),
    Attribute(NotebookAttribute),
}

impl EntityTarget {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityTarget::Block(_) => EntityKind::Block,
            EntityTarget::Attribute(_) => EntityKind::NotebookAttribute,
        }
    }
}

impl fmt::Display for EntityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityTarget::Block(id) => write!(f, "block:{}", id.short()),
            EntityTarget::Attribute(NotebookAttribute::Name) => write!(f, "notebook:name"),
        }
    }
}

/// Composite key for one queued or in-flight operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub scope: NotebookId,
    pub target: EntityTarget,
}

impl EntityKey {
    pub fn new(scope: NotebookId, target: EntityTarget) -> Self {
        Self { scope, target }
    }

    pub fn block(scope: NotebookId, id: BlockId) -> Self {
        Self::new(scope, EntityTarget::Block(id))
    }

    pub fn notebook_name(scope: NotebookId) -> Self {
        Self::new(scope, EntityTarget::Attribute(NotebookAttribute::Name))
    }

    pub fn kind(&self) -> EntityKind {
        self.target.kind()
    }

    pub fn in_scope(&self, scope: &NotebookId) -> bool {
        &self.scope == scope
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope.short(), self.target)
    }
}

/// Payload written to the remote store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Block(Block),
    NotebookName { name: String },
}

impl Entity {
    pub fn notebook_name(name: impl Into<String>) -> Self {
        Entity::NotebookName { name: name.into() }
    }

    /// The target this payload belongs to.
    pub fn target(&self) -> EntityTarget {
        match self {
            Entity::Block(block) => EntityTarget::Block(block.id),
            Entity::NotebookName { .. } => EntityTarget::Attribute(NotebookAttribute::Name),
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Entity::Block(block) => Some(block),
            Entity::NotebookName { .. } => None,
        }
    }
}
