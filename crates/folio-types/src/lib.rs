//! Shared identity, block, and entity types for Folio.
//!
//! A pure leaf crate: typed ids, the block model, and the keys and payloads
//! the sync queue moves around. No internal folio dependencies.
//!
//! ```text
//! Notebook (NotebookId) ← the scope of every remote write
//!     └── ordered Blocks (BlockId, BlockKind, content, metadata, settings)
//!     └── attributes (name)
//!
//! EntityKey = NotebookId + EntityTarget { Block(BlockId) | Attribute(Name) }
//! Entity    = Block(Block) | NotebookName { name }
//! ```

pub mod block;
pub mod entity;
pub mod ids;

pub use block::{Block, BlockKind, BlockMetadata, BlockPatch, BlockSettings, Styling};
pub use entity::{Entity, EntityKey, EntityKind, EntityTarget, NotebookAttribute};
pub use ids::{BlockId, NotebookId};
