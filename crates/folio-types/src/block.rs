//! Blocks: the ordered content units of a notebook.
//!
//! A block is an id, a [`BlockKind`], its text content, and two optional
//! type-specific bags ([`BlockMetadata`], [`BlockSettings`]). Equality on the
//! bags is structural, which is what change detection relies on.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::BlockId;

/// What a block *is*. Renderers dispatch on this; the sync path treats it as
/// one more field to compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum BlockKind {
    #[default]
    #[strum(serialize = "paragraph", serialize = "text")]
    Paragraph,
    #[strum(serialize = "heading1", serialize = "h1")]
    Heading1,
    #[strum(serialize = "heading2", serialize = "h2")]
    Heading2,
    #[strum(serialize = "heading3", serialize = "h3")]
    Heading3,
    #[strum(serialize = "bulleted_list", serialize = "bullet")]
    BulletedList,
    #[strum(serialize = "numbered_list", serialize = "numbered")]
    NumberedList,
    Todo,
    Code,
    Quote,
    Math,
    Divider,
    Image,
    Video,
    Grid,
}

impl BlockKind {
    /// Parse from string (case-insensitive, accepts short aliases like `h1`).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading1 => "heading1",
            BlockKind::Heading2 => "heading2",
            BlockKind::Heading3 => "heading3",
            BlockKind::BulletedList => "bulleted_list",
            BlockKind::NumberedList => "numbered_list",
            BlockKind::Todo => "todo",
            BlockKind::Code => "code",
            BlockKind::Quote => "quote",
            BlockKind::Math => "math",
            BlockKind::Divider => "divider",
            BlockKind::Image => "image",
            BlockKind::Video => "video",
            BlockKind::Grid => "grid",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type-specific block data. Every field is optional; absent fields are
/// omitted on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Code blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Todo items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    /// Images and videos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_cols: Option<u32>,
    /// Grid cell key (`"row,col"`) to the ids of the blocks placed in it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_cells: Option<BTreeMap<String, Vec<String>>>,
}

/// Per-block visual overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Styling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_radius: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styling: Option<Styling>,
}

/// One content block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BlockMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BlockSettings>,
}

impl Block {
    /// An empty block of the given kind.
    pub fn new(id: BlockId, kind: BlockKind) -> Self {
        Self {
            id,
            kind,
            content: String::new(),
            metadata: None,
            settings: None,
        }
    }

    /// An empty paragraph, the block a document falls back to.
    pub fn paragraph(id: BlockId) -> Self {
        Self::new(id, BlockKind::Paragraph)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_metadata(mut self, metadata: BlockMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_settings(mut self, settings: BlockSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// True when content is blank after trimming whitespace.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Apply the fields present in `patch`, leaving the rest unchanged.
    pub fn apply(&mut self, patch: BlockPatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = Some(metadata);
        }
        if let Some(settings) = patch.settings {
            self.settings = Some(settings);
        }
    }

    /// True if `other` differs in anything the remote store persists.
    ///
    /// Ids are not compared; callers match blocks by id first.
    pub fn differs_from(&self, other: &Block) -> bool {
        self.kind != other.kind
            || self.content != other.content
            || self.metadata != other.metadata
            || self.settings != other.settings
    }
}

/// Partial update for a block. `None` means "leave as is".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockPatch {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<BlockKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BlockMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BlockSettings>,
}

impl BlockPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn kind(kind: BlockKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.content.is_none()
            && self.metadata.is_none()
            && self.settings.is_none()
    }
}
