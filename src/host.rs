//! Document Host - the capability surface the engine mutates
//!
//! The host owns the layer tree. Everything the engine does goes through
//! this trait, addressed by identifier: names are neither unique nor stable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Opaque, host-assigned layer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Group,
    Text,
    Pixel,
    SmartObject,
}

/// Position of a record in the top-down enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    GroupStart,
    GroupEnd,
    Content,
}

/// One entry of the top-down layer enumeration. A group yields a
/// `GroupStart` before its descendants and a `GroupEnd` after them.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    pub id: LayerId,
    pub name: String,
    pub section: Section,
}

/// Axis-aligned bounding box in document pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Bounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Bounds {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Scale by `factor` about the point `(cx, cy)`.
    pub fn scaled_about(&self, factor: f64, cx: f64, cy: f64) -> Self {
        Self::new(
            cx + (self.left - cx) * factor,
            cy + (self.top - cy) * factor,
            cx + (self.right - cx) * factor,
            cy + (self.bottom - cy) * factor,
        )
    }

    pub fn union(&self, other: &Bounds) -> Self {
        Self::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }
}

impl From<[f64; 4]> for Bounds {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Bounds> for [f64; 4] {
    fn from(b: Bounds) -> Self {
        [b.left, b.top, b.right, b.bottom]
    }
}

/// Layer-panel label colours used to mark which action touched a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Violet,
    Gray,
}

impl LabelColor {
    pub const PALETTE: [LabelColor; 7] = [
        LabelColor::Red,
        LabelColor::Orange,
        LabelColor::Yellow,
        LabelColor::Green,
        LabelColor::Blue,
        LabelColor::Violet,
        LabelColor::Gray,
    ];

    /// Colour for the action at `position`, cycling through the palette.
    pub fn for_position(position: usize) -> Self {
        Self::PALETTE[position % Self::PALETTE.len()]
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    #[error("Layer {id} is {kind:?}, expected {expected:?}")]
    WrongKind {
        id: LayerId,
        kind: LayerKind,
        expected: LayerKind,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Layer scan failed: {0}")]
    Scan(String),

    #[error("Asset could not be placed: {0}")]
    Placement(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Capability interface over an externally owned, mutable layer tree.
pub trait DocumentHost {
    /// Document name as shown by the host (used for page detection).
    fn document_name(&self) -> &str;

    /// Every layer, top to bottom, with group start/end markers.
    fn enumerate(&self) -> HostResult<Vec<LayerRecord>>;

    fn layer_name(&self, id: LayerId) -> HostResult<String>;
    fn layer_kind(&self, id: LayerId) -> HostResult<LayerKind>;

    /// Direct children of a group, top to bottom. Empty for leaves.
    fn children(&self, id: LayerId) -> HostResult<Vec<LayerId>>;

    fn text(&self, id: LayerId) -> HostResult<String>;
    fn set_text(&mut self, id: LayerId, text: &str) -> HostResult<()>;

    fn is_visible(&self, id: LayerId) -> HostResult<bool>;
    fn set_visible(&mut self, id: LayerId, visible: bool) -> HostResult<()>;

    fn bounds(&self, id: LayerId) -> HostResult<Bounds>;
    fn translate(&mut self, id: LayerId, dx: f64, dy: f64) -> HostResult<()>;

    /// Uniform resize about the layer's center, `percent` of current size.
    fn resize(&mut self, id: LayerId, percent: f64) -> HostResult<()>;

    /// Duplicate a layer (and its subtree); returns the duplicate's id.
    fn duplicate(&mut self, id: LayerId) -> HostResult<LayerId>;
    fn rename(&mut self, id: LayerId, name: &str) -> HostResult<()>;

    /// Place an external file as a new layer directly above `above`.
    fn place_asset(&mut self, asset: &Path, above: LayerId) -> HostResult<LayerId>;

    fn set_label(&mut self, id: LayerId, color: LabelColor) -> HostResult<()>;

    /// Open a single undo step; every mutation until `end_history` reverts together.
    fn begin_history(&mut self, label: &str) -> HostResult<()>;
    fn end_history(&mut self) -> HostResult<()>;
}
