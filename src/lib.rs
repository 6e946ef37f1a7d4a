//! LetakMaster Core - Layout Build Engine
//!
//! Assembles promotional flyer pages by mutating a template document
//! according to a per-page build plan.
//!
//! # Build Guarantees
//! 1. Lookups Are Case-Insensitive, Names Are Not Rewritten
//! 2. First Same-Named Layer Wins
//! 3. One Visible Variant Per Grid Cell
//! 4. Expansion Is Idempotent
//! 5. Every Planned Field Lands In The Manifest
//! 6. One Build, One Undo Step

pub mod applier;
pub mod config;
pub mod discovery;
pub mod expansion;
pub mod hashing;
pub mod host;
pub mod image;
pub mod index;
pub mod manifest;
pub mod memory;
pub mod overlap;
pub mod pipeline;
pub mod plan;
pub mod resolver;
pub mod validation;

pub use applier::{ActionOutcome, FieldApplier};
pub use config::{ConfigError, EngineConfig};
pub use discovery::PlanLocator;
pub use expansion::{expand, ExpansionReport};
pub use hashing::{canonical_json, manifest_fingerprint, plan_fingerprint};
pub use host::{Bounds, DocumentHost, HostError, LabelColor, LayerId, LayerKind};
pub use index::{scan, LayerTreeIndex, SlotIndex, SlotKind};
pub use manifest::{EntryStatus, FieldAction, Manifest, ManifestEntry, Method};
pub use memory::{MemoryHost, SnapshotError};
pub use overlap::apply_overlap;
pub use pipeline::{BuildError, BuildPipeline, BuildReport, LayoutMode, Progress};
pub use plan::{Action, BuildPlan, FieldValue, Hero, PlanError};
pub use resolver::{Resolution, Resolver};
pub use validation::{Finding, PlanRule, Severity, VerificationReport, Verifier};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
