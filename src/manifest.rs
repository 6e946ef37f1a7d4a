//! Execution Manifest - append-only record of every field touched
//!
//! Reset when a document's build starts, flushed once when it ends.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::hashing::manifest_fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldAction {
    Text,
    Image,
    Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Text written.
    Updated,
    /// Visibility set to shown.
    Visible,
    /// Visibility set to hidden.
    Hidden,
    /// Image placed (aligned or freestanding).
    Placed,
    /// No layer matched the field key.
    Missing,
    /// Referenced asset file not found.
    AssetMissing,
    /// Not attempted (missing slot, no asset directory).
    Skipped,
    /// The host rejected the mutation.
    Error,
}

/// How a field was matched to a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Direct,
    Variant,
    Suffix,
    Domain,
    Fuzzy,
    Alphanumeric,
    Trimmed,
    /// Image aligned to an extended (`exsmartobject`) placeholder.
    ExtendedPlaceholder,
    /// Image aligned to a generic placeholder.
    Placeholder,
    /// Image placed beside the slot, no placeholder.
    Freestanding,
    Unresolved,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Direct => "direct",
            Method::Variant => "variant",
            Method::Suffix => "suffix",
            Method::Domain => "domain",
            Method::Fuzzy => "fuzzy",
            Method::Alphanumeric => "alphanumeric",
            Method::Trimmed => "trimmed",
            Method::ExtendedPlaceholder => "extended_placeholder",
            Method::Placeholder => "placeholder",
            Method::Freestanding => "freestanding",
            Method::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub group: String,
    /// Field key from the build plan.
    pub layer: String,
    pub action: FieldAction,
    pub value: String,
    pub status: EntryStatus,
    pub method: Method,
    /// Index key the field resolved to, when it resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
}

impl ManifestEntry {
    pub fn new(
        group: impl Into<String>,
        layer: impl Into<String>,
        action: FieldAction,
        value: impl Into<String>,
        status: EntryStatus,
        method: Method,
    ) -> Self {
        Self {
            group: group.into(),
            layer: layer.into(),
            action,
            value: value.into(),
            status,
            method,
            matched: None,
        }
    }

    pub fn matched(mut self, key: impl Into<String>) -> Self {
        self.matched = Some(key.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            EntryStatus::Updated | EntryStatus::Visible | EntryStatus::Hidden | EntryStatus::Placed
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl From<Vec<ManifestEntry>> for Manifest {
    fn from(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn record(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ManifestEntry>) {
        self.entries.extend(entries);
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        manifest_fingerprint(&self.entries)
    }

    /// Overwrite `path` with the entries as one JSON array.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path, json)?;
        info!(path = %path.display(), entries = self.entries.len(), "manifest written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&content)?;
        Ok(Self { entries })
    }
}
