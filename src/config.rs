//! Engine Configuration
//!
//! Read from `config.json` next to the project. Every field has a default,
//! so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Asset directory for `image_` fields.
    #[serde(default)]
    pub images_dir: Option<PathBuf>,
    /// Directory holding `build_page_N.json` plans.
    #[serde(default)]
    pub json_dir: Option<PathBuf>,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Vertical gap between generated sections.
    #[serde(default = "default_expansion_padding")]
    pub expansion_padding: f64,
    #[serde(default)]
    pub title_shift: TitleShift,
    #[serde(default)]
    pub freestanding: Freestanding,
    #[serde(default = "default_slot_title_max_len")]
    pub slot_title_max_len: usize,
    #[serde(default = "default_true")]
    pub rename_slots: bool,
    /// Report progress every N actions (and always on the last).
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

fn default_true() -> bool { true }
fn default_manifest_path() -> PathBuf { PathBuf::from("debug_manifest.json") }
fn default_log_path() -> PathBuf { PathBuf::from("debug_manifest.txt") }
fn default_expansion_padding() -> f64 { 100.0 }
fn default_slot_title_max_len() -> usize { 30 }
fn default_progress_interval() -> usize { 3 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            images_dir: None,
            json_dir: None,
            manifest_path: default_manifest_path(),
            log_path: default_log_path(),
            expansion_padding: default_expansion_padding(),
            title_shift: TitleShift::default(),
            freestanding: Freestanding::default(),
            slot_title_max_len: default_slot_title_max_len(),
            rename_slots: true,
            progress_interval: default_progress_interval(),
        }
    }
}

/// Short two-line titles leave a gap above the price; both title layers
/// move down to close it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleShift {
    #[serde(default = "default_max_primary_len")]
    pub max_primary_len: usize,
    #[serde(default = "default_max_secondary_first_line")]
    pub max_secondary_first_line: usize,
    #[serde(default = "default_title_offset")]
    pub offset: f64,
}

fn default_max_primary_len() -> usize { 13 }
fn default_max_secondary_first_line() -> usize { 18 }
fn default_title_offset() -> f64 { 30.0 }

impl Default for TitleShift {
    fn default() -> Self {
        Self {
            max_primary_len: default_max_primary_len(),
            max_secondary_first_line: default_max_secondary_first_line(),
            offset: default_title_offset(),
        }
    }
}

impl TitleShift {
    /// Whether a primary/secondary title pair is short enough to shift.
    pub fn applies(&self, primary: &str, secondary: &str) -> bool {
        let first_line = secondary.split('\r').next().unwrap_or("");
        primary.chars().count() < self.max_primary_len
            && first_line.chars().count() < self.max_secondary_first_line
    }
}

/// Layout for images placed beside a slot that has no placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freestanding {
    /// Longest side after scaling.
    #[serde(default = "default_freestanding_size")]
    pub size: f64,
    #[serde(default = "default_freestanding_margin")]
    pub margin: f64,
    /// Horizontal step between consecutive assets.
    #[serde(default = "default_freestanding_stride")]
    pub stride: f64,
}

fn default_freestanding_size() -> f64 { 500.0 }
fn default_freestanding_margin() -> f64 { 50.0 }
fn default_freestanding_stride() -> f64 { 550.0 }

impl Default for Freestanding {
    fn default() -> Self {
        Self {
            size: default_freestanding_size(),
            margin: default_freestanding_margin(),
            stride: default_freestanding_stride(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Defaults when `path` does not exist; a present but broken file is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Resolve relative paths against `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        fn join(root: &Path, p: PathBuf) -> PathBuf {
            if p.is_relative() { root.join(p) } else { p }
        }
        self.images_dir = self.images_dir.map(|p| join(root, p));
        self.json_dir = self.json_dir.map(|p| join(root, p));
        self.manifest_path = join(root, self.manifest_path);
        self.log_path = join(root, self.log_path);
        self
    }
}
