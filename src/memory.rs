//! In-memory document host backed by a JSON layer snapshot

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::host::{
    Bounds, DocumentHost, HostError, HostResult, LabelColor, LayerId, LayerKind, LayerRecord,
    Section,
};

const DEFAULT_ASSET_SIZE: (f64, f64) = (1000.0, 1000.0);

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read document snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid document snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized form of a document: its name and top-level layers, top first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LayerKind>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<PathBuf>,
    /// Present, even empty, only on groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<LayerSpec>>,
}

fn default_true() -> bool {
    true
}

impl LayerSpec {
    fn inferred_kind(&self) -> LayerKind {
        match self.kind {
            Some(kind) => kind,
            None if self.layers.is_some() => LayerKind::Group,
            None if self.text.is_some() => LayerKind::Text,
            None => LayerKind::Pixel,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    kind: LayerKind,
    visible: bool,
    text: Option<String>,
    bounds: Bounds,
    label: Option<LabelColor>,
    asset: Option<PathBuf>,
    parent: Option<LayerId>,
    children: Vec<LayerId>,
}

/// Arena-backed layer tree implementing [`DocumentHost`].
#[derive(Debug, Clone)]
pub struct MemoryHost {
    name: String,
    nodes: HashMap<LayerId, Node>,
    roots: Vec<LayerId>,
    next_id: u64,
    asset_sizes: HashMap<String, (f64, f64)>,
    history: Vec<String>,
    open_step: Option<String>,
    duplications: usize,
}

impl MemoryHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            roots: vec![],
            next_id: 1,
            asset_sizes: HashMap::new(),
            history: vec![],
            open_step: None,
            duplications: 0,
        }
    }

    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Self {
        let mut host = Self::new(snapshot.name);
        for spec in snapshot.layers {
            let id = host.insert_spec(spec, None);
            host.roots.push(id);
        }
        host
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, SnapshotError> {
        let snapshot: DocumentSnapshot = serde_json::from_value(value)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: DocumentSnapshot = serde_json::from_str(&content)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        let io_err = |source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, content).map_err(io_err)
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            name: self.name.clone(),
            layers: self.roots.iter().map(|id| self.spec_of(*id)).collect(),
        }
    }

    /// Register the natural pixel size of an asset, keyed by file name.
    pub fn with_asset_size(mut self, file_name: &str, width: f64, height: f64) -> Self {
        self.asset_sizes
            .insert(file_name.to_lowercase(), (width, height));
        self
    }

    /// First layer with this exact name, in top-down order.
    pub fn find(&self, name: &str) -> Option<LayerId> {
        self.find_all(name).into_iter().next()
    }

    pub fn find_all(&self, name: &str) -> Vec<LayerId> {
        let mut out = vec![];
        let mut stack: Vec<LayerId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                if node.name == name {
                    out.push(id);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn parent(&self, id: LayerId) -> Option<LayerId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn label(&self, id: LayerId) -> Option<LabelColor> {
        self.nodes.get(&id).and_then(|n| n.label)
    }

    pub fn asset(&self, id: LayerId) -> Option<&Path> {
        self.nodes.get(&id).and_then(|n| n.asset.as_deref())
    }

    /// Completed undo steps, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn duplication_count(&self) -> usize {
        self.duplications
    }

    pub fn layer_count(&self) -> usize {
        self.nodes.len()
    }

    fn allocate(&mut self) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert_spec(&mut self, spec: LayerSpec, parent: Option<LayerId>) -> LayerId {
        let id = self.allocate();
        let kind = spec.inferred_kind();
        let node = Node {
            name: spec.name,
            kind,
            visible: spec.visible,
            text: spec.text,
            bounds: spec.bounds.unwrap_or_default(),
            label: spec.label,
            asset: spec.asset,
            parent,
            children: vec![],
        };
        self.nodes.insert(id, node);
        let children: Vec<LayerId> = spec
            .layers
            .into_iter()
            .flatten()
            .map(|child| self.insert_spec(child, Some(id)))
            .collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children = children;
        }
        id
    }

    fn spec_of(&self, id: LayerId) -> LayerSpec {
        let node = &self.nodes[&id];
        LayerSpec {
            name: node.name.clone(),
            kind: Some(node.kind),
            visible: node.visible,
            text: node.text.clone(),
            bounds: if node.kind == LayerKind::Group {
                None
            } else {
                Some(node.bounds)
            },
            label: node.label,
            asset: node.asset.clone(),
            layers: (node.kind == LayerKind::Group)
                .then(|| node.children.iter().map(|c| self.spec_of(*c)).collect()),
        }
    }

    fn node(&self, id: LayerId) -> HostResult<&Node> {
        self.nodes.get(&id).ok_or(HostError::UnknownLayer(id))
    }

    fn node_mut(&mut self, id: LayerId) -> HostResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(HostError::UnknownLayer(id))
    }

    /// Ids of every non-group layer in the subtree rooted at `id`.
    fn leaves(&self, id: LayerId) -> Vec<LayerId> {
        let mut out = vec![];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                if node.kind == LayerKind::Group {
                    stack.extend(node.children.iter().copied());
                } else {
                    out.push(current);
                }
            }
        }
        out
    }

    fn siblings_mut(&mut self, parent: Option<LayerId>) -> HostResult<&mut Vec<LayerId>> {
        match parent {
            Some(p) => Ok(&mut self.node_mut(p)?.children),
            None => Ok(&mut self.roots),
        }
    }

    fn insert_above(&mut self, new_id: LayerId, above: LayerId) -> HostResult<()> {
        let parent = self.node(above)?.parent;
        if let Some(node) = self.nodes.get_mut(&new_id) {
            node.parent = parent;
        }
        let siblings = self.siblings_mut(parent)?;
        let position = siblings.iter().position(|s| *s == above).unwrap_or(0);
        siblings.insert(position, new_id);
        Ok(())
    }

    fn clone_subtree(&mut self, id: LayerId, parent: Option<LayerId>) -> HostResult<LayerId> {
        let source = self.node(id)?.clone();
        let new_id = self.allocate();
        let mut copy = source.clone();
        copy.name = format!("{} copy", source.name);
        copy.parent = parent;
        copy.children = vec![];
        self.nodes.insert(new_id, copy);
        let mut children = Vec::with_capacity(source.children.len());
        for child in &source.children {
            children.push(self.clone_subtree(*child, Some(new_id))?);
        }
        self.node_mut(new_id)?.children = children;
        Ok(new_id)
    }

    fn push_records(&self, id: LayerId, out: &mut Vec<LayerRecord>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.kind == LayerKind::Group {
            out.push(LayerRecord {
                id,
                name: node.name.clone(),
                section: Section::GroupStart,
            });
            for child in &node.children {
                self.push_records(*child, out);
            }
            out.push(LayerRecord {
                id,
                name: node.name.clone(),
                section: Section::GroupEnd,
            });
        } else {
            out.push(LayerRecord {
                id,
                name: node.name.clone(),
                section: Section::Content,
            });
        }
    }
}

impl DocumentHost for MemoryHost {
    fn document_name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self) -> HostResult<Vec<LayerRecord>> {
        let mut out = Vec::with_capacity(self.nodes.len() * 2);
        for id in &self.roots {
            self.push_records(*id, &mut out);
        }
        Ok(out)
    }

    fn layer_name(&self, id: LayerId) -> HostResult<String> {
        Ok(self.node(id)?.name.clone())
    }

    fn layer_kind(&self, id: LayerId) -> HostResult<LayerKind> {
        Ok(self.node(id)?.kind)
    }

    fn children(&self, id: LayerId) -> HostResult<Vec<LayerId>> {
        Ok(self.node(id)?.children.clone())
    }

    fn text(&self, id: LayerId) -> HostResult<String> {
        let node = self.node(id)?;
        if node.kind != LayerKind::Text {
            return Err(HostError::WrongKind {
                id,
                kind: node.kind,
                expected: LayerKind::Text,
            });
        }
        Ok(node.text.clone().unwrap_or_default())
    }

    fn set_text(&mut self, id: LayerId, text: &str) -> HostResult<()> {
        let node = self.node_mut(id)?;
        if node.kind != LayerKind::Text {
            return Err(HostError::WrongKind {
                id,
                kind: node.kind,
                expected: LayerKind::Text,
            });
        }
        node.text = Some(text.to_string());
        Ok(())
    }

    fn is_visible(&self, id: LayerId) -> HostResult<bool> {
        Ok(self.node(id)?.visible)
    }

    fn set_visible(&mut self, id: LayerId, visible: bool) -> HostResult<()> {
        self.node_mut(id)?.visible = visible;
        Ok(())
    }

    fn bounds(&self, id: LayerId) -> HostResult<Bounds> {
        let node = self.node(id)?;
        if node.kind != LayerKind::Group {
            return Ok(node.bounds);
        }
        let union = self
            .leaves(id)
            .into_iter()
            .filter_map(|leaf| self.nodes.get(&leaf))
            .map(|n| n.bounds)
            .filter(|b| !b.is_empty())
            .reduce(|acc, b| acc.union(&b));
        Ok(union.unwrap_or(node.bounds))
    }

    fn translate(&mut self, id: LayerId, dx: f64, dy: f64) -> HostResult<()> {
        self.node(id)?;
        for leaf in self.leaves(id) {
            let node = self.node_mut(leaf)?;
            node.bounds = node.bounds.translated(dx, dy);
        }
        let node = self.node_mut(id)?;
        if node.kind == LayerKind::Group {
            node.bounds = node.bounds.translated(dx, dy);
        }
        Ok(())
    }

    fn resize(&mut self, id: LayerId, percent: f64) -> HostResult<()> {
        if !(percent.is_finite() && percent > 0.0) {
            return Err(HostError::Unsupported(format!("resize by {percent}%")));
        }
        let (cx, cy) = self.bounds(id)?.center();
        let factor = percent / 100.0;
        for leaf in self.leaves(id) {
            let node = self.node_mut(leaf)?;
            node.bounds = node.bounds.scaled_about(factor, cx, cy);
        }
        Ok(())
    }

    fn duplicate(&mut self, id: LayerId) -> HostResult<LayerId> {
        let parent = self.node(id)?.parent;
        let new_id = self.clone_subtree(id, parent)?;
        self.insert_above(new_id, id)?;
        self.duplications += 1;
        Ok(new_id)
    }

    fn rename(&mut self, id: LayerId, name: &str) -> HostResult<()> {
        self.node_mut(id)?.name = name.to_string();
        Ok(())
    }

    fn place_asset(&mut self, asset: &Path, above: LayerId) -> HostResult<LayerId> {
        self.node(above)?;
        let file_name = asset
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .ok_or_else(|| HostError::Placement(asset.display().to_string()))?;
        let stem = asset
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let (w, h) = self
            .asset_sizes
            .get(&file_name)
            .copied()
            .unwrap_or(DEFAULT_ASSET_SIZE);

        let id = self.allocate();
        self.nodes.insert(
            id,
            Node {
                name: stem,
                kind: LayerKind::SmartObject,
                visible: true,
                text: None,
                bounds: Bounds::new(0.0, 0.0, w, h),
                label: None,
                asset: Some(asset.to_path_buf()),
                parent: None,
                children: vec![],
            },
        );
        self.insert_above(id, above)?;
        Ok(id)
    }

    fn set_label(&mut self, id: LayerId, color: LabelColor) -> HostResult<()> {
        self.node_mut(id)?.label = Some(color);
        Ok(())
    }

    fn begin_history(&mut self, label: &str) -> HostResult<()> {
        if let Some(open) = &self.open_step {
            return Err(HostError::Unsupported(format!(
                "history step '{open}' is still open"
            )));
        }
        self.open_step = Some(label.to_string());
        Ok(())
    }

    fn end_history(&mut self) -> HostResult<()> {
        match self.open_step.take() {
            Some(label) => {
                self.history.push(label);
                Ok(())
            }
            None => Err(HostError::Unsupported("no open history step".into())),
        }
    }
}
