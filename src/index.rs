//! Layer-Tree Index - one top-down scan, one flat map per slot
//!
//! Rebuilt per build and after every structural mutation; never cached.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::host::{DocumentHost, LayerId, LayerRecord, Section};

/// Reserved key holding a slot group's own identifier.
pub const SELF_KEY: &str = "_self";

pub const PRODUCT_PREFIX: &str = "Product_";
pub const DYNAMIC_PREFIX: &str = "A4_";

/// Slot identity of a group name: its first word. A slot renamed after
/// its title (`Product_03 Acme Widget`) stays `Product_03`.
pub fn slot_identity(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

/// Names the first free-form section goes by, in fallback order.
pub const FIRST_SECTION_ALIASES: [&str; 3] = ["A4_Grp_01", "A4_01", "A4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Fixed grid tile (`Product_NN`, `Product_NN_K`, `Product_NN_EX`).
    Product,
    /// Free-form section (`A4_01`, `A4`, `A4_Grp_NN`).
    Dynamic,
}

impl SlotKind {
    pub fn classify(name: &str) -> Option<Self> {
        if name.starts_with(PRODUCT_PREFIX) {
            Some(SlotKind::Product)
        } else if name.starts_with(DYNAMIC_PREFIX) || name == "A4" {
            Some(SlotKind::Dynamic)
        } else {
            None
        }
    }
}

/// Flat lowercase-name map of every layer under one slot group.
///
/// Insertion order is the document's top-down order and is what the
/// fuzzy and placeholder searches iterate in.
#[derive(Debug, Clone, Serialize)]
pub struct SlotIndex {
    name: String,
    kind: SlotKind,
    #[serde(rename = "_self")]
    self_id: LayerId,
    entries: Vec<(String, LayerId)>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl SlotIndex {
    pub fn new(name: impl Into<String>, kind: SlotKind, self_id: LayerId) -> Self {
        Self {
            name: name.into(),
            kind,
            self_id,
            entries: vec![],
            lookup: HashMap::new(),
        }
    }

    /// Slot name as authored in the document.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn self_id(&self) -> LayerId {
        self.self_id
    }

    /// Register a layer. The first layer with a given name wins; later
    /// same-named layers are ignored. Returns whether it was inserted.
    pub fn register(&mut self, name: &str, id: LayerId) -> bool {
        let key = name.to_lowercase();
        if key == SELF_KEY || self.lookup.contains_key(&key) {
            return false;
        }
        self.lookup.insert(key.clone(), self.entries.len());
        self.entries.push((key, id));
        true
    }

    /// Case-insensitive lookup. `_self` yields the slot group itself.
    pub fn get(&self, name: &str) -> Option<LayerId> {
        let key = name.to_lowercase();
        if key == SELF_KEY {
            return Some(self.self_id);
        }
        self.lookup.get(&key).map(|i| self.entries[*i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered layers in document order, `_self` excluded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, LayerId)> {
        self.entries.iter().map(|(k, id)| (k.as_str(), *id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every slot in the document, keyed by lowercased slot name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerTreeIndex {
    slots: Vec<SlotIndex>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl LayerTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive slot lookup.
    pub fn slot(&self, name: &str) -> Option<&SlotIndex> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|i| &self.slots[*i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    /// Slot an action's group lands on. A page authored with a single
    /// free-form section calls it `A4_01` or `A4`, while plans always
    /// say `A4_Grp_01`.
    pub fn target(&self, group: &str) -> Option<&SlotIndex> {
        if let Some(slot) = self.slot(group) {
            return Some(slot);
        }
        if group.eq_ignore_ascii_case(FIRST_SECTION_ALIASES[0]) {
            return FIRST_SECTION_ALIASES[1..]
                .iter()
                .find_map(|name| self.slot(name));
        }
        None
    }

    pub fn slots(&self) -> impl Iterator<Item = &SlotIndex> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn open_slot(&mut self, slot: SlotIndex) -> Option<usize> {
        let key = slot.name.to_lowercase();
        if self.by_name.contains_key(&key) {
            debug!(slot = %slot.name, "duplicate slot name, keeping the first");
            return None;
        }
        let position = self.slots.len();
        self.by_name.insert(key, position);
        self.slots.push(slot);
        Some(position)
    }

    /// Build the index from an enumeration, top to bottom.
    pub fn from_records(records: &[LayerRecord]) -> Self {
        struct Frame {
            is_slot: bool,
            // None when the slot name was shadowed by an earlier slot.
            slot: Option<usize>,
        }

        fn nearest_slot(stack: &[Frame]) -> Option<usize> {
            stack.iter().rev().find(|f| f.is_slot).and_then(|f| f.slot)
        }

        let mut index = Self::new();
        let mut stack: Vec<Frame> = vec![];

        for record in records {
            match record.section {
                Section::GroupStart => match SlotKind::classify(slot_identity(&record.name)) {
                    Some(kind) => {
                        let identity = slot_identity(&record.name);
                        let slot = index.open_slot(SlotIndex::new(identity, kind, record.id));
                        stack.push(Frame { is_slot: true, slot });
                    }
                    None => {
                        if let Some(position) = nearest_slot(&stack) {
                            index.slots[position].register(&record.name, record.id);
                        }
                        stack.push(Frame { is_slot: false, slot: None });
                    }
                },
                Section::GroupEnd => {
                    stack.pop();
                }
                Section::Content => {
                    if let Some(position) = nearest_slot(&stack) {
                        index.slots[position].register(&record.name, record.id);
                    }
                }
            }
        }

        index
    }
}

/// Scan the host's layer tree. A failing host yields an empty index.
pub fn scan<H: DocumentHost + ?Sized>(host: &H) -> LayerTreeIndex {
    info!(document = host.document_name(), "layer scan started");
    match host.enumerate() {
        Ok(records) => {
            let index = LayerTreeIndex::from_records(&records);
            info!(
                layers = records.len(),
                slots = index.len(),
                "layer scan complete"
            );
            index
        }
        Err(e) => {
            error!(error = %e, "layer scan failed, continuing with an empty index");
            LayerTreeIndex::new()
        }
    }
}
