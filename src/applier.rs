//! Field Applier - executes one build action against its slot
//!
//! Per-field failures become manifest entries; nothing here aborts the build.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::host::{DocumentHost, HostResult, LabelColor, LayerId};
use crate::image::{place_images, AssetDir};
use crate::index::{LayerTreeIndex, SlotIndex, SlotKind, SELF_KEY};
use crate::manifest::{EntryStatus, FieldAction, ManifestEntry, Method};
use crate::overlap::{apply_overlap, OverlapReport};
use crate::plan::{is_image_key, Action};
use crate::resolver::Resolver;

/// Key fragment marking a title field.
pub const TITLE_KEY: &str = "nazev";

/// Characters that may not appear in a slot name.
pub const ILLEGAL_NAME_CHARS: [char; 9] = [':', '/', '\\', '*', '?', '"', '<', '>', '|'];

/// Lowercase everything, then capitalise the first letter of each
/// space-separated word.
pub fn title_case(text: &str) -> String {
    text.to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// All-caps text longer than two characters reads as shouting in a title.
pub fn is_shouting(text: &str) -> bool {
    text.chars().count() > 2 && text == text.to_uppercase()
}

/// The host's paragraph separator is `\r`. Escaped `\n` sequences from
/// spreadsheet exports count as breaks too.
pub fn sanitize_line_breaks(text: &str) -> String {
    text.replace("\\n", "\r")
        .replace("\r\n", "\r")
        .replace('\n', "\r")
}

/// Title part of a slot name: truncated, then stripped of characters
/// the host refuses in names. `None` when nothing usable is left.
pub fn safe_slot_title(title: &str, max_len: usize) -> Option<String> {
    let flat = title.replace('\r', " ");
    let name: String = flat
        .chars()
        .take(max_len)
        .filter(|c| !ILLEGAL_NAME_CHARS.contains(c))
        .collect();
    let name = name.trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// Text fields are written as-is except titles, which are de-shouted first.
pub fn prepare_text(key: &str, raw: &str) -> String {
    let text = if key.to_lowercase().contains(TITLE_KEY) && is_shouting(raw) {
        title_case(raw)
    } else {
        raw.to_string()
    };
    sanitize_line_breaks(&text)
}

/// Role of a title key such as `nazev_03A`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TitleKey {
    /// Id part without its last character (`03` for `nazev_03A`).
    pair: String,
    discriminator: char,
    /// The key is a bare `nazev_<digits>` with no discriminator.
    plain: bool,
}

impl TitleKey {
    fn parse(key: &str) -> Option<Self> {
        let lower = key.to_lowercase();
        if !lower.contains("nazev_") {
            return None;
        }
        let parts: Vec<&str> = lower.split('_').collect();
        let id_part = *parts.get(1)?;
        let discriminator = id_part.chars().last()?;
        let pair = id_part[..id_part.len() - discriminator.len_utf8()].to_string();
        Some(Self {
            pair,
            discriminator,
            plain: parts.len() == 2 && discriminator.is_ascii_digit(),
        })
    }

    /// The title the slot is named after.
    fn is_primary(&self) -> bool {
        self.discriminator == 'a' || self.plain
    }
}

#[derive(Debug, Default)]
struct TitlePair {
    primary: Option<(LayerId, String)>,
    secondary: Option<(LayerId, String)>,
}

/// Everything one action did.
#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub entries: Vec<ManifestEntry>,
    pub overlap: OverlapReport,
    /// Title pairs moved down, by pair id.
    pub shifted: Vec<String>,
    pub renamed_to: Option<String>,
}

pub struct FieldApplier<'a> {
    resolver: &'a Resolver,
    config: &'a EngineConfig,
    assets: Option<&'a AssetDir>,
}

impl<'a> FieldApplier<'a> {
    pub fn new(resolver: &'a Resolver, config: &'a EngineConfig, assets: Option<&'a AssetDir>) -> Self {
        Self { resolver, config, assets }
    }

    /// Apply `action` to `slot`. `position` is the action's index in the
    /// plan and picks the label colour.
    pub fn apply<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        action: &Action,
        slot: &SlotIndex,
        index: &LayerTreeIndex,
        position: usize,
    ) -> ActionOutcome {
        let mut outcome = ActionOutcome::default();
        let label = LabelColor::for_position(position);

        if let Err(e) = show_and_label(host, slot.self_id(), label) {
            warn!(slot = slot.name(), error = %e, "failed to show slot");
            outcome.entries.push(ManifestEntry::new(
                slot.name(),
                SELF_KEY,
                FieldAction::Visibility,
                "true",
                EntryStatus::Error,
                Method::Direct,
            ));
        }

        if slot.kind() == SlotKind::Product {
            outcome.overlap = apply_overlap(host, slot.name(), action.hero, index);
        }

        let mut pairs: BTreeMap<String, TitlePair> = BTreeMap::new();
        let mut main_title: Option<String> = None;

        for (key, value) in &action.data {
            if is_image_key(key) {
                outcome.entries.extend(place_images(
                    host,
                    slot,
                    key,
                    value,
                    self.assets,
                    label,
                    &self.config.freestanding,
                ));
                continue;
            }

            let Some(written) = self.write_text(host, slot, key, &value.as_text(), &mut outcome.entries)
            else {
                continue;
            };
            if let Some(title) = TitleKey::parse(key) {
                if title.is_primary() {
                    main_title = Some(written.1.clone());
                }
                let pair = pairs.entry(title.pair).or_default();
                match title.discriminator {
                    'a' => pair.primary = Some(written),
                    'b' => pair.secondary = Some(written),
                    _ => {}
                }
            }
        }

        for (pair_id, pair) in &pairs {
            if let (Some((a, a_text)), Some((b, b_text))) = (&pair.primary, &pair.secondary) {
                if !self.config.title_shift.applies(a_text, b_text) {
                    continue;
                }
                let offset = self.config.title_shift.offset;
                match host.translate(*a, 0.0, offset).and_then(|_| host.translate(*b, 0.0, offset)) {
                    Ok(()) => outcome.shifted.push(pair_id.clone()),
                    Err(e) => warn!(slot = slot.name(), pair = %pair_id, error = %e, "title shift failed"),
                }
            }
        }

        for (key, visible) in &action.visibility {
            outcome.entries.push(self.set_visibility(host, slot, key, *visible));
        }

        // The slot name stays first so a rebuild still finds the slot.
        if self.config.rename_slots {
            if let Some(name) = main_title
                .as_deref()
                .and_then(|t| safe_slot_title(t, self.config.slot_title_max_len))
                .map(|title| format!("{} {title}", slot.name()))
            {
                match host.rename(slot.self_id(), &name) {
                    Ok(()) => {
                        info!(slot = slot.name(), renamed = %name, "slot renamed after title");
                        outcome.renamed_to = Some(name);
                    }
                    Err(e) => warn!(slot = slot.name(), error = %e, "slot rename failed"),
                }
            }
        }

        outcome
    }

    /// Resolve and write one text field. Returns the layer and final text
    /// when the write succeeded.
    fn write_text<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        slot: &SlotIndex,
        key: &str,
        raw: &str,
        entries: &mut Vec<ManifestEntry>,
    ) -> Option<(LayerId, String)> {
        let Some(resolution) = self.resolver.resolve(slot, key) else {
            warn!(slot = slot.name(), key, "text field unresolved");
            entries.push(ManifestEntry::new(
                slot.name(),
                key,
                FieldAction::Text,
                raw,
                EntryStatus::Missing,
                Method::Unresolved,
            ));
            return None;
        };

        let text = prepare_text(key, raw);
        let result = host.set_text(resolution.id, &text);
        let status = match &result {
            Ok(()) => EntryStatus::Updated,
            Err(e) => {
                warn!(slot = slot.name(), key, error = %e, "text write failed");
                EntryStatus::Error
            }
        };
        entries.push(
            ManifestEntry::new(slot.name(), key, FieldAction::Text, &text, status, resolution.method)
                .matched(&resolution.matched),
        );
        debug!(slot = slot.name(), key, method = resolution.method.as_str(), "text field applied");
        result.ok().map(|_| (resolution.id, text))
    }

    fn set_visibility<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        slot: &SlotIndex,
        key: &str,
        visible: bool,
    ) -> ManifestEntry {
        let value = visible.to_string();
        let Some(resolution) = self.resolver.resolve(slot, key) else {
            warn!(slot = slot.name(), key, "visibility target unresolved");
            return ManifestEntry::new(
                slot.name(),
                key,
                FieldAction::Visibility,
                value,
                EntryStatus::Missing,
                Method::Unresolved,
            );
        };

        let status = match host.set_visible(resolution.id, visible) {
            Ok(()) if visible => EntryStatus::Visible,
            Ok(()) => EntryStatus::Hidden,
            Err(e) => {
                warn!(slot = slot.name(), key, error = %e, "visibility change failed");
                EntryStatus::Error
            }
        };
        ManifestEntry::new(slot.name(), key, FieldAction::Visibility, value, status, resolution.method)
            .matched(resolution.matched)
    }
}

fn show_and_label<H: DocumentHost + ?Sized>(host: &mut H, id: LayerId, label: LabelColor) -> HostResult<()> {
    host.set_visible(id, true)?;
    host.set_label(id, label)
}

/// Manifest entries for an action whose slot does not exist.
pub fn skipped_entries(action: &Action) -> Vec<ManifestEntry> {
    let data = action.data.iter().map(|(key, value)| {
        let kind = if is_image_key(key) { FieldAction::Image } else { FieldAction::Text };
        ManifestEntry::new(&action.group, key, kind, value.as_text(), EntryStatus::Skipped, Method::Unresolved)
    });
    let visibility = action.visibility.iter().map(|(key, visible)| {
        ManifestEntry::new(
            &action.group,
            key,
            FieldAction::Visibility,
            visible.to_string(),
            EntryStatus::Skipped,
            Method::Unresolved,
        )
    });
    data.chain(visibility).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::scan;
    use crate::memory::MemoryHost;
    use crate::plan::Hero;
    use serde_json::json;

    fn product_03() -> MemoryHost {
        MemoryHost::from_json(json!({
            "name": "Page 1",
            "layers": [
                {"name": "Product_03", "visible": false, "layers": [
                    {"name": "nazev_03A", "text": "", "bounds": [0, 100, 300, 140]},
                    {"name": "nazev_03B", "text": "", "bounds": [0, 150, 300, 190]},
                    {"name": "ean_03", "text": "", "bounds": [0, 300, 300, 320]},
                    {"name": "cena_03", "text": "", "bounds": [0, 350, 300, 400]}
                ]},
                {"name": "Product_07", "layers": [{"name": "x"}]}
            ]
        }))
        .unwrap()
    }

    fn apply(host: &mut MemoryHost, action: &Action, config: &EngineConfig) -> ActionOutcome {
        let index = scan(host);
        let slot = index.slot(&action.group).unwrap();
        let resolver = Resolver::new();
        FieldApplier::new(&resolver, config, None).apply(host, action, slot, &index, 0)
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("FRESH STRAWBERRIES"), "Fresh Strawberries");
        assert_eq!(title_case("JAHODY  ČERSTVÉ"), "Jahody  Čerstvé");
        assert!(is_shouting("ACME"));
        assert!(!is_shouting("KG"));
        assert!(!is_shouting("Acme"));
    }

    #[test]
    fn test_line_breaks_become_carriage_returns() {
        assert_eq!(sanitize_line_breaks("a\\nb\r\nc\nd"), "a\rb\rc\rd");
    }

    #[test]
    fn test_only_titles_are_recased() {
        assert_eq!(prepare_text("nazev_01A", "ACME WIDGET"), "Acme Widget");
        assert_eq!(prepare_text("dostupnost_01", "SKLADEM"), "SKLADEM");
    }

    #[test]
    fn test_safe_slot_title() {
        assert_eq!(safe_slot_title("Jam: 50% <new>", 30).as_deref(), Some("Jam 50% new"));
        assert_eq!(
            safe_slot_title("A very long product title that keeps going", 30).as_deref(),
            Some("A very long product title that")
        );
        assert_eq!(safe_slot_title("???", 30), None);
    }

    #[test]
    fn test_title_key_roles() {
        let a = TitleKey::parse("nazev_03A").unwrap();
        assert_eq!((a.pair.as_str(), a.discriminator), ("03", 'a'));
        assert!(a.is_primary());
        assert!(TitleKey::parse("nazev_03").unwrap().is_primary());
        assert!(!TitleKey::parse("nazev_03B").unwrap().is_primary());
        assert!(TitleKey::parse("cena_03").is_none());
    }

    #[test]
    fn test_action_writes_text_and_visibility() {
        let mut host = product_03();
        let action = Action::new("Product_03", Hero::Single)
            .with_data("nazev_03A", "ACME WIDGET")
            .with_visibility("ean_03", false);
        let outcome = apply(&mut host, &action, &EngineConfig::default());

        let statuses: Vec<_> = outcome.entries.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![EntryStatus::Updated, EntryStatus::Hidden]);
        let title = host.find("nazev_03A").unwrap();
        assert_eq!(host.text(title).unwrap(), "Acme Widget");
        let ean = host.find("ean_03").unwrap();
        assert!(!host.is_visible(ean).unwrap());

        // The slot is shown, labelled and titled after its product.
        let slot = host.find("Product_03 Acme Widget").unwrap();
        assert!(host.is_visible(slot).unwrap());
        assert_eq!(host.label(slot), Some(LabelColor::Red));
        assert_eq!(outcome.renamed_to.as_deref(), Some("Product_03 Acme Widget"));
        assert!(scan(&host).slot("Product_03").is_some());
    }

    #[test]
    fn test_unresolved_fields_are_recorded_not_raised() {
        let mut host = product_03();
        let action = Action::new("Product_03", Hero::Single)
            .with_data("vaha_99", "500 g")
            .with_visibility("badge_99", true);
        let outcome = apply(&mut host, &action, &EngineConfig::default());
        assert_eq!(outcome.entries.len(), 2);
        assert!(outcome
            .entries
            .iter()
            .all(|e| e.status == EntryStatus::Missing && e.method == Method::Unresolved));
        assert!(outcome.renamed_to.is_none());
    }

    #[test]
    fn test_short_title_pair_shifts_down() {
        let mut host = product_03();
        let action = Action::new("Product_03", Hero::Single)
            .with_data("nazev_03A", "Acme")
            .with_data("nazev_03B", "Jam\n250 g");
        let outcome = apply(&mut host, &action, &EngineConfig::default());
        assert_eq!(outcome.shifted, vec!["03"]);
        let a = host.find("nazev_03A").unwrap();
        let b = host.find("nazev_03B").unwrap();
        assert_eq!(host.bounds(a).unwrap().top, 130.0);
        assert_eq!(host.bounds(b).unwrap().top, 180.0);
        assert_eq!(host.text(b).unwrap(), "Jam\r250 g");
    }

    #[test]
    fn test_long_title_pair_stays() {
        let mut host = product_03();
        let config = EngineConfig { rename_slots: false, ..EngineConfig::default() };
        let action = Action::new("Product_03", Hero::Single)
            .with_data("nazev_03A", "Acme Widget Deluxe")
            .with_data("nazev_03B", "Jam");
        let outcome = apply(&mut host, &action, &config);
        assert!(outcome.shifted.is_empty());
        assert!(outcome.renamed_to.is_none());
        assert!(host.find("Product_03").is_some());
    }

    #[test]
    fn test_text_into_non_text_layer_is_an_error_entry() {
        let mut host = MemoryHost::from_json(json!({
            "name": "Page 1",
            "layers": [{"name": "Product_01", "layers": [{"name": "cena_01", "kind": "pixel"}]}]
        }))
        .unwrap();
        let action = Action::new("Product_01", Hero::Single).with_data("cena_01", "9,90");
        let outcome = apply(&mut host, &action, &EngineConfig::default());
        assert_eq!(outcome.entries[0].status, EntryStatus::Error);
        assert_eq!(outcome.entries[0].method, Method::Direct);
    }

    #[test]
    fn test_skipped_entries_cover_every_field() {
        let action = Action::new("Product_42", Hero::Single)
            .with_data("nazev_42A", "x")
            .with_data("image_42", "a.jpg")
            .with_visibility("ean_42", true);
        let entries = skipped_entries(&action);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.status == EntryStatus::Skipped));
        assert_eq!(entries[0].action, FieldAction::Image);
    }
}
