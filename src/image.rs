//! Image placement for `image_` fields
//!
//! An asset is fitted into the slot's placeholder when there is one, or
//! laid out beside the slot otherwise.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::Freestanding;
use crate::host::{Bounds, DocumentHost, HostResult, LabelColor, LayerId};
use crate::index::SlotIndex;
use crate::manifest::{EntryStatus, FieldAction, ManifestEntry, Method};
use crate::plan::FieldValue;

pub const IMAGE_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".tif", ".tiff", ".psd", ".webp"];

/// Placeholder family that wins over the generic ones.
pub const EXTENDED_PLACEHOLDER: &str = "exsmartobject";
pub const PLACEHOLDER_BASES: [&str; 4] = ["image", "obraz", "photo", "packshot"];

/// Directory assets are looked up in by bare name.
#[derive(Debug, Clone)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exact name first, then each known extension in lower and upper case,
    /// then a case-insensitive directory scan for any of those names.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        if name.contains(['/', '\\']) || name == ".." {
            warn!(asset = name, "asset names must be bare file names");
            return None;
        }

        let mut candidates = vec![name.to_string()];
        for ext in IMAGE_EXTENSIONS {
            candidates.push(format!("{name}{ext}"));
            candidates.push(format!("{name}{}", ext.to_uppercase()));
        }
        if let Some(path) = candidates
            .iter()
            .map(|c| self.root.join(c))
            .find(|p| p.is_file())
        {
            return Some(path);
        }

        let wanted: Vec<String> = candidates.iter().map(|c| c.to_lowercase()).collect();
        let entries = fs::read_dir(&self.root).ok()?;
        entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .find(|p| {
                p.file_name()
                    .map(|n| wanted.contains(&n.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
            })
    }
}

/// Uniform percentage that fits `asset` inside `target` (contain).
/// `None` for a degenerate asset.
pub fn contain_scale(target: &Bounds, asset: &Bounds) -> Option<f64> {
    if asset.is_empty() {
        return None;
    }
    Some((target.width() / asset.width()).min(target.height() / asset.height()) * 100.0)
}

/// The slot's image placeholder: any `exsmartobject` layer, else the first
/// layer whose name contains a generic base.
pub fn find_placeholder(slot: &SlotIndex) -> Option<(LayerId, String, Method)> {
    if let Some((key, id)) = slot.iter().find(|(k, _)| k.contains(EXTENDED_PLACEHOLDER)) {
        return Some((id, key.to_string(), Method::ExtendedPlaceholder));
    }
    slot.iter()
        .find(|(k, _)| PLACEHOLDER_BASES.iter().any(|b| k.contains(b)))
        .map(|(key, id)| (id, key.to_string(), Method::Placeholder))
}

fn place_into<H: DocumentHost + ?Sized>(
    host: &mut H,
    asset: &Path,
    placeholder: LayerId,
) -> HostResult<LayerId> {
    let target = host.bounds(placeholder)?;
    let placed = host.place_asset(asset, placeholder)?;
    if let Some(scale) = contain_scale(&target, &host.bounds(placed)?) {
        host.resize(placed, scale)?;
    }
    let (tx, ty) = target.center();
    let (cx, cy) = host.bounds(placed)?.center();
    host.translate(placed, tx - cx, ty - cy)?;
    host.set_visible(placeholder, false)?;
    Ok(placed)
}

fn place_beside<H: DocumentHost + ?Sized>(
    host: &mut H,
    asset: &Path,
    name: &str,
    slot: LayerId,
    position: usize,
    layout: &Freestanding,
) -> HostResult<LayerId> {
    let anchor = host.bounds(slot)?;
    let placed = host.place_asset(asset, slot)?;
    host.rename(placed, name)?;
    let natural = host.bounds(placed)?;
    let longest = natural.width().max(natural.height());
    if longest > 0.0 {
        host.resize(placed, layout.size / longest * 100.0)?;
    }
    let current = host.bounds(placed)?;
    let x = anchor.right + layout.margin + position as f64 * layout.stride;
    let y = anchor.top + layout.margin;
    host.translate(placed, x - current.left, y - current.top)?;
    Ok(placed)
}

/// Place every asset named by an image field. One manifest entry per asset.
///
/// Only the first asset is fitted to the placeholder; any further assets,
/// or all of them when the slot has no placeholder, go beside the slot.
pub fn place_images<H: DocumentHost + ?Sized>(
    host: &mut H,
    slot: &SlotIndex,
    key: &str,
    value: &FieldValue,
    assets: Option<&AssetDir>,
    label: LabelColor,
    layout: &Freestanding,
) -> Vec<ManifestEntry> {
    let entry = |name: &str, status, method| {
        ManifestEntry::new(slot.name(), key, FieldAction::Image, name, status, method)
    };

    let names = value.lines();
    let Some(assets) = assets else {
        debug!(slot = slot.name(), key, "no asset directory, image field skipped");
        return names
            .iter()
            .map(|n| entry(n, EntryStatus::Skipped, Method::Unresolved))
            .collect();
    };

    let placeholder = find_placeholder(slot);
    let mut entries = Vec::with_capacity(names.len());
    for (position, name) in names.iter().enumerate() {
        let Some(path) = assets.find(name) else {
            warn!(slot = slot.name(), key, asset = %name, dir = %assets.root().display(), "asset not found");
            entries.push(entry(name, EntryStatus::AssetMissing, Method::Unresolved));
            continue;
        };

        let (result, method, matched) = match &placeholder {
            Some((id, matched, method)) if position == 0 => {
                (place_into(host, &path, *id), *method, Some(matched.clone()))
            }
            _ => (
                place_beside(host, &path, name, slot.self_id(), position, layout),
                Method::Freestanding,
                None,
            ),
        };

        let recorded = match result.and_then(|placed| host.set_label(placed, label)) {
            Ok(()) => entry(name, EntryStatus::Placed, method),
            Err(e) => {
                warn!(slot = slot.name(), key, asset = %name, error = %e, "image placement failed");
                entry(name, EntryStatus::Error, method)
            }
        };
        entries.push(match matched {
            Some(m) => recorded.matched(m),
            None => recorded,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::scan;
    use crate::memory::MemoryHost;
    use serde_json::json;

    #[test]
    fn test_contain_scale() {
        let placeholder = Bounds::new(0.0, 0.0, 500.0, 200.0);
        let asset = Bounds::new(0.0, 0.0, 1000.0, 1000.0);
        assert_eq!(contain_scale(&placeholder, &asset), Some(20.0));
        assert_eq!(contain_scale(&placeholder, &Bounds::default()), None);
    }

    #[test]
    fn test_asset_lookup_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("8594001.PNG"), b"x").unwrap();
        fs::write(dir.path().join("Jam.Tif"), b"x").unwrap();
        fs::write(dir.path().join("exact"), b"x").unwrap();
        let assets = AssetDir::new(dir.path());

        assert_eq!(assets.find("exact").unwrap(), dir.path().join("exact"));
        assert_eq!(assets.find("8594001").unwrap(), dir.path().join("8594001.PNG"));
        assert_eq!(assets.find("jam").unwrap(), dir.path().join("Jam.Tif"));
        assert!(assets.find("absent").is_none());
        assert!(assets.find("../exact").is_none());
    }

    #[test]
    fn test_extended_placeholder_preferred() {
        let host = MemoryHost::from_json(json!({
            "name": "Page 1",
            "layers": [{"name": "Product_01", "layers": [
                {"name": "image_bg"},
                {"name": "EXsmartobject_01"}
            ]}]
        }))
        .unwrap();
        let index = scan(&host);
        let (_, key, method) = find_placeholder(index.slot("Product_01").unwrap()).unwrap();
        assert_eq!(key, "exsmartobject_01");
        assert_eq!(method, Method::ExtendedPlaceholder);
    }

    #[test]
    fn test_first_asset_fits_placeholder_rest_go_beside() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        let mut host = MemoryHost::from_json(json!({
            "name": "Page 1",
            "layers": [{"name": "Product_01", "layers": [
                {"name": "packshot", "bounds": [100, 100, 600, 300]},
                {"name": "nazev_01A", "text": "x", "bounds": [100, 0, 600, 50]}
            ]}]
        }))
        .unwrap()
        .with_asset_size("a.jpg", 1000.0, 1000.0)
        .with_asset_size("b.jpg", 250.0, 1000.0);
        let index = scan(&host);
        let slot = index.slot("Product_01").unwrap();

        let entries = place_images(
            &mut host,
            slot,
            "image_01",
            &FieldValue::from("a\nb\nmissing"),
            Some(&AssetDir::new(dir.path())),
            LabelColor::Green,
            &Freestanding::default(),
        );
        let statuses: Vec<_> = entries.iter().map(|e| (e.status, e.method)).collect();
        assert_eq!(
            statuses,
            vec![
                (EntryStatus::Placed, Method::Placeholder),
                (EntryStatus::Placed, Method::Freestanding),
                (EntryStatus::AssetMissing, Method::Unresolved),
            ]
        );

        let a = host.find("a").unwrap();
        assert_eq!(host.bounds(a).unwrap(), Bounds::new(250.0, 100.0, 450.0, 300.0));
        assert_eq!(host.label(a), Some(LabelColor::Green));
        let placeholder = host.find("packshot").unwrap();
        assert!(!host.is_visible(placeholder).unwrap());

        // Slot spans x 100..600, y 0..300; second asset is 125x500.
        let b = host.find("b").unwrap();
        assert_eq!(host.bounds(b).unwrap(), Bounds::new(1200.0, 50.0, 1325.0, 550.0));
    }

    #[test]
    fn test_without_asset_dir_every_asset_is_skipped() {
        let mut host = MemoryHost::from_json(json!({
            "name": "Page 1",
            "layers": [{"name": "Product_01", "layers": [{"name": "image"}]}]
        }))
        .unwrap();
        let index = scan(&host);
        let entries = place_images(
            &mut host,
            index.slot("Product_01").unwrap(),
            "image_01",
            &FieldValue::from("a\nb"),
            None,
            LabelColor::Red,
            &Freestanding::default(),
        );
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == EntryStatus::Skipped));
    }
}
