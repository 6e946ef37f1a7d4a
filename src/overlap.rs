//! Grid Overlap Manager
//!
//! Product slots sit on a 4-column grid numbered 1..=16 row-major. A hero
//! slot spans neighbouring cells, which must then be hidden, and only one
//! size variant (`Product_NN`, `_K`, `_EX`) of a cell may be visible.

use tracing::{debug, warn};

use crate::host::DocumentHost;
use crate::index::{LayerTreeIndex, PRODUCT_PREFIX};
use crate::plan::Hero;

pub const GRID_COLUMNS: u32 = 4;
pub const GRID_CELLS: u32 = 16;

/// Name suffixes distinguishing size variants of one cell.
pub const VARIANT_SUFFIXES: [&str; 3] = ["", "_K", "_EX"];

/// Cell number of a product slot name (`Product_05_K` → 5).
pub fn slot_number(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(PRODUCT_PREFIX)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

pub fn cell_name(number: u32) -> String {
    format!("{PRODUCT_PREFIX}{number:02}")
}

/// Every size-variant name of a cell.
pub fn variant_names(number: u32) -> Vec<String> {
    let base = cell_name(number);
    VARIANT_SUFFIXES
        .iter()
        .map(|s| format!("{base}{s}"))
        .collect()
}

/// Cells covered by a hero span anchored at `number`, anchor excluded.
/// Cells beyond the grid are dropped, never wrapped.
pub fn covered_cells(number: u32, hero: Hero) -> Vec<u32> {
    let offsets: &[u32] = match hero {
        Hero::Single => &[],
        Hero::Tall => &[GRID_COLUMNS],
        Hero::Quad => &[1, GRID_COLUMNS, GRID_COLUMNS + 1],
    };
    offsets
        .iter()
        .map(|o| number + o)
        .filter(|n| *n <= GRID_CELLS)
        .collect()
}

/// Outcome of one overlap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapReport {
    /// Cells suppressed by the hero span.
    pub covered: Vec<u32>,
    /// Slot names actually hidden, in the order they were hidden.
    pub hidden: Vec<String>,
}

/// Hide the other size variants of `slot_name`'s cell and every variant of
/// the cells its hero span covers. Host failures are logged and skipped.
pub fn apply_overlap<H: DocumentHost + ?Sized>(
    host: &mut H,
    slot_name: &str,
    hero: Hero,
    index: &LayerTreeIndex,
) -> OverlapReport {
    let mut report = OverlapReport::default();
    let Some(number) = slot_number(slot_name) else {
        debug!(slot = slot_name, "not a grid slot, no overlap to apply");
        return report;
    };

    let mut targets: Vec<String> = variant_names(number)
        .into_iter()
        .filter(|v| !v.eq_ignore_ascii_case(slot_name))
        .collect();

    report.covered = covered_cells(number, hero);
    for cell in &report.covered {
        targets.extend(variant_names(*cell));
    }

    for name in targets {
        let Some(slot) = index.slot(&name) else {
            continue;
        };
        match host.set_visible(slot.self_id(), false) {
            Ok(()) => report.hidden.push(slot.name().to_string()),
            Err(e) => warn!(slot = %name, error = %e, "failed to hide overlapped slot"),
        }
    }

    debug!(slot = slot_name, hero = hero.cells(), hidden = ?report.hidden, "overlap applied");
    report
}
