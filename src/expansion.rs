//! Template Expansion
//!
//! Free-form pages are authored with one section. When a plan asks for
//! `A4_Grp_02` and beyond, the template section is duplicated, stacked
//! downwards and renumbered until every requested section exists.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, error, info};

use crate::host::{DocumentHost, HostResult, LayerId};
use crate::index::LayerTreeIndex;
use crate::plan::BuildPlan;

pub const DYNAMIC_SECTION_PREFIX: &str = "A4_Grp_";

/// Template lookup order.
pub const TEMPLATE_CANDIDATES: [&str; 3] = ["A4_01", "A4", "A4_Grp_01"];

/// Index the template's descendants carry in their names.
pub const TEMPLATE_MARKER: &str = "01";

const MARKER_SEPARATORS: [&str; 4] = ["_", " ", ": ", ":"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionReport {
    /// Template slot the sections were cloned from.
    pub template: Option<String>,
    /// Sections created by this run, in creation order.
    pub generated: Vec<String>,
}

impl ExpansionReport {
    pub fn did_mutate(&self) -> bool {
        !self.generated.is_empty()
    }
}

/// Requested dynamic sections in ascending section number (`A4_Grp_9`
/// before `A4_Grp_10`). Empty unless some section beyond the first is
/// referenced.
pub fn requested_sections(plan: &BuildPlan) -> Vec<String> {
    let mut sections: Vec<&str> = plan
        .actions
        .iter()
        .map(|a| a.group.as_str())
        .filter(|g| g.starts_with(DYNAMIC_SECTION_PREFIX))
        .collect();
    sections.sort_by_key(|s| (section_number(s).unwrap_or(u32::MAX), *s));
    sections.dedup();

    let beyond_first = sections
        .iter()
        .filter_map(|s| section_number(s))
        .any(|n| n > 1);
    if !beyond_first {
        return vec![];
    }
    sections.into_iter().map(str::to_string).collect()
}

fn section_number(name: &str) -> Option<u32> {
    section_index(name)?.parse().ok()
}

/// Index part of a section name (`A4_Grp_03` → `03`).
pub fn section_index(name: &str) -> Option<&str> {
    name.split('_').nth(2).filter(|s| !s.is_empty())
}

/// Strip host duplicate artifacts (`" copy"`, `" copy 2"`).
pub fn strip_copy_suffix(name: &str) -> String {
    static COPY: OnceLock<Regex> = OnceLock::new();
    let re = COPY.get_or_init(|| Regex::new(r"(?i)\s+copy\s*\d*$").expect("static regex"));
    re.replace(name, "").into_owned()
}

/// Rewrite the first template marker in `name` to `new_index`.
///
/// Only the first separator form found is rewritten, and only its first
/// occurrence.
pub fn renumber_name(name: &str, new_index: &str) -> String {
    let clean = strip_copy_suffix(name);
    for sep in MARKER_SEPARATORS {
        let marker = format!("{sep}{TEMPLATE_MARKER}");
        if clean.contains(&marker) {
            return clean.replacen(&marker, &format!("{sep}{new_index}"), 1);
        }
    }
    clean
}

fn find_template<'a>(index: &'a LayerTreeIndex) -> Option<(&'a str, LayerId)> {
    TEMPLATE_CANDIDATES
        .iter()
        .find_map(|name| index.slot(name))
        .map(|slot| (slot.name(), slot.self_id()))
}

fn renumber_descendants<H: DocumentHost + ?Sized>(
    host: &mut H,
    id: LayerId,
    new_index: &str,
) -> HostResult<()> {
    for child in host.children(id)? {
        let name = host.layer_name(child)?;
        let renamed = renumber_name(&name, new_index);
        if renamed != name {
            host.rename(child, &renamed)?;
        }
        renumber_descendants(host, child, new_index)?;
    }
    Ok(())
}

/// Create every requested section missing from `index`.
///
/// Section `k` of the requested list (ascending, 0-based) sits
/// `k * (template_height + padding)` below the template, whether or not
/// the sections before it had to be generated. Sections that already exist
/// are left alone, so a second run duplicates nothing. The template is
/// hidden only when a copy was made. The caller must rescan after a
/// mutating run.
pub fn expand<H: DocumentHost + ?Sized>(
    host: &mut H,
    plan: &BuildPlan,
    index: &LayerTreeIndex,
    padding: f64,
) -> HostResult<ExpansionReport> {
    let mut report = ExpansionReport::default();
    let requested = requested_sections(plan);
    if requested.is_empty() {
        debug!("no dynamic sections beyond the first requested, expansion skipped");
        return Ok(report);
    }

    let Some((template_name, template_id)) = find_template(index) else {
        error!(
            candidates = ?TEMPLATE_CANDIDATES,
            "expansion template missing, dynamic sections cannot be generated"
        );
        return Ok(report);
    };
    report.template = Some(template_name.to_string());

    let template_height = host.bounds(template_id)?.height();
    info!(
        template = template_name,
        requested = requested.len(),
        template_height,
        "template expansion started"
    );

    for (position, target) in requested.iter().enumerate() {
        if index.contains(target) {
            debug!(section = %target, "section exists, not generated");
            continue;
        }
        let Some(new_index) = section_index(target) else {
            continue;
        };

        let copy = host.duplicate(template_id)?;
        host.rename(copy, target)?;
        if position > 0 {
            host.translate(copy, 0.0, position as f64 * (template_height + padding))?;
        }
        renumber_descendants(host, copy, new_index)?;
        info!(section = %target, position, "section generated");
        report.generated.push(target.clone());
    }

    if report.did_mutate() {
        host.set_visible(template_id, false)?;
    }
    Ok(report)
}
