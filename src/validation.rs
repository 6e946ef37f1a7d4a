//! Plan Verification - dry run of a build plan against a document
//!
//! Rules produce structured findings; nothing touches the document.
//! Policy decides which findings make a plan unclean.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::expansion::{requested_sections, TEMPLATE_CANDIDATES};
use crate::index::LayerTreeIndex;
use crate::overlap::{slot_number, GRID_CELLS, GRID_COLUMNS};
use crate::plan::{is_image_key, BuildPlan, Hero};
use crate::resolver::Resolver;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub remediation: Vec<String>,
}

impl Finding {
    fn new(rule: &str, severity: Severity, group: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            message: message.into(),
            group: group.to_string(),
            key: None,
            remediation: vec![],
        }
    }

    fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    fn remedy(mut self, hint: &str) -> Self {
        self.remediation.push(hint.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub clean: bool,
    pub page: u32,
    pub findings: Vec<Finding>,
}

impl VerificationReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// What a rule sees.
pub struct PlanContext<'a> {
    pub plan: &'a BuildPlan,
    pub index: &'a LayerTreeIndex,
    pub resolver: &'a Resolver,
}

impl PlanContext<'_> {
    /// Section the build would create by expansion rather than find.
    fn will_generate(&self, group: &str) -> bool {
        self.index.target(group).is_none()
            && requested_sections(self.plan).iter().any(|s| s == group)
            && TEMPLATE_CANDIDATES.iter().any(|t| self.index.contains(t))
    }
}

/// Verification rule trait - produces findings
pub trait PlanRule {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &PlanContext<'_>) -> Vec<Finding>;
}

// --- Concrete Rules ---

pub struct MissingSlotRule;

impl PlanRule for MissingSlotRule {
    fn name(&self) -> &'static str { "missing_slot" }

    fn check(&self, ctx: &PlanContext<'_>) -> Vec<Finding> {
        ctx.plan
            .groups()
            .into_iter()
            .filter(|g| ctx.index.target(g).is_none())
            .map(|g| {
                if ctx.will_generate(g) {
                    Finding::new(self.name(), Severity::Info, g, "Section will be generated from the template")
                } else {
                    Finding::new(self.name(), Severity::Error, g, "Slot not found in document")
                        .remedy("Check the group name against the document's layer groups")
                }
            })
            .collect()
    }
}

pub struct UnresolvedFieldRule;

impl PlanRule for UnresolvedFieldRule {
    fn name(&self) -> &'static str { "unresolved_field" }

    fn check(&self, ctx: &PlanContext<'_>) -> Vec<Finding> {
        let mut findings = vec![];
        for action in &ctx.plan.actions {
            let Some(slot) = ctx.index.target(&action.group) else {
                continue;
            };
            let text_keys = action.data.keys().filter(|k| !is_image_key(k));
            for key in text_keys.chain(action.visibility.keys()) {
                if ctx.resolver.resolve(slot, key).is_none() {
                    findings.push(
                        Finding::new(self.name(), Severity::Warning, &action.group, "No layer matches this field")
                            .key(key)
                            .remedy("Rename the layer or the plan column so they match"),
                    );
                }
            }
        }
        findings
    }
}

pub struct HeroSpanRule;

impl HeroSpanRule {
    fn clipped(number: u32, hero: Hero) -> Option<&'static str> {
        let last_row = number + GRID_COLUMNS > GRID_CELLS;
        let last_column = number % GRID_COLUMNS == 0;
        match hero {
            Hero::Single => None,
            Hero::Tall if last_row => Some("bottom"),
            Hero::Tall => None,
            Hero::Quad if last_row => Some("bottom"),
            Hero::Quad if last_column => Some("right"),
            Hero::Quad => None,
        }
    }
}

impl PlanRule for HeroSpanRule {
    fn name(&self) -> &'static str { "hero_span" }

    fn check(&self, ctx: &PlanContext<'_>) -> Vec<Finding> {
        ctx.plan
            .actions
            .iter()
            .filter_map(|action| {
                let number = slot_number(&action.group)?;
                let edge = Self::clipped(number, action.hero)?;
                Some(
                    Finding::new(
                        self.name(),
                        Severity::Warning,
                        &action.group,
                        format!("Hero {} span crosses the grid's {edge} edge and is clipped", action.hero.cells()),
                    )
                    .remedy("Move the hero product to a cell with room for its span"),
                )
            })
            .collect()
    }
}

pub struct DuplicateGroupRule;

impl PlanRule for DuplicateGroupRule {
    fn name(&self) -> &'static str { "duplicate_group" }

    fn check(&self, ctx: &PlanContext<'_>) -> Vec<Finding> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        let mut findings = vec![];
        for action in &ctx.plan.actions {
            let target = ctx
                .index
                .target(&action.group)
                .map(|s| s.name().to_lowercase())
                .unwrap_or_else(|| action.group.to_lowercase());
            match seen.get(&target) {
                Some(first) => findings.push(Finding::new(
                    self.name(),
                    Severity::Warning,
                    &action.group,
                    format!("Same slot as the earlier action for {first}; later fields overwrite earlier ones"),
                )),
                None => {
                    seen.insert(target, &action.group);
                }
            }
        }
        findings
    }
}

/// Verifier orchestrates rules and applies policy
pub struct Verifier {
    rules: Vec<Box<dyn PlanRule>>,
    /// Warnings also make a plan unclean.
    strict: bool,
}

impl Verifier {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(MissingSlotRule),
                Box::new(UnresolvedFieldRule),
                Box::new(HeroSpanRule),
                Box::new(DuplicateGroupRule),
            ],
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_rule(mut self, rule: impl PlanRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn verify(&self, plan: &BuildPlan, index: &LayerTreeIndex, resolver: &Resolver) -> VerificationReport {
        let ctx = PlanContext { plan, index, resolver };
        let findings: Vec<Finding> = self.rules.iter().flat_map(|r| r.check(&ctx)).collect();

        let clean = !findings.iter().any(|f| match f.severity {
            Severity::Error => true,
            Severity::Warning => self.strict,
            Severity::Info => false,
        });

        VerificationReport {
            clean,
            page: plan.page,
            findings,
        }
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::scan;
    use crate::memory::MemoryHost;
    use crate::plan::Action;
    use serde_json::json;

    fn index() -> LayerTreeIndex {
        let host = MemoryHost::from_json(json!({
            "name": "Page 4",
            "layers": [
                {"name": "Product_04", "layers": [{"name": "nazev_04A", "text": ""}]},
                {"name": "Product_14", "layers": [{"name": "nazev_14A", "text": ""}]},
                {"name": "A4_01", "layers": [{"name": "nazev_01A", "text": ""}]}
            ]
        }))
        .unwrap();
        scan(&host)
    }

    fn verify(actions: Vec<Action>, strict: bool) -> VerificationReport {
        let plan = BuildPlan { page: 4, actions };
        Verifier::new().strict(strict).verify(&plan, &index(), &Resolver::new())
    }

    fn rules(report: &VerificationReport) -> Vec<(&str, Severity)> {
        report.findings.iter().map(|f| (f.rule.as_str(), f.severity)).collect()
    }

    #[test]
    fn test_clean_plan() {
        let report = verify(vec![Action::new("Product_04", Hero::Single).with_data("nazev_04A", "x")], false);
        assert!(report.clean);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_missing_slot_is_an_error() {
        let report = verify(vec![Action::new("Product_09", Hero::Single)], false);
        assert!(!report.clean);
        assert_eq!(rules(&report), vec![("missing_slot", Severity::Error)]);
    }

    #[test]
    fn test_sections_from_expansion_are_not_missing() {
        let report = verify(
            vec![Action::new("A4_Grp_01", Hero::Single), Action::new("A4_Grp_02", Hero::Single)],
            false,
        );
        assert!(report.clean);
        assert_eq!(rules(&report), vec![("missing_slot", Severity::Info)]);
    }

    #[test]
    fn test_unresolved_fields_warn_and_strict_fails() {
        let actions = vec![Action::new("Product_04", Hero::Single)
            .with_data("vaha_99", "1 kg")
            .with_data("image_04", "missing.jpg")
            .with_visibility("badge_99", true)];
        let lenient = verify(actions.clone(), false);
        assert!(lenient.clean);
        assert_eq!(lenient.count(Severity::Warning), 2);
        assert!(!verify(actions, true).clean);
    }

    #[test]
    fn test_hero_span_crossing_edges() {
        let report = verify(
            vec![Action::new("Product_04", Hero::Quad), Action::new("Product_14", Hero::Tall)],
            false,
        );
        let messages: Vec<_> = report.findings.iter().map(|f| f.message.as_str()).collect();
        assert!(messages[0].contains("right"));
        assert!(messages[1].contains("bottom"));
    }

    #[test]
    fn test_duplicate_group_through_alias() {
        let report = verify(
            vec![Action::new("A4_01", Hero::Single), Action::new("A4_Grp_01", Hero::Single)],
            false,
        );
        assert_eq!(rules(&report), vec![("duplicate_group", Severity::Warning)]);
    }
}
