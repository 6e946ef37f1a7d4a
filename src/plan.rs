//! Build Plan - what each slot on one page should show

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::info;

/// Prefix marking a data key as an image field.
pub const IMAGE_PREFIX: &str = "image_";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Build plan not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read build plan {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid build plan: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub page: u32,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub group: String,
    #[serde(default)]
    pub hero: Hero,
    /// Applied in plan order.
    #[serde(default)]
    pub data: IndexMap<String, FieldValue>,
    #[serde(default)]
    pub visibility: IndexMap<String, bool>,
}

impl Action {
    pub fn new(group: impl Into<String>, hero: Hero) -> Self {
        Self {
            group: group.into(),
            hero,
            data: IndexMap::new(),
            visibility: IndexMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_visibility(mut self, key: impl Into<String>, visible: bool) -> Self {
        self.visibility.insert(key.into(), visible);
        self
    }
}

/// Whether a data key names an image field. Everything else is text,
/// whatever its value looks like. The prefix is case-sensitive.
pub fn is_image_key(key: &str) -> bool {
    key.starts_with(IMAGE_PREFIX)
}

/// Grid cells a slot occupies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u8")]
pub enum Hero {
    #[default]
    Single,
    /// Two cells, vertical span.
    Tall,
    /// Two by two.
    Quad,
}

impl Hero {
    pub fn cells(self) -> u8 {
        match self {
            Hero::Single => 1,
            Hero::Tall => 2,
            Hero::Quad => 4,
        }
    }
}

impl From<Hero> for u8 {
    fn from(h: Hero) -> Self {
        h.cells()
    }
}

impl TryFrom<u8> for Hero {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Hero::Single),
            2 => Ok(Hero::Tall),
            4 => Ok(Hero::Quad),
            other => Err(format!("hero must be 1, 2 or 4, got {other}")),
        }
    }
}

// Spreadsheet exports write hero as 2, 2.0 or "2"; an empty cell comes
// through as null or "".
#[derive(Deserialize)]
#[serde(untagged)]
enum HeroRepr {
    Int(u64),
    Float(f64),
    Text(String),
}

impl HeroRepr {
    fn into_hero(self) -> Result<Hero, String> {
        let n = match self {
            HeroRepr::Int(n) => n,
            HeroRepr::Float(f) if f.fract() == 0.0 && f >= 0.0 => f as u64,
            HeroRepr::Float(f) => return Err(format!("hero must be an integer, got {f}")),
            HeroRepr::Text(s) if s.trim().is_empty() => return Ok(Hero::Single),
            HeroRepr::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
                .ok_or_else(|| format!("hero must be 1, 2 or 4, got {s:?}"))?,
        };
        u8::try_from(n)
            .map_err(|_| format!("hero must be 1, 2 or 4, got {n}"))
            .and_then(Hero::try_from)
    }
}

impl<'de> Deserialize<'de> for Hero {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<HeroRepr>::deserialize(deserializer)? {
            Some(repr) => repr.into_hero().map_err(serde::de::Error::custom),
            None => Ok(Hero::Single),
        }
    }
}

/// A data value: one string, a list, or a bare number from a spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Number(serde_json::Number),
}

impl FieldValue {
    /// The value as one string; lists are newline-joined.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items.join("\n"),
            FieldValue::Number(n) => n.to_string(),
        }
    }

    /// Non-empty lines, for multi-asset image fields.
    pub fn lines(&self) -> Vec<String> {
        self.as_text()
            .split('\n')
            .map(|l| l.trim_end_matches('\r').trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl BuildPlan {
    pub fn from_json(content: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        if !path.exists() {
            return Err(PlanError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // Spreadsheet tooling may write a BOM.
        let plan = Self::from_json(content.trim_start_matches('\u{feff}'))?;
        info!(path = %path.display(), page = plan.page, actions = plan.actions.len(), "build plan loaded");
        Ok(plan)
    }

    /// Distinct groups in first-reference order.
    pub fn groups(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.actions
            .iter()
            .map(|a| a.group.as_str())
            .filter(|g| seen.insert(*g))
            .collect()
    }
}

/// File name a page's plan is published under.
pub fn plan_file_name(page: u32) -> String {
    format!("build_page_{page}.json")
}

/// Page number embedded in a document name (`"Letak Page 12.psd"` → 12).
pub fn page_from_document_name(name: &str) -> Option<u32> {
    static PAGE: OnceLock<Regex> = OnceLock::new();
    let re = PAGE.get_or_init(|| Regex::new(r"(?i)page\s*(\d+)").expect("static regex"));
    re.captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_parses_with_defaults() {
        let plan: BuildPlan = serde_json::from_value(json!({
            "page": 7,
            "actions": [{"group": "Product_03", "data": {"nazev_03A": "X"}}]
        }))
        .unwrap();
        assert_eq!(plan.actions[0].hero, Hero::Single);
        assert!(plan.actions[0].visibility.is_empty());
    }

    #[test]
    fn test_hero_accepts_spreadsheet_forms() {
        for raw in [json!(2), json!(2.0), json!("2")] {
            let action: Action =
                serde_json::from_value(json!({"group": "Product_01", "hero": raw})).unwrap();
            assert_eq!(action.hero, Hero::Tall);
        }
        let bad = serde_json::from_value::<Action>(json!({"group": "Product_01", "hero": 3}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_empty_hero_cell_is_single() {
        let plan: BuildPlan = serde_json::from_value(json!({
            "page": 1,
            "actions": [
                {"group": "Product_01", "hero": null, "data": {"nazev_01A": "Jam"}},
                {"group": "Product_02", "hero": ""}
            ]
        }))
        .unwrap();
        assert_eq!(plan.actions[0].hero, Hero::Single);
        assert_eq!(plan.actions[1].hero, Hero::Single);
    }

    #[test]
    fn test_fields_keep_plan_order() {
        let action: Action = serde_json::from_str(
            r#"{"group": "Product_01",
                "data": {"nazev_01B": "b", "nazev_01A": "a", "cena_01": "9"},
                "visibility": {"ean_01": false, "badge_01": true}}"#,
        )
        .unwrap();
        let keys: Vec<&str> = action.data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["nazev_01B", "nazev_01A", "cena_01"]);
        let flags: Vec<&str> = action.visibility.keys().map(String::as_str).collect();
        assert_eq!(flags, vec!["ean_01", "badge_01"]);
    }

    #[test]
    fn test_hero_serializes_as_cell_count() {
        let action = Action::new("Product_02", Hero::Quad);
        assert_eq!(serde_json::to_value(&action).unwrap()["hero"], 4);
    }

    #[test]
    fn test_field_values() {
        let list: FieldValue = serde_json::from_value(json!(["a.jpg", "b.jpg"])).unwrap();
        assert_eq!(list.lines(), vec!["a.jpg", "b.jpg"]);
        let joined = FieldValue::from("a.jpg\n\nb.jpg\n");
        assert_eq!(joined.lines(), vec!["a.jpg", "b.jpg"]);
        let ean: FieldValue = serde_json::from_value(json!(8594001234567u64)).unwrap();
        assert_eq!(ean.as_text(), "8594001234567");
    }

    #[test]
    fn test_image_prefix_only_by_key() {
        assert!(is_image_key("image_03"));
        assert!(!is_image_key("Image_03"));
        assert!(!is_image_key("nazev_03A"));
        assert!(!is_image_key("path_to_image"));
    }

    #[test]
    fn test_page_detection() {
        assert_eq!(page_from_document_name("Letak W Page 10 NAPOJE.psd"), Some(10));
        assert_eq!(page_from_document_name("letak page12.psd"), Some(12));
        assert_eq!(page_from_document_name("cover.psd"), None);
    }

    #[test]
    fn test_load_missing_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuildPlan::load(&dir.path().join("build_page_1.json")).unwrap_err();
        assert!(matches!(err, PlanError::NotFound(_)));
    }

    #[test]
    fn test_groups_are_distinct_in_order() {
        let plan = BuildPlan {
            page: 1,
            actions: vec![
                Action::new("A4_Grp_02", Hero::Single),
                Action::new("A4_Grp_01", Hero::Single),
                Action::new("A4_Grp_02", Hero::Single),
            ],
        };
        assert_eq!(plan.groups(), vec!["A4_Grp_02", "A4_Grp_01"]);
    }
}
