//! Build-plan discovery
//!
//! A page's plan is `build_page_<n>.json`. Where it lives depends on who
//! exported it, so a fixed list of places is searched in order.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::plan::plan_file_name;

/// Export folders under the project root, one per export run.
pub const BUILD_PLANS_DIR: &str = "workspaces/build_plans";
pub const LEGACY_STATE_PREFIX: &str = "state_";

#[derive(Debug, Clone, Default)]
pub struct PlanLocator {
    injected_dir: Option<PathBuf>,
    json_dir: Option<PathBuf>,
    project_root: Option<PathBuf>,
}

fn is_export_folder(name: &str) -> bool {
    static STAMP: OnceLock<Regex> = OnceLock::new();
    STAMP
        .get_or_init(|| Regex::new(r"^\d{6}_\d{4}_").expect("static regex"))
        .is_match(name)
}

/// Lexically greatest subdirectory of `root` whose name passes `accept`.
/// Export folders are stamped `YYMMDD_HHMM_`, so greatest is newest.
fn newest_subdir(root: &Path, accept: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            accept(&name).then(|| (name, e.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

impl PlanLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory handed over by the caller for this run; searched first.
    pub fn with_injected_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.injected_dir = Some(dir.into());
        self
    }

    pub fn with_json_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.json_dir = Some(dir.into());
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Directories searched, in priority order.
    pub fn search_dirs(&self, document_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = vec![];
        dirs.extend(self.injected_dir.clone());
        dirs.extend(self.json_dir.clone());

        if let Some(root) = &self.project_root {
            let plans_root = root.join(BUILD_PLANS_DIR);
            dirs.extend(newest_subdir(&plans_root, is_export_folder));
            dirs.extend(newest_subdir(&plans_root, |n| n.starts_with(LEGACY_STATE_PREFIX)));
        }

        dirs.extend(document_dir.map(Path::to_path_buf));
        dirs.extend(self.project_root.clone());
        dirs
    }

    /// First existing plan for `page`, or `None` when nothing matched and
    /// the caller has to pick a file by hand.
    pub fn locate(&self, page: u32, document_dir: Option<&Path>) -> Option<PathBuf> {
        let file_name = plan_file_name(page);
        for dir in self.search_dirs(document_dir) {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                info!(page, path = %candidate.display(), "build plan located");
                return Some(candidate);
            }
            debug!(page, dir = %dir.display(), "no build plan here");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}").unwrap();
    }

    #[test]
    fn test_newest_export_folder_wins_over_legacy() {
        let root = tempfile::tempdir().unwrap();
        let plans = root.path().join(BUILD_PLANS_DIR);
        touch(&plans.join("260101_0900_State_4").join("build_page_3.json"));
        touch(&plans.join("260214_1130_State_5").join("build_page_3.json"));
        touch(&plans.join("state_9").join("build_page_3.json"));
        fs::create_dir_all(plans.join("notes")).unwrap();

        let found = PlanLocator::new()
            .with_project_root(root.path())
            .locate(3, None)
            .unwrap();
        assert_eq!(found, plans.join("260214_1130_State_5").join("build_page_3.json"));
    }

    #[test]
    fn test_injected_dir_has_priority() {
        let root = tempfile::tempdir().unwrap();
        let injected = root.path().join("injected");
        touch(&injected.join("build_page_1.json"));
        touch(&root.path().join("build_page_1.json"));

        let locator = PlanLocator::new()
            .with_injected_dir(&injected)
            .with_project_root(root.path());
        assert_eq!(locator.locate(1, None).unwrap(), injected.join("build_page_1.json"));
    }

    #[test]
    fn test_falls_back_to_document_dir_then_root() {
        let root = tempfile::tempdir().unwrap();
        let docs = root.path().join("psd");
        touch(&docs.join("build_page_2.json"));
        touch(&root.path().join("build_page_5.json"));

        let locator = PlanLocator::new().with_project_root(root.path());
        assert_eq!(locator.locate(2, Some(&docs)).unwrap(), docs.join("build_page_2.json"));
        assert_eq!(
            locator.locate(5, Some(&docs)).unwrap(),
            root.path().join("build_page_5.json")
        );
        assert!(locator.locate(6, Some(&docs)).is_none());
    }
}
