//! Build Pipeline - Single Entry Point
//!
//! Scan, expand, rescan, detect the layout mode, apply every action, and
//! account for each field in the manifest. Only initialization failures
//! (plan, document, undo step) reach the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::applier::{skipped_entries, FieldApplier};
use crate::config::EngineConfig;
use crate::discovery::PlanLocator;
use crate::expansion::{expand, ExpansionReport, DYNAMIC_SECTION_PREFIX};
use crate::hashing::{manifest_fingerprint, plan_fingerprint};
use crate::host::{DocumentHost, HostError, HostResult};
use crate::image::AssetDir;
use crate::index::{scan, LayerTreeIndex, SlotKind};
use crate::manifest::{EntryStatus, Manifest, ManifestEntry};
use crate::memory::SnapshotError;
use crate::overlap::{variant_names, GRID_CELLS};
use crate::plan::{page_from_document_name, BuildPlan, PlanError};
use crate::resolver::Resolver;
use crate::validation::{VerificationReport, Verifier};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No page number in document name: {0}")]
    NoPageNumber(String),

    #[error("No build plan found for page {0}")]
    PlanNotFound(u32),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Document(#[from] SnapshotError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Failed to write manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Fixed 4x4 product grid.
    Grid,
    /// Free-form `A4_Grp_NN` sections.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Scanning,
    TemplateExpanding,
    Rescanning,
    ModeDetect,
    ProcessingActions,
    Closed,
}

/// Advisory progress for a UI. Action progress is throttled.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub phase: BuildPhase,
    pub completed: usize,
    pub total: usize,
    /// Group of the action just processed.
    pub group: Option<String>,
}

impl Progress {
    fn phase(phase: BuildPhase, total: usize) -> Self {
        Self { phase, completed: 0, total, group: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: String,
    pub page: u32,
    pub mode: LayoutMode,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub plan_fingerprint: String,
    pub manifest_fingerprint: String,
    pub expansion: ExpansionReport,
    pub actions_applied: usize,
    pub actions_skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    pub entries: Vec<ManifestEntry>,
}

impl BuildReport {
    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

/// Dynamic when sections were generated or any action targets one.
pub fn detect_mode(plan: &BuildPlan, expansion: &ExpansionReport) -> LayoutMode {
    let targets_sections = plan
        .actions
        .iter()
        .any(|a| a.group.starts_with(DYNAMIC_SECTION_PREFIX));
    if expansion.did_mutate() || targets_sections {
        LayoutMode::Dynamic
    } else {
        LayoutMode::Grid
    }
}

/// Hide the layout the page is not using. Returns the slots hidden.
pub fn hide_inactive_layout<H: DocumentHost + ?Sized>(
    host: &mut H,
    index: &LayerTreeIndex,
    mode: LayoutMode,
) -> Vec<String> {
    let targets: Vec<(String, _)> = match mode {
        LayoutMode::Dynamic => (1..=GRID_CELLS)
            .flat_map(variant_names)
            .filter_map(|name| index.slot(&name).map(|s| (s.name().to_string(), s.self_id())))
            .collect(),
        LayoutMode::Grid => index
            .slots()
            .filter(|s| s.kind() == SlotKind::Dynamic)
            .map(|s| (s.name().to_string(), s.self_id()))
            .collect(),
    };

    let mut hidden = vec![];
    for (name, id) in targets {
        match host.set_visible(id, false) {
            Ok(()) => hidden.push(name),
            Err(e) => warn!(slot = %name, error = %e, "failed to hide inactive slot"),
        }
    }
    hidden
}

struct Execution {
    expansion: ExpansionReport,
    mode: LayoutMode,
    manifest: Manifest,
    applied: usize,
    skipped: usize,
}

/// The build pipeline - single entry point for building a page
pub struct BuildPipeline {
    config: EngineConfig,
    resolver: Resolver,
    assets: Option<AssetDir>,
}

impl BuildPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let assets = config.images_dir.clone().map(AssetDir::new);
        Self {
            config,
            resolver: Resolver::new(),
            assets,
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Dry run: check `plan` against the document without mutating it.
    pub fn verify<H: DocumentHost + ?Sized>(&self, host: &H, plan: &BuildPlan) -> VerificationReport {
        let index = scan(host);
        Verifier::new().verify(plan, &index, &self.resolver)
    }

    /// Find the plan for the host's document.
    pub fn locate_plan<H: DocumentHost + ?Sized>(
        &self,
        host: &H,
        locator: &PlanLocator,
        document_dir: Option<&Path>,
    ) -> Result<PathBuf, BuildError> {
        let name = host.document_name();
        let page = page_from_document_name(name)
            .ok_or_else(|| BuildError::NoPageNumber(name.to_string()))?;
        locator
            .locate(page, document_dir)
            .ok_or(BuildError::PlanNotFound(page))
    }

    /// Load the plan at `plan_path`, build, and flush the manifest once.
    pub fn build_document<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        plan_path: &Path,
        progress: impl FnMut(&Progress),
    ) -> Result<BuildReport, BuildError> {
        let plan = BuildPlan::load(plan_path)?;
        if let Some(page) = page_from_document_name(host.document_name()) {
            if page != plan.page {
                warn!(document_page = page, plan_page = plan.page, "plan page differs from document page");
            }
        }

        // The edits are in the document either way, so the manifest is
        // written before a failed history close is reported.
        let (mut report, closed) = self.run_step(host, &plan, progress)?;
        let path = self.config.manifest_path.clone();
        Manifest::from(report.entries.clone())
            .write_to(&path)
            .map_err(|source| BuildError::Manifest { path: path.clone(), source })?;
        report.manifest_path = Some(path);
        closed?;
        Ok(report)
    }

    /// Build one page. Everything happens inside one undo step.
    pub fn run<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        plan: &BuildPlan,
        progress: impl FnMut(&Progress),
    ) -> Result<BuildReport, BuildError> {
        let (report, closed) = self.run_step(host, plan, progress)?;
        closed?;
        Ok(report)
    }

    /// The build plus the outcome of closing its undo step.
    fn run_step<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        plan: &BuildPlan,
        mut progress: impl FnMut(&Progress),
    ) -> Result<(BuildReport, HostResult<()>), BuildError> {
        let started_at = Utc::now();
        let build_id = Uuid::new_v4().to_string();
        info!(build_id = %build_id, page = plan.page, actions = plan.actions.len(), "build started");

        host.begin_history(&format!("Build Page {}", plan.page))?;
        let execution = self.execute(host, plan, &mut progress);
        let closed = host.end_history();
        if let Err(e) = &closed {
            error!(build_id = %build_id, error = %e, "failed to close the undo step");
        }
        progress(&Progress::phase(BuildPhase::Closed, plan.actions.len()));

        let entries = execution.manifest.into_entries();
        let report = BuildReport {
            build_id,
            page: plan.page,
            mode: execution.mode,
            engine_version: ENGINE_VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            plan_fingerprint: plan_fingerprint(plan)?,
            manifest_fingerprint: manifest_fingerprint(&entries)?,
            expansion: execution.expansion,
            actions_applied: execution.applied,
            actions_skipped: execution.skipped,
            manifest_path: None,
            entries,
        };
        info!(
            build_id = %report.build_id,
            applied = report.actions_applied,
            skipped = report.actions_skipped,
            entries = report.entries.len(),
            "build finished"
        );
        Ok((report, closed))
    }

    fn execute<H: DocumentHost + ?Sized>(
        &self,
        host: &mut H,
        plan: &BuildPlan,
        progress: &mut impl FnMut(&Progress),
    ) -> Execution {
        let total = plan.actions.len();

        progress(&Progress::phase(BuildPhase::Scanning, total));
        let mut index = scan(host);

        progress(&Progress::phase(BuildPhase::TemplateExpanding, total));
        let (expansion, rescan) = match expand(host, plan, &index, self.config.expansion_padding) {
            Ok(report) => {
                let mutated = report.did_mutate();
                (report, mutated)
            }
            Err(e) => {
                // Sections may exist half-made; the rescan sees whatever is there.
                error!(error = %e, "template expansion failed part way");
                (ExpansionReport::default(), true)
            }
        };
        if rescan {
            progress(&Progress::phase(BuildPhase::Rescanning, total));
            index = scan(host);
        }

        progress(&Progress::phase(BuildPhase::ModeDetect, total));
        let mode = detect_mode(plan, &expansion);
        let hidden = hide_inactive_layout(host, &index, mode);
        info!(mode = ?mode, hidden = hidden.len(), "layout mode detected");

        let applier = FieldApplier::new(&self.resolver, &self.config, self.assets.as_ref());
        let mut manifest = Manifest::new();
        let (mut applied, mut skipped) = (0, 0);
        let interval = self.config.progress_interval.max(1);

        for (position, action) in plan.actions.iter().enumerate() {
            match index.target(&action.group) {
                Some(slot) => {
                    let outcome = applier.apply(host, action, slot, &index, position);
                    manifest.extend(outcome.entries);
                    applied += 1;
                }
                None => {
                    warn!(group = %action.group, "slot not found, action skipped");
                    manifest.extend(skipped_entries(action));
                    skipped += 1;
                }
            }

            let completed = position + 1;
            if completed % interval == 0 || completed == total {
                progress(&Progress {
                    phase: BuildPhase::ProcessingActions,
                    completed,
                    total,
                    group: Some(action.group.clone()),
                });
            }
        }

        Execution { expansion, mode, manifest, applied, skipped }
    }
}

impl Default for BuildPipeline {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Bounds, LabelColor, LayerId, LayerKind, LayerRecord};
    use crate::memory::MemoryHost;
    use crate::plan::{Action, Hero};
    use serde_json::json;

    fn grid_page() -> MemoryHost {
        let mut layers = vec![];
        for n in 1..=4 {
            layers.push(json!({"name": format!("Product_{n:02}"), "layers": [
                {"name": format!("nazev_{n:02}A"), "text": ""}
            ]}));
        }
        layers.push(json!({"name": "A4_01", "layers": [{"name": "nazev_01A", "text": ""}]}));
        MemoryHost::from_json(json!({"name": "Letak Page 2.psd", "layers": layers})).unwrap()
    }

    fn no_rename() -> BuildPipeline {
        BuildPipeline::new(EngineConfig { rename_slots: false, ..EngineConfig::default() })
    }

    #[test]
    fn test_grid_build_hides_dynamic_sections() {
        let mut host = grid_page();
        let plan = BuildPlan {
            page: 2,
            actions: vec![Action::new("Product_02", Hero::Single).with_data("nazev_02A", "Jam")],
        };
        let report = no_rename().run(&mut host, &plan, |_| {}).unwrap();
        assert_eq!(report.mode, LayoutMode::Grid);
        assert_eq!(report.actions_applied, 1);
        let a4 = host.find("A4_01").unwrap();
        assert!(!host.is_visible(a4).unwrap());
        assert_eq!(host.history(), &["Build Page 2".to_string()]);
    }

    #[test]
    fn test_dynamic_build_hides_grid_and_uses_alias() {
        let mut host = grid_page();
        let plan = BuildPlan {
            page: 2,
            actions: vec![Action::new("A4_Grp_01", Hero::Single).with_data("nazev_01A", "Jam")],
        };
        let report = no_rename().run(&mut host, &plan, |_| {}).unwrap();
        assert_eq!(report.mode, LayoutMode::Dynamic);
        assert_eq!(report.entries[0].group, "A4_01");
        assert_eq!(report.entries[0].status, EntryStatus::Updated);
        let p1 = host.find("Product_01").unwrap();
        assert!(!host.is_visible(p1).unwrap());
        let a4 = host.find("A4_01").unwrap();
        assert!(host.is_visible(a4).unwrap());
    }

    #[test]
    fn test_progress_is_throttled() {
        let mut host = grid_page();
        let actions = (1..=4)
            .map(|n| Action::new(format!("Product_{n:02}"), Hero::Single))
            .collect();
        let plan = BuildPlan { page: 2, actions };
        let mut seen = vec![];
        no_rename()
            .run(&mut host, &plan, |p| {
                if p.phase == BuildPhase::ProcessingActions {
                    seen.push(p.completed);
                }
            })
            .unwrap();
        assert_eq!(seen, vec![3, 4]);
    }

    #[test]
    fn test_missing_slot_is_skipped_not_fatal() {
        let mut host = grid_page();
        let plan = BuildPlan {
            page: 2,
            actions: vec![
                Action::new("Product_12", Hero::Single).with_data("nazev_12A", "x"),
                Action::new("Product_01", Hero::Single).with_data("nazev_01A", "y"),
            ],
        };
        let report = no_rename().run(&mut host, &plan, |_| {}).unwrap();
        assert_eq!(report.actions_skipped, 1);
        assert_eq!(report.actions_applied, 1);
        assert_eq!(report.count(EntryStatus::Skipped), 1);
        assert_eq!(report.count(EntryStatus::Updated), 1);
    }

    #[test]
    fn test_build_document_writes_manifest_once() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("build_page_2.json");
        std::fs::write(
            &plan_path,
            r#"{"page": 2, "actions": [{"group": "Product_01", "data": {"nazev_01A": "x"}}]}"#,
        )
        .unwrap();
        let config = EngineConfig {
            manifest_path: dir.path().join("out").join("debug_manifest.json"),
            ..EngineConfig::default()
        };
        let mut host = grid_page();
        let report = BuildPipeline::new(config)
            .build_document(&mut host, &plan_path, |_| {})
            .unwrap();
        let written = Manifest::read_from(report.manifest_path.as_deref().unwrap()).unwrap();
        assert_eq!(written.entries(), report.entries.as_slice());
    }

    /// Memory host whose undo step refuses to close.
    struct UnclosableHost(MemoryHost);

    impl DocumentHost for UnclosableHost {
        fn document_name(&self) -> &str { self.0.document_name() }
        fn enumerate(&self) -> HostResult<Vec<LayerRecord>> { self.0.enumerate() }
        fn layer_name(&self, id: LayerId) -> HostResult<String> { self.0.layer_name(id) }
        fn layer_kind(&self, id: LayerId) -> HostResult<LayerKind> { self.0.layer_kind(id) }
        fn children(&self, id: LayerId) -> HostResult<Vec<LayerId>> { self.0.children(id) }
        fn text(&self, id: LayerId) -> HostResult<String> { self.0.text(id) }
        fn set_text(&mut self, id: LayerId, text: &str) -> HostResult<()> { self.0.set_text(id, text) }
        fn is_visible(&self, id: LayerId) -> HostResult<bool> { self.0.is_visible(id) }
        fn set_visible(&mut self, id: LayerId, visible: bool) -> HostResult<()> { self.0.set_visible(id, visible) }
        fn bounds(&self, id: LayerId) -> HostResult<Bounds> { self.0.bounds(id) }
        fn translate(&mut self, id: LayerId, dx: f64, dy: f64) -> HostResult<()> { self.0.translate(id, dx, dy) }
        fn resize(&mut self, id: LayerId, percent: f64) -> HostResult<()> { self.0.resize(id, percent) }
        fn duplicate(&mut self, id: LayerId) -> HostResult<LayerId> { self.0.duplicate(id) }
        fn rename(&mut self, id: LayerId, name: &str) -> HostResult<()> { self.0.rename(id, name) }
        fn place_asset(&mut self, asset: &Path, above: LayerId) -> HostResult<LayerId> { self.0.place_asset(asset, above) }
        fn set_label(&mut self, id: LayerId, color: LabelColor) -> HostResult<()> { self.0.set_label(id, color) }
        fn begin_history(&mut self, label: &str) -> HostResult<()> { self.0.begin_history(label) }
        fn end_history(&mut self) -> HostResult<()> {
            Err(HostError::Unsupported("undo step rejected".into()))
        }
    }

    #[test]
    fn test_manifest_written_when_undo_step_fails_to_close() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("build_page_2.json");
        std::fs::write(
            &plan_path,
            r#"{"page": 2, "actions": [{"group": "Product_01", "data": {"nazev_01A": "x"}}]}"#,
        )
        .unwrap();
        let manifest_path = dir.path().join("debug_manifest.json");
        let config = EngineConfig {
            manifest_path: manifest_path.clone(),
            rename_slots: false,
            ..EngineConfig::default()
        };
        let mut host = UnclosableHost(grid_page());
        let err = BuildPipeline::new(config)
            .build_document(&mut host, &plan_path, |_| {})
            .unwrap_err();
        assert!(matches!(err, BuildError::Host(_)));

        let written = Manifest::read_from(&manifest_path).unwrap();
        assert_eq!(written.count(EntryStatus::Updated), 1);
        let title = host.0.find("nazev_01A").unwrap();
        assert_eq!(host.0.text(title).unwrap(), "x");
    }

    #[test]
    fn test_locate_plan_needs_page_number() {
        let host = MemoryHost::new("cover.psd");
        let err = BuildPipeline::default()
            .locate_plan(&host, &PlanLocator::new(), None)
            .unwrap_err();
        assert!(matches!(err, BuildError::NoPageNumber(_)));
    }
}
