//! LetakMaster CLI - Bridge interface for the dashboard
//!
//! Commands: scan, resolve, verify, build
//! Outputs JSON to stdout, logs to stderr or the diagnostic log
//! Returns 2 when a plan is unclean or any document failed to build

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use letakmaster_core::{
    config::CONFIG_FILE_NAME, scan, BuildError, BuildPipeline, BuildPlan, BuildReport, DocumentHost,
    EngineConfig, MemoryHost, PlanLocator, Verifier,
};

#[derive(Parser)]
#[command(name = "letakmaster-cli")]
#[command(about = "LetakMaster CLI - Layout Build Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the engine config
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log filter (e.g. "info", "letakmaster_core=debug")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layer-tree index of a document
    Scan {
        /// Document snapshot (JSON)
        #[arg(short, long)]
        document: PathBuf,
    },

    /// Resolve one field key within one slot
    Resolve {
        #[arg(short, long)]
        document: PathBuf,

        #[arg(short, long)]
        slot: String,

        #[arg(short, long)]
        key: String,
    },

    /// Check a build plan against a document without building
    Verify {
        #[arg(short, long)]
        document: PathBuf,

        #[arg(short, long)]
        plan: PathBuf,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,
    },

    /// Build every document; failures are reported and the batch continues
    Build {
        /// Document snapshots (JSON)
        #[arg(required = true)]
        documents: Vec<PathBuf>,

        /// Use this plan instead of discovering one per document
        #[arg(short, long)]
        plan: Option<PathBuf>,

        #[arg(long)]
        images_dir: Option<PathBuf>,

        /// Plan directory searched before every other location
        #[arg(long)]
        json_dir: Option<PathBuf>,

        #[arg(long, default_value = ".")]
        project_root: PathBuf,

        /// Where built documents are saved; in place when omitted
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn init_logging(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => println!("{}", json!({"error": format!("Failed to serialize output: {e}")})),
    }
}

fn fail(message: String) -> ExitCode {
    println!("{}", json!({"success": false, "error": message}));
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::load_or_default(&cli.config) {
        Ok(c) => c,
        Err(e) => return fail(e.to_string()),
    };

    // Builds write the diagnostic log unless told otherwise.
    let log_file = match (&cli.log_file, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Commands::Build { project_root, .. }) => Some(project_root.join(&config.log_path)),
        (None, _) => None,
    };
    if let Err(e) = init_logging(&cli.log_level, log_file.as_deref()) {
        return fail(format!("Failed to open log file: {e}"));
    }

    match cli.command {
        Commands::Scan { document } => {
            let host = match MemoryHost::load(&document) {
                Ok(h) => h,
                Err(e) => return fail(e.to_string()),
            };
            print_json(&scan(&host));
            ExitCode::SUCCESS
        }

        Commands::Resolve { document, slot, key } => {
            let host = match MemoryHost::load(&document) {
                Ok(h) => h,
                Err(e) => return fail(e.to_string()),
            };
            let index = scan(&host);
            let Some(slot_index) = index.target(&slot) else {
                return fail(format!("Slot not found: {slot}"));
            };
            let pipeline = BuildPipeline::new(config);
            match pipeline.resolver().resolve(slot_index, &key) {
                Some(r) => {
                    print_json(&json!({
                        "found": true,
                        "slot": slot_index.name(),
                        "key": key,
                        "id": r.id,
                        "method": r.method,
                        "matched": r.matched,
                    }));
                    ExitCode::SUCCESS
                }
                None => {
                    print_json(&json!({"found": false, "slot": slot_index.name(), "key": key}));
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Verify { document, plan, strict } => {
            let host = match MemoryHost::load(&document) {
                Ok(h) => h,
                Err(e) => return fail(e.to_string()),
            };
            let plan = match BuildPlan::load(&plan) {
                Ok(p) => p,
                Err(e) => return fail(e.to_string()),
            };
            let pipeline = BuildPipeline::new(config);
            let report = Verifier::new()
                .strict(strict)
                .verify(&plan, &scan(&host), pipeline.resolver());
            print_json(&report);
            if report.clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Build {
            documents,
            plan,
            images_dir,
            json_dir,
            project_root,
            out_dir,
        } => {
            let mut config = config.rooted(&project_root);
            if images_dir.is_some() {
                config.images_dir = images_dir;
            }

            let mut locator = PlanLocator::new().with_project_root(&project_root);
            if let Some(dir) = json_dir {
                locator = locator.with_injected_dir(dir);
            }
            if let Some(dir) = &config.json_dir {
                locator = locator.with_json_dir(dir);
            }

            let pipeline = BuildPipeline::new(config);
            let mut results = vec![];
            let mut failed = 0;
            for document in &documents {
                let result = build_one(&pipeline, document, plan.as_deref(), &locator, out_dir.as_deref());
                match result {
                    Ok(report) => results.push(json!({
                        "document": document,
                        "success": true,
                        "report": report,
                    })),
                    Err(e) => {
                        error!(document = %document.display(), error = %e, "document build failed");
                        failed += 1;
                        results.push(json!({
                            "document": document,
                            "success": false,
                            "error": e.to_string(),
                        }));
                    }
                }
            }

            print_json(&json!({"built": documents.len() - failed, "failed": failed, "documents": results}));
            if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
    }
}

fn build_one(
    pipeline: &BuildPipeline,
    document: &Path,
    plan: Option<&Path>,
    locator: &PlanLocator,
    out_dir: Option<&Path>,
) -> Result<BuildReport, BuildError> {
    let mut host = MemoryHost::load(document)?;
    let plan_path = match plan {
        Some(p) => p.to_path_buf(),
        None => pipeline.locate_plan(&host, locator, document.parent())?,
    };

    let report = pipeline.build_document(&mut host, &plan_path, |p| {
        info!(phase = ?p.phase, completed = p.completed, total = p.total, "progress");
    })?;

    let target = match (out_dir, document.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => document.to_path_buf(),
    };
    host.save(&target)?;
    info!(document = host.document_name(), saved = %target.display(), "document saved");
    Ok(report)
}
