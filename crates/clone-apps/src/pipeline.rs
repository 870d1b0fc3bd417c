//! Export and import phases, in the order the command line runs them.

use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::{error, info};

use crate::config::ExportConfig;
use crate::error::Result;
use crate::model::{Failure, ImportedOrg, Resolution, Snapshot, collect_failures};
use crate::platform::PlatformApi;
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::snapshot::{SnapshotBuilder, SnapshotStore};
use crate::transfer::{Direction, TransferCoordinator, TransferOutcome, TransferReport, TransferTask};
use crate::workspace::{ArtifactKind, WorkspacePaths};

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub org: Option<String>,
    /// Also fetch droplets and source bundles.
    pub download: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub org: Option<String>,
    pub domain: Option<String>,
    pub restore: bool,
    pub skip_missing_bits: bool,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub document: PathBuf,
    pub orgs: usize,
    pub spaces: usize,
    pub apps: usize,
    pub services: usize,
    pub downloads: Option<TransferReport>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// `org/space/app` of every app a start was issued for.
    pub started: Vec<String>,
    pub failed: Vec<Failure>,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub document: PathBuf,
    pub imported: Vec<ImportedOrg>,
    pub uploads: TransferReport,
    pub restore: Option<RestoreReport>,
    pub failures: Vec<Failure>,
}

pub fn export(
    api: &dyn PlatformApi,
    transfers: &TransferCoordinator,
    cfg: &ExportConfig,
    store: &SnapshotStore,
    opts: &ExportOptions,
) -> Result<ExportSummary> {
    let snapshot = SnapshotBuilder::new(api, cfg.excluded_orgs.clone()).build(opts.org.as_deref())?;
    let document = store.save(&snapshot)?;

    let downloads = opts
        .download
        .then(|| transfers.run(Direction::Download, download_tasks(&snapshot, store.paths())));
    let failures = downloads
        .as_ref()
        .map(|r| transfer_failures(r, "download"))
        .unwrap_or_default();

    Ok(ExportSummary {
        document,
        orgs: snapshot.orgs.len(),
        spaces: snapshot.orgs.iter().map(|o| o.spaces.len()).sum(),
        apps: snapshot.apps().count(),
        services: snapshot
            .orgs
            .iter()
            .flat_map(|o| &o.spaces)
            .map(|s| s.services.len())
            .sum(),
        downloads,
        failures,
    })
}

pub fn import(
    api: &dyn PlatformApi,
    transfers: &TransferCoordinator,
    store: &SnapshotStore,
    opts: &ImportOptions,
) -> Result<ImportSummary> {
    let snapshot = store.load()?;
    let reconciler = Reconciler::new(
        api,
        ReconcileOptions {
            org_filter: opts.org.clone(),
            target_domain: opts.domain.clone(),
            require_artifacts_in: opts.skip_missing_bits.then(|| store.paths().clone()),
        },
    );
    let imported = reconciler.reconcile(&snapshot)?;

    let uploads = transfers.run(Direction::Upload, upload_tasks(&imported, store.paths()));
    let document = store.save_imported(&imported)?;

    let restore = opts.restore.then(|| restore_states(api, &imported));

    let mut failures = collect_failures(&imported);
    failures.extend(transfer_failures(&uploads, "upload"));
    if let Some(r) = &restore {
        failures.extend(r.failed.iter().cloned());
    }
    Ok(ImportSummary {
        document,
        imported,
        uploads,
        restore,
        failures,
    })
}

/// Starts every resolved app whose source state was `STARTED`.
pub fn restore_states(api: &dyn PlatformApi, imported: &[ImportedOrg]) -> RestoreReport {
    let mut report = RestoreReport::default();
    for org in imported {
        for space in &org.spaces {
            for app in &space.apps {
                let Some(guid) = app.resolution.guid() else {
                    continue;
                };
                if !app.was_started() {
                    continue;
                }
                let path = format!("{}/{}/{}", org.name, space.name, app.name);
                match api.start_app(guid) {
                    Ok(()) => {
                        info!(app = %path, guid, "started");
                        report.started.push(path);
                    }
                    Err(e) => {
                        error!(app = %path, guid, error = %e, "failed to start app");
                        report.failed.push(Failure {
                            path,
                            kind: "start",
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
    }
    report
}

pub fn download_tasks(snapshot: &Snapshot, paths: &WorkspacePaths) -> Vec<TransferTask> {
    let mut out = Vec::new();
    for (_, _, app) in snapshot.apps() {
        for (kind, remote) in [
            (ArtifactKind::Droplet, format!("/v2/apps/{}/droplet/download", app.guid)),
            (ArtifactKind::Source, format!("/v2/apps/{}/download", app.guid)),
        ] {
            let file = paths.artifact(&app.name, &app.guid, kind);
            out.push(TransferTask {
                label: file_label(&file),
                kind,
                remote_path: remote,
                file,
            });
        }
    }
    out
}

/// Upload tasks for every app that resolved to a target guid, keyed off the
/// artifact names recorded at import time.
pub fn upload_tasks(imported: &[ImportedOrg], paths: &WorkspacePaths) -> Vec<TransferTask> {
    let mut out = Vec::new();
    for space in imported.iter().flat_map(|o| &o.spaces) {
        for app in &space.apps {
            let Some(guid) = app.resolution.guid() else {
                continue;
            };
            out.push(TransferTask {
                label: app.droplet.clone(),
                kind: ArtifactKind::Droplet,
                remote_path: format!("/v2/apps/{guid}/droplet/upload"),
                file: paths.artifact_named(&app.droplet),
            });
            out.push(TransferTask {
                label: app.src.clone(),
                kind: ArtifactKind::Source,
                remote_path: format!("/v2/apps/{guid}/bits"),
                file: paths.artifact_named(&app.src),
            });
        }
    }
    out
}

fn file_label(file: &std::path::Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn transfer_failures(report: &TransferReport, kind: &'static str) -> Vec<Failure> {
    report
        .results
        .iter()
        .filter_map(|r| match &r.outcome {
            TransferOutcome::Failed { error, .. } => Some(Failure {
                path: r.task.label.clone(),
                kind,
                error: error.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn push_failures(out: &mut String, failures: &[Failure]) {
    if failures.is_empty() {
        return;
    }
    let _ = writeln!(out, "  failures:");
    for f in failures {
        let _ = writeln!(out, "    [{}] {}: {}", f.kind, f.path, f.error);
    }
}

fn transfer_line(report: &TransferReport) -> String {
    let mut skipped = 0;
    let mut cancelled = 0;
    for r in &report.results {
        match r.outcome {
            TransferOutcome::Skipped { .. } => skipped += 1,
            TransferOutcome::Cancelled => cancelled += 1,
            _ => {}
        }
    }
    format!(
        "total={} ok={} failed={} skipped={skipped} cancelled={cancelled}",
        report.results.len(),
        report.completed(),
        report.failed().count(),
    )
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    found: usize,
    created: usize,
    failed: usize,
    skipped: usize,
}

impl Tally {
    fn add(&mut self, r: &Resolution) {
        match r {
            Resolution::Found { .. } => self.found += 1,
            Resolution::Created { .. } => self.created += 1,
            Resolution::Failed { .. } => self.failed += 1,
            Resolution::Skipped { .. } => self.skipped += 1,
        }
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "found={} created={} failed={} skipped={}",
            self.found, self.created, self.failed, self.skipped
        )
    }
}

impl ExportSummary {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("SUMMARY:\n");
        let _ = writeln!(out, "  status: {}", if self.is_ok() { "ok" } else { "partial" });
        let _ = writeln!(out, "  snapshot: {}", self.document.display());
        let _ = writeln!(
            out,
            "  exported: orgs={} spaces={} apps={} services={}",
            self.orgs, self.spaces, self.apps, self.services
        );
        if let Some(d) = &self.downloads {
            let _ = writeln!(out, "  downloads: {}", transfer_line(d));
        }
        push_failures(&mut out, &self.failures);
        out
    }
}

impl ImportSummary {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn render(&self) -> String {
        let (mut orgs, mut spaces, mut services, mut apps) = (
            Tally::default(),
            Tally::default(),
            Tally::default(),
            Tally::default(),
        );
        for org in &self.imported {
            orgs.add(&org.resolution);
            for space in &org.spaces {
                spaces.add(&space.resolution);
                space.services.iter().for_each(|s| services.add(&s.resolution));
                space.apps.iter().for_each(|a| apps.add(&a.resolution));
            }
        }

        let mut out = String::from("SUMMARY:\n");
        let _ = writeln!(out, "  status: {}", if self.is_ok() { "ok" } else { "partial" });
        let _ = writeln!(out, "  result: {}", self.document.display());
        let _ = writeln!(out, "  orgs: {orgs}");
        let _ = writeln!(out, "  spaces: {spaces}");
        let _ = writeln!(out, "  services: {services}");
        let _ = writeln!(out, "  apps: {apps}");
        let _ = writeln!(out, "  uploads: {}", transfer_line(&self.uploads));
        if let Some(r) = &self.restore {
            let _ = writeln!(out, "  restored: started={} failed={}", r.started.len(), r.failed.len());
        }
        push_failures(&mut out, &self.failures);
        out
    }
}
