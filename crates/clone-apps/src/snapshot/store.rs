use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{ImportedOrg, Snapshot};
use crate::workspace::WorkspacePaths;

/// Reads and writes `apps.json` and `imported_apps.json` in the workspace.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    paths: WorkspacePaths,
}

impl SnapshotStore {
    pub fn new(paths: WorkspacePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let p = self.paths.snapshot_file();
        write_json(&p, snapshot)?;
        info!(path = %p.display(), orgs = snapshot.orgs.len(), "wrote snapshot");
        Ok(p)
    }

    pub fn load(&self) -> Result<Snapshot> {
        read_json(&self.paths.snapshot_file(), "snapshot")
    }

    pub fn save_imported(&self, orgs: &[ImportedOrg]) -> Result<PathBuf> {
        let p = self.paths.imported_file();
        write_json(&p, &orgs)?;
        info!(path = %p.display(), orgs = orgs.len(), "wrote import result");
        Ok(p)
    }

    pub fn load_imported(&self) -> Result<Vec<ImportedOrg>> {
        read_json(&self.paths.imported_file(), "import result")
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {what} {}: {e}", path.display())))?;
    serde_json::from_str::<T>(&raw).map_err(|e| Error::decode(format!("{what} {}", path.display()), e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| Error::msg(format!("failed to encode {}: {e}", path.display())))?;
    atomic_write_text(path, &body)
}

// Readers never observe a half-written document.
fn atomic_write_text(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", parent.display())))?;
    }
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::msg(format!(
            "invalid file path for atomic write: {}",
            path.display()
        ))
    })?;
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::write(&tmp, body)
        .map_err(|e| Error::msg(format!("failed to write temp file {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        Error::msg(format!(
            "failed to rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        ))
    })?;
    Ok(())
}
