use std::fs;
use std::path::{Component, Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SNAPSHOT_FILE: &str = "apps.json";
pub const IMPORTED_FILE: &str = "imported_apps.json";

fn default_dir() -> String {
    ".".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "default_dir")]
    pub dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Droplet,
    Source,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Droplet => "droplet",
            Self::Source => "src",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Droplet => write!(f, "droplet"),
            Self::Source => write!(f, "source"),
        }
    }
}

/// `<escaped app name>_<app guid>.<droplet|src>`. Export and import both derive
/// artifact locations from this alone.
pub fn artifact_file_name(app_name: &str, app_guid: &str, kind: ArtifactKind) -> String {
    format!("{}_{}.{}", escape_path_segment(app_name), app_guid, kind.extension())
}

/// `<artifact>.error.<status>`
pub fn error_sidecar_name(file: &Path, status: u16) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(format!(".error.{status}"));
    PathBuf::from(name)
}

// Unreserved characters plus the sub-delims that are legal inside a single
// path segment stay as they are.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

fn escape_path_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn imported_file(&self) -> PathBuf {
        self.root.join(IMPORTED_FILE)
    }

    pub fn artifact(&self, app_name: &str, app_guid: &str, kind: ArtifactKind) -> PathBuf {
        self.root.join(artifact_file_name(app_name, app_guid, kind))
    }

    pub fn artifact_named(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

pub fn load_paths(cfg: &WorkspaceConfig) -> Result<WorkspacePaths> {
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    let dir = cfg.dir.trim();
    if dir.is_empty() {
        return Err(Error::msg("empty workspace dir"));
    }
    let pb = PathBuf::from(dir);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) && !pb.is_absolute() {
        return Err(Error::msg(format!(
            "invalid workspace dir '{}' (contains '..')",
            dir
        )));
    }
    let root = if pb.is_absolute() { pb } else { cwd.join(pb) };
    Ok(WorkspacePaths { root })
}

pub fn init_dirs(cfg: &WorkspaceConfig) -> Result<WorkspacePaths> {
    let paths = load_paths(cfg)?;
    fs::create_dir_all(&paths.root).map_err(|e| {
        Error::msg(format!(
            "failed to create workspace dir {}: {e}",
            paths.root.display()
        ))
    })?;
    Ok(paths)
}
