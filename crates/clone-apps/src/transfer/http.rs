use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use reqwest::blocking::{Client, Response, multipart};
use reqwest::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::log_sanitize::body_excerpt;
use crate::platform::HttpPlatform;
use crate::platform::PlatformApi;
use crate::transfer::retry::AttemptError;
use crate::workspace::{ArtifactKind, error_sidecar_name};

/// Multipart field names the platform expects for each artifact kind.
pub fn upload_field(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Droplet => "droplet",
        ArtifactKind::Source => "application",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Retryable,
    Terminal,
    /// Anything else: the body is kept as the artifact.
    Keep,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        404 => StatusClass::Terminal,
        408 => StatusClass::Retryable,
        s if s >= 500 => StatusClass::Retryable,
        _ => StatusClass::Keep,
    }
}

/// Binary GET/PUT against the platform, sharing the API client's connection
/// pool and credentials.
#[derive(Clone)]
pub struct ArtifactClient {
    client: Client,
    endpoint: String,
    authorization: String,
}

impl ArtifactClient {
    pub fn new(client: Client, endpoint: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            authorization: authorization.into(),
        }
    }

    pub fn from_platform(api: &HttpPlatform) -> Self {
        Self::new(api.client().clone(), api.endpoint(), api.authorization())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// One download attempt. Error statuses leave a `<file>.error.<status>`
    /// sidecar holding the response body.
    pub fn download_once(&self, remote_path: &str, file: &Path) -> std::result::Result<(), AttemptError> {
        let mut res = self
            .client
            .get(self.url(remote_path))
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .map_err(|e| AttemptError::Retryable {
                status: None,
                message: format!("GET {remote_path} failed: {e}"),
            })?;
        let status = res.status().as_u16();
        debug!(path = remote_path, status, "download response");

        let class = classify_status(status);
        if class != StatusClass::Keep {
            let body = res.bytes().map(|b| b.to_vec()).unwrap_or_default();
            let sidecar = error_sidecar_name(file, status);
            if let Err(e) = fs::write(&sidecar, &body) {
                warn!(path = %sidecar.display(), error = %e, "failed to write error sidecar");
            }
            let message = format!("GET {remote_path}: {}", body_excerpt(&body));
            return Err(if class == StatusClass::Retryable {
                AttemptError::Retryable {
                    status: Some(status),
                    message,
                }
            } else {
                AttemptError::Terminal {
                    status: Some(status),
                    message,
                }
            });
        }
        if !res.status().is_success() {
            warn!(path = remote_path, status, file = %file.display(), "unexpected status, keeping response body as artifact");
        }

        write_body(&mut res, file).map_err(|e| AttemptError::Retryable {
            status: None,
            message: format!("GET {remote_path}: {e}"),
        })
    }

    /// Multipart PUT of a local artifact.
    pub fn upload(&self, remote_path: &str, kind: ArtifactKind, file: &Path) -> Result<()> {
        let mut form = multipart::Form::new();
        if kind == ArtifactKind::Source {
            form = form.text("resources", "[]");
        }
        let form = form
            .file(upload_field(kind), file)
            .map_err(|e| Error::msg(format!("failed to open {}: {e}", file.display())))?;

        let res = self
            .client
            .put(self.url(remote_path))
            .header(AUTHORIZATION, &self.authorization)
            .multipart(form)
            .send()
            .map_err(|e| Error::msg(format!("PUT {remote_path} failed: {e}")))?;
        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.bytes().map(|b| b.to_vec()).unwrap_or_default();
        Err(Error::Api {
            method: "PUT".into(),
            path: remote_path.to_string(),
            status: status.as_u16(),
            body: body_excerpt(&body),
        })
    }
}

// Streams into `<file>.part`, then renames.
fn write_body(res: &mut Response, file: &Path) -> Result<()> {
    let mut part = file.as_os_str().to_owned();
    part.push(".part");
    let tmp = PathBuf::from(part);
    let mut out = fs::File::create(&tmp)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", tmp.display())))?;
    res.copy_to(&mut out)
        .map_err(|e| Error::msg(format!("body read failed: {e}")))?;
    out.flush()?;
    fs::rename(&tmp, file).map_err(|e| {
        Error::msg(format!("failed to rename {} -> {}: {e}", tmp.display(), file.display()))
    })
}
