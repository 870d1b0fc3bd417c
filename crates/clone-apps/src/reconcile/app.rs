use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::{Reconciler, absorb};
use crate::error::{Error, Result};
use crate::model::{App, BindingKind, ImportedApp, ImportedBinding, ImportedService, Resolution};
use crate::platform::{self, Method};
use crate::workspace::{ArtifactKind, artifact_file_name};

/// Apps are created stopped; the recorded source state drives a later restore.
const CREATE_STATE: &str = "STOPPED";

/// `web.apps.example.com` -> (`web`, `apps.example.com`).
pub(crate) fn split_route(url: &str) -> Option<(&str, &str)> {
    let (host, domain) = url.split_once('.')?;
    if host.is_empty() || domain.is_empty() {
        return None;
    }
    Some((host, domain))
}

impl Reconciler<'_> {
    /// Resolves one app. Routes and service bindings are only attached to
    /// apps created by this call; an app that already exists is left as is.
    pub fn check_app(
        &self,
        app: &App,
        siblings: &[ImportedService],
        space_guid: &str,
    ) -> Result<ImportedApp> {
        let mut out = ImportedApp {
            name: app.name.clone(),
            resolution: Resolution::Skipped {
                reason: String::new(),
            },
            droplet: artifact_file_name(&app.name, &app.guid, ArtifactKind::Droplet),
            src: artifact_file_name(&app.name, &app.guid, ArtifactKind::Source),
            state: app.state.clone(),
            bindings: vec![],
        };

        if let Some(paths) = &self.options.require_artifacts_in {
            let src = paths.artifact_named(&out.src);
            if !src.is_file() {
                warn!(app = %app.name, path = %src.display(), "source bundle missing, app skipped");
                out.resolution = Resolution::Skipped {
                    reason: format!("source bundle {} not found", src.display()),
                };
                return Ok(out);
            }
        }

        info!(app = %app.name, space_guid, "looking for app");
        let found = platform::find_one::<Value>(
            self.api,
            "/v2/apps",
            &[("name", &app.name), ("space_guid", space_guid)],
        );
        match found {
            Ok(Some(existing)) => {
                info!(app = %app.name, guid = %existing.metadata.guid, "found existing app");
                out.resolution = Resolution::Found {
                    guid: existing.metadata.guid,
                };
                return Ok(out);
            }
            Ok(None) => {}
            Err(e) => {
                out.resolution = absorb("app", &app.name, e)?;
                return Ok(out);
            }
        }

        out.resolution = self.create("app", &app.name, "/v2/apps", &app_payload(app, space_guid));
        let Some(app_guid) = out.resolution.guid().map(str::to_owned) else {
            return Ok(out);
        };

        for url in &app.urls {
            let (target, res) = match self.bind_route(url, &app_guid, space_guid) {
                Ok(ok) => ok,
                Err(e) => (url.clone(), absorb("route", url, e)?),
            };
            out.bindings.push(ImportedBinding {
                kind: BindingKind::Route,
                target,
                resolution: res,
            });
        }

        for name in &app.service_names {
            let res = match self.bind_service(name, siblings, &app_guid) {
                Ok(r) => r,
                Err(e) => absorb("service binding", name, e)?,
            };
            out.bindings.push(ImportedBinding {
                kind: BindingKind::Service,
                target: name.clone(),
                resolution: res,
            });
        }
        Ok(out)
    }

    /// Returns the route as it was attached, which differs from `url` when a
    /// target domain override is set.
    fn bind_route(&self, url: &str, app_guid: &str, space_guid: &str) -> Result<(String, Resolution)> {
        let (host, source_domain) =
            split_route(url).ok_or_else(|| Error::msg(format!("route {url:?} has no host part")))?;
        let domain = self.options.target_domain.as_deref().unwrap_or(source_domain);
        let target = format!("{host}.{domain}");

        let domain_guid = platform::find_one::<Value>(
            self.api,
            "/v2/shared_domains",
            &[("name", domain)],
        )?
        .map(|d| d.metadata.guid)
        .ok_or_else(|| Error::SharedDomainNotFound(domain.to_string()))?;

        let route = match platform::find_one::<Value>(
            self.api,
            "/v2/routes",
            &[("host", host), ("domain_guid", &domain_guid)],
        )? {
            Some(r) => Resolution::Found {
                guid: r.metadata.guid,
            },
            None => {
                let body = json!({ "domain_guid": domain_guid, "space_guid": space_guid, "host": host });
                self.create("route", &target, "/v2/routes", &body)
            }
        };
        let Some(route_guid) = route.guid() else {
            return Ok((target, route));
        };

        let path = format!("/v2/routes/{route_guid}/apps/{app_guid}");
        if let Err(e) = self.api.send(Method::Put, &path, None) {
            error!(route = %target, app_guid, error = %e, "failed to map route to app");
            return Ok((target, Resolution::failed(e)));
        }
        info!(route = %target, app_guid, "mapped route");
        Ok((target, route))
    }

    fn bind_service(&self, name: &str, siblings: &[ImportedService], app_guid: &str) -> Result<Resolution> {
        let instance_guid = siblings
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.resolution.guid())
            .ok_or_else(|| Error::ServiceInstanceNotFound(name.to_string()))?;
        let body = json!({ "service_instance_guid": instance_guid, "app_guid": app_guid });
        Ok(self.create("service binding", name, "/v2/service_bindings", &body))
    }
}

fn non_empty(s: &str) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        Value::String(s.to_string())
    }
}

fn app_payload(app: &App, space_guid: &str) -> Value {
    json!({
        "name": app.name,
        "space_guid": space_guid,
        "memory": app.memory,
        "instances": app.instances,
        "disk_quota": app.disk_quota,
        "state": CREATE_STATE,
        "command": non_empty(&app.command),
        "health_check_type": app.health_check_type,
        "health_check_timeout": app.health_check_timeout,
        "health_check_http_endpoint": non_empty(&app.health_check_http_endpoint),
        "diego": app.diego,
        "enable_ssh": app.enable_ssh,
        "environment_json": app.environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_splits_on_first_dot() {
        assert_eq!(split_route("web.apps.example.com"), Some(("web", "apps.example.com")));
        assert_eq!(split_route("localhost"), None);
        assert_eq!(split_route(".example.com"), None);
    }

    #[test]
    fn payload_creates_stopped_and_omits_empty_strings() {
        let app = App {
            guid: "g".into(),
            name: "worker".into(),
            memory: 256,
            instances: 1,
            disk_quota: 512,
            state: "STARTED".into(),
            health_check_type: "process".into(),
            health_check_timeout: 180,
            diego: true,
            ..App::default()
        };
        let body = app_payload(&app, "s-1");
        assert_eq!(body["state"], "STOPPED");
        assert_eq!(body["space_guid"], "s-1");
        assert!(body["command"].is_null());
        assert!(body["health_check_http_endpoint"].is_null());
        assert_eq!(body["health_check_timeout"], 180);
    }
}
