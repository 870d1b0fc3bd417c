//! Find-or-create walk that reproduces a [`Snapshot`] on a target platform.
//!
//! Every level follows the same shape: look the resource up by exact name in
//! its parent's scope, reuse it when present, create it otherwise. A second run
//! against the same target therefore resolves everything to the guids the
//! first run created. Two importers running at the same time can both miss a
//! lookup and both create; nothing here guards against that.
//!
//! Lookups that fail return `Err` from the individual `check_*` step. Create
//! calls the platform rejects are logged with their payload and end up as
//! [`Resolution::Failed`]; the walk carries on with the next resource.

use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::model::{
    ImportedOrg, ImportedSecurityGroup, ImportedService, ImportedSpace, Org, Quota, Resolution,
    SecurityGroup, Service, ServiceKind, Snapshot,
};
use crate::platform::resources::{ServiceOfferingEntity, ServicePlanEntity};
use crate::platform::{self, Method, PlatformApi};
use crate::workspace::WorkspacePaths;

mod app;

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Only this organization is reconciled.
    pub org_filter: Option<String>,
    /// Routes are recreated on this domain, keeping their host.
    pub target_domain: Option<String>,
    /// When set, apps whose source bundle is missing here are skipped.
    pub require_artifacts_in: Option<WorkspacePaths>,
}

pub struct Reconciler<'a> {
    api: &'a dyn PlatformApi,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(api: &'a dyn PlatformApi, options: ReconcileOptions) -> Self {
        Self { api, options }
    }

    pub fn reconcile(&self, snapshot: &Snapshot) -> Result<Vec<ImportedOrg>> {
        let mut out = Vec::new();
        for org in &snapshot.orgs {
            if let Some(filter) = self.options.org_filter.as_deref()
                && org.name != filter
            {
                continue;
            }
            out.push(self.reconcile_org(org)?);
        }
        Ok(out)
    }

    fn reconcile_org(&self, org: &Org) -> Result<ImportedOrg> {
        let resolution = match self.check_org(org) {
            Ok(r) => r,
            Err(e) => absorb("org", &org.name, e)?,
        };
        let Some(org_guid) = resolution.guid().map(str::to_owned) else {
            let spaces = org
                .spaces
                .iter()
                .map(|s| skipped_space(&s.name, "organization unresolved"))
                .collect();
            return Ok(ImportedOrg {
                name: org.name.clone(),
                resolution,
                spaces,
            });
        };

        let mut spaces = Vec::with_capacity(org.spaces.len());
        for space in &org.spaces {
            let resolution = match self.check_space(&space.name, &org_guid) {
                Ok(r) => r,
                Err(e) => absorb("space", &space.name, e)?,
            };
            let Some(space_guid) = resolution.guid().map(str::to_owned) else {
                spaces.push(ImportedSpace {
                    resolution,
                    ..skipped_space(&space.name, "")
                });
                continue;
            };

            let mut security_groups = Vec::new();
            for (sg, staging) in space
                .security_groups
                .iter()
                .map(|sg| (sg, false))
                .chain(space.staging_security_groups.iter().map(|sg| (sg, true)))
            {
                let imported = match self.check_security_group(sg, &space_guid, staging) {
                    Ok(i) => i,
                    Err(e) => ImportedSecurityGroup {
                        name: sg.name.clone(),
                        staging,
                        resolution: absorb("security group", &sg.name, e)?,
                    },
                };
                security_groups.push(imported);
            }

            // Resolved once per space; app bindings read guids from here.
            let mut services = Vec::with_capacity(space.services.len());
            for svc in &space.services {
                let imported = match self.check_service_instance(svc, &space_guid) {
                    Ok(i) => i,
                    Err(e) => ImportedService {
                        name: svc.instance_name.clone(),
                        resolution: absorb("service instance", &svc.instance_name, e)?,
                    },
                };
                services.push(imported);
            }

            let mut apps = Vec::with_capacity(space.apps.len());
            for a in &space.apps {
                apps.push(self.check_app(a, &services, &space_guid)?);
            }

            spaces.push(ImportedSpace {
                name: space.name.clone(),
                resolution,
                apps,
                services,
                security_groups,
            });
        }

        Ok(ImportedOrg {
            name: org.name.clone(),
            resolution,
            spaces,
        })
    }

    pub fn check_org(&self, org: &Org) -> Result<Resolution> {
        info!(org = %org.name, "looking for organization");
        if let Some(found) =
            platform::find_one::<Value>(self.api, "/v2/organizations", &[("name", &org.name)])?
        {
            info!(org = %org.name, guid = %found.metadata.guid, "found existing organization");
            return Ok(Resolution::Found {
                guid: found.metadata.guid,
            });
        }

        let mut body = json!({ "name": org.name });
        if let Some(quota_guid) = self.quota_for(&org.quota) {
            body["quota_definition_guid"] = Value::String(quota_guid);
        }
        Ok(self.create("organization", &org.name, "/v2/organizations", &body))
    }

    pub fn check_space(&self, name: &str, org_guid: &str) -> Result<Resolution> {
        info!(space = name, org_guid, "looking for space");
        let scope = format!("/v2/organizations/{org_guid}/spaces");
        if let Some(found) = platform::find_one::<Value>(self.api, &scope, &[("name", name)])? {
            info!(space = name, guid = %found.metadata.guid, "found existing space");
            return Ok(Resolution::Found {
                guid: found.metadata.guid,
            });
        }
        let body = json!({ "name": name, "organization_guid": org_guid });
        Ok(self.create("space", name, "/v2/spaces", &body))
    }

    pub fn check_service_instance(&self, svc: &Service, space_guid: &str) -> Result<ImportedService> {
        let name = svc.instance_name.as_str();
        let resolution = match &svc.kind {
            ServiceKind::Managed { label, plan } => {
                let plan_guid = self.service_plan_guid(label, plan)?;
                match self.find_in_space("/v2/service_instances", name, space_guid)? {
                    Some(guid) => {
                        info!(service = name, %guid, "found existing service instance");
                        Resolution::Found { guid }
                    }
                    None => {
                        let body = json!({
                            "name": name,
                            "space_guid": space_guid,
                            "service_plan_guid": plan_guid,
                        });
                        self.create(
                            "service instance",
                            name,
                            "/v2/service_instances?accepts_incomplete=true",
                            &body,
                        )
                    }
                }
            }
            ServiceKind::UserProvided {
                credentials,
                syslog_drain_url,
            } => match self.find_in_space("/v2/user_provided_service_instances", name, space_guid)? {
                Some(guid) => {
                    info!(service = name, %guid, "found existing user-provided service instance");
                    Resolution::Found { guid }
                }
                None => {
                    let body = json!({
                        "name": name,
                        "space_guid": space_guid,
                        "credentials": credentials,
                        "syslog_drain_url": syslog_drain_url,
                    });
                    self.create(
                        "user-provided service instance",
                        name,
                        "/v2/user_provided_service_instances",
                        &body,
                    )
                }
            },
        };
        Ok(ImportedService {
            name: name.to_string(),
            resolution,
        })
    }

    pub fn check_security_group(
        &self,
        sg: &SecurityGroup,
        space_guid: &str,
        staging: bool,
    ) -> Result<ImportedSecurityGroup> {
        let mut resolution = match platform::find_one::<Value>(
            self.api,
            "/v2/security_groups",
            &[("name", &sg.name)],
        )? {
            Some(found) => Resolution::Found {
                guid: found.metadata.guid,
            },
            None => {
                let rules: Vec<Value> = sg
                    .rules
                    .iter()
                    .map(|r| {
                        let mut rule = json!({ "protocol": r.protocol, "destination": r.destination });
                        if !r.ports.is_empty() {
                            rule["ports"] = Value::String(r.ports.clone());
                        }
                        if !r.description.is_empty() {
                            rule["description"] = Value::String(r.description.clone());
                        }
                        if r.log {
                            rule["log"] = Value::Bool(true);
                        }
                        rule
                    })
                    .collect();
                let body = json!({ "name": sg.name, "rules": rules });
                self.create("security group", &sg.name, "/v2/security_groups", &body)
            }
        };

        if let Some(guid) = resolution.guid() {
            let scope = if staging { "staging_spaces" } else { "spaces" };
            let path = format!("/v2/security_groups/{guid}/{scope}/{space_guid}");
            if let Err(e) = self.api.send(Method::Put, &path, None) {
                error!(security_group = %sg.name, space_guid, error = %e, "failed to bind security group to space");
                resolution = Resolution::failed(format!("bind to space failed: {e}"));
            }
        }
        Ok(ImportedSecurityGroup {
            name: sg.name.clone(),
            staging,
            resolution,
        })
    }

    fn service_plan_guid(&self, label: &str, plan: &str) -> Result<String> {
        let offering = platform::find_one::<ServiceOfferingEntity>(
            self.api,
            "/v2/services",
            &[("label", label)],
        )?
        .filter(|o| o.entity.label == label)
        .ok_or_else(|| Error::ManagedServiceNotFound(label.to_string()))?;

        platform::fetch_all::<ServicePlanEntity>(self.api, &offering.entity.service_plans_url)?
            .into_iter()
            .find(|p| p.entity.name == plan)
            .map(|p| p.metadata.guid)
            .ok_or_else(|| Error::ManagedServicePlanNotFound {
                label: label.to_string(),
                plan: plan.to_string(),
            })
    }

    fn find_in_space(&self, collection: &str, name: &str, space_guid: &str) -> Result<Option<String>> {
        Ok(platform::find_one::<Value>(
            self.api,
            collection,
            &[("name", name), ("space_guid", space_guid)],
        )?
        .map(|r| r.metadata.guid))
    }

    // Quota problems never block the org itself.
    fn quota_for(&self, quota: &Quota) -> Option<String> {
        if quota.name.is_empty() {
            return None;
        }
        let found = platform::find_one::<Value>(
            self.api,
            "/v2/quota_definitions",
            &[("name", &quota.name)],
        );
        match found {
            Ok(Some(q)) => return Some(q.metadata.guid),
            Ok(None) => {}
            Err(e) => {
                warn!(quota = %quota.name, error = %e, "quota lookup failed, org keeps the default quota");
                return None;
            }
        }
        let body = match serde_json::to_value(quota) {
            Ok(b) => b,
            Err(e) => {
                warn!(quota = %quota.name, error = %e, "quota could not be encoded");
                return None;
            }
        };
        self.create("quota definition", &quota.name, "/v2/quota_definitions", &body)
            .guid()
            .map(str::to_owned)
    }

    fn create(&self, kind: &str, name: &str, path: &str, body: &Value) -> Resolution {
        info!(kind, name, payload = %body, "creating");
        match platform::create::<Value>(self.api, Method::Post, path, body) {
            Ok(created) => {
                info!(kind, name, guid = %created.metadata.guid, "created");
                Resolution::Created {
                    guid: created.metadata.guid,
                }
            }
            Err(e) => {
                error!(kind, name, payload = %body, error = %e, "create failed");
                Resolution::failed(e)
            }
        }
    }
}

/// Turns a failed step into a tagged failure. Decode errors mean the platform
/// answered with something this client does not understand and stop the walk.
fn absorb(kind: &str, name: &str, err: Error) -> Result<Resolution> {
    if matches!(err, Error::Decode { .. }) {
        return Err(err);
    }
    if err.is_not_found() {
        warn!(kind, name, error = %err, "dependency not found on target");
    } else {
        error!(kind, name, error = %err, "lookup failed");
    }
    Ok(Resolution::failed(err))
}

fn skipped_space(name: &str, reason: &str) -> ImportedSpace {
    ImportedSpace {
        name: name.to_string(),
        resolution: Resolution::Skipped {
            reason: reason.to_string(),
        },
        apps: vec![],
        services: vec![],
        security_groups: vec![],
    }
}
