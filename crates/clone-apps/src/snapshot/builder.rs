use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{App, Org, Quota, Rule, SecurityGroup, Service, ServiceKind, Snapshot, Space};
use crate::platform::resources::{
    OrgEntity, QuotaEntity, RuleEntity, SecurityGroupEntity, SpaceEntity, SpaceSummary,
    SummaryApp, SummaryService, UserProvidedEntity, unredact,
};
use crate::platform::{self, PlatformApi, Resource};

pub const DEFAULT_HEALTH_CHECK_TIMEOUT: u32 = 180;

/// Walks the source platform and captures it as a [`Snapshot`].
///
/// The walk is sequential and all-or-nothing: the first failed fetch aborts
/// the build.
pub struct SnapshotBuilder<'a> {
    api: &'a dyn PlatformApi,
    excluded_orgs: Vec<String>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(api: &'a dyn PlatformApi, excluded_orgs: Vec<String>) -> Self {
        Self { api, excluded_orgs }
    }

    pub fn build(&self, scope_org: Option<&str>) -> Result<Snapshot> {
        let raw_orgs = match scope_org {
            Some(name) => vec![self.find_org(name)?],
            None => self.list_orgs()?,
        };

        let quotas = if raw_orgs.is_empty() {
            HashMap::new()
        } else {
            self.quota_table()?
        };

        let mut orgs = Vec::with_capacity(raw_orgs.len());
        for org in raw_orgs {
            info!(org = %org.entity.name, "exporting organization");
            let quota = match quotas.get(&org.entity.quota_definition_guid) {
                Some(q) => q.clone(),
                None => {
                    warn!(
                        org = %org.entity.name,
                        quota_guid = %org.entity.quota_definition_guid,
                        "quota definition not in quota table, exporting an empty quota"
                    );
                    Quota::default()
                }
            };
            let spaces = self.spaces(&org.entity.spaces_url)?;
            orgs.push(Org {
                name: org.entity.name,
                quota,
                spaces,
            });
        }
        Ok(Snapshot { orgs })
    }

    fn find_org(&self, name: &str) -> Result<Resource<OrgEntity>> {
        platform::find_one::<OrgEntity>(self.api, "/v2/organizations", &[("name", name)])?
            .filter(|o| o.entity.name == name)
            .ok_or_else(|| Error::OrgNotFound(name.to_string()))
    }

    fn list_orgs(&self) -> Result<Vec<Resource<OrgEntity>>> {
        let all = platform::fetch_all::<OrgEntity>(self.api, "/v2/organizations")?;
        Ok(all
            .into_iter()
            .filter(|o| {
                let skip = self.excluded_orgs.iter().any(|x| *x == o.entity.name);
                if skip {
                    debug!(org = %o.entity.name, "skipping reserved organization");
                }
                !skip
            })
            .collect())
    }

    // One paginated walk for every org instead of one call per org.
    fn quota_table(&self) -> Result<HashMap<String, Quota>> {
        let all = platform::fetch_all::<QuotaEntity>(self.api, "/v2/quota_definitions")?;
        Ok(all
            .into_iter()
            .map(|q| (q.metadata.guid, quota_from_entity(q.entity)))
            .collect())
    }

    fn spaces(&self, spaces_url: &str) -> Result<Vec<Space>> {
        let raw = platform::fetch_all::<SpaceEntity>(self.api, spaces_url)?;
        let mut out = Vec::with_capacity(raw.len());
        for s in raw {
            let base = if s.metadata.url.is_empty() {
                format!("/v2/spaces/{}", s.metadata.guid)
            } else {
                s.metadata.url.clone()
            };
            debug!(space = %s.entity.name, "exporting space");

            let summary: SpaceSummary =
                platform::decode(&format!("{base}/summary"), self.api.get(&format!("{base}/summary"))?)?;
            let apps = summary.apps.into_iter().map(extract_app).collect();
            let mut services = Vec::with_capacity(summary.services.len());
            for svc in summary.services {
                if let Some(s) = self.extract_service(svc)? {
                    services.push(s);
                }
            }
            let security_groups = self.security_groups(&format!("{base}/security_groups"))?;
            let staging_security_groups =
                self.security_groups(&format!("{base}/staging_security_groups"))?;

            out.push(Space {
                name: s.entity.name,
                apps,
                services,
                security_groups,
                staging_security_groups,
            });
        }
        Ok(out)
    }

    fn extract_service(&self, svc: SummaryService) -> Result<Option<Service>> {
        match svc.service_plan {
            Some(plan) => match plan.service {
                Some(offering) => Ok(Some(Service {
                    instance_name: svc.name,
                    kind: ServiceKind::Managed {
                        label: offering.label,
                        plan: plan.name,
                    },
                })),
                None => {
                    warn!(service = %svc.name, "service plan has no offering, not exported");
                    Ok(None)
                }
            },
            None => {
                let path = format!("/v2/user_provided_service_instances/{}", svc.guid);
                let ups: Resource<UserProvidedEntity> =
                    platform::decode(&path, self.api.get(&path)?)?;
                Ok(Some(Service {
                    instance_name: svc.name,
                    kind: ServiceKind::UserProvided {
                        credentials: unredact(ups.entity.credentials),
                        syslog_drain_url: ups.entity.syslog_drain_url.unwrap_or_default(),
                    },
                }))
            }
        }
    }

    fn security_groups(&self, path: &str) -> Result<Vec<SecurityGroup>> {
        let raw = platform::fetch_all::<SecurityGroupEntity>(self.api, path)?;
        Ok(raw
            .into_iter()
            .map(|sg| SecurityGroup {
                name: sg.entity.name,
                rules: sg.entity.rules.into_iter().map(extract_rule).collect(),
                running_default: sg.entity.running_default,
                staging_default: sg.entity.staging_default,
            })
            .collect())
    }
}

pub fn extract_app(a: SummaryApp) -> App {
    let mut endpoint = a.health_check_http_endpoint.unwrap_or_default();
    if a.health_check_type == "http" && endpoint.is_empty() {
        endpoint = "/".into();
    }
    let command = a
        .command
        .filter(|c| !c.trim().is_empty())
        .or(a.detected_start_command)
        .unwrap_or_default();
    App {
        guid: a.guid,
        name: a.name,
        memory: a.memory,
        instances: a.instances,
        disk_quota: a.disk_quota,
        state: a.state,
        command,
        health_check_type: a.health_check_type,
        health_check_timeout: a.health_check_timeout.unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT),
        health_check_http_endpoint: endpoint,
        diego: a.diego,
        enable_ssh: a.enable_ssh,
        environment: unredact(a.environment_json),
        service_names: a.service_names,
        urls: a.urls,
    }
}

pub fn extract_rule(r: RuleEntity) -> Rule {
    Rule {
        description: r.description.unwrap_or_default(),
        destination: r.destination.unwrap_or_default(),
        log: r.log.unwrap_or(false),
        ports: r.ports.unwrap_or_default(),
        protocol: r.protocol.unwrap_or_default(),
    }
}

fn quota_from_entity(q: QuotaEntity) -> Quota {
    Quota {
        name: q.name,
        non_basic_services_allowed: q.non_basic_services_allowed,
        total_services: q.total_services,
        total_routes: q.total_routes,
        total_private_domains: q.total_private_domains,
        memory_limit: q.memory_limit,
        trial_db_allowed: q.trial_db_allowed,
        instance_memory_limit: q.instance_memory_limit,
        app_instance_limit: q.app_instance_limit,
        app_task_limit: q.app_task_limit,
        total_service_keys: q.total_service_keys,
        total_reserved_route_ports: q.total_reserved_route_ports,
    }
}
