use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATE_STARTED: &str = "STARTED";

/// Everything captured from the source platform, in the order it was listed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub orgs: Vec<Org>,
}

impl Snapshot {
    pub fn apps(&self) -> impl Iterator<Item = (&Org, &Space, &App)> {
        self.orgs.iter().flat_map(|org| {
            org.spaces
                .iter()
                .flat_map(move |space| space.apps.iter().map(move |app| (org, space, app)))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Org {
    pub name: String,
    #[serde(default)]
    pub quota: Quota,
    #[serde(default)]
    pub spaces: Vec<Space>,
}

/// A zero-value quota (empty name) means the org's quota definition was not
/// in the quota table at export time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quota {
    pub name: String,
    pub non_basic_services_allowed: bool,
    pub total_services: i64,
    pub total_routes: i64,
    pub total_private_domains: i64,
    pub memory_limit: i64,
    pub trial_db_allowed: bool,
    pub instance_memory_limit: i64,
    pub app_instance_limit: i64,
    pub app_task_limit: i64,
    pub total_service_keys: i64,
    pub total_reserved_route_ports: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    #[serde(default)]
    pub apps: Vec<App>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
    #[serde(default)]
    pub staging_security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub guid: String,
    pub name: String,
    pub memory: u64,
    pub instances: u32,
    pub disk_quota: u64,
    pub state: String,
    #[serde(default)]
    pub command: String,
    pub health_check_type: String,
    pub health_check_timeout: u32,
    #[serde(default)]
    pub health_check_http_endpoint: String,
    pub diego: bool,
    pub enable_ssh: bool,
    #[serde(default)]
    pub environment: BTreeMap<String, Value>,
    #[serde(default)]
    pub service_names: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub instance_name: String,
    #[serde(flatten)]
    pub kind: ServiceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceKind {
    Managed {
        label: String,
        plan: String,
    },
    UserProvided {
        #[serde(default)]
        credentials: BTreeMap<String, Value>,
        #[serde(default)]
        syslog_drain_url: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub running_default: bool,
    #[serde(default)]
    pub staging_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub description: String,
    pub destination: String,
    pub log: bool,
    pub ports: String,
    pub protocol: String,
}

/// How a snapshot resource ended up on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Found { guid: String },
    Created { guid: String },
    Failed { error: String },
    Skipped { reason: String },
}

impl Resolution {
    pub fn guid(&self) -> Option<&str> {
        match self {
            Self::Found { guid } | Self::Created { guid } => Some(guid.as_str()),
            Self::Failed { .. } | Self::Skipped { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed {
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedOrg {
    pub name: String,
    #[serde(flatten)]
    pub resolution: Resolution,
    #[serde(default)]
    pub spaces: Vec<ImportedSpace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedSpace {
    pub name: String,
    #[serde(flatten)]
    pub resolution: Resolution,
    #[serde(default)]
    pub apps: Vec<ImportedApp>,
    #[serde(default)]
    pub services: Vec<ImportedService>,
    #[serde(default)]
    pub security_groups: Vec<ImportedSecurityGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedService {
    pub name: String,
    #[serde(flatten)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedSecurityGroup {
    pub name: String,
    pub staging: bool,
    #[serde(flatten)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedApp {
    pub name: String,
    #[serde(flatten)]
    pub resolution: Resolution,
    /// Artifact file names, derived from the source app, not the target guid.
    pub droplet: String,
    pub src: String,
    /// Lifecycle state observed on the source platform.
    pub state: String,
    #[serde(default)]
    pub bindings: Vec<ImportedBinding>,
}

impl ImportedApp {
    pub fn was_started(&self) -> bool {
        self.state == STATE_STARTED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Route,
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedBinding {
    pub kind: BindingKind,
    pub target: String,
    #[serde(flatten)]
    pub resolution: Resolution,
}

/// One resource that could not be reproduced on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub path: String,
    pub kind: &'static str,
    pub error: String,
}

pub fn collect_failures(orgs: &[ImportedOrg]) -> Vec<Failure> {
    let mut out = Vec::new();
    let mut push = |path: String, kind: &'static str, res: &Resolution| {
        if let Resolution::Failed { error } = res {
            out.push(Failure {
                path,
                kind,
                error: error.clone(),
            });
        }
    };
    for org in orgs {
        push(org.name.clone(), "org", &org.resolution);
        for space in &org.spaces {
            let space_path = format!("{}/{}", org.name, space.name);
            push(space_path.clone(), "space", &space.resolution);
            for sg in &space.security_groups {
                push(
                    format!("{space_path}/{}", sg.name),
                    "security_group",
                    &sg.resolution,
                );
            }
            for svc in &space.services {
                push(format!("{space_path}/{}", svc.name), "service", &svc.resolution);
            }
            for app in &space.apps {
                let app_path = format!("{space_path}/{}", app.name);
                push(app_path.clone(), "app", &app.resolution);
                for b in &app.bindings {
                    let kind = match b.kind {
                        BindingKind::Route => "route",
                        BindingKind::Service => "service_binding",
                    };
                    push(format!("{app_path} -> {}", b.target), kind, &b.resolution);
                }
            }
        }
    }
    out
}
