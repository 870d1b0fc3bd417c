use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Key whose presence marks a credentials or environment map the caller may
/// not read.
pub const REDACTED_SENTINEL: &str = "redacted_message";

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub next_url: Option<String>,
    #[serde(default = "Vec::new")]
    pub resources: Vec<Resource<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource<T> {
    pub metadata: Metadata,
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub guid: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrgEntity {
    pub name: String,
    #[serde(default)]
    pub quota_definition_guid: String,
    pub spaces_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaEntity {
    pub name: String,
    #[serde(default)]
    pub non_basic_services_allowed: bool,
    #[serde(default)]
    pub total_services: i64,
    #[serde(default)]
    pub total_routes: i64,
    #[serde(default)]
    pub total_private_domains: i64,
    #[serde(default)]
    pub memory_limit: i64,
    #[serde(default)]
    pub trial_db_allowed: bool,
    #[serde(default)]
    pub instance_memory_limit: i64,
    #[serde(default)]
    pub app_instance_limit: i64,
    #[serde(default)]
    pub app_task_limit: i64,
    #[serde(default)]
    pub total_service_keys: i64,
    #[serde(default)]
    pub total_reserved_route_ports: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceEntity {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpaceSummary {
    #[serde(default)]
    pub apps: Vec<SummaryApp>,
    #[serde(default)]
    pub services: Vec<SummaryService>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryApp {
    pub guid: String,
    pub name: String,
    pub memory: u64,
    pub instances: u32,
    pub disk_quota: u64,
    pub state: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub detected_start_command: Option<String>,
    pub health_check_type: String,
    #[serde(default)]
    pub health_check_timeout: Option<u32>,
    #[serde(default)]
    pub health_check_http_endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub diego: bool,
    #[serde(default)]
    pub enable_ssh: bool,
    #[serde(default)]
    pub environment_json: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub service_names: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryService {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub service_plan: Option<SummaryPlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryPlan {
    pub name: String,
    #[serde(default)]
    pub service: Option<SummaryPlanService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryPlanService {
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProvidedEntity {
    #[serde(default)]
    pub credentials: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub syslog_drain_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroupEntity {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleEntity>,
    #[serde(default)]
    pub running_default: bool,
    #[serde(default)]
    pub staging_default: bool,
}

/// Rules come back with whatever subset of fields was set when they were
/// created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleEntity {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub log: Option<bool>,
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceOfferingEntity {
    pub label: String,
    pub service_plans_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicePlanEntity {
    pub name: String,
}

/// Empty when the platform redacted the map.
pub fn unredact(map: Option<BTreeMap<String, Value>>) -> BTreeMap<String, Value> {
    match map {
        Some(m) if m.contains_key(REDACTED_SENTINEL) => BTreeMap::new(),
        Some(m) => m,
        None => BTreeMap::new(),
    }
}
