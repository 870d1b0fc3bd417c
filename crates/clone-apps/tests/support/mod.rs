#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use clone_apps::platform::{Method, PlatformApi};
use clone_apps::{Error, Result};
use serde_json::{Value, json};

/// In-memory control plane. Collections are keyed by their list path
/// (`/v2/apps`), resources carry the POST body as their entity, and guids are
/// handed out per kind (`org-1`, `space-1`, `app-1`, ...).
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Vec<Value>>,
    docs: BTreeMap<String, Value>,
    counters: BTreeMap<String, usize>,
    calls: Vec<(Method, String)>,
    started: Vec<String>,
    rejected_posts: BTreeSet<String>,
    failing_gets: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    pub path: String,
}

fn guid_prefix(collection: &str) -> &str {
    match collection.rsplit('/').next().unwrap_or_default() {
        "organizations" => "org",
        "spaces" => "space",
        "service_instances" => "si",
        "user_provided_service_instances" => "ups",
        "apps" => "app",
        "routes" => "route",
        "service_bindings" => "binding",
        "security_groups" => "sg",
        "quota_definitions" => "quota",
        other => other,
    }
}

fn page(resources: Vec<Value>) -> Value {
    json!({
        "total_results": resources.len(),
        "total_pages": 1,
        "next_url": null,
        "resources": resources,
    })
}

fn entity_matches(resource: &Value, key: &str, want: &str) -> bool {
    match &resource["entity"][key] {
        Value::String(s) => s == want,
        Value::Null => false,
        other => other.to_string() == want,
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource to a collection and returns it.
    pub fn seed(&self, collection: &str, guid: &str, entity: Value) -> Value {
        let resource = json!({
            "metadata": { "guid": guid, "url": format!("{collection}/{guid}") },
            "entity": entity,
        });
        let mut s = self.state.lock().expect("lock");
        s.collections
            .entry(collection.to_string())
            .or_default()
            .push(resource.clone());
        resource
    }

    /// Serves `value` verbatim for GET `path`.
    pub fn seed_doc(&self, path: &str, value: Value) {
        self.state
            .lock()
            .expect("lock")
            .docs
            .insert(path.to_string(), value);
    }

    /// POSTs to `collection` answer 400 from now on.
    pub fn reject_posts_to(&self, collection: &str) {
        self.state
            .lock()
            .expect("lock")
            .rejected_posts
            .insert(collection.to_string());
    }

    /// GETs of `path` (query ignored) answer 500 from now on.
    pub fn fail_gets_to(&self, path: &str) {
        self.state
            .lock()
            .expect("lock")
            .failing_gets
            .insert(path.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .expect("lock")
            .calls
            .iter()
            .map(|(method, path)| Call {
                method: *method,
                path: path.clone(),
            })
            .collect()
    }

    pub fn count_calls(&self, method: Method, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == method && c.path.starts_with(prefix))
            .count()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().expect("lock").started.clone()
    }

    pub fn collection(&self, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .expect("lock")
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn list(&self, s: &State, base: &str) -> Vec<Value> {
        // Org-scoped space listing.
        if let Some(rest) = base.strip_prefix("/v2/organizations/")
            && let Some(org_guid) = rest.strip_suffix("/spaces")
        {
            return s
                .collections
                .get("/v2/spaces")
                .map(|all| {
                    all.iter()
                        .filter(|r| entity_matches(r, "organization_guid", org_guid))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
        }
        s.collections.get(base).cloned().unwrap_or_default()
    }
}

impl PlatformApi for FakePlatform {
    fn endpoint(&self) -> &str {
        "http://fake.invalid"
    }

    fn authorization(&self) -> &str {
        "bearer fake"
    }

    fn get(&self, path: &str) -> Result<Value> {
        let mut s = self.state.lock().expect("lock");
        s.calls.push((Method::Get, path.to_string()));
        let (base, query) = path.split_once('?').unwrap_or((path, ""));
        if s.failing_gets.contains(base) {
            return Err(Error::Api {
                method: Method::Get.to_string(),
                path: path.to_string(),
                status: 500,
                body: r#"{"error_code":"CF-ServerError"}"#.into(),
            });
        }
        if let Some(doc) = s.docs.get(path) {
            return Ok(doc.clone());
        }
        let filters: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .filter(|(k, _)| k == "q")
            .filter_map(|(_, v)| v.split_once(':').map(|(a, b)| (a.to_string(), b.to_string())))
            .collect();
        let resources = self
            .list(&s, base)
            .into_iter()
            .filter(|r| filters.iter().all(|(k, v)| entity_matches(r, k, v)))
            .collect();
        Ok(page(resources))
    }

    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut s = self.state.lock().expect("lock");
        s.calls.push((method, path.to_string()));
        let base = path.split_once('?').map(|(b, _)| b).unwrap_or(path).to_string();

        match method {
            Method::Post => {
                if s.rejected_posts.contains(&base) {
                    return Err(Error::Api {
                        method: method.to_string(),
                        path: path.to_string(),
                        status: 400,
                        body: r#"{"error_code":"CF-Rejected"}"#.into(),
                    });
                }
                let prefix = guid_prefix(&base).to_string();
                let n = {
                    let c = s.counters.entry(prefix.clone()).or_default();
                    *c += 1;
                    *c
                };
                let guid = format!("{prefix}-{n}");
                let mut entity = body.cloned().unwrap_or_else(|| json!({}));
                if base == "/v2/organizations" {
                    entity["spaces_url"] = json!(format!("/v2/organizations/{guid}/spaces"));
                }
                let resource = json!({
                    "metadata": { "guid": guid, "url": format!("{base}/{guid}") },
                    "entity": entity,
                });
                s.collections.entry(base).or_default().push(resource.clone());
                Ok(resource)
            }
            Method::Put => {
                if let Some(guid) = base.strip_prefix("/v2/apps/")
                    && !guid.contains('/')
                    && body.is_some_and(|b| b["state"] == "STARTED")
                {
                    s.started.push(guid.to_string());
                }
                Ok(Value::Null)
            }
            Method::Get => Ok(Value::Null),
        }
    }
}
