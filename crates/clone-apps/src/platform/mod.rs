//! Access to the control-plane v2 REST API.
//!
//! [`PlatformApi`] is the seam between the export/import engine and the
//! platform: it moves JSON documents, nothing else. Everything above it works on
//! the typed envelopes from [`resources`], decoded through [`decode`] so a
//! response missing a required field fails right at the boundary.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};

pub mod http;
pub mod resources;

pub use http::HttpPlatform;
pub use resources::{Page, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait PlatformApi: Send + Sync {
    /// Base URL, e.g. `https://api.sys.example.com`.
    fn endpoint(&self) -> &str;

    /// Full `Authorization` header value for binary transfers.
    fn authorization(&self) -> &str;

    /// GET a JSON document. `path` is relative to the endpoint.
    fn get(&self, path: &str) -> Result<Value>;

    /// Mutating call with an optional JSON body. Non-2xx answers are
    /// `Error::Api` carrying the response body.
    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value>;

    fn start_app(&self, guid: &str) -> Result<()> {
        self.send(
            Method::Put,
            &format!("/v2/apps/{guid}"),
            Some(&json!({ "state": "STARTED" })),
        )?;
        Ok(())
    }
}

pub fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::decode(what, e))
}

/// `/v2/apps?q=name%3Aweb&q=space_guid%3A...`
pub fn query_path(collection: &str, filters: &[(&str, &str)]) -> String {
    let mut out = collection.to_string();
    for (i, (key, value)) in filters.iter().enumerate() {
        out.push(if i == 0 && !collection.contains('?') { '?' } else { '&' });
        out.push_str("q=");
        let filter = format!("{key}:{value}");
        out.extend(url::form_urlencoded::byte_serialize(filter.as_bytes()));
    }
    out
}

pub fn fetch_page<T: DeserializeOwned>(api: &dyn PlatformApi, path: &str) -> Result<Page<T>> {
    let raw = api.get(path)?;
    decode(path, raw)
}

/// Every resource behind `path`, following `next_url` until the last page.
pub fn fetch_all<T: DeserializeOwned>(api: &dyn PlatformApi, path: &str) -> Result<Vec<Resource<T>>> {
    let mut out = Vec::new();
    let mut next = Some(path.to_string());
    while let Some(p) = next.take() {
        let page: Page<T> = fetch_page(api, &p)?;
        debug!(path = %p, count = page.resources.len(), "fetched page");
        out.extend(page.resources);
        next = page.next_url.filter(|n| !n.is_empty() && *n != p);
    }
    Ok(out)
}

/// First resource matching every `key:value` filter, if any.
pub fn find_one<T: DeserializeOwned>(
    api: &dyn PlatformApi,
    collection: &str,
    filters: &[(&str, &str)],
) -> Result<Option<Resource<T>>> {
    let page: Page<T> = fetch_page(api, &query_path(collection, filters))?;
    Ok(page.resources.into_iter().next())
}

pub fn create<T: DeserializeOwned>(
    api: &dyn PlatformApi,
    method: Method,
    path: &str,
    body: &Value,
) -> Result<Resource<T>> {
    let raw = api.send(method, path, Some(body))?;
    decode(path, raw)
}
