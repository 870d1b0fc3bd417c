use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::log_sanitize::body_excerpt;
use crate::platform::{Method, PlatformApi};

/// Builds the one HTTP client shared by API calls and artifact transfers.
///
/// `max_idle_per_host` should cover every transfer worker that can hold a
/// connection at the same time (both pools), otherwise connections churn.
pub fn build_client(cfg: &PlatformConfig, max_idle_per_host: usize) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .pool_max_idle_per_host(max_idle_per_host.max(1))
        .pool_idle_timeout(Duration::from_secs(60))
        .danger_accept_invalid_certs(cfg.skip_ssl_validation)
        .build()
        .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))
}

/// Access tokens handed out by the CLI already carry the scheme.
pub fn authorization_value(token: &str) -> String {
    let token = token.trim();
    if token.len() > 7 && token.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("bearer ")) {
        token.to_string()
    } else {
        format!("bearer {token}")
    }
}

#[derive(Clone)]
pub struct HttpPlatform {
    client: Client,
    endpoint: String,
    authorization: String,
}

impl HttpPlatform {
    pub fn new(client: Client, endpoint: impl Into<String>, token: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            authorization: authorization_value(token),
        }
    }

    pub fn from_config(cfg: &PlatformConfig, max_idle_per_host: usize) -> Result<Self> {
        let client = build_client(cfg, max_idle_per_host)?;
        Ok(Self::new(client, cfg.resolve_api()?, &cfg.resolve_token()?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.endpoint, path)
        }
    }

    fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path);
        let mut req = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };
        req = req
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/json");
        if let Some(b) = body {
            req = req.body(serde_json::to_vec(b)?);
        }
        let res = req
            .send()
            .map_err(|e| Error::msg(format!("{method} {path} failed: {e}")))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .map_err(|e| Error::msg(format!("{method} {path}: body read failed: {e}")))?;
        debug!(%method, path, status = status.as_u16(), "platform call");
        if !status.is_success() {
            return Err(Error::Api {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: body_excerpt(&bytes),
            });
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(format!("{method} {path}"), e))
    }
}

impl PlatformApi for HttpPlatform {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorization(&self) -> &str {
        &self.authorization
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.execute(Method::Get, path, None)
    }

    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        self.execute(method, path, body)
    }
}
