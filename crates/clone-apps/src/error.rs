use std::fmt;

#[derive(Debug)]
pub enum Error {
    Msg(String),
    OrgNotFound(String),
    SharedDomainNotFound(String),
    ManagedServiceNotFound(String),
    ManagedServicePlanNotFound { label: String, plan: String },
    ServiceInstanceNotFound(String),
    Api {
        method: String,
        path: String,
        status: u16,
        body: String,
    },
    Decode { what: String, detail: String },
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn decode(what: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Decode {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::OrgNotFound(_)
                | Self::SharedDomainNotFound(_)
                | Self::ManagedServiceNotFound(_)
                | Self::ManagedServicePlanNotFound { .. }
                | Self::ServiceInstanceNotFound(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Msg(msg) => write!(f, "{msg}"),
            Self::OrgNotFound(name) => write!(f, "organization not found: {name}"),
            Self::SharedDomainNotFound(name) => write!(f, "shared domain not found: {name}"),
            Self::ManagedServiceNotFound(label) => write!(f, "managed service not found: {label}"),
            Self::ManagedServicePlanNotFound { label, plan } => {
                write!(f, "managed service plan not found: {label}/{plan}")
            }
            Self::ServiceInstanceNotFound(name) => {
                write!(f, "service instance not found: {name}")
            }
            Self::Api {
                method,
                path,
                status,
                body,
            } => write!(f, "{method} {path} failed with status {status}: {body}"),
            Self::Decode { what, detail } => write!(f, "failed to decode {what}: {detail}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::decode("json document", err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::msg(format!("HTTP request failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
