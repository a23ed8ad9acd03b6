//! Session - Endpoints and credentials shared by all IBM Cloud clients
//!
//! The session is an explicit value handed to every client constructor;
//! there is no process-wide client state.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default VPC API version date sent as the `version` query parameter
pub const DEFAULT_VPC_API_VERSION: &str = "2024-04-30";

/// Default region when none is configured
pub const DEFAULT_REGION: &str = "us-south";

/// Errors raised while building a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read session file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid session file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {name} endpoint '{url}': {source}")]
    InvalidEndpoint {
        name: &'static str,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("an IAM bearer token is required")]
    MissingToken,
}

/// Endpoint overrides; unset entries are derived from the region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub vpc: Option<String>,
    pub power: Option<String>,
    pub iam_identity: Option<String>,
    pub iam_policy: Option<String>,
    pub scc_admin: Option<String>,
}

/// Connection settings for IBM Cloud APIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbmSession {
    pub region: String,
    pub account_id: Option<String>,
    /// Bearer token; obtaining and refreshing it is up to the caller
    #[serde(skip_serializing)]
    pub iam_token: String,
    /// CRN of the Power Systems workspace, sent as the `CRN` header
    pub power_crn: Option<String>,
    pub vpc_api_version: String,
    pub request_timeout_secs: u64,
    pub endpoints: Endpoints,
}

impl Default for IbmSession {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            account_id: None,
            iam_token: String::new(),
            power_crn: None,
            vpc_api_version: DEFAULT_VPC_API_VERSION.to_string(),
            request_timeout_secs: 60,
            endpoints: Endpoints::default(),
        }
    }
}

impl IbmSession {
    pub fn new(region: impl Into<String>, iam_token: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            iam_token: iam_token.into(),
            ..Default::default()
        }
    }

    /// Load a session from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, SessionError> {
        let content = std::fs::read_to_string(path).map_err(|source| SessionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Check the token is present and every endpoint parses
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.iam_token.trim().is_empty() {
            return Err(SessionError::MissingToken);
        }
        for (name, url) in [
            ("vpc", self.vpc_endpoint()),
            ("power", self.power_endpoint()),
            ("iam_identity", self.iam_identity_endpoint()),
            ("iam_policy", self.iam_policy_endpoint()),
            ("scc_admin", self.scc_admin_endpoint()),
        ] {
            Url::parse(&url).map_err(|source| SessionError::InvalidEndpoint {
                name,
                url: url.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn vpc_endpoint(&self) -> String {
        endpoint_or(&self.endpoints.vpc, || {
            format!("https://{}.iaas.cloud.ibm.com", self.region)
        })
    }

    pub fn power_endpoint(&self) -> String {
        endpoint_or(&self.endpoints.power, || {
            format!("https://{}.power-iaas.cloud.ibm.com", self.region)
        })
    }

    pub fn iam_identity_endpoint(&self) -> String {
        endpoint_or(&self.endpoints.iam_identity, || {
            "https://iam.cloud.ibm.com".to_string()
        })
    }

    pub fn iam_policy_endpoint(&self) -> String {
        endpoint_or(&self.endpoints.iam_policy, || {
            "https://iam.cloud.ibm.com".to_string()
        })
    }

    pub fn scc_admin_endpoint(&self) -> String {
        endpoint_or(&self.endpoints.scc_admin, || {
            "https://compliance.cloud.ibm.com".to_string()
        })
    }
}

fn endpoint_or(configured: &Option<String>, default: impl FnOnce() -> String) -> String {
    configured
        .as_deref()
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(default)
}
