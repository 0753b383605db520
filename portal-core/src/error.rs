use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why the access gate refused a funnel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    SourceIpUnresolved,
    SourceIpNotAllowlisted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::SourceIpUnresolved => "source_ip_unresolved",
            DenyReason::SourceIpNotAllowlisted => "source_ip_not_allowlisted",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for Portal.
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("port {port} is already in use by an existing serve rule")]
    Conflict { port: u16 },

    #[error("capability error: {0}")]
    Capability(String),

    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    #[error("forward error: {0}")]
    Forward(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PortalError>;

impl PortalError {
    pub fn config(msg: impl Into<String>) -> Self {
        PortalError::Configuration(msg.into())
    }

    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            PortalError::AccessDenied(_) => 403,
            PortalError::Forward(_) => 502,
            PortalError::Conflict { .. } => 409,
            _ => 500,
        }
    }

    /// Startup-class errors abort the publish attempt; the rest are per-request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PortalError::Configuration(_) | PortalError::Conflict { .. } | PortalError::Capability(_)
        )
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({ "error": self.to_string(), "status": self.status_code() })
            .to_string()
            .into_bytes()
    }
}
