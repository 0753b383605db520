use crate::error::{PortalError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Prefix every named-service identity carries.
pub const SERVICE_PREFIX: &str = "svc:";

static SERVICE_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").ok());

/// How the exposure is identified on the overlay network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    /// Identity tied to the running node.
    #[default]
    Listener,
    /// Identity tied to a named virtual service.
    Service,
}

impl ListenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenMode::Listener => "listener",
            ListenMode::Service => "service",
        }
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenMode {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "listener" => Ok(ListenMode::Listener),
            "service" => Ok(ListenMode::Service),
            other => Err(PortalError::config(format!(
                "invalid listen-mode {other:?}: must be \"listener\" or \"service\""
            ))),
        }
    }
}

/// A validated named-service identity: `svc:` followed by one DNS label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |why: &str| PortalError::config(format!("invalid service-name {raw:?}: {why}"));

        let label = raw
            .strip_prefix(SERVICE_PREFIX)
            .ok_or_else(|| invalid("must start with \"svc:\""))?;
        let valid = SERVICE_LABEL.as_ref().is_some_and(|re| re.is_match(label));
        if !valid {
            return Err(invalid("must be \"svc:\" followed by a valid DNS label"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DNS label without the `svc:` prefix.
    pub fn without_prefix(&self) -> &str {
        self.0.strip_prefix(SERVICE_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}

/// What to publish and how. Validated by the exposure planner before any
/// network resource is touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Local port the published rules forward to. 0 picks the first free port.
    pub target_port: u16,
    pub listen_mode: ListenMode,
    /// Required when `listen_mode` is `Service`.
    pub service_name: Option<ServiceName>,
    /// Public (internet) exposure.
    pub funnel: bool,
    pub use_tls: bool,
    /// External port. 0 selects 443 for TLS, otherwise 80.
    pub serve_port: u16,
    pub mount_path: String,
    /// A non-empty funnel allowlist is configured.
    pub allowlist_active: bool,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            target_port: 0,
            listen_mode: ListenMode::Listener,
            service_name: None,
            funnel: false,
            use_tls: false,
            serve_port: 0,
            mount_path: "/".to_string(),
            allowlist_active: false,
        }
    }
}

/// 0 means the protocol default: 443 with TLS, otherwise 80.
pub fn resolve_serve_port(serve_port: u16, tls: bool) -> u16 {
    match serve_port {
        0 if tls => 443,
        0 => 80,
        port => port,
    }
}

/// Mount path, always starting with `/`.
pub fn normalize_mount_path(raw: &str) -> String {
    let path = raw.trim();
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_path_normalization() {
        assert_eq!(normalize_mount_path(""), "/");
        assert_eq!(normalize_mount_path("  "), "/");
        assert_eq!(normalize_mount_path("api"), "/api");
        assert_eq!(normalize_mount_path("/api"), "/api");
    }

    #[test]
    fn serve_port_defaults_follow_tls() {
        assert_eq!(resolve_serve_port(0, true), 443);
        assert_eq!(resolve_serve_port(0, false), 80);
        assert_eq!(resolve_serve_port(8443, false), 8443);
    }

    #[test]
    fn listen_mode_parses_case_insensitively() {
        assert_eq!("Service".parse::<ListenMode>().unwrap(), ListenMode::Service);
        assert_eq!(" listener ".parse::<ListenMode>().unwrap(), ListenMode::Listener);
        assert_eq!("".parse::<ListenMode>().unwrap(), ListenMode::Listener);
    }

    #[test]
    fn unknown_listen_mode_is_rejected() {
        let err = "tunnel".parse::<ListenMode>().unwrap_err();
        assert!(matches!(err, PortalError::Configuration(_)));
        assert!(err.to_string().contains("\"tunnel\""));
    }

    #[test]
    fn service_name_requires_prefix_and_label() {
        assert!(ServiceName::parse("svc:portal").is_ok());
        assert!(ServiceName::parse("svc:my-app-2").is_ok());
        assert!(ServiceName::parse("portal").is_err());
        assert!(ServiceName::parse("svc:").is_err());
        assert!(ServiceName::parse("svc:-bad").is_err());
        assert!(ServiceName::parse("svc:bad-").is_err());
        assert!(ServiceName::parse("svc:has.dot").is_err());
        assert!(ServiceName::parse(&format!("svc:{}", "a".repeat(64))).is_err());
    }

    #[test]
    fn service_name_strips_prefix() {
        let name = ServiceName::parse("svc:portal").unwrap();
        assert_eq!(name.without_prefix(), "portal");
        assert_eq!(name.to_string(), "svc:portal");
    }

    #[test]
    fn service_name_serde_validates() {
        let name: ServiceName = serde_json::from_str("\"svc:api\"").unwrap();
        assert_eq!(name.as_str(), "svc:api");
        assert!(serde_json::from_str::<ServiceName>("\"api\"").is_err());
    }
}
