use crate::allowlist::Allowlist;
use crate::error::{PortalError, Result};
use crate::exposure::{ExposureConfig, ListenMode, ServiceName, normalize_mount_path, resolve_serve_port};
use crate::record::ServerMode;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Raw configuration as merged from file, environment, and command line.
///
/// Every field is optional so a later layer only overrides what it sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Legacy alias for `device_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tailscale_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_allowlist: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_https: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_ui: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_serve: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_mode: Option<String>,
    /// Legacy alias for `listen_mode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsnet_listen_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Legacy alias for `service_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsnet_service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_logs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConfig>,
}

/// A list setting that may also be given as one comma-separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// Trimmed, non-empty entries.
    pub fn entries(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            StringOrList::One(s) => s.split(',').collect(),
            StringOrList::Many(v) => v.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Identity reported by the standalone overlay network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Defaults to `<device_name>.<magic_dns_suffix>`.
    #[serde(default)]
    pub dns_name: Option<String>,
    #[serde(default = "default_magic_dns_suffix")]
    pub magic_dns_suffix: String,
    /// ACL tags; service mode needs at least one `tag:` entry.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    /// Defaults to the node DNS name.
    #[serde(default)]
    pub cert_domains: Vec<String>,
}

/// Validated application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Backend port; `None` in mock mode.
    pub port: Option<u16>,
    pub device_name: String,
    pub funnel: bool,
    pub funnel_allowlist: Allowlist,
    pub verbose: bool,
    pub json: bool,
    pub log_file: Option<PathBuf>,
    pub set_path: String,
    pub serve_port: u16,
    pub use_https: bool,
    pub no_ui: bool,
    pub ui_port: u16,
    pub mock: bool,
    pub cleanup_serve: bool,
    pub listen_mode: ListenMode,
    /// Set only in service listen mode.
    pub service_name: Option<ServiceName>,
    pub max_logs: usize,
    pub metrics: bool,
    pub node: NodeConfig,
}

// ── Defaults ──────────────────────────────────────────────────

pub const DEFAULT_DEVICE_NAME: &str = "portal";
pub const DEFAULT_SERVICE_NAME: &str = "svc:portal";
pub const DEFAULT_UI_PORT: u16 = 4040;
pub const DEFAULT_MAX_LOGS: usize = 1000;

fn default_magic_dns_suffix() -> String { "portal.internal".into() }
fn default_capabilities() -> Vec<String> { vec!["https".into()] }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dns_name: None,
            magic_dns_suffix: default_magic_dns_suffix(),
            tags: Vec::new(),
            capabilities: default_capabilities(),
            cert_domains: Vec::new(),
        }
    }
}

/// `~/.portal/config.yml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".portal").join("config.yml"))
}

// ── Loading ───────────────────────────────────────────────────

impl ConfigInput {
    /// Merge YAML file, `PORTAL_*` environment, then explicit overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>, overrides: &ConfigInput) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let input: ConfigInput = figment
            .merge(Env::prefixed("PORTAL_"))
            .merge(Serialized::defaults(overrides))
            .extract()?;
        Ok(input)
    }
}

impl AppConfig {
    /// Load every layer and validate.
    pub fn load(path: Option<&Path>, overrides: &ConfigInput) -> anyhow::Result<Self> {
        let input = ConfigInput::load(path, overrides)?;
        Ok(Self::from_input(input)?)
    }

    /// Resolve aliases, apply defaults and automatic rules, and validate.
    pub fn from_input(input: ConfigInput) -> Result<Self> {
        let device_name = resolve_alias(
            ("device-name", input.device_name),
            ("tailscale-name", input.tailscale_name),
            |s| s.trim().to_string(),
        )?
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

        let listen_mode: ListenMode = resolve_alias(
            ("listen-mode", input.listen_mode),
            ("tsnet-listen-mode", input.tsnet_listen_mode),
            |s| s.trim().to_ascii_lowercase(),
        )?
        .unwrap_or_default()
        .parse()?;

        let service_name = resolve_alias(
            ("service-name", input.service_name),
            ("tsnet-service-name", input.tsnet_service_name),
            |s| s.trim().to_string(),
        )?
        .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        // Only validated when it is used.
        let service_name = match listen_mode {
            ListenMode::Service => Some(ServiceName::parse(&service_name)?),
            ListenMode::Listener => None,
        };

        let allowlist_entries = input
            .funnel_allowlist
            .as_ref()
            .map(StringOrList::entries)
            .unwrap_or_default();
        let funnel_allowlist = Allowlist::parse(&allowlist_entries)?;

        let mock = input.mock.unwrap_or(false);
        let explicit_funnel = input.funnel;

        let mut cfg = AppConfig {
            port: input.port.filter(|p| *p != 0),
            device_name,
            funnel: explicit_funnel.unwrap_or(false),
            funnel_allowlist,
            verbose: input.verbose.unwrap_or(false),
            json: input.json.unwrap_or(false),
            log_file: input.log_file.filter(|p| !p.as_os_str().is_empty()),
            set_path: input.set_path.unwrap_or_default(),
            serve_port: input.serve_port.unwrap_or(0),
            use_https: input.use_https.unwrap_or(false),
            no_ui: input.no_ui.unwrap_or(false),
            ui_port: input.ui_port.filter(|p| *p != 0).unwrap_or(DEFAULT_UI_PORT),
            mock,
            cleanup_serve: input.cleanup_serve.unwrap_or(false),
            listen_mode,
            service_name,
            max_logs: input.max_logs.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_LOGS),
            metrics: input.metrics.unwrap_or(false),
            node: input.node.unwrap_or_default(),
        };

        if cfg.cleanup_serve {
            return Ok(cfg);
        }

        if cfg.mock && cfg.port.is_some() {
            return Err(PortalError::config("cannot specify both port and --mock flag"));
        }
        if !cfg.mock && cfg.port.is_none() {
            return Err(PortalError::config(
                "port argument is required (or use --mock for testing mode)",
            ));
        }

        cfg.apply_auto_configuration(explicit_funnel);

        if cfg.listen_mode == ListenMode::Service && cfg.funnel {
            return Err(PortalError::config(
                "unsupported operating mode combination: listen-mode=service cannot be combined with funnel=true",
            ));
        }

        Ok(cfg)
    }

    /// Mock mode turns on funnel unless funnel was explicitly disabled;
    /// funnel always implies HTTPS.
    fn apply_auto_configuration(&mut self, explicit_funnel: Option<bool>) {
        if self.mock && explicit_funnel.is_none() {
            self.funnel = true;
        }
        if self.funnel {
            self.use_https = true;
        }
    }

    /// Mount path, always starting with `/`.
    pub fn mount_path(&self) -> String {
        normalize_mount_path(&self.set_path)
    }

    /// External serve port with protocol defaults applied.
    pub fn effective_serve_port(&self) -> u16 {
        resolve_serve_port(self.serve_port, self.funnel || self.use_https)
    }

    /// Allowlist enforcement is active.
    pub fn has_funnel_allowlist(&self) -> bool {
        self.funnel && !self.funnel_allowlist.is_empty()
    }

    /// Funnel traffic is TCP-forwarded with a PROXY header carrying the
    /// client address. Only possible at the root mount path.
    pub fn use_address_tagging(&self) -> bool {
        self.has_funnel_allowlist() && self.mount_path() == "/"
    }

    pub fn server_mode(&self) -> ServerMode {
        match self.port {
            Some(target_port) if !self.mock => ServerMode::Proxy { target_port },
            _ => ServerMode::Mock,
        }
    }

    /// Exposure request for a gateway listening on `target_port` locally.
    pub fn exposure_config(&self, target_port: u16) -> ExposureConfig {
        ExposureConfig {
            target_port,
            listen_mode: self.listen_mode,
            service_name: self.service_name.clone(),
            funnel: self.funnel,
            use_tls: self.use_https,
            serve_port: self.serve_port,
            mount_path: self.mount_path(),
            allowlist_active: self.has_funnel_allowlist(),
        }
    }

    /// DNS name the standalone network reports for this node.
    pub fn node_dns_name(&self) -> String {
        match &self.node.dns_name {
            Some(name) if !name.trim().is_empty() => name.trim().trim_end_matches('.').to_string(),
            _ => format!("{}.{}", self.device_name, self.node.magic_dns_suffix),
        }
    }
}

/// Canonical wins; a legacy value is accepted alone but must agree when both are set.
fn resolve_alias(
    canonical: (&str, Option<String>),
    legacy: (&str, Option<String>),
    normalize: impl Fn(&str) -> String,
) -> Result<Option<String>> {
    let (canonical_key, canonical_val) = canonical;
    let (legacy_key, legacy_val) = legacy;
    let canonical_val = canonical_val.map(|v| normalize(&v)).filter(|v| !v.is_empty());
    let legacy_val = legacy_val.map(|v| normalize(&v)).filter(|v| !v.is_empty());

    match (canonical_val, legacy_val) {
        (Some(c), Some(l)) if c != l => Err(PortalError::config(format!(
            "conflicting configuration: {canonical_key}={c:?} conflicts with {legacy_key}={l:?}"
        ))),
        (Some(c), _) => Ok(Some(c)),
        (None, legacy) => Ok(legacy),
    }
}
