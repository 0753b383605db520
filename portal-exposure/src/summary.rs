use crate::ready::ReadyInfo;
use portal_core::{AppConfig, ListenMode};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebUiStatus {
    Enabled,
    Disabled,
    Unavailable,
}

impl WebUiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebUiStatus::Enabled => "enabled",
            WebUiStatus::Disabled => "disabled",
            WebUiStatus::Unavailable => "unavailable",
        }
    }
}

/// Outcome of dashboard setup, fed into the ready summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebUi {
    Enabled { url: String },
    /// Turned off by configuration.
    Disabled,
    /// Setup was attempted and failed.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub funnel: bool,
    pub mock: bool,
    pub ui: bool,
    pub json_logging: bool,
    pub https: bool,
}

/// Startup summary, logged once as `Portal is ready` and served from the
/// admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySummary {
    pub readiness: String,
    /// Overlay network implementation in use.
    pub mode: String,
    /// `proxy` or `mock`.
    pub backend_mode: String,
    /// `tailnet` or `funnel`.
    pub exposure: String,
    pub service_url: String,
    pub local_url: String,
    pub web_ui_status: WebUiStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_ui_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_ui_reason: Option<String>,
    pub listen_mode_configured: ListenMode,
    pub listen_mode_effective: ListenMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_fqdn: Option<String>,
    pub capabilities: Capabilities,
}

impl ReadySummary {
    pub fn build(config: &AppConfig, network_mode: &str, ready: &ReadyInfo, local_url: &str, web_ui: &WebUi) -> Self {
        let (web_ui_status, web_ui_url, web_ui_reason) = match web_ui {
            WebUi::Enabled { url } => (WebUiStatus::Enabled, Some(url.clone()), None),
            WebUi::Disabled => (WebUiStatus::Disabled, None, Some("disabled_by_configuration".to_string())),
            WebUi::Unavailable => (WebUiStatus::Unavailable, None, Some("ui_setup_unavailable".to_string())),
        };

        Self {
            readiness: "ready".into(),
            mode: network_mode.to_string(),
            backend_mode: config.server_mode().as_str().to_string(),
            exposure: if config.funnel { "funnel" } else { "tailnet" }.into(),
            service_url: ready.service_url.clone(),
            local_url: local_url.to_string(),
            web_ui_status,
            web_ui_url,
            web_ui_reason,
            listen_mode_configured: ready.configured_listen_mode,
            listen_mode_effective: ready.effective_listen_mode,
            service_name: ready.service_name.clone(),
            service_fqdn: ready.service_fqdn.clone(),
            capabilities: Capabilities {
                funnel: config.funnel,
                mock: config.mock,
                ui: web_ui_status == WebUiStatus::Enabled,
                json_logging: config.json,
                https: config.use_https,
            },
        }
    }

    pub fn log(&self) {
        info!(
            component = "startup",
            readiness = %self.readiness,
            mode = %self.mode,
            backend_mode = %self.backend_mode,
            exposure = %self.exposure,
            service_url = %self.service_url,
            local_url = %self.local_url,
            web_ui_status = self.web_ui_status.as_str(),
            web_ui_url = self.web_ui_url.as_deref().unwrap_or(""),
            web_ui_reason = self.web_ui_reason.as_deref().unwrap_or(""),
            listen_mode_configured = %self.listen_mode_configured,
            listen_mode_effective = %self.listen_mode_effective,
            service_name = self.service_name.as_deref().unwrap_or(""),
            service_fqdn = self.service_fqdn.as_deref().unwrap_or(""),
            cap_funnel = self.capabilities.funnel,
            cap_mock = self.capabilities.mock,
            cap_ui = self.capabilities.ui,
            cap_json_logging = self.capabilities.json_logging,
            cap_https = self.capabilities.https,
            "Portal is ready"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::ConfigInput;

    fn ready() -> ReadyInfo {
        ReadyInfo {
            service_url: "https://portal.portal.internal/".into(),
            configured_listen_mode: ListenMode::Listener,
            effective_listen_mode: ListenMode::Listener,
            service_name: None,
            service_fqdn: None,
        }
    }

    #[test]
    fn mock_summary() {
        let cfg = AppConfig::from_input(ConfigInput { mock: Some(true), ..Default::default() }).unwrap();
        let web_ui = WebUi::Enabled { url: "http://portal.portal.internal:8080/".into() };
        let summary = ReadySummary::build(&cfg, "standalone", &ready(), "http://localhost:5000", &web_ui);

        assert_eq!(summary.backend_mode, "mock");
        assert_eq!(summary.exposure, "funnel");
        assert_eq!(summary.web_ui_status, WebUiStatus::Enabled);
        assert!(summary.web_ui_reason.is_none());
        assert!(summary.capabilities.mock && summary.capabilities.https && summary.capabilities.ui);
    }

    #[test]
    fn disabled_ui_carries_reason() {
        let cfg = AppConfig::from_input(ConfigInput { port: Some(3000), ..Default::default() }).unwrap();
        let summary = ReadySummary::build(&cfg, "standalone", &ready(), "http://localhost:5000", &WebUi::Disabled);

        assert_eq!(summary.backend_mode, "proxy");
        assert_eq!(summary.exposure, "tailnet");
        assert_eq!(summary.web_ui_reason.as_deref(), Some("disabled_by_configuration"));
        assert!(!summary.capabilities.ui);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["web_ui_status"], "disabled");
        assert!(json.get("web_ui_url").is_none());
    }

    #[test]
    fn unavailable_ui_reason() {
        let cfg = AppConfig::from_input(ConfigInput { port: Some(3000), ..Default::default() }).unwrap();
        let summary = ReadySummary::build(&cfg, "standalone", &ready(), "http://localhost:5000", &WebUi::Unavailable);
        assert_eq!(summary.web_ui_reason.as_deref(), Some("ui_setup_unavailable"));
    }
}
