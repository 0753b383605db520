use clap::Parser;
use portal_core::ConfigInput;
use portal_core::config::StringOrList;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "portal",
    version,
    about = "Expose a local service to your tailnet or the public internet, with request inspection"
)]
pub struct Cli {
    /// Local port of the service to expose
    pub port: Option<u16>,

    /// Path to the YAML configuration file (default ~/.portal/config.yml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Device name on the overlay network
    #[arg(short = 'n', long)]
    pub device_name: Option<String>,

    #[arg(long, hide = true)]
    pub tailscale_name: Option<String>,

    /// Expose to the public internet (`--funnel=false` to opt out in mock mode)
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    pub funnel: Option<bool>,

    /// Client CIDRs or addresses allowed through funnel (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub funnel_allowlist: Vec<String>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// JSON log output
    #[arg(long)]
    pub json: bool,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Mount path on the public URL
    #[arg(long)]
    pub set_path: Option<String>,

    /// External port to serve on (default 443 with HTTPS, otherwise 80)
    #[arg(long)]
    pub serve_port: Option<u16>,

    #[arg(long)]
    pub use_https: bool,

    /// Do not start the web dashboard
    #[arg(long)]
    pub no_ui: bool,

    /// Local port for the dashboard and admin API
    #[arg(long)]
    pub ui_port: Option<u16>,

    /// Answer every request with a JSON acknowledgment instead of proxying
    #[arg(short, long)]
    pub mock: bool,

    /// Remove every publish rule and exit
    #[arg(long)]
    pub cleanup_serve: bool,

    /// `listener` or `service`
    #[arg(long)]
    pub listen_mode: Option<String>,

    #[arg(long, hide = true)]
    pub tsnet_listen_mode: Option<String>,

    /// Service identity for `--listen-mode service`, e.g. svc:portal
    #[arg(long)]
    pub service_name: Option<String>,

    #[arg(long, hide = true)]
    pub tsnet_service_name: Option<String>,

    /// Request log capacity
    #[arg(long)]
    pub max_logs: Option<usize>,

    /// Serve Prometheus metrics on the admin API
    #[arg(long)]
    pub metrics: bool,
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

impl Cli {
    /// Command-line layer of the configuration; unset flags leave file and
    /// environment values alone.
    pub fn overrides(&self) -> ConfigInput {
        ConfigInput {
            port: self.port,
            device_name: self.device_name.clone(),
            tailscale_name: self.tailscale_name.clone(),
            funnel: self.funnel,
            funnel_allowlist: (!self.funnel_allowlist.is_empty())
                .then(|| StringOrList::Many(self.funnel_allowlist.clone())),
            verbose: flag(self.verbose),
            json: flag(self.json),
            log_file: self.log_file.clone(),
            set_path: self.set_path.clone(),
            serve_port: self.serve_port,
            use_https: flag(self.use_https),
            no_ui: flag(self.no_ui),
            ui_port: self.ui_port,
            mock: flag(self.mock),
            cleanup_serve: flag(self.cleanup_serve),
            listen_mode: self.listen_mode.clone(),
            tsnet_listen_mode: self.tsnet_listen_mode.clone(),
            service_name: self.service_name.clone(),
            tsnet_service_name: self.tsnet_service_name.clone(),
            max_logs: self.max_logs,
            metrics: flag(self.metrics),
            node: None,
        }
    }
}
