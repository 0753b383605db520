pub mod access;
pub mod capture;
pub mod forward;
pub mod gateway;
pub mod listener;
pub mod mock;
pub mod proxy_protocol;
pub mod request_log;
pub mod server;
pub mod source_ip;

pub use access::{AccessDecision, AccessGate};
pub use capture::{CaptureBody, GatewayBody};
pub use gateway::Gateway;
pub use listener::TcpOverlayListener;
pub use request_log::RequestLog;
pub use source_ip::{Resolution, SourceSignal, SourceStrategy};

/// Boxed error carried by gateway bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
