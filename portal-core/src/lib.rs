pub mod allowlist;
pub mod config;
pub mod error;
pub mod exposure;
pub mod listener;
pub mod observer;
pub mod record;

pub use allowlist::Allowlist;
pub use config::{AppConfig, ConfigInput};
pub use error::{DenyReason, PortalError};
pub use exposure::{ExposureConfig, ListenMode, ServiceName};
pub use listener::{BoxedIo, ConnectionContext, OverlayListener};
pub use observer::{RequestLogProvider, RequestObserver};
pub use record::{AggregateStats, RequestRecord, ResponseRecord, ServerMode};
