pub mod local;
pub mod network;
pub mod plan;
pub mod publisher;
pub mod ready;
pub mod rules;
pub mod summary;

pub use local::StandaloneNetwork;
pub use network::{ListenKind, ListenRequest, NodeStatus, OverlayNetwork};
pub use plan::{ExposurePlan, Forwarding};
pub use publisher::{DashboardInfo, ExposurePublisher, Publication, ServiceInfo};
pub use ready::{ReadyInfo, ReadyNotifier};
pub use rules::{PublishConfig, Scope};
pub use summary::{ReadySummary, WebUi, WebUiStatus};
