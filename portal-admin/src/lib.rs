pub mod handlers;
pub mod server;

pub use server::{AdminServer, AdminState, build_admin_router};
