pub mod allowlist;
pub mod handlers;
pub mod metrics_handler;
pub mod router;

pub use allowlist::IpAllowList;
pub use handlers::AppState;
pub use metrics_handler::MetricsGuard;
pub use router::create_router;
