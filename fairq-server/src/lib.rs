pub mod broker;
pub mod config;
pub mod core;
pub mod limiter;
pub mod metrics;
pub mod server;
pub mod strategy;

// Re-export commonly used types
pub use broker::{
    DispatchableJob, PartitionResolver, PushOptions, PushReceipt, QueueDriver, Reservation,
    ReservationParts, spawn_sweeper,
};
pub use config::{BrokerConfig, MetricsMiddleware, PrometheusConfig, ServerConfig};
pub use core::{BrokerError, KeyLayout, KvEngine};
pub use limiter::{
    AdaptiveLimiter, ConcurrencyLimiter, FixedLimiter, LimiterRegistry, NullLimiter,
};
pub use metrics::{MetricsReader, MetricsReport, PartitionSnapshot, QueueSnapshot};
pub use server::{AppState, IpAllowList, MetricsGuard, create_router};
pub use strategy::{
    PartitionStrategy, RandomStrategy, RoundRobinStrategy, SmartFairStrategy, StrategyRegistry,
};
