//! Remote-debugging connection pool keyed by port.

pub mod connection;
pub mod manager;
pub mod memory;
pub mod stats;

pub use connection::{Connection, HealthState};
pub use manager::{CleanupReport, ConnectionPool, HealthReport};
pub use memory::{MemoryGauge, ProcessMemoryGauge};
pub use stats::{ConnectionStats, HealthSummary, PoolStats};
