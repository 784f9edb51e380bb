//! Drive a fleet of running IDE instances over their remote-debugging ports.
//!
//! [`pool::ConnectionPool`] owns one protocol connection per port and keeps
//! it healthy; [`session::SessionManager`] tracks which instances exist,
//! which one is active, and where their workspaces live.

pub mod config;
pub mod error;
pub mod pool;
pub mod process;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{FleetError, Result};
pub use state::FleetState;
