use crate::session::InstanceStatus;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Failed to connect to port {port} after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        port: u16,
        attempts: u32,
        reason: String,
    },

    #[error("No instance known on port {0}")]
    NotFound(u16),

    #[error("Instance on port {port} is {status}, not running")]
    NotRunning { port: u16, status: InstanceStatus },

    #[error("Could not resolve workspace for port {0}")]
    ResolutionFailed(u16),

    #[error("Instance on port {port} not reachable after {attempts} readiness check(s)")]
    ReadinessTimeout { port: u16, attempts: u32 },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl FleetError {
    /// Port the failing operation targeted, when the error carries one.
    pub fn port(&self) -> Option<u16> {
        match self {
            FleetError::ConnectFailed { port, .. }
            | FleetError::NotRunning { port, .. }
            | FleetError::ReadinessTimeout { port, .. } => Some(*port),
            FleetError::NotFound(port) | FleetError::ResolutionFailed(port) => Some(*port),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
