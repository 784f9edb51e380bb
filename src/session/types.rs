use crate::process::ProductType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSource {
    /// Found already running by discovery
    Discovered,
    /// Launched by this process
    Launched,
}

/// Snapshot of one known editor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub port: u16,
    pub status: InstanceStatus,
    pub source: InstanceSource,
    pub url: String,
    pub product_type: ProductType,
    /// Cached workspace directory, if resolved
    pub workspace_path: Option<PathBuf>,
    pub is_active: bool,
}

/// Outcome of an active-instance switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub previous: Option<u16>,
    pub current: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub active_port: Option<u16>,
    /// Sorted by port
    pub instances: Vec<InstanceRecord>,
}

impl SessionStatus {
    pub fn status_of(&self, port: u16) -> Option<InstanceStatus> {
        self.instance(port).map(|i| i.status)
    }

    pub fn workspace_of(&self, port: u16) -> Option<&PathBuf> {
        self.instance(port).and_then(|i| i.workspace_path.as_ref())
    }

    pub fn instance(&self, port: u16) -> Option<&InstanceRecord> {
        self.instances.iter().find(|i| i.port == port)
    }
}
