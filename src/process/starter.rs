use crate::config::LauncherConfig;
use crate::error::{FleetError, Result};
use crate::process::{cmdline, launcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// A process this system launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub port: u16,
    pub pid: u32,
    pub workspace: PathBuf,
    pub launched_at: u64,
}

/// Creates and terminates editor processes.
pub trait Starter: Send + Sync {
    fn launch(&self, port: u16, workspace: &Path) -> Result<ProcessHandle>;

    fn terminate(&self, port: u16) -> Result<()>;
}

/// Spawns the configured editor executable and kills by PID.
pub struct ProcessStarter {
    config: LauncherConfig,
    /// Map of port -> ProcessHandle
    launched: Mutex<HashMap<u16, ProcessHandle>>,
    system: Mutex<System>,
}

impl ProcessStarter {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config,
            launched: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
        }
    }

    /// Get the handle for an instance we launched
    pub fn launched(&self, port: u16) -> Option<ProcessHandle> {
        self.launched.lock().get(&port).cloned()
    }

    /// PID for `port`: ours if we launched it, otherwise whichever process
    /// carries the matching debug flag.
    fn pid_for(&self, port: u16) -> Option<Pid> {
        if let Some(handle) = self.launched.lock().get(&port) {
            return Some(Pid::from_u32(handle.pid));
        }
        let mut system = self.system.lock();
        cmdline::find_debug_process(&mut system, port).map(|(pid, _)| pid)
    }
}

impl Starter for ProcessStarter {
    fn launch(&self, port: u16, workspace: &Path) -> Result<ProcessHandle> {
        crate::config::validation::validate_executable(&self.config.executable)?;

        let data_dir = launcher::user_data_dir(&self.config, port);
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            FleetError::Process(format!(
                "Failed to create user data dir {:?}: {}",
                data_dir, e
            ))
        })?;

        let mut cmd = launcher::build_command(&self.config, port, workspace);
        tracing::info!("Launching instance on port {} with command: {:?}", port, cmd);

        let child = cmd
            .spawn()
            .map_err(|e| FleetError::Process(format!("Failed to launch editor: {}", e)))?;

        let launched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let handle = ProcessHandle {
            port,
            pid: child.id(),
            workspace: workspace.to_path_buf(),
            launched_at,
        };
        self.launched.lock().insert(port, handle.clone());

        tracing::info!("Launched instance on port {} with PID {}", port, handle.pid);
        Ok(handle)
    }

    fn terminate(&self, port: u16) -> Result<()> {
        let pid = self.pid_for(port).ok_or_else(|| {
            FleetError::Process(format!("No process owns debug port {}", port))
        })?;

        tracing::info!("Terminating instance on port {} (PID: {})", port, pid);

        let killed = {
            let mut system = self.system.lock();
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                ProcessRefreshKind::new(),
            );
            match system.process(pid) {
                Some(process) => process.kill(),
                None => {
                    tracing::warn!("Process {} not found in system", pid);
                    true
                }
            }
        };

        self.launched.lock().remove(&port);

        if killed {
            Ok(())
        } else {
            Err(FleetError::Process(format!(
                "Failed to kill process {} on port {}",
                pid, port
            )))
        }
    }
}
