use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    /// Connection pool tuning
    #[serde(default)]
    pub pool: PoolConfig,

    /// Multi-instance session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Port range scanned for running instances
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// How new IDE instances are launched
    #[serde(default)]
    pub launcher: LauncherConfig,
}

/// Pool limits, timers and staleness thresholds.
///
/// All durations are stored as milliseconds so the TOML stays flat; use the
/// accessor methods to get `Duration`s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Host the remote-debugging endpoints listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum number of pooled connections before LRU eviction kicks in
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on a single liveness probe or recovery listing
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Connect attempts per creation (including the first)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Idle threshold expressed as a multiple of the cleanup interval
    #[serde(default = "default_stale_idle_factor")]
    pub stale_idle_factor: u32,

    /// Age after which an idle connection becomes eligible for cleanup
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    /// How long an entry may stay unstable before cleanup drops it
    #[serde(default = "default_unstable_window_ms")]
    pub unstable_window_ms: u64,

    /// Resident memory of this process above which cleanup keeps only the
    /// most recently used connection
    #[serde(default = "default_memory_pressure_bytes")]
    pub memory_pressure_bytes: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            retry_count: default_retry_count(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            stale_idle_factor: default_stale_idle_factor(),
            max_age_ms: default_max_age_ms(),
            unstable_window_ms: default_unstable_window_ms(),
            memory_pressure_bytes: default_memory_pressure_bytes(),
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Idle time after which a connection counts as stale.
    pub fn stale_idle(&self) -> Duration {
        self.cleanup_interval() * self.stale_idle_factor
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn unstable_window(&self) -> Duration {
        Duration::from_millis(self.unstable_window_ms)
    }

    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Workspace opened by `start` when the caller gives none
    #[serde(default = "default_workspace")]
    pub default_workspace: PathBuf,

    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,

    /// Bound on each reachability probe during readiness polling
    #[serde(default = "default_session_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Directories searched when matching a window title to a project folder
    #[serde(default)]
    pub workspace_roots: Vec<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_workspace: default_workspace(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval_ms(),
            probe_timeout_ms: default_session_probe_timeout_ms(),
            workspace_roots: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_port_start")]
    pub port_start: u16,

    /// Inclusive upper bound
    #[serde(default = "default_port_end")]
    pub port_end: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port_start: default_port_start(),
            port_end: default_port_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfig {
    /// IDE executable path
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Parent of the per-port user data directories
    #[serde(default = "default_user_data_root")]
    pub user_data_root: PathBuf,

    /// Extra launch arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            user_data_root: default_user_data_root(),
            extra_args: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_stale_idle_factor() -> u32 {
    2
}

fn default_max_age_ms() -> u64 {
    600_000
}

fn default_unstable_window_ms() -> u64 {
    120_000
}

fn default_memory_pressure_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_workspace() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_readiness_interval_ms() -> u64 {
    1_000
}

fn default_session_probe_timeout_ms() -> u64 {
    2_000
}

fn default_port_start() -> u16 {
    9222
}

fn default_port_end() -> u16 {
    9322
}

fn default_executable() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        dirs::data_local_dir()
            .map(|p| p.join("Programs").join("cursor").join("Cursor.exe"))
            .unwrap_or_else(|| PathBuf::from("Cursor.exe"))
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Applications/Cursor.app/Contents/MacOS/Cursor")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        PathBuf::from("/usr/bin/cursor")
    }
}

fn default_user_data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ide-fleet")
        .join("instances")
}
