use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Reports how much memory this process currently holds.
pub trait MemoryGauge: Send + Sync {
    /// Resident bytes, or `None` when unavailable.
    fn used_bytes(&self) -> Option<u64>;
}

/// Resident set size of the current process via `sysinfo`.
pub struct ProcessMemoryGauge {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryGauge {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!("Cannot determine own PID for memory checks: {}", e))
            .ok();
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemoryGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGauge for ProcessMemoryGauge {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(pid).map(|p| p.memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_reports_memory() {
        let gauge = ProcessMemoryGauge::new();
        let used = gauge.used_bytes();
        assert!(used.is_some_and(|bytes| bytes > 0));
    }
}
