//! Tracks known editor instances, which one is active, and their workspaces.

use crate::config::SessionConfig;
use crate::error::{FleetError, Result};
use crate::process::{Detector, DiscoveredInstance, PortProbe, ProductType, Starter};
use crate::session::control::BrowserControl;
use crate::session::types::{
    InstanceRecord, InstanceSource, InstanceStatus, SessionRef, SessionStatus,
};
use crate::session::workspace::{WorkspaceInfo, WorkspaceResolver};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// External services the session manager delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn Detector>,
    pub starter: Arc<dyn Starter>,
    pub probe: Arc<dyn PortProbe>,
    pub resolver: Arc<dyn WorkspaceResolver>,
}

#[derive(Debug, Clone)]
struct Instance {
    status: InstanceStatus,
    source: InstanceSource,
    url: String,
    product_type: ProductType,
}

#[derive(Default)]
struct SessionState {
    instances: BTreeMap<u16, Instance>,
    active_port: Option<u16>,
    workspaces: HashMap<u16, WorkspaceInfo>,
}

impl SessionState {
    fn record(&self, port: u16) -> Option<InstanceRecord> {
        self.instances.get(&port).map(|i| InstanceRecord {
            port,
            status: i.status,
            source: i.source,
            url: i.url.clone(),
            product_type: i.product_type,
            workspace_path: self.workspaces.get(&port).map(|w| w.path.clone()),
            is_active: self.active_port == Some(port),
        })
    }

    fn first_running(&self) -> Option<u16> {
        self.instances
            .iter()
            .find(|(_, i)| i.status == InstanceStatus::Running)
            .map(|(port, _)| *port)
    }

    fn forget(&mut self, port: u16) {
        self.instances.remove(&port);
        self.workspaces.remove(&port);
    }
}

/// Undoes a `start()` that did not reach `Running`: the starting record is
/// dropped and, once launched, the process is terminated.
struct PendingStart<'a> {
    manager: &'a SessionManager,
    port: u16,
    launched: bool,
    armed: bool,
}

impl<'a> PendingStart<'a> {
    fn new(manager: &'a SessionManager, port: u16) -> Self {
        Self {
            manager,
            port,
            launched: false,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let port = self.port;
        {
            let mut state = self.manager.state.lock();
            if state
                .instances
                .get(&port)
                .is_some_and(|i| i.status == InstanceStatus::Starting)
            {
                state.forget(port);
            }
        }
        if self.launched {
            tracing::info!("Abandoning start on port {}, terminating", port);
            if let Err(e) = self.manager.collaborators.starter.terminate(port) {
                tracing::warn!("Failed to terminate unready instance on port {}: {}", port, e);
            }
        }
    }
}

pub struct SessionManager {
    config: SessionConfig,
    control: BrowserControl,
    collaborators: Collaborators,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, control: BrowserControl, collaborators: Collaborators) -> Self {
        Self {
            config,
            control,
            collaborators,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn control(&self) -> &BrowserControl {
        &self.control
    }

    /// Run discovery and merge what it finds.
    pub async fn refresh(&self) -> Vec<u16> {
        let found = self.collaborators.detector.discover().await;
        self.register_discovered(found).await
    }

    /// Merge discovery output into the known set.
    ///
    /// Known instances that discovery no longer reports are dropped (except
    /// ones still starting), along with their workspace cache and pool
    /// connection. Cached workspaces of surviving instances are kept. Returns
    /// the dropped ports.
    pub async fn register_discovered(&self, records: Vec<DiscoveredInstance>) -> Vec<u16> {
        let dropped = {
            let mut state = self.state.lock();
            let seen: HashSet<u16> = records.iter().map(|r| r.port).collect();

            for record in records {
                match state.instances.get_mut(&record.port) {
                    // start() owns the starting -> running transition
                    Some(existing) if existing.status == InstanceStatus::Starting => {}
                    Some(existing) => {
                        existing.status = record.status;
                        existing.url = record.url;
                        existing.product_type = record.product_type;
                    }
                    None => {
                        tracing::info!(
                            "Discovered {:?} instance on port {}",
                            record.product_type,
                            record.port
                        );
                        state.instances.insert(
                            record.port,
                            Instance {
                                status: record.status,
                                source: InstanceSource::Discovered,
                                url: record.url,
                                product_type: record.product_type,
                            },
                        );
                    }
                }
            }

            let dropped: Vec<u16> = state
                .instances
                .iter()
                .filter(|(port, i)| !seen.contains(*port) && i.status != InstanceStatus::Starting)
                .map(|(port, _)| *port)
                .collect();
            for port in &dropped {
                tracing::info!("Instance on port {} disappeared", port);
                state.forget(*port);
            }

            if let Some(active) = state.active_port {
                let still_running = state
                    .instances
                    .get(&active)
                    .is_some_and(|i| i.status == InstanceStatus::Running);
                if !still_running {
                    tracing::info!("Active instance on port {} is gone, clearing", active);
                    state.active_port = None;
                }
            }
            dropped
        };

        for port in &dropped {
            self.control.release(*port).await;
        }
        dropped
    }

    /// Make `port` the active instance. Connection setup is left to first use.
    pub fn switch_active(&self, port: u16) -> Result<SessionRef> {
        let mut state = self.state.lock();
        let status = state
            .instances
            .get(&port)
            .map(|i| i.status)
            .ok_or(FleetError::NotFound(port))?;
        if status != InstanceStatus::Running {
            return Err(FleetError::NotRunning { port, status });
        }

        let previous = state.active_port.replace(port);
        if previous != Some(port) {
            tracing::info!("Active instance switched {:?} -> {}", previous, port);
        }
        Ok(SessionRef {
            previous,
            current: port,
        })
    }

    pub fn get_active(&self) -> Option<InstanceRecord> {
        let state = self.state.lock();
        state.active_port.and_then(|port| state.record(port))
    }

    pub fn active_port(&self) -> Option<u16> {
        self.state.lock().active_port
    }

    pub fn instance(&self, port: u16) -> Option<InstanceRecord> {
        self.state.lock().record(port)
    }

    pub async fn get_workspace_path(&self, port: u16) -> Option<PathBuf> {
        self.get_workspace_info(port).await.map(|info| info.path)
    }

    /// Cached workspace for `port`, resolving it on a miss. Failed lookups
    /// are not cached.
    pub async fn get_workspace_info(&self, port: u16) -> Option<WorkspaceInfo> {
        let cached = self.state.lock().workspaces.get(&port).cloned();
        if cached.is_some() {
            return cached;
        }

        let resolved = self
            .collaborators
            .resolver
            .resolve(port)
            .await
            .filter(|info| !info.path.as_os_str().is_empty());

        let Some(info) = resolved else {
            tracing::debug!("{}", FleetError::ResolutionFailed(port));
            return None;
        };

        let mut state = self.state.lock();
        if !state.instances.contains_key(&port) {
            return Some(info);
        }
        // Another caller may have filled the slot while we were resolving.
        Some(state.workspaces.entry(port).or_insert(info).clone())
    }

    /// Like [`get_workspace_path`](Self::get_workspace_path), but a failed
    /// lookup is an error.
    pub async fn require_workspace_path(&self, port: u16) -> Result<PathBuf> {
        self.get_workspace_path(port)
            .await
            .ok_or(FleetError::ResolutionFailed(port))
    }

    pub fn invalidate_workspace(&self, port: u16) {
        self.state.lock().workspaces.remove(&port);
    }

    pub fn clear_workspace_cache(&self) {
        self.state.lock().workspaces.clear();
    }

    /// Launch a new instance on the next free port and wait until it answers.
    ///
    /// On readiness timeout, or if the returned future is dropped before the
    /// instance answers, the process is terminated and no record remains.
    /// The new instance becomes active if none was.
    pub async fn start(&self, workspace: Option<PathBuf>) -> Result<InstanceRecord> {
        let workspace = workspace.unwrap_or_else(|| self.config.default_workspace.clone());
        let info = WorkspaceInfo::gather(workspace.clone()).await;

        let taken: Vec<u16> = self.state.lock().instances.keys().copied().collect();
        let port = self.collaborators.detector.next_free_port(&taken).await?;

        {
            let mut state = self.state.lock();
            if state.instances.contains_key(&port) {
                return Err(FleetError::Process(format!(
                    "Port {} was claimed concurrently",
                    port
                )));
            }
            state.instances.insert(
                port,
                Instance {
                    status: InstanceStatus::Starting,
                    source: InstanceSource::Launched,
                    url: self.control.endpoint_url(port),
                    product_type: ProductType::Unknown,
                },
            );
            state.workspaces.insert(port, info);
        }
        let mut pending = PendingStart::new(self, port);

        self.collaborators.starter.launch(port, &workspace)?;
        pending.launched = true;

        let attempts = self.config.readiness_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.readiness_interval()).await;

            let reachable = tokio::time::timeout(
                self.config.probe_timeout(),
                self.collaborators.probe.is_reachable(port),
            )
            .await
            .unwrap_or(false);

            if reachable {
                let mut state = self.state.lock();
                let Some(instance) = state.instances.get_mut(&port) else {
                    // stopped while we were waiting
                    pending.disarm();
                    return Err(FleetError::NotFound(port));
                };
                instance.status = InstanceStatus::Running;
                if state.active_port.is_none() {
                    state.active_port = Some(port);
                }
                pending.disarm();
                tracing::info!("Instance on port {} is ready after {} check(s)", port, attempt);
                return state.record(port).ok_or(FleetError::NotFound(port));
            }

            tracing::debug!("Port {} not ready ({}/{})", port, attempt, attempts);
        }

        tracing::warn!("Instance on port {} never became reachable", port);
        Err(FleetError::ReadinessTimeout { port, attempts })
    }

    /// Terminate and forget an instance, handing the active role to another
    /// running instance if it had it.
    pub async fn stop(&self, port: u16) -> Result<()> {
        if !self.state.lock().instances.contains_key(&port) {
            return Err(FleetError::NotFound(port));
        }

        if let Err(e) = self.collaborators.starter.terminate(port) {
            tracing::warn!("Terminate for port {} failed, forgetting it anyway: {}", port, e);
        }
        self.control.release(port).await;

        let mut state = self.state.lock();
        state.forget(port);
        if state.active_port == Some(port) {
            state.active_port = state.first_running();
            tracing::info!(
                "Active instance on port {} stopped, now {:?}",
                port,
                state.active_port
            );
        }
        tracing::info!("Stopped instance on port {}", port);
        Ok(())
    }

    pub fn get_status(&self) -> SessionStatus {
        let state = self.state.lock();
        SessionStatus {
            active_port: state.active_port,
            instances: state
                .instances
                .keys()
                .filter_map(|port| state.record(*port))
                .collect(),
        }
    }
}
