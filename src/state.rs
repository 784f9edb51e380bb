use crate::config::FleetConfig;
use crate::pool::ConnectionPool;
use crate::process::{HttpPortProbe, PortScanDetector, ProcessStarter};
use crate::session::{BrowserControl, ChainResolver, Collaborators, SessionManager};
use crate::transport::CdpTransport;
use std::sync::Arc;

/// Fully wired pool + session manager over the real CDP transport.
#[derive(Clone)]
pub struct FleetState {
    pub config: Arc<FleetConfig>,
    pub pool: ConnectionPool,
    pub sessions: Arc<SessionManager>,
    pub starter: Arc<ProcessStarter>,
}

impl FleetState {
    pub fn new(config: FleetConfig) -> Self {
        let transport = Arc::new(CdpTransport::new());
        let pool = ConnectionPool::new(config.pool.clone(), transport);
        let control = BrowserControl::new(pool.clone());

        let probe = Arc::new(HttpPortProbe::new(
            config.pool.host.clone(),
            config.session.probe_timeout(),
        ));
        let detector = Arc::new(PortScanDetector::new(
            probe.clone(),
            config.pool.host.clone(),
            config.discovery.port_start..=config.discovery.port_end,
        ));
        let starter = Arc::new(ProcessStarter::new(config.launcher.clone()));
        let resolver = Arc::new(ChainResolver::standard(
            Arc::clone(&starter),
            control.clone(),
            config.session.workspace_roots.clone(),
        ));

        let sessions = Arc::new(SessionManager::new(
            config.session.clone(),
            control,
            Collaborators {
                detector,
                starter: starter.clone(),
                probe,
                resolver,
            },
        ));

        Self {
            config: Arc::new(config),
            pool,
            sessions,
            starter,
        }
    }

    /// Start the pool's cleanup and health-check timers.
    pub fn start_background(&self) {
        self.pool.start_maintenance();
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
