use crate::transport::{PageInfo, TransportError, TransportHandle};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Connecting,
    Healthy,
    Unstable,
    Failed,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Connecting => "connecting",
            HealthState::Healthy => "healthy",
            HealthState::Unstable => "unstable",
            HealthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A live remote-debugging session to one port, with its selected page.
///
/// Handed out by the pool as `Arc<Connection>`; the pool decides when it is
/// closed. Callers should not cache it across long idle periods, since the
/// pool may evict it.
pub struct Connection {
    id: Uuid,
    port: u16,
    handle: Arc<dyn TransportHandle>,
    page: RwLock<PageInfo>,
    created_at: Instant,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(port: u16, handle: Arc<dyn TransportHandle>, page: PageInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            port,
            handle,
            page: RwLock::new(page),
            created_at: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handle(&self) -> &dyn TransportHandle {
        self.handle.as_ref()
    }

    /// The currently selected page.
    pub fn page(&self) -> PageInfo {
        self.page.read().clone()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let page = self.page();
        self.handle.evaluate(&page, expression).await
    }

    pub(crate) fn set_page(&self, page: PageInfo) {
        *self.page.write() = page;
    }

    /// Releases the transport handle. Only the first call does anything.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handle.close().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("page", &*self.page.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
