//! Port-keyed connection pool with in-flight connect de-duplication,
//! LRU eviction, periodic cleanup and health checking.

use crate::config::PoolConfig;
use crate::error::{FleetError, Result};
use crate::pool::connection::{Connection, HealthState};
use crate::pool::memory::{MemoryGauge, ProcessMemoryGauge};
use crate::pool::stats::{ConnectionStats, HealthSummary, PoolCounters, PoolStats};
use crate::transport::{first_active_page, PageInfo, Transport, TransportError, TransportHandle};
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Outcome of one creation attempt, shared by every caller that joined it.
#[derive(Debug, Clone)]
struct ConnectFailure {
    port: u16,
    attempts: u32,
    reason: String,
}

impl From<ConnectFailure> for FleetError {
    fn from(f: ConnectFailure) -> Self {
        FleetError::ConnectFailed {
            port: f.port,
            attempts: f.attempts,
            reason: f.reason,
        }
    }
}

type ConnectOutcome = std::result::Result<Arc<Connection>, ConnectFailure>;
type PendingConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

enum EntryState {
    Connecting(PendingConnect),
    Live {
        conn: Arc<Connection>,
        health: HealthState,
    },
}

struct PoolEntry {
    /// Insertion sequence; identifies this entry across await points and
    /// breaks `last_used_at` ties.
    seq: u64,
    state: EntryState,
    created_at: Instant,
    last_used_at: Instant,
    unstable_since: Option<Instant>,
}

impl PoolEntry {
    fn health(&self) -> HealthState {
        match &self.state {
            EntryState::Connecting(_) => HealthState::Connecting,
            EntryState::Live { health, .. } => *health,
        }
    }

    fn live(&self) -> Option<&Arc<Connection>> {
        match &self.state {
            EntryState::Live { conn, .. } => Some(conn),
            EntryState::Connecting(_) => None,
        }
    }

    fn holds(&self, id: Uuid) -> bool {
        self.live().is_some_and(|c| c.id() == id)
    }

    fn set_health(&mut self, next: HealthState, now: Instant) {
        if let EntryState::Live { health, .. } = &mut self.state {
            if next == HealthState::Healthy {
                self.unstable_since = None;
            } else if self.unstable_since.is_none() {
                self.unstable_since = Some(now);
            }
            *health = next;
        }
    }
}

/// Whether a settled entry should be dropped by a regular cleanup pass.
fn is_cleanup_candidate(entry: &PoolEntry, now: Instant, config: &PoolConfig) -> bool {
    match entry.health() {
        HealthState::Connecting => false,
        HealthState::Failed => true,
        health => {
            let idle = now.saturating_duration_since(entry.last_used_at);
            let age = now.saturating_duration_since(entry.created_at);
            if idle > config.stale_idle() && age > config.max_age() {
                return true;
            }
            health == HealthState::Unstable
                && entry
                    .unstable_since
                    .is_some_and(|since| now.saturating_duration_since(since) > config.unstable_window())
        }
    }
}

/// Least recently used settled entry; ties go to the earliest inserted.
fn lru_port(entries: &HashMap<u16, PoolEntry>) -> Option<u16> {
    entries
        .iter()
        .filter(|(_, e)| e.live().is_some())
        .min_by_key(|(_, e)| (e.last_used_at, e.seq))
        .map(|(port, _)| *port)
}

enum Plan {
    Ready(Arc<Connection>),
    Recover(Arc<Connection>),
    Wait(PendingConnect),
    Create {
        pending: PendingConnect,
        closing: Vec<Arc<Connection>>,
    },
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<u16>,
    pub memory_pressure: bool,
}

/// Result of one health-check pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub recovered: Vec<u16>,
    pub unstable: Vec<u16>,
    pub removed: Vec<u16>,
}

struct PoolInner {
    config: PoolConfig,
    transport: Arc<dyn Transport>,
    memory: Arc<dyn MemoryGauge>,
    entries: Mutex<HashMap<u16, PoolEntry>>,
    next_seq: AtomicU64,
    counters: PoolCounters,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

/// Shared handle to the pool; clones refer to the same entries.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_memory_gauge(config, transport, Arc::new(ProcessMemoryGauge::new()))
    }

    pub fn with_memory_gauge(
        config: PoolConfig,
        transport: Arc<dyn Transport>,
        memory: Arc<dyn MemoryGauge>,
    ) -> Self {
        tracing::debug!(
            max_connections = config.max_connections,
            retry_count = config.retry_count,
            "Creating connection pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                config,
                transport,
                memory,
                entries: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                counters: PoolCounters::default(),
                maintenance: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get a healthy connection for `port`, reusing, recovering or creating one.
    ///
    /// Concurrent calls for the same port share a single creation attempt and
    /// all observe its outcome.
    pub async fn acquire(&self, port: u16) -> Result<Arc<Connection>> {
        let mut allow_recover = true;
        loop {
            match self.plan(port, allow_recover) {
                Plan::Ready(conn) => return Ok(conn),
                Plan::Wait(pending) => return Ok(pending.await?),
                Plan::Create { pending, closing } => {
                    close_connections(closing).await;
                    return Ok(pending.await?);
                }
                Plan::Recover(conn) => {
                    if self.try_recover(port, &conn).await {
                        return Ok(conn);
                    }
                    allow_recover = false;
                }
            }
        }
    }

    /// Decide what `acquire` must do, mutating the table under one lock.
    fn plan(&self, port: u16, allow_recover: bool) -> Plan {
        let mut entries = self.inner.entries.lock();
        let now = Instant::now();
        let mut closing = Vec::new();

        let existing = entries.get_mut(&port).map(|entry| match &entry.state {
            EntryState::Connecting(pending) => Plan::Wait(pending.clone()),
            EntryState::Live {
                conn,
                health: HealthState::Healthy,
            } => {
                let conn = Arc::clone(conn);
                entry.last_used_at = now.max(entry.last_used_at);
                Plan::Ready(conn)
            }
            EntryState::Live { conn, .. } => Plan::Recover(Arc::clone(conn)),
        });

        match existing {
            Some(Plan::Recover(conn)) if !allow_recover => {
                entries.remove(&port);
                tracing::info!("Tearing down unusable connection on port {} for reconnect", port);
                closing.push(conn);
            }
            Some(plan) => return plan,
            None => {}
        }

        let pending = self.begin_connect(&mut entries, port, now, &mut closing);
        Plan::Create { pending, closing }
    }

    /// Insert a `Connecting` entry and spawn its creation task, evicting first
    /// if the pool is full. Caller holds the table lock.
    fn begin_connect(
        &self,
        entries: &mut HashMap<u16, PoolEntry>,
        port: u16,
        now: Instant,
        closing: &mut Vec<Arc<Connection>>,
    ) -> PendingConnect {
        if entries.len() >= self.inner.config.max_connections {
            match lru_port(entries) {
                Some(victim) => {
                    if let Some(conn) = entries.remove(&victim).and_then(|e| e.live().cloned()) {
                        tracing::info!("Pool full, evicting least recently used port {}", victim);
                        PoolCounters::bump(&self.inner.counters.evicted, 1);
                        closing.push(conn);
                    }
                }
                None => tracing::warn!(
                    "Pool full of in-flight connects; admitting port {} over capacity",
                    port
                ),
            }
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let task = tokio::spawn(self.clone().create_connection(port, seq));
        let pending: PendingConnect = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ConnectFailure {
                    port,
                    attempts: 0,
                    reason: format!("connect task aborted: {}", e),
                }),
            }
        }
        .boxed()
        .shared();

        entries.insert(
            port,
            PoolEntry {
                seq,
                state: EntryState::Connecting(pending.clone()),
                created_at: now,
                last_used_at: now,
                unstable_since: None,
            },
        );
        pending
    }

    /// Connect with retries and backoff, then install the result into the
    /// entry identified by `seq` (if it still exists).
    async fn create_connection(self, port: u16, seq: u64) -> ConnectOutcome {
        let config = &self.inner.config;
        let mut last_error = TransportError::NoTarget;

        for attempt in 1..=config.retry_count {
            match self.connect_once(port).await {
                Ok((handle, page)) => {
                    let conn = Arc::new(Connection::new(port, handle, page));
                    let installed = {
                        let mut entries = self.inner.entries.lock();
                        match entries.get_mut(&port) {
                            Some(entry) if entry.seq == seq => {
                                let now = Instant::now();
                                entry.state = EntryState::Live {
                                    conn: Arc::clone(&conn),
                                    health: HealthState::Healthy,
                                };
                                entry.created_at = now;
                                entry.last_used_at = now;
                                true
                            }
                            _ => false,
                        }
                    };

                    if !installed {
                        tracing::debug!("Port {} was closed while connecting, dropping session", port);
                        conn.close().await;
                        return Err(ConnectFailure {
                            port,
                            attempts: attempt,
                            reason: "connection closed while connecting".to_string(),
                        });
                    }

                    PoolCounters::bump(&self.inner.counters.created, 1);
                    tracing::info!(
                        "Connected to port {} (page: {})",
                        port,
                        conn.page().title
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::debug!(
                        "Connect attempt {}/{} to port {} failed: {}",
                        attempt,
                        config.retry_count,
                        port,
                        e
                    );
                    last_error = e;
                    if attempt < config.retry_count {
                        tokio::time::sleep(config.backoff(attempt)).await;
                    }
                }
            }
        }

        {
            let mut entries = self.inner.entries.lock();
            if entries.get(&port).is_some_and(|e| e.seq == seq) {
                entries.remove(&port);
            }
        }
        PoolCounters::bump(&self.inner.counters.failed_connects, 1);
        tracing::warn!(
            "Giving up on port {} after {} attempt(s): {}",
            port,
            config.retry_count,
            last_error
        );
        Err(ConnectFailure {
            port,
            attempts: config.retry_count,
            reason: last_error.to_string(),
        })
    }

    async fn connect_once(
        &self,
        port: u16,
    ) -> std::result::Result<(Arc<dyn TransportHandle>, PageInfo), TransportError> {
        let config = &self.inner.config;
        let timeout = config.connect_timeout();
        let handle = tokio::time::timeout(
            timeout,
            self.inner.transport.connect(&config.host, port, timeout),
        )
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

        match tokio::time::timeout(config.probe_timeout(), first_active_page(handle.as_ref())).await {
            Ok(Ok(page)) => Ok((handle, page)),
            Ok(Err(e)) => {
                handle.close().await;
                Err(e)
            }
            Err(_) => {
                handle.close().await;
                Err(TransportError::Timeout(config.probe_timeout()))
            }
        }
    }

    /// Re-derive the active page from the live handle without reconnecting.
    async fn recover_page(&self, conn: &Connection) -> std::result::Result<(), TransportError> {
        let timeout = self.inner.config.probe_timeout();
        let page = tokio::time::timeout(timeout, first_active_page(conn.handle()))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        conn.set_page(page);
        Ok(())
    }

    async fn try_recover(&self, port: u16, conn: &Arc<Connection>) -> bool {
        if let Err(e) = self.recover_page(conn).await {
            tracing::debug!("Recovery of port {} failed: {}", port, e);
            return false;
        }

        let mut entries = self.inner.entries.lock();
        match entries.get_mut(&port) {
            Some(entry) if entry.holds(conn.id()) => {
                let now = Instant::now();
                entry.set_health(HealthState::Healthy, now);
                entry.last_used_at = now.max(entry.last_used_at);
                PoolCounters::bump(&self.inner.counters.recovered, 1);
                tracing::info!("Recovered connection on port {} without reconnect", port);
                true
            }
            _ => false,
        }
    }

    /// Close the least recently used settled connection. In-flight entries are
    /// never chosen.
    pub async fn evict_oldest(&self) -> Option<u16> {
        let (port, conn) = {
            let mut entries = self.inner.entries.lock();
            let port = lru_port(&entries)?;
            let conn = entries.remove(&port).and_then(|e| e.live().cloned())?;
            (port, conn)
        };
        PoolCounters::bump(&self.inner.counters.evicted, 1);
        tracing::info!("Evicting least recently used port {}", port);
        conn.close().await;
        Some(port)
    }

    /// Drop entries that are failed, unstable for too long, or both idle and
    /// old. Under memory pressure keep only the most recently used one.
    pub async fn cleanup(&self) -> CleanupReport {
        let config = &self.inner.config;
        let memory_pressure = self
            .inner
            .memory
            .used_bytes()
            .is_some_and(|used| used > config.memory_pressure_bytes);

        let (removed, closing) = {
            let mut entries = self.inner.entries.lock();
            let now = Instant::now();

            let doomed: Vec<u16> = if memory_pressure {
                let keep = entries
                    .iter()
                    .filter(|(_, e)| e.live().is_some())
                    .max_by_key(|(_, e)| (e.last_used_at, e.seq))
                    .map(|(port, _)| *port);
                entries
                    .iter()
                    .filter(|(port, e)| e.live().is_some() && Some(**port) != keep)
                    .map(|(port, _)| *port)
                    .collect()
            } else {
                entries
                    .iter()
                    .filter(|(_, e)| is_cleanup_candidate(e, now, config))
                    .map(|(port, _)| *port)
                    .collect()
            };

            let mut closing = Vec::with_capacity(doomed.len());
            for port in &doomed {
                if let Some(conn) = entries.remove(port).and_then(|e| e.live().cloned()) {
                    closing.push(conn);
                }
            }
            (doomed, closing)
        };

        if memory_pressure {
            tracing::warn!(
                "Memory pressure detected, closed {} connection(s)",
                removed.len()
            );
        } else if !removed.is_empty() {
            tracing::info!("Cleanup removed connections on ports {:?}", removed);
        }

        PoolCounters::bump(&self.inner.counters.cleaned, removed.len() as u64);
        close_connections(closing).await;

        let mut removed = removed;
        removed.sort_unstable();
        CleanupReport {
            removed,
            memory_pressure,
        }
    }

    /// Probe every settled connection, recovering or downgrading as needed.
    /// Failed entries get a second look and are only removed if they expose
    /// no live context at all.
    pub async fn health_check(&self) -> HealthReport {
        let targets: Vec<(u16, Arc<Connection>)> = {
            let entries = self.inner.entries.lock();
            entries
                .iter()
                .filter_map(|(port, e)| e.live().map(|c| (*port, Arc::clone(c))))
                .collect()
        };

        let outcomes = join_all(targets.iter().map(|(port, conn)| async move {
            (*port, Arc::clone(conn), self.check_one(*port, conn).await)
        }))
        .await;

        let mut report = HealthReport {
            checked: outcomes.len(),
            ..HealthReport::default()
        };
        let mut suspects = Vec::new();
        {
            let mut entries = self.inner.entries.lock();
            let now = Instant::now();
            for (port, conn, (next, recovered)) in &outcomes {
                let Some(entry) = entries.get_mut(port) else {
                    continue;
                };
                if !entry.holds(conn.id()) {
                    continue;
                }
                let previous = entry.health();
                entry.set_health(*next, now);
                if previous != *next {
                    tracing::warn!("Port {} health {} -> {}", port, previous, next);
                }
                match next {
                    HealthState::Healthy if *recovered => report.recovered.push(*port),
                    HealthState::Unstable => report.unstable.push(*port),
                    HealthState::Failed => suspects.push((*port, Arc::clone(conn))),
                    _ => {}
                }
            }
        }
        if !report.recovered.is_empty() {
            PoolCounters::bump(&self.inner.counters.recovered, report.recovered.len() as u64);
        }

        for (port, conn) in suspects {
            if self.confirm_dead(port, &conn).await {
                report.removed.push(port);
            } else {
                report.unstable.push(port);
            }
        }

        report.recovered.sort_unstable();
        report.unstable.sort_unstable();
        report.removed.sort_unstable();
        report
    }

    /// Returns the new health and whether the page had to be re-derived.
    async fn check_one(&self, port: u16, conn: &Connection) -> (HealthState, bool) {
        let timeout = self.inner.config.probe_timeout();
        let page = conn.page();
        match tokio::time::timeout(timeout, conn.handle().probe(&page)).await {
            Ok(Ok(())) => return (HealthState::Healthy, false),
            Ok(Err(e)) => tracing::debug!("Probe on port {} failed: {}", port, e),
            Err(_) => tracing::debug!("Probe on port {} timed out", port),
        }

        if self.recover_page(conn).await.is_ok() {
            return (HealthState::Healthy, true);
        }

        match tokio::time::timeout(timeout, conn.handle().list_contexts()).await {
            Ok(Ok(contexts)) if !contexts.is_empty() => (HealthState::Unstable, false),
            _ => (HealthState::Failed, false),
        }
    }

    /// Second pass over a failed entry. A connection that still lists any
    /// context is kept as unstable.
    async fn confirm_dead(&self, port: u16, conn: &Arc<Connection>) -> bool {
        let timeout = self.inner.config.probe_timeout();
        let alive = matches!(
            tokio::time::timeout(timeout, conn.handle().list_contexts()).await,
            Ok(Ok(contexts)) if !contexts.is_empty()
        );

        let removed = {
            let mut entries = self.inner.entries.lock();
            if !entries.get(&port).is_some_and(|e| e.holds(conn.id())) {
                false
            } else if alive {
                if let Some(entry) = entries.get_mut(&port) {
                    entry.set_health(HealthState::Unstable, Instant::now());
                }
                false
            } else {
                entries.remove(&port);
                true
            }
        };

        if alive {
            tracing::debug!("Port {} still exposes contexts, keeping it", port);
        } else if removed {
            tracing::warn!("Removing dead connection on port {}", port);
            PoolCounters::bump(&self.inner.counters.cleaned, 1);
            conn.close().await;
        }
        removed
    }

    /// Close and forget the connection for `port`. No-op if absent. An
    /// in-flight connect for the port is abandoned and its result discarded.
    pub async fn close_connection(&self, port: u16) {
        let removed = self.inner.entries.lock().remove(&port);
        if let Some(conn) = removed.and_then(|e| e.live().cloned()) {
            conn.close().await;
            tracing::info!("Closed connection on port {}", port);
        }
    }

    pub async fn close_all(&self) {
        let closing: Vec<Arc<Connection>> = {
            let mut entries = self.inner.entries.lock();
            entries
                .drain()
                .filter_map(|(_, e)| e.live().cloned())
                .collect()
        };
        if !closing.is_empty() {
            tracing::info!("Closing {} pooled connection(s)", closing.len());
        }
        close_connections(closing).await;
    }

    pub fn contains(&self, port: u16) -> bool {
        self.inner.entries.lock().contains_key(&port)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health_of(&self, port: u16) -> Option<HealthState> {
        self.inner.entries.lock().get(&port).map(PoolEntry::health)
    }

    pub fn get_health(&self) -> HealthSummary {
        let entries = self.inner.entries.lock();
        let mut summary = HealthSummary::default();
        for entry in entries.values() {
            summary.count(entry.health());
        }
        summary
    }

    pub fn get_stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        let now = Instant::now();
        let entries = self.inner.entries.lock();

        let mut health = HealthSummary::default();
        let mut connections: Vec<ConnectionStats> = entries
            .iter()
            .map(|(port, e)| {
                health.count(e.health());
                ConnectionStats {
                    port: *port,
                    health: e.health(),
                    age_ms: millis(now.saturating_duration_since(e.created_at)),
                    idle_ms: millis(now.saturating_duration_since(e.last_used_at)),
                }
            })
            .collect();
        connections.sort_by_key(|c| c.port);

        PoolStats {
            total_connections: entries.len(),
            max_connections: self.inner.config.max_connections,
            health,
            total_created: PoolCounters::read(&counters.created),
            total_evicted: PoolCounters::read(&counters.evicted),
            total_failed_connects: PoolCounters::read(&counters.failed_connects),
            total_recovered: PoolCounters::read(&counters.recovered),
            total_cleaned: PoolCounters::read(&counters.cleaned),
            connections,
        }
    }

    /// Spawn the cleanup and health-check timers. Calling it again replaces
    /// the previous timers.
    pub fn start_maintenance(&self) {
        self.stop_maintenance();

        let weak = Arc::downgrade(&self.inner);
        let cleanup = spawn_periodic(weak.clone(), self.inner.config.cleanup_interval(), |pool| {
            async move {
                pool.cleanup().await;
            }
            .boxed()
        });
        let health = spawn_periodic(weak, self.inner.config.health_check_interval(), |pool| {
            async move {
                pool.health_check().await;
            }
            .boxed()
        });

        self.inner.maintenance.lock().extend([cleanup, health]);
        tracing::debug!("Pool maintenance timers started");
    }

    pub fn stop_maintenance(&self) {
        for task in self.inner.maintenance.lock().drain(..) {
            task.abort();
        }
    }

    /// Halt both timers and close every connection.
    pub async fn shutdown(&self) {
        self.stop_maintenance();
        self.close_all().await;
        tracing::info!("Connection pool shut down");
    }
}

/// Run `pass` every `every` while the pool is still alive.
fn spawn_periodic(
    weak: Weak<PoolInner>,
    every: Duration,
    pass: fn(ConnectionPool) -> BoxFuture<'static, ()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            pass(ConnectionPool { inner }).await;
        }
    })
}

async fn close_connections(conns: Vec<Arc<Connection>>) {
    join_all(conns.iter().map(|c| c.close())).await;
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ContextInfo;
    use async_trait::async_trait;

    struct IdleHandle;

    #[async_trait]
    impl TransportHandle for IdleHandle {
        async fn list_contexts(&self) -> std::result::Result<Vec<ContextInfo>, TransportError> {
            Ok(Vec::new())
        }

        async fn list_active_pages(
            &self,
            _context: &ContextInfo,
        ) -> std::result::Result<Vec<PageInfo>, TransportError> {
            Ok(Vec::new())
        }

        async fn probe(&self, _page: &PageInfo) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn evaluate(
            &self,
            _page: &PageInfo,
            _expression: &str,
        ) -> std::result::Result<serde_json::Value, TransportError> {
            Ok(serde_json::Value::Null)
        }

        async fn close(&self) {}
    }

    fn live(seq: u64, health: HealthState, created_at: Instant, last_used_at: Instant) -> PoolEntry {
        let page = PageInfo {
            target_id: format!("t{}", seq),
            context_id: String::new(),
            title: String::new(),
            url: String::new(),
        };
        PoolEntry {
            seq,
            state: EntryState::Live {
                conn: Arc::new(Connection::new(9222, Arc::new(IdleHandle), page)),
                health,
            },
            created_at,
            last_used_at,
            unstable_since: None,
        }
    }

    fn connecting(seq: u64, at: Instant) -> PoolEntry {
        PoolEntry {
            seq,
            state: EntryState::Connecting(futures::future::pending().boxed().shared()),
            created_at: at,
            last_used_at: at,
            unstable_since: None,
        }
    }

    fn config() -> PoolConfig {
        PoolConfig {
            cleanup_interval_ms: 1_000,
            stale_idle_factor: 2,
            max_age_ms: 10_000,
            unstable_window_ms: 5_000,
            ..PoolConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_but_young_connection_is_kept() {
        let config = config();
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;
        let now = Instant::now();

        // idle 5s > 2s threshold, but only 5s old
        let entry = live(0, HealthState::Healthy, start, start);
        assert!(!is_cleanup_candidate(&entry, now, &config));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_but_recently_used_connection_is_kept() {
        let config = config();
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(20)).await;
        let now = Instant::now();

        let entry = live(0, HealthState::Healthy, start, now);
        assert!(!is_cleanup_candidate(&entry, now, &config));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_and_old_connection_is_cleaned() {
        let config = config();
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(20)).await;

        let entry = live(0, HealthState::Healthy, start, start);
        assert!(is_cleanup_candidate(&entry, Instant::now(), &config));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connection_is_always_cleaned() {
        let now = Instant::now();
        let entry = live(0, HealthState::Failed, now, now);
        assert!(is_cleanup_candidate(&entry, now, &config()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstable_window() {
        let config = config();
        let start = Instant::now();
        let mut entry = live(0, HealthState::Healthy, start, start);
        entry.set_health(HealthState::Unstable, start);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!is_cleanup_candidate(&entry, Instant::now(), &config));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(is_cleanup_candidate(&entry, Instant::now(), &config));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_entries_never_cleaned() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(3_600)).await;
        let entry = connecting(0, start);
        assert!(!is_cleanup_candidate(&entry, Instant::now(), &config()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_skips_in_flight_and_breaks_ties_by_insertion() {
        let t0 = Instant::now();
        let mut entries = HashMap::new();
        entries.insert(1, connecting(0, t0));
        entries.insert(2, live(2, HealthState::Healthy, t0, t0));
        entries.insert(3, live(1, HealthState::Unstable, t0, t0));
        assert_eq!(lru_port(&entries), Some(3));

        tokio::time::advance(Duration::from_secs(1)).await;
        entries.get_mut(&3).unwrap().last_used_at = Instant::now();
        assert_eq!(lru_port(&entries), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_none_when_all_in_flight() {
        let mut entries = HashMap::new();
        entries.insert(1, connecting(0, Instant::now()));
        assert_eq!(lru_port(&entries), None);
    }
}
