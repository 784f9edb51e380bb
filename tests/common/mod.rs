//! In-memory stand-ins for the transport, process and workspace seams.
#![allow(dead_code)]

use async_trait::async_trait;
use ide_fleet::config::{PoolConfig, SessionConfig};
use ide_fleet::error::{FleetError, Result};
use ide_fleet::pool::{ConnectionPool, MemoryGauge};
use ide_fleet::process::{
    Detector, DiscoveredInstance, PortProbe, ProcessHandle, ProductInfo, ProductType, Starter,
};
use ide_fleet::session::{
    BrowserControl, Collaborators, InstanceStatus, SessionManager, WorkspaceInfo,
    WorkspaceResolver,
};
use ide_fleet::transport::{ContextInfo, PageInfo, Transport, TransportError, TransportHandle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub fn page(target_id: &str, title: &str) -> PageInfo {
    PageInfo {
        target_id: target_id.to_string(),
        context_id: String::new(),
        title: title.to_string(),
        url: format!("vscode-file://{}", target_id),
    }
}

/// A pretend editor listening on one debug port.
pub struct FakeBrowser {
    refuse: AtomicBool,
    probe_ok: AtomicBool,
    pages: Mutex<Vec<PageInfo>>,
    has_context: AtomicBool,
    /// One-shot answers for upcoming `list_contexts` calls, then `has_context`
    context_script: Mutex<VecDeque<bool>>,
    pub connects: AtomicU32,
    pub closes: AtomicU32,
}

impl FakeBrowser {
    fn new(title: &str) -> Self {
        Self {
            refuse: AtomicBool::new(false),
            probe_ok: AtomicBool::new(true),
            pages: Mutex::new(vec![page("page-1", title)]),
            has_context: AtomicBool::new(true),
            context_script: Mutex::new(VecDeque::new()),
            connects: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        }
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_pages(&self, pages: Vec<PageInfo>) {
        *self.pages.lock() = pages;
    }

    /// Context still listed but without any page.
    pub fn hide_pages(&self) {
        self.set_pages(Vec::new());
    }

    /// Nothing listed at all.
    pub fn go_dark(&self) {
        self.hide_pages();
        self.has_context.store(false, Ordering::SeqCst);
        self.set_probe_ok(false);
    }

    /// Whether each of the next `list_contexts` calls sees a context.
    pub fn script_contexts(&self, answers: &[bool]) {
        self.context_script.lock().extend(answers.iter().copied());
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeTransport {
    browsers: Mutex<HashMap<u16, Arc<FakeBrowser>>>,
    delay: Mutex<Duration>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, port: u16) -> Arc<FakeBrowser> {
        let browser = Arc::new(FakeBrowser::new(&format!("editor {}", port)));
        self.browsers.lock().insert(port, Arc::clone(&browser));
        browser
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _host: &str,
        port: u16,
        _timeout: Duration,
    ) -> std::result::Result<Arc<dyn TransportHandle>, TransportError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let browser = self.browsers.lock().get(&port).cloned();
        let Some(browser) = browser else {
            return Err(TransportError::Connect(format!("nothing on port {}", port)));
        };
        browser.connects.fetch_add(1, Ordering::SeqCst);
        if browser.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        Ok(Arc::new(FakeHandle {
            browser,
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeHandle {
    browser: Arc<FakeBrowser>,
    closed: AtomicBool,
}

impl FakeHandle {
    fn check_open(&self) -> std::result::Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn list_contexts(&self) -> std::result::Result<Vec<ContextInfo>, TransportError> {
        self.check_open()?;
        let scripted = self.browser.context_script.lock().pop_front();
        let listed = scripted.unwrap_or_else(|| self.browser.has_context.load(Ordering::SeqCst));
        if !listed {
            return Ok(Vec::new());
        }
        Ok(vec![ContextInfo {
            id: String::new(),
            page_count: self.browser.pages.lock().len(),
        }])
    }

    async fn list_active_pages(
        &self,
        _context: &ContextInfo,
    ) -> std::result::Result<Vec<PageInfo>, TransportError> {
        self.check_open()?;
        Ok(self.browser.pages.lock().clone())
    }

    async fn probe(&self, _page: &PageInfo) -> std::result::Result<(), TransportError> {
        self.check_open()?;
        if self.browser.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Protocol("target detached".to_string()))
        }
    }

    async fn evaluate(
        &self,
        page: &PageInfo,
        _expression: &str,
    ) -> std::result::Result<serde_json::Value, TransportError> {
        self.check_open()?;
        Ok(serde_json::Value::String(page.title.clone()))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.browser.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Memory gauge with a settable reading.
#[derive(Default)]
pub struct FixedGauge(AtomicU64);

impl FixedGauge {
    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryGauge for FixedGauge {
    fn used_bytes(&self) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

pub fn pool_config() -> PoolConfig {
    PoolConfig {
        max_connections: 4,
        retry_count: 3,
        backoff_base_ms: 100,
        backoff_max_ms: 1_000,
        ..PoolConfig::default()
    }
}

pub fn make_pool(
    config: PoolConfig,
    transport: Arc<FakeTransport>,
) -> (ConnectionPool, Arc<FixedGauge>) {
    let gauge = Arc::new(FixedGauge::default());
    let pool = ConnectionPool::with_memory_gauge(config, transport, gauge.clone());
    (pool, gauge)
}

// ---------------------------------------------------------------------------
// Process and workspace
// ---------------------------------------------------------------------------

pub fn running(port: u16) -> DiscoveredInstance {
    DiscoveredInstance {
        port,
        status: InstanceStatus::Running,
        url: format!("http://127.0.0.1:{}", port),
        product_type: ProductType::Cursor,
    }
}

#[derive(Default)]
pub struct FakeDetector {
    pub found: Mutex<Vec<DiscoveredInstance>>,
    pub free_port: Mutex<Option<u16>>,
}

#[async_trait]
impl Detector for FakeDetector {
    async fn discover(&self) -> Vec<DiscoveredInstance> {
        self.found.lock().clone()
    }

    async fn next_free_port(&self, exclude: &[u16]) -> Result<u16> {
        match *self.free_port.lock() {
            Some(port) if !exclude.contains(&port) => Ok(port),
            _ => Err(FleetError::Process("No free debug port".to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeStarter {
    pub launched: Mutex<Vec<(u16, PathBuf)>>,
    pub terminated: Mutex<Vec<u16>>,
    pub fail_launch: AtomicBool,
    pub fail_terminate: AtomicBool,
}

impl Starter for FakeStarter {
    fn launch(&self, port: u16, workspace: &Path) -> Result<ProcessHandle> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(FleetError::Process("executable missing".to_string()));
        }
        self.launched.lock().push((port, workspace.to_path_buf()));
        Ok(ProcessHandle {
            port,
            pid: 4242,
            workspace: workspace.to_path_buf(),
            launched_at: 0,
        })
    }

    fn terminate(&self, port: u16) -> Result<()> {
        self.terminated.lock().push(port);
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(FleetError::Process(format!("kill failed for port {}", port)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProbe {
    pub reachable: Mutex<HashSet<u16>>,
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn is_reachable(&self, port: u16) -> bool {
        self.reachable.lock().contains(&port)
    }

    async fn identify(&self, port: u16) -> Option<ProductInfo> {
        self.reachable.lock().contains(&port).then(|| ProductInfo {
            browser: "Chrome/120.0".to_string(),
            user_agent: "Cursor/0.42.0 Chrome/120.0".to_string(),
            product_type: ProductType::Cursor,
        })
    }
}

#[derive(Default)]
pub struct FakeResolver {
    pub paths: Mutex<HashMap<u16, PathBuf>>,
    pub calls: AtomicU32,
}

impl FakeResolver {
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceResolver for FakeResolver {
    async fn resolve(&self, port: u16) -> Option<WorkspaceInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = self.paths.lock().get(&port).cloned()?;
        Some(WorkspaceInfo::gather(path).await)
    }
}

/// Session manager wired to fakes, with handles to each of them.
pub struct Harness {
    pub manager: SessionManager,
    pub pool: ConnectionPool,
    pub transport: Arc<FakeTransport>,
    pub detector: Arc<FakeDetector>,
    pub starter: Arc<FakeStarter>,
    pub probe: Arc<FakeProbe>,
    pub resolver: Arc<FakeResolver>,
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        default_workspace: std::env::temp_dir(),
        readiness_attempts: 3,
        readiness_interval_ms: 1_000,
        probe_timeout_ms: 500,
        workspace_roots: Vec::new(),
    }
}

pub fn harness(config: SessionConfig) -> Harness {
    let transport = FakeTransport::new();
    let (pool, _) = make_pool(pool_config(), Arc::clone(&transport));
    let detector = Arc::new(FakeDetector::default());
    let starter = Arc::new(FakeStarter::default());
    let probe = Arc::new(FakeProbe::default());
    let resolver = Arc::new(FakeResolver::default());

    let manager = SessionManager::new(
        config,
        BrowserControl::new(pool.clone()),
        Collaborators {
            detector: detector.clone(),
            starter: starter.clone(),
            probe: probe.clone(),
            resolver: resolver.clone(),
        },
    );

    Harness {
        manager,
        pool,
        transport,
        detector,
        starter,
        probe,
        resolver,
    }
}
