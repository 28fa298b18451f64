//! Shared test fixtures: recording doubles for the service seams and a
//! controller wired to them in a temp directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use proxy_supervisor::config::{ConfigStore, Configuration};
use proxy_supervisor::controller::ProxyLifecycleController;
use proxy_supervisor::pac::PacDocumentServer;
use proxy_supervisor::services::{
    HttpProxyService, LocalProxyService, ServiceError, ServiceKind, SystemProxyAdapter,
};

/// In-memory stand-in for the relay / HTTP adapter seams.
pub struct MockService {
    kind: ServiceKind,
    running: AtomicBool,
    starts: AtomicUsize,
    fail_bind: AtomicBool,
    fail_port: AtomicUsize,
}

impl MockService {
    pub fn new(kind: ServiceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            fail_bind: AtomicBool::new(false),
            fail_port: AtomicUsize::new(0),
        })
    }

    /// Make every subsequent start fail as if the port were taken.
    pub fn fail_binds(&self, port: u16) {
        self.fail_port.store(port as usize, Ordering::SeqCst);
        self.fail_bind.store(true, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn running_now(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn do_start(&self) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(ServiceError::Bind {
                kind: self.kind,
                port: self.fail_port.load(Ordering::SeqCst) as u16,
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
            });
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn do_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalProxyService for MockService {
    async fn start(&self, _config: &Configuration) -> Result<(), ServiceError> {
        self.do_start().await
    }

    async fn stop(&self) {
        self.do_stop();
    }

    fn is_running(&self) -> bool {
        self.running_now()
    }
}

#[async_trait]
impl HttpProxyService for MockService {
    async fn start(&self, _config: &Configuration) -> Result<(), ServiceError> {
        self.do_start().await
    }

    async fn stop(&self) {
        self.do_stop();
    }

    fn is_running(&self) -> bool {
        self.running_now()
    }
}

/// Records system-proxy calls instead of touching the OS.
pub struct RecordingProxyAdapter {
    pub enables: Mutex<Vec<(String, u16, bool)>>,
    pub disables: AtomicUsize,
    pub active: AtomicBool,
}

impl RecordingProxyAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enables: Mutex::new(Vec::new()),
            disables: AtomicUsize::new(0),
            active: AtomicBool::new(false),
        })
    }

    pub fn enable_count(&self) -> usize {
        self.enables.lock().unwrap().len()
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    pub fn is_applied(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl SystemProxyAdapter for RecordingProxyAdapter {
    fn enable(&self, host: &str, port: u16, global: bool) -> std::io::Result<()> {
        self.enables.lock().unwrap().push((host.into(), port, global));
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self) -> std::io::Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Fresh per-test directory under the system temp dir.
pub fn test_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "proxy-supervisor-test-{}-{}",
        tag,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub struct Fixture {
    pub controller: ProxyLifecycleController,
    pub pac: Arc<PacDocumentServer>,
    pub local: Arc<MockService>,
    pub http: Arc<MockService>,
    pub system_proxy: Arc<RecordingProxyAdapter>,
    pub dir: PathBuf,
}

/// Controller wired to mocks, configuration stored under a fresh dir.
pub fn fixture(tag: &str) -> Fixture {
    let dir = test_dir(tag);
    let pac = Arc::new(PacDocumentServer::new(dir.join("proxy.pac")));
    let local = MockService::new(ServiceKind::LocalRelay);
    let http = MockService::new(ServiceKind::HttpAdapter);
    let system_proxy = RecordingProxyAdapter::new();

    let controller = ProxyLifecycleController::new(
        ConfigStore::new(dir.join("gui-config.json")),
        pac.clone(),
        local.clone(),
        http.clone(),
        system_proxy.clone(),
    );

    Fixture {
        controller,
        pac,
        local,
        http,
        system_proxy,
        dir,
    }
}

/// Poll until `cond` holds or the timeout elapses.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Wait until the controller has settled: no state change observed for
/// a short quiet window.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}
