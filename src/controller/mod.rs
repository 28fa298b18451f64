//! Proxy lifecycle controller.
//!
//! # Responsibilities
//! - Own the configuration as a single value; hand out snapshots
//! - Drive start/stop of the PAC server, local relay, and HTTP adapter
//!   in a fixed dependency order
//! - Keep the OS system-proxy setting consistent with the configuration
//!   and with what is actually running
//! - Serialize reconciliation: triggers from any source feed one worker
//!
//! # Design Decisions
//! - The dirty flag records that *this* process applied the OS proxy;
//!   the setting is never cleared unless we set it, except for the final
//!   unconditional cleanup in `stop`
//! - A failed reload does not roll anything back: stopped services stay
//!   stopped, one error event is emitted, and the system proxy is
//!   reconciled against what actually survived
//! - A PAC-document change reconciles the system proxy only; it does not
//!   tear down running services

mod events;
mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{
    check_port, check_profile, ConfigStore, Configuration, ServerProfile, ValidationError,
};
use crate::pac::{BindError, PacDocumentServer};
use crate::rules::RuleListFetcher;
use crate::services::{HttpProxyService, LocalProxyService, ServiceError, SystemProxyAdapter};

pub use events::ControllerEvent;
use queue::{ReloadQueue, ReloadTrigger};

/// Errors surfaced through the controller's event channel.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A managed service could not acquire its port. Carries the
    /// attempted port; the raw OS error stays attached as the cause.
    #[error("port {port} already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP proxy port is non-zero but outside the valid range while
    /// the proxy is enabled. (Zero means "HTTP proxy disabled by user".)
    #[error("HTTP proxy port {port} out of range")]
    HttpPortOutOfRange { port: u32 },

    /// The active profile or a port failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A service failed for a reason other than a port conflict.
    #[error(transparent)]
    Service(ServiceError),

    /// The PAC server could not bind.
    #[error(transparent)]
    PacBind(BindError),
}

/// Where the controller currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Reloading,
    Running,
}

/// Orchestrates all managed services and the OS proxy setting.
pub struct ProxyLifecycleController {
    inner: Arc<Inner>,
}

struct Inner {
    store: ConfigStore,
    /// The single owned configuration value, mutated only here.
    config: Mutex<Configuration>,
    /// Published snapshot for lock-free readers.
    snapshot: ArcSwap<Configuration>,
    pac: Arc<PacDocumentServer>,
    local: Arc<dyn LocalProxyService>,
    http: Arc<dyn HttpProxyService>,
    system_proxy: Arc<dyn SystemProxyAdapter>,
    system_proxy_dirty: AtomicBool,
    state: Mutex<LifecycleState>,
    events: broadcast::Sender<ControllerEvent>,
    queue: ReloadQueue,
    worker: Mutex<Option<Worker>>,
    rules_url: Mutex<String>,
}

struct Worker {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProxyLifecycleController {
    pub fn new(
        store: ConfigStore,
        pac: Arc<PacDocumentServer>,
        local: Arc<dyn LocalProxyService>,
        http: Arc<dyn HttpProxyService>,
        system_proxy: Arc<dyn SystemProxyAdapter>,
    ) -> Self {
        let outcome = store.load();
        if outcome.was_defaulted {
            tracing::info!("No usable configuration found, starting from defaults");
        }
        let (events, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                store,
                snapshot: ArcSwap::from_pointee(outcome.config.clone()),
                config: Mutex::new(outcome.config),
                pac,
                local,
                http,
                system_proxy,
                system_proxy_dirty: AtomicBool::new(false),
                state: Mutex::new(LifecycleState::Stopped),
                events,
                queue: ReloadQueue::new(),
                worker: Mutex::new(None),
                rules_url: Mutex::new(crate::rules::DEFAULT_RULES_URL.to_string()),
            }),
        }
    }

    /// Override the rule list location.
    pub fn set_rules_url(&self, url: impl Into<String>) {
        *self.inner.rules_url.lock().unwrap() = url.into();
    }

    /// Spawn the reload worker and schedule the initial reconciliation.
    ///
    /// PAC-document change notifications are wired into the same
    /// serialized queue here. Idempotent.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }

        let queue_inner = Arc::downgrade(&self.inner);
        self.inner.pac.set_change_notifier(Arc::new(move || {
            if let Some(inner) = queue_inner.upgrade() {
                inner.queue.push(ReloadTrigger::PacDocumentChanged);
            }
        }));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    trigger = inner.queue.next() => {
                        *inner.state.lock().unwrap() = LifecycleState::Reloading;
                        match trigger {
                            ReloadTrigger::Reconfigure => inner.reload_pass().await,
                            ReloadTrigger::PacDocumentChanged => inner.refresh_system_proxy(),
                        }
                        *inner.state.lock().unwrap() = LifecycleState::Running;
                    }
                }
            }
        });
        *worker = Some(Worker { shutdown_tx, task });
        drop(worker);

        self.inner.queue.push(ReloadTrigger::Reconfigure);
    }

    /// Tear everything down.
    ///
    /// Unlike the reconciliation path, the final system-proxy cleanup
    /// ignores the dirty flag: when the proxy was enabled, no OS setting
    /// may survive process exit.
    pub async fn stop(&self) {
        let worker = self.inner.worker.lock().unwrap().take();
        let Some(worker) = worker else {
            return;
        };
        let _ = worker.shutdown_tx.send(true);
        let _ = worker.task.await;

        self.inner.pac.stop().await;
        self.inner.local.stop().await;
        self.inner.http.stop().await;

        if self.inner.snapshot.load().enabled {
            if let Err(e) = self.inner.system_proxy.disable() {
                tracing::error!(error = %e, "Failed to clear system proxy on shutdown");
            }
            self.inner.system_proxy_dirty.store(false, Ordering::SeqCst);
        }
        *self.inner.state.lock().unwrap() = LifecycleState::Stopped;
        tracing::info!("Controller stopped");
    }

    /// Request a reconciliation pass with the current configuration.
    pub fn reload(&self) {
        self.inner.queue.push(ReloadTrigger::Reconfigure);
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock().unwrap()
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the current configuration.
    pub fn configuration(&self) -> Configuration {
        self.inner.snapshot.load().as_ref().clone()
    }

    /// Copy of the currently selected profile.
    pub fn current_profile(&self) -> ServerProfile {
        self.inner.snapshot.load().selected_profile().clone()
    }

    /// Share token for the currently selected profile.
    pub fn current_share_token(&self) -> String {
        self.inner.snapshot.load().selected_profile().share_token()
    }

    /// Write the default PAC document if none exists, returning its path
    /// so a caller can open it for editing.
    pub fn ensure_pac_file(&self) -> std::io::Result<std::path::PathBuf> {
        self.inner.pac.ensure_backing_file()?;
        Ok(self.inner.pac.pac_path().to_path_buf())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.mutate(|c| c.enabled = enabled);
    }

    pub fn set_global(&self, global: bool) {
        self.mutate(|c| c.global = global);
    }

    pub fn set_share_over_lan(&self, share: bool) {
        self.mutate(|c| c.share_over_lan = share);
    }

    /// Select the active profile. An out-of-range index is clamped, the
    /// defined normalization for load/save.
    pub fn select_server(&self, index: usize) {
        self.mutate(|c| c.selected_index = index);
    }

    /// Replace the stored profile list wholesale. Storage does not
    /// validate: profiles may be incomplete while being edited.
    pub fn update_servers(&self, servers: Vec<ServerProfile>) {
        self.mutate(|c| c.servers = servers);
    }

    /// Store one profile after checking it is usable for activation.
    /// `index` past the end appends.
    pub fn save_profile(
        &self,
        index: usize,
        profile: ServerProfile,
    ) -> Result<(), ValidationError> {
        check_profile(&profile)?;
        self.mutate(|c| {
            if index < c.servers.len() {
                c.servers[index] = profile;
            } else {
                c.servers.push(profile);
            }
        });
        Ok(())
    }

    /// Change the listener ports. The PAC port must be valid; an HTTP
    /// port of zero disables the HTTP proxy.
    pub fn set_ports(&self, pac_port: u32, http_port: u32) -> Result<(), ValidationError> {
        check_port(pac_port)?;
        if http_port != 0 {
            check_port(http_port)?;
        }
        self.mutate(|c| {
            c.pac_port = pac_port;
            c.http_port = http_port;
        });
        Ok(())
    }

    /// Fetch the rule list and rewrite the PAC document in the
    /// background. Completion and failure surface as events; the rewrite
    /// itself reaches the reload loop through the file watcher.
    pub fn update_rule_list(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let config = inner.snapshot.load_full();
            let url = inner.rules_url.lock().unwrap().clone();
            let mut fetcher = RuleListFetcher::new(url, inner.pac.pac_path());
            if (1..=65535).contains(&config.http_port) && inner.http.is_running() {
                fetcher = fetcher.via_local_proxy(config.http_port as u16);
            }
            match fetcher.update().await {
                Ok(rules) => {
                    let _ = inner.events.send(ControllerEvent::RulesUpdated { rules });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Rule list update failed");
                    let _ = inner
                        .events
                        .send(ControllerEvent::RulesUpdateFailed(Arc::new(e)));
                }
            }
        });
    }

    /// Mutate the owned configuration, publish a fresh snapshot, and
    /// schedule a reload.
    fn mutate(&self, f: impl FnOnce(&mut Configuration)) {
        {
            let mut config = self.inner.config.lock().unwrap();
            f(&mut config);
            config.normalize();
            self.inner.snapshot.store(Arc::new(config.clone()));
        }
        self.inner.queue.push(ReloadTrigger::Reconfigure);
    }
}

impl Inner {
    /// One full reconciliation pass, strictly ordered.
    async fn reload_pass(&self) {
        let config = self.snapshot.load_full();
        tracing::info!(
            enabled = config.enabled,
            global = config.global,
            profile = %config.selected_profile().display_name(),
            "Reloading services"
        );

        // Teardown happens PAC-first; starting a replacement before the
        // old PAC listener is gone fails when the bind address flips
        // between 0.0.0.0 and 127.0.0.1.
        self.pac.stop().await;
        self.local.stop().await;
        self.http.stop().await;

        if let Err(e) = self.store.save(&config) {
            tracing::warn!(error = %e, "Failed to persist configuration, continuing with in-memory state");
        }

        if let Err(e) = self.bring_up(&config).await {
            tracing::error!(error = %e, "Reload failed");
            let _ = self.events.send(ControllerEvent::ReloadFailed(Arc::new(e)));
        }

        // Always reconcile, even after a failure: the OS setting must
        // track what actually came up, not what was supposed to.
        self.reconcile_system_proxy(&config);
        let _ = self.events.send(ControllerEvent::ConfigChanged);
    }

    async fn bring_up(&self, config: &Configuration) -> Result<(), ControllerError> {
        if (1..=65535).contains(&config.http_port) {
            self.http
                .start(config)
                .await
                .map_err(translate_service_error)?;
        } else if config.http_port != 0 && config.enabled {
            return Err(ControllerError::HttpPortOutOfRange {
                port: config.http_port,
            });
        }

        self.local
            .start(config)
            .await
            .map_err(translate_service_error)?;

        // The PAC document is only useful when the HTTP adapter it
        // points clients at is actually up.
        if config.enabled && self.http.is_running() {
            let pac_port = check_port(config.pac_port)?;
            let http_port = check_port(config.http_port)?;
            self.pac
                .start(config.bind_ip(), pac_port, http_port)
                .await
                .map_err(ControllerError::PacBind)?;
        }
        Ok(())
    }

    /// Reapply the system proxy without touching running services.
    fn refresh_system_proxy(&self) {
        let config = self.snapshot.load_full();
        self.reconcile_system_proxy(&config);
    }

    fn reconcile_system_proxy(&self, config: &Configuration) {
        let backend_up = self.http.is_running() && (config.global || self.pac.is_running());

        if config.enabled && backend_up {
            let port = if config.global {
                config.http_port
            } else {
                config.pac_port
            } as u16;
            match self.system_proxy.enable("127.0.0.1", port, config.global) {
                Ok(()) => self.system_proxy_dirty.store(true, Ordering::SeqCst),
                Err(e) => tracing::error!(error = %e, "Failed to apply system proxy"),
            }
        } else if self.system_proxy_dirty.swap(false, Ordering::SeqCst) {
            // Only clear a setting this process applied; a proxy managed
            // through other means is left alone.
            if let Err(e) = self.system_proxy.disable() {
                tracing::error!(error = %e, "Failed to clear system proxy");
            }
        }
    }
}

fn translate_service_error(err: ServiceError) -> ControllerError {
    match err {
        ServiceError::Bind { port, source, .. } if is_port_conflict(&source) => {
            ControllerError::PortInUse { port, source }
        }
        ServiceError::Validation(e) => ControllerError::Validation(e),
        other => ControllerError::Service(other),
    }
}

/// "Address in use" and "access forbidden" both mean the port is taken
/// for our purposes; everything else passes through untranslated.
fn is_port_conflict(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::AddrInUse | std::io::ErrorKind::PermissionDenied
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_conflict_translation() {
        let err = ServiceError::Bind {
            kind: crate::services::ServiceKind::LocalRelay,
            port: 1080,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        match translate_service_error(err) {
            ControllerError::PortInUse { port, source } => {
                assert_eq!(port, 1080);
                assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
            }
            other => panic!("expected PortInUse, got {other:?}"),
        }
    }

    #[test]
    fn test_other_bind_errors_untranslated() {
        let err = ServiceError::Bind {
            kind: crate::services::ServiceKind::HttpAdapter,
            port: 8123,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad addr"),
        };
        assert!(matches!(
            translate_service_error(err),
            ControllerError::Service(_)
        ));
    }
}
