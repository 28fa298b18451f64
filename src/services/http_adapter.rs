//! HTTP proxy adapter runner.
//!
//! The HTTP side is delegated to an external proxy program (the way the
//! original deployment wrapped polipo). The runner substitutes the
//! configured port into the command line, spawns the child detached from
//! our stdio, and reaps it on stop. A child that exits right after spawn
//! (typically a port conflict) is observed through `is_running` rather
//! than a start error; the reload loop gates the PAC server on it.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::{check_port, Configuration};
use crate::services::{HttpProxyService, ServiceError, ServiceKind};

/// Placeholder in the command line replaced with the configured port.
pub const PORT_PLACEHOLDER: &str = "{port}";

const SPAWN_GRACE: Duration = Duration::from_millis(150);

/// HTTP proxy adapter backed by a child process.
pub struct HttpAdapterProcess {
    command: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl HttpAdapterProcess {
    /// `command` is the program plus arguments; every `{port}` occurrence
    /// is replaced with the configured HTTP port at start.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl HttpProxyService for HttpAdapterProcess {
    async fn start(&self, config: &Configuration) -> Result<(), ServiceError> {
        self.stop().await;

        let port = check_port(config.http_port)?;
        let argv: Vec<String> = self
            .command
            .iter()
            .map(|part| part.replace(PORT_PLACEHOLDER, &port.to_string()))
            .collect();
        let (program, args) = argv.split_first().ok_or_else(|| ServiceError::Launch {
            kind: ServiceKind::HttpAdapter,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServiceError::Launch {
                kind: ServiceKind::HttpAdapter,
                source,
            })?;

        // Children that cannot bind tend to exit within a beat; give them
        // the chance so is_running reflects reality for this reload pass.
        tokio::time::sleep(SPAWN_GRACE).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(%status, port, "HTTP adapter exited immediately");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "HTTP adapter status check failed"),
        }

        tracing::info!(port, program = %program, "HTTP adapter started");
        *self.child.lock().unwrap() = Some(child);
        Ok(())
    }

    async fn stop(&self) {
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            tracing::info!("HTTP adapter stopped");
        }
    }

    fn is_running(&self) -> bool {
        let mut guard = self.child.lock().unwrap();
        match guard.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            None => false,
            _ => {
                // Exited or unprobeable; drop the handle.
                *guard = None;
                false
            }
        }
    }
}
