//! PAC document server.
//!
//! # Responsibilities
//! - Serve the PAC script over raw TCP, one HTTP/1.1 response per
//!   connection
//! - Substitute the proxy directive for the current local endpoint
//! - Re-read the backing document on every request (no caching), so
//!   external rewrites are always reflected
//! - Watch the backing file and raise a change notification
//!
//! # Design Decisions
//! - One task per accepted connection; the request buffer is allocated
//!   per connection, never shared between handlers
//! - A failure while composing a response closes the connection without
//!   a response instead of reaching the listener
//! - A single bad accept never terminates the accept loop

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pac::template;
use crate::pac::watcher::{self, ChangeNotifier};

const REQUEST_BUF_SIZE: usize = 2048;

/// Failed to acquire the listening socket.
#[derive(Debug, Error)]
#[error("failed to bind PAC server on {addr}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

/// Serves the PAC document and watches its backing file.
pub struct PacDocumentServer {
    pac_path: PathBuf,
    notifier: Mutex<Option<ChangeNotifier>>,
    state: Mutex<Option<Running>>,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    port: u16,
    // Dropping the watcher unregisters the filesystem watch.
    _watcher: Option<RecommendedWatcher>,
}

impl PacDocumentServer {
    pub fn new(pac_path: impl Into<PathBuf>) -> Self {
        Self {
            pac_path: pac_path.into(),
            notifier: Mutex::new(None),
            state: Mutex::new(None),
        }
    }

    /// Path of the PAC document on disk.
    pub fn pac_path(&self) -> &Path {
        &self.pac_path
    }

    /// Register the callback fired once per backing-file event.
    ///
    /// Deduplication across events is the consumer's responsibility.
    pub fn set_change_notifier(&self, notifier: ChangeNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }

    /// Write the default document to disk if the backing file is absent,
    /// so the user has something to edit.
    pub fn ensure_backing_file(&self) -> std::io::Result<()> {
        template::ensure_backing_file(&self.pac_path).map(|_| ())
    }

    /// Bind the listening socket and begin accepting.
    ///
    /// `http_port` parameterizes the proxy directive substituted into
    /// each served document. Bind failures are propagated, not retried.
    pub async fn start(
        &self,
        bind: IpAddr,
        port: u16,
        http_port: u16,
    ) -> Result<(), BindError> {
        if self.is_running() {
            tracing::warn!("PAC server already running, restarting");
            self.stop().await;
        }

        let addr = SocketAddr::new(bind, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BindError { addr, source })?;

        let file_watcher = match self.notifier.lock().unwrap().clone() {
            Some(notifier) => match watcher::watch(&self.pac_path, notifier) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "PAC file watch unavailable, continuing without");
                    None
                }
            },
            None => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pac_path = self.pac_path.clone();
        let task = tokio::spawn(accept_loop(listener, shutdown_rx, pac_path, http_port));

        tracing::info!(address = %addr, "PAC server listening");

        *self.state.lock().unwrap() = Some(Running {
            shutdown_tx,
            task,
            port,
            _watcher: file_watcher,
        });
        Ok(())
    }

    /// Close the listener and unblock any pending accept. Idempotent.
    pub async fn stop(&self) {
        let running = self.state.lock().unwrap().take();
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(true);
            let _ = running.task.await;
            tracing::info!(port = running.port, "PAC server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// Port of the active listener, if any.
    pub fn bound_port(&self) -> Option<u16> {
        self.state.lock().unwrap().as_ref().map(|r| r.port)
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
    pac_path: PathBuf,
    http_port: u16,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(peer = %peer, "PAC connection accepted");
                    let path = pac_path.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_document(stream, &path, http_port).await {
                            tracing::debug!(error = %e, "PAC connection dropped");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PAC accept failed");
                }
            }
        }
    }
    // Listener drops here, releasing the port before stop() returns.
}

/// Handle one connection: read the request, substitute the directive,
/// write a complete response, half-close the send side.
async fn serve_document(
    mut stream: TcpStream,
    pac_path: &Path,
    http_port: u16,
) -> std::io::Result<()> {
    // The request content is not parsed; reading it only confirms the
    // client actually sent something before we respond.
    let mut request = vec![0u8; REQUEST_BUF_SIZE];
    let read = stream.read(&mut request).await?;
    if read == 0 {
        return Ok(());
    }

    let local = stream.local_addr()?;
    let directive = template::proxy_directive(local.ip(), http_port);
    let document = load_document(pac_path).await?;
    let body = template::substitute_proxy(&document, &directive);

    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Server: proxy-supervisor\r\n\
         Content-Type: application/x-ns-proxy-autoconfig\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn load_document(path: &Path) -> std::io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(document) => Ok(document),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(template::DEFAULT_PAC.to_string())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = PacDocumentServer::new("/nonexistent/proxy.pac");
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_error() {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let holder = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let server = PacDocumentServer::new("/nonexistent/proxy.pac");
        let err = server.start(ip, port, 8123).await.unwrap_err();
        assert_eq!(err.addr.port(), port);
    }
}
