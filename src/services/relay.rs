//! In-process TCP relay.
//!
//! Binds the selected profile's local port and forwards each accepted
//! connection to the remote server. Wire-level framing and encryption
//! live behind the remote endpoint; this side only moves bytes.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{check_port, Configuration};
use crate::services::{LocalProxyService, ServiceError, ServiceKind};

/// Local relay bound to the selected profile's port.
pub struct TcpRelayService {
    state: Mutex<Option<Running>>,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    port: u16,
}

impl TcpRelayService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Default for TcpRelayService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalProxyService for TcpRelayService {
    async fn start(&self, config: &Configuration) -> Result<(), ServiceError> {
        if self.is_running() {
            self.stop().await;
        }

        // Ports must be structurally sound to bind; profile completeness
        // (host, password) is the setters' concern, and an unreachable
        // upstream surfaces per connection like any other connect error.
        let profile = config.selected_profile();
        let local_port = check_port(profile.local_port)?;
        let upstream = (profile.host.clone(), check_port(profile.port)?);

        let listener = TcpListener::bind(std::net::SocketAddr::new(config.bind_ip(), local_port))
            .await
            .map_err(|source| ServiceError::Bind {
                kind: ServiceKind::LocalRelay,
                port: local_port,
                source,
            })?;

        tracing::info!(
            port = local_port,
            upstream = %format!("{}:{}", upstream.0, upstream.1),
            "Local relay listening"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let upstream = upstream.clone();
                            tokio::spawn(async move {
                                if let Err(e) = forward(stream, upstream).await {
                                    tracing::debug!(peer = %peer, error = %e, "Relay connection ended");
                                }
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "Relay accept failed"),
                    }
                }
            }
        });

        *self.state.lock().unwrap() = Some(Running {
            shutdown_tx,
            task,
            port: local_port,
        });
        Ok(())
    }

    async fn stop(&self) {
        let running = self.state.lock().unwrap().take();
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(true);
            let _ = running.task.await;
            tracing::info!(port = running.port, "Local relay stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }
}

async fn forward(mut client: TcpStream, upstream: (String, u16)) -> std::io::Result<()> {
    let mut remote = TcpStream::connect(upstream).await?;
    copy_bidirectional(&mut client, &mut remote).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerProfile;

    fn config_with(local_port: u32, host: &str, port: u32) -> Configuration {
        Configuration {
            servers: vec![ServerProfile {
                host: host.into(),
                port,
                local_port,
                password: "pw".into(),
                ..ServerProfile::default()
            }],
            ..Configuration::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_unbindable_port() {
        let relay = TcpRelayService::new();
        let config = config_with(0, "example.com", 8388);
        let err = relay.start(&config).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(!relay.is_running());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let relay = TcpRelayService::new();
        let err = relay
            .start(&config_with(port as u32, "example.com", 8388))
            .await
            .unwrap_err();
        assert_eq!(err.port(), Some(port));
    }

    #[tokio::test]
    async fn test_forwards_bytes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Upstream echoes one message back.
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        // Pick a free local port by binding then releasing it.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_port = probe.local_addr().unwrap().port();
        drop(probe);

        let relay = TcpRelayService::new();
        relay
            .start(&config_with(local_port as u32, "127.0.0.1", upstream_port as u32))
            .await
            .unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        relay.stop().await;
        assert!(!relay.is_running());
    }
}
