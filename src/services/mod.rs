//! Service seams for the supervisor's external collaborators.
//!
//! The controller drives everything through these narrow traits: the
//! relay and HTTP-adapter internals stay opaque, and tests substitute
//! recording doubles.

pub mod http_adapter;
pub mod relay;
pub mod system_proxy;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Configuration, ValidationError};

pub use http_adapter::HttpAdapterProcess;
pub use relay::TcpRelayService;
pub use system_proxy::{DesktopProxyAdapter, SystemProxyAdapter};

/// Which managed service an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    LocalRelay,
    HttpAdapter,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::LocalRelay => write!(f, "local relay"),
            ServiceKind::HttpAdapter => write!(f, "HTTP adapter"),
        }
    }
}

/// Errors raised while starting a managed service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Failed to acquire the listening socket.
    #[error("failed to bind {kind} on port {port}")]
    Bind {
        kind: ServiceKind,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Failed to launch an external process.
    #[error("failed to launch {kind}")]
    Launch {
        kind: ServiceKind,
        #[source]
        source: std::io::Error,
    },

    /// The active profile is not usable.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ServiceError {
    /// The port the failed service was trying to acquire, if any.
    pub fn port(&self) -> Option<u16> {
        match self {
            ServiceError::Bind { port, .. } => Some(*port),
            _ => None,
        }
    }
}

/// The local relay service (SOCKS side). Start binds the selected
/// profile's local port; stop releases it promptly.
#[async_trait]
pub trait LocalProxyService: Send + Sync {
    async fn start(&self, config: &Configuration) -> Result<(), ServiceError>;
    async fn stop(&self);
    fn is_running(&self) -> bool;
}

/// The HTTP proxy adapter. Same contract as the relay; a port of zero in
/// the configuration means the adapter is disabled and start is never
/// called.
#[async_trait]
pub trait HttpProxyService: Send + Sync {
    async fn start(&self, config: &Configuration) -> Result<(), ServiceError>;
    async fn stop(&self);
    fn is_running(&self) -> bool;
}
