//! Local proxy-client supervisor.
//!
//! Coordinates the always-on local services (a TCP relay, an HTTP proxy
//! adapter, and a PAC auto-config server) so that configuration changes
//! can be applied and re-applied safely while the OS system-proxy
//! setting stays consistent with what is actually running.
//!
//! # Architecture Overview
//!
//! ```text
//!   setters / file watch / rule fetch
//!               │
//!               ▼
//!      ┌─────────────────┐       serialized, coalescing
//!      │   reload queue  │──────────────────┐
//!      └─────────────────┘                  ▼
//!                              ┌────────────────────────┐
//!                              │ ProxyLifecycleController│
//!                              │  stop → persist → start │
//!                              │  → reconcile OS proxy   │
//!                              └───────────┬────────────┘
//!            ┌─────────────┬───────────────┼───────────────┐
//!            ▼             ▼               ▼               ▼
//!      ┌──────────┐  ┌───────────┐  ┌────────────┐  ┌────────────┐
//!      │ local    │  │ HTTP      │  │ PAC server │  │ OS system  │
//!      │ relay    │  │ adapter   │  │ + watcher  │  │ proxy seam │
//!      └──────────┘  └───────────┘  └────────────┘  └────────────┘
//! ```
//!
//! The PAC server serves its document over raw sockets, re-reading the
//! backing file per request; the rule-list fetcher rewrites that file
//! atomically, and the resulting filesystem event funnels back into the
//! same reload queue as user-initiated changes.

pub mod config;
pub mod controller;
pub mod pac;
pub mod rules;
pub mod services;

pub use config::{ConfigStore, Configuration, LoadOutcome, ServerProfile};
pub use controller::{ControllerError, ControllerEvent, LifecycleState, ProxyLifecycleController};
pub use pac::PacDocumentServer;
pub use rules::RuleListFetcher;
