//! Controller event fan-out.

use std::sync::Arc;

use crate::controller::ControllerError;
use crate::rules::FetchError;

/// Notifications emitted by the controller.
///
/// Delivered over a broadcast channel; events are `Clone` and cheap, with
/// error payloads shared behind `Arc`.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A reconciliation pass completed and the configuration was
    /// persisted.
    ConfigChanged,

    /// A reload step failed; services already stopped stay stopped.
    ReloadFailed(Arc<ControllerError>),

    /// The rule list was fetched and the PAC document rewritten.
    RulesUpdated { rules: usize },

    /// The rule list fetch or rewrite failed.
    RulesUpdateFailed(Arc<FetchError>),
}
