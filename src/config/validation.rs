//! Configuration validation.
//!
//! # Responsibilities
//! - Check port ranges (valid ports are `1..=65535`)
//! - Check a profile is complete enough to activate
//!
//! # Design Decisions
//! - Validation is a precondition for *use*, not for *storage*: profiles
//!   may be saved half-edited and are only checked when the reload loop
//!   is about to bind them
//! - Errors are raised synchronously to the mutating caller, never
//!   silently clamped (index and server-count clamping on load/save are
//!   defined normalizations and live in the schema, not here)

use thiserror::Error;

use crate::config::schema::ServerProfile;

/// Errors raised by configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Port outside `1..=65535`.
    #[error("port {0} out of range")]
    PortOutOfRange(u32),

    /// Password required for activation but blank.
    #[error("password can not be blank")]
    BlankPassword,

    /// Server host required for activation but blank.
    #[error("server address can not be blank")]
    BlankHost,
}

/// Validate a port value, returning it narrowed to `u16`.
pub fn check_port(port: u32) -> Result<u16, ValidationError> {
    if port == 0 || port > 65535 {
        return Err(ValidationError::PortOutOfRange(port));
    }
    Ok(port as u16)
}

/// Validate that a profile is usable for activation.
pub fn check_profile(profile: &ServerProfile) -> Result<(), ValidationError> {
    check_port(profile.port)?;
    check_port(profile.local_port)?;
    if profile.password.is_empty() {
        return Err(ValidationError::BlankPassword);
    }
    if profile.host.is_empty() {
        return Err(ValidationError::BlankHost);
    }
    Ok(())
}
