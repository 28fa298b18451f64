//! Shareable connection-profile tokens.
//!
//! A profile is exchanged as `ss://` followed by the base64 encoding of
//! `method:password@host:port`. Tokens copied out of chat clients often
//! lose their base64 padding, so parsing retries with up to three `=`
//! appended before giving up.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::config::schema::ServerProfile;

const SCHEME: &str = "ss://";

/// Errors raised while parsing a share token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareTokenError {
    /// Token does not start with `ss://`.
    #[error("share token must start with {SCHEME}")]
    MissingScheme,

    /// Payload is not base64 even after padding recovery.
    #[error("share token payload is not valid base64")]
    InvalidEncoding,

    /// Decoded payload does not match `method:password@host:port`.
    #[error("share token payload is malformed")]
    MalformedPayload,
}

/// Render a profile as a share token.
pub fn encode(profile: &ServerProfile) -> String {
    let plain = format!(
        "{}:{}@{}:{}",
        profile.method, profile.password, profile.host, profile.port
    );
    format!("{SCHEME}{}", STANDARD.encode(plain.as_bytes()))
}

/// Parse a share token back into a profile.
///
/// Fields not carried by the token (`local_port`, `label`) take their
/// defaults. The method is split at the first `:` and the password at the
/// last `@`, so passwords containing either character round-trip.
pub fn decode(token: &str) -> Result<ServerProfile, ShareTokenError> {
    let payload = token
        .trim()
        .strip_prefix(SCHEME)
        .ok_or(ShareTokenError::MissingScheme)?;

    let mut padded = payload.to_string();
    let mut bytes = None;
    for _ in 0..3 {
        match STANDARD.decode(padded.as_bytes()) {
            Ok(decoded) => {
                bytes = Some(decoded);
                break;
            }
            Err(_) => padded.push('='),
        }
    }
    let bytes = bytes.ok_or(ShareTokenError::InvalidEncoding)?;
    let plain = String::from_utf8(bytes).map_err(|_| ShareTokenError::MalformedPayload)?;

    let (method, rest) = plain
        .split_once(':')
        .ok_or(ShareTokenError::MalformedPayload)?;
    let (password, endpoint) = rest
        .rsplit_once('@')
        .ok_or(ShareTokenError::MalformedPayload)?;
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or(ShareTokenError::MalformedPayload)?;
    if host.is_empty() {
        return Err(ShareTokenError::MalformedPayload);
    }
    let port: u32 = port.parse().map_err(|_| ShareTokenError::MalformedPayload)?;

    Ok(ServerProfile {
        host: host.to_string(),
        port,
        method: method.to_string(),
        password: password.to_string(),
        ..ServerProfile::default()
    })
}

impl ServerProfile {
    /// Render this profile as an `ss://` share token.
    pub fn share_token(&self) -> String {
        encode(self)
    }

    /// Parse a profile from an `ss://` share token.
    pub fn from_share_token(token: &str) -> Result<Self, ShareTokenError> {
        decode(token)
    }
}
