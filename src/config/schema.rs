//! Configuration schema definitions.
//!
//! This module defines the persisted configuration for the supervisor.
//! All types derive Serde traits for (de)serialization from the JSON
//! config file. Integer fields tolerate being stored as numeric strings,
//! since hand-edited or legacy config files sometimes quote them.

use serde::{Deserialize, Deserializer, Serialize};

/// Default port for the PAC document server.
pub const DEFAULT_PAC_PORT: u32 = 8093;

/// Default port for the HTTP proxy adapter.
pub const DEFAULT_HTTP_PORT: u32 = 8123;

/// Root configuration for the supervisor.
///
/// Owned by the [`ProxyLifecycleController`](crate::controller::ProxyLifecycleController);
/// every external reader receives a copy, never a shared reference.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    /// Server profiles, in user-defined order. Never empty after
    /// [`normalize`](Configuration::normalize).
    pub servers: Vec<ServerProfile>,

    /// Index of the active profile. Clamped into `0..servers.len()`
    /// on load and save.
    #[serde(deserialize_with = "index_or_string")]
    pub selected_index: usize,

    /// Whether the system proxy should be applied at all.
    pub enabled: bool,

    /// Global mode: point the OS at the HTTP proxy directly instead of
    /// the PAC document.
    pub global: bool,

    /// Bind listeners on all interfaces instead of loopback only.
    pub share_over_lan: bool,

    /// PAC document server port.
    #[serde(deserialize_with = "port_or_string")]
    pub pac_port: u32,

    /// HTTP proxy adapter port. Zero means the HTTP proxy is disabled
    /// by the user.
    #[serde(deserialize_with = "port_or_string")]
    pub http_port: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            servers: vec![ServerProfile::default()],
            selected_index: 0,
            enabled: false,
            global: false,
            share_over_lan: false,
            pac_port: DEFAULT_PAC_PORT,
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl Configuration {
    /// The currently selected profile.
    ///
    /// The index is kept in range by [`normalize`](Configuration::normalize);
    /// a stale out-of-range index falls back to the last profile.
    pub fn selected_profile(&self) -> &ServerProfile {
        let last = self.servers.len().saturating_sub(1);
        &self.servers[self.selected_index.min(last)]
    }

    /// Clamp the selected index and synthesize a default profile if the
    /// list is empty. These are defined normalizations, not errors.
    pub fn normalize(&mut self) {
        if self.servers.is_empty() {
            self.servers.push(ServerProfile::default());
        }
        if self.selected_index >= self.servers.len() {
            self.selected_index = self.servers.len() - 1;
        }
    }

    /// Address the listeners bind to, honoring `share_over_lan`.
    pub fn bind_ip(&self) -> std::net::IpAddr {
        if self.share_over_lan {
            std::net::Ipv4Addr::UNSPECIFIED.into()
        } else {
            std::net::Ipv4Addr::LOCALHOST.into()
        }
    }
}

/// A single relay server profile.
///
/// Profiles may be stored incomplete while being edited; they are only
/// validated when activated, see
/// [`check_profile`](crate::config::validation::check_profile).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerProfile {
    /// Remote server hostname or address.
    pub host: String,

    /// Remote server port.
    #[serde(deserialize_with = "port_or_string")]
    pub port: u32,

    /// Local relay listening port.
    #[serde(deserialize_with = "port_or_string")]
    pub local_port: u32,

    /// Cipher method identifier, e.g. "aes-256-cfb".
    pub method: String,

    /// Shared secret for the relay protocol.
    pub password: String,

    /// Optional user-facing label.
    pub label: String,
}

impl Default for ServerProfile {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8388,
            local_port: 1080,
            method: "aes-256-cfb".to_string(),
            password: String::new(),
            label: String::new(),
        }
    }
}

impl ServerProfile {
    /// Human-readable name for menus and logs.
    pub fn display_name(&self) -> String {
        if self.host.is_empty() {
            "New server".to_string()
        } else if self.label.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("{} ({}:{})", self.label, self.host, self.port)
        }
    }
}

/// Accepts `8093` or `"8093"`.
fn port_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrString::deserialize(deserializer)?.parse()
}

/// Accepts `0` or `"0"`.
fn index_or_string<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrString::deserialize(deserializer)?.parse()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    fn parse<T, E>(self) -> Result<T, E>
    where
        T: TryFrom<u64> + std::str::FromStr,
        E: serde::de::Error,
    {
        match self {
            NumberOrString::Number(n) => {
                T::try_from(n).map_err(|_| E::custom(format!("integer out of range: {n}")))
            }
            NumberOrString::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("not an integer: {s:?}"))),
        }
    }
}
