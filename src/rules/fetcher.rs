//! Blocklist fetch and PAC rewrite.
//!
//! One-shot operation: download the remote rule list, decode it, drop
//! comment and section-header lines, and rewrite the PAC document from
//! the auto-proxy template with the surviving rules embedded. The write
//! is whole-file atomic; the PAC server's file watcher picks it up and
//! drives the supervisor from there.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::config::store::write_atomic;
use crate::pac::template::{ABP_TEMPLATE, RULES_MARKER};

/// Default rule list location.
pub const DEFAULT_RULES_URL: &str =
    "https://raw.githubusercontent.com/gfwlist/gfwlist/master/gfwlist.txt";

/// Errors raised during a rule list update.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rule list download failed")]
    Http(#[from] reqwest::Error),

    #[error("rule list is not valid base64")]
    Decode(#[from] base64::DecodeError),

    #[error("rule list is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("failed to serialize rules")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to rewrite PAC document")]
    Io(#[from] std::io::Error),
}

/// Fetches the remote rule list and rewrites the PAC document.
pub struct RuleListFetcher {
    url: String,
    pac_path: PathBuf,
    local_proxy_port: Option<u16>,
}

impl RuleListFetcher {
    pub fn new(url: impl Into<String>, pac_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            pac_path: pac_path.into(),
            local_proxy_port: None,
        }
    }

    /// Route the download through the supervised local HTTP proxy, the
    /// usual arrangement when the rule list host is itself blocked.
    pub fn via_local_proxy(mut self, port: u16) -> Self {
        self.local_proxy_port = Some(port);
        self
    }

    /// Fetch, decode, filter, and rewrite. Returns the rule count.
    pub async fn update(&self) -> Result<usize, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(port) = self.local_proxy_port {
            builder = builder.proxy(reqwest::Proxy::all(format!("http://127.0.0.1:{port}"))?);
        }
        let client = builder.build()?;

        tracing::info!(url = %self.url, "Fetching rule list");
        let payload = client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let rules = parse_rules(&payload)?;
        let document = ABP_TEMPLATE.replace(RULES_MARKER, &serde_json::to_string(&rules)?);
        write_atomic(&self.pac_path, document.as_bytes())?;

        tracing::info!(rules = rules.len(), path = ?self.pac_path, "PAC document rewritten");
        Ok(rules.len())
    }
}

/// Decode the base64 transport encoding and filter out comment (`!`) and
/// section-header (`[`) lines, preserving rule order.
pub fn parse_rules(payload: &str) -> Result<Vec<String>, FetchError> {
    // The transport wraps the base64 text; strip all whitespace first.
    let compact: String = payload.split_whitespace().collect();
    let decoded = STANDARD.decode(compact.as_bytes())?;
    let content = String::from_utf8(decoded)?;

    Ok(content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('['))
        .map(str::to_string)
        .collect())
}
