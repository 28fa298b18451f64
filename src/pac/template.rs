//! Embedded PAC documents and substitution.
//!
//! The served document is read from disk on every request so external
//! edits are always reflected; these embedded templates only cover the
//! file-absent case and the rule-list rewrite.

use std::path::Path;

/// Marker replaced per-request with the proxy directive.
pub const PROXY_MARKER: &str = "__PROXY__";

/// Marker replaced by the rule-list fetcher with a JSON array of rules.
pub const RULES_MARKER: &str = "__RULES__";

/// Fallback PAC document served when the backing file is absent.
pub const DEFAULT_PAC: &str = r#"var direct = 'DIRECT;';
var proxy = '__PROXY__';

function FindProxyForURL(url, host) {
    if (isPlainHostName(host)
        || shExpMatch(host, 'localhost')
        || isInNet(host, '127.0.0.0', '255.0.0.0')
        || isInNet(host, '10.0.0.0', '255.0.0.0')
        || isInNet(host, '192.168.0.0', '255.255.0.0')) {
        return direct;
    }
    return proxy;
}
"#;

/// Auto-proxy template the rule-list fetcher rewrites the backing file
/// from. Rules use the Adblock Plus filter syntax.
pub const ABP_TEMPLATE: &str = r#"var rules = __RULES__;

var direct = 'DIRECT;';
var proxy = '__PROXY__';

function matchRule(rule, url, host) {
    if (rule.indexOf('||') === 0) {
        return host.indexOf(rule.substring(2)) >= 0;
    }
    if (rule.indexOf('|') === 0) {
        return url.indexOf(rule.substring(1)) === 0;
    }
    if (rule.indexOf('@@') === 0) {
        return false;
    }
    return url.indexOf(rule) >= 0;
}

function FindProxyForURL(url, host) {
    for (var i = 0; i < rules.length; i++) {
        if (matchRule(rules[i], url, host)) {
            return proxy;
        }
    }
    return direct;
}
"#;

/// Build the PAC proxy directive for a local endpoint.
///
/// The trailing semicolon is part of the directive itself and is
/// concatenated before substitution.
pub fn proxy_directive(local_host: std::net::IpAddr, http_port: u16) -> String {
    format!("PROXY {}:{};", local_host, http_port)
}

/// Replace the proxy marker in a PAC document.
pub fn substitute_proxy(document: &str, directive: &str) -> String {
    document.replace(PROXY_MARKER, directive)
}

/// Write the default PAC document to `path` if nothing is there yet,
/// returning whether a file now exists.
pub fn ensure_backing_file(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(true);
    }
    crate::config::store::write_atomic(path, DEFAULT_PAC.as_bytes())?;
    tracing::info!(path = ?path, "Wrote default PAC document");
    Ok(true)
}
