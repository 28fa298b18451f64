//! OS system-proxy adapter.
//!
//! The supervisor only ever talks to this seam; how a platform actually
//! registers the proxy is irrelevant to the reload loop. The desktop
//! implementation shells out to the platform's settings tool. Enable and
//! disable are both idempotent.

use std::io;
use std::process::Command;

/// Narrow interface over the OS proxy registry.
///
/// `global` selects between pointing the OS directly at the HTTP proxy
/// endpoint and handing it the PAC auto-config URL for the same host and
/// port.
pub trait SystemProxyAdapter: Send + Sync {
    fn enable(&self, host: &str, port: u16, global: bool) -> io::Result<()>;
    fn disable(&self) -> io::Result<()>;
}

/// Desktop implementation driving the platform settings tool.
pub struct DesktopProxyAdapter;

impl DesktopProxyAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DesktopProxyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProxyAdapter for DesktopProxyAdapter {
    #[cfg(target_os = "linux")]
    fn enable(&self, host: &str, port: u16, global: bool) -> io::Result<()> {
        let port_s = port.to_string();
        if global {
            for schema in ["org.gnome.system.proxy.http", "org.gnome.system.proxy.https"] {
                gsettings(&["set", schema, "host", host])?;
                gsettings(&["set", schema, "port", &port_s])?;
            }
            gsettings(&["set", "org.gnome.system.proxy", "mode", "manual"])?;
        } else {
            let url = format!("http://{host}:{port}/proxy.pac");
            gsettings(&["set", "org.gnome.system.proxy", "autoconfig-url", &url])?;
            gsettings(&["set", "org.gnome.system.proxy", "mode", "auto"])?;
        }
        tracing::info!(host, port, global, "System proxy enabled");
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn disable(&self) -> io::Result<()> {
        gsettings(&["set", "org.gnome.system.proxy", "mode", "none"])?;
        tracing::info!("System proxy disabled");
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn enable(&self, host: &str, port: u16, global: bool) -> io::Result<()> {
        let service = "Wi-Fi";
        if global {
            networksetup(&["-setwebproxy", service, host, &port.to_string()])?;
            networksetup(&["-setsecurewebproxy", service, host, &port.to_string()])?;
        } else {
            let url = format!("http://{host}:{port}/proxy.pac");
            networksetup(&["-setautoproxyurl", service, &url])?;
        }
        tracing::info!(host, port, global, "System proxy enabled");
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn disable(&self) -> io::Result<()> {
        let service = "Wi-Fi";
        networksetup(&["-setwebproxystate", service, "off"])?;
        networksetup(&["-setsecurewebproxystate", service, "off"])?;
        networksetup(&["-setautoproxystate", service, "off"])?;
        tracing::info!("System proxy disabled");
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn enable(&self, host: &str, port: u16, global: bool) -> io::Result<()> {
        tracing::warn!(host, port, global, "System proxy not supported on this platform");
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn disable(&self) -> io::Result<()> {
        tracing::warn!("System proxy not supported on this platform");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn gsettings(args: &[&str]) -> io::Result<()> {
    run_tool("gsettings", args)
}

#[cfg(target_os = "macos")]
fn networksetup(args: &[&str]) -> io::Result<()> {
    run_tool("networksetup", args)
}

#[allow(dead_code)]
fn run_tool(program: &str, args: &[&str]) -> io::Result<()> {
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{program} {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}
