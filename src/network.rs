//! Host-side address discovery.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TartbootError;

const IFCONFIG_PATH: &str = "/sbin/ifconfig";

static INET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"inet[^\d]+([\d.]+)\s").expect("valid inet regex"));

/// First IPv4 address following an `inet` marker in `ifconfig` output.
pub fn parse_inet(output: &str) -> Option<Ipv4Addr> {
    INET_RE
        .captures_iter(output)
        .find_map(|caps| caps[1].parse().ok())
}

/// Query `ifconfig <interface>` for the host address on that interface.
///
/// The locale is forced to `C` so the output format is stable.
pub async fn resolve_interface(interface: &str) -> Result<Ipv4Addr, TartbootError> {
    let output = tokio::process::Command::new(IFCONFIG_PATH)
        .arg(interface)
        .env("LANG", "C")
        .output()
        .await
        .map_err(|e| TartbootError::InterfaceResolution {
            interface: interface.into(),
            message: format!("failed to run {IFCONFIG_PATH}: {e}"),
        })?;

    if !output.status.success() {
        return Err(TartbootError::InterfaceResolution {
            interface: interface.into(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_inet(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        TartbootError::InterfaceResolution {
            interface: interface.into(),
            message: "IP not found in ifconfig output".into(),
        }
    })
}

/// Ask Tart for the guest's own address (`tart ip <vm>`).
pub async fn guest_ip(tart_path: &str, vm_name: &str) -> Result<String, TartbootError> {
    let output = tokio::process::Command::new(tart_path)
        .args(["ip", vm_name])
        .output()
        .await
        .map_err(|e| TartbootError::Io {
            context: format!("running `{tart_path} ip {vm_name}`"),
            source: e,
        })?;

    let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || ip.is_empty() {
        return Err(TartbootError::Ssh {
            message: format!(
                "could not determine the guest address: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(ip)
}
