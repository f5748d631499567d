// network/inventory/mod.rs - Platform-specific open-socket enumeration
//
// Each backend produces the same shape: a point-in-time map from local
// socket to owning process. Wildcard-bound sockets are keyed under "*" so
// the stats join can fall back from a concrete local IP.

use anyhow::Result;
use std::net::IpAddr;

use crate::network::types::OpenSockets;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
mod lsof;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use linux::NetlinkInventory;
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub use lsof::{Invoker, LsofInventory};
#[cfg(target_os = "windows")]
pub use windows::WindowsInventory;

/// Best-effort snapshot of open TCP/UDP sockets and their owning processes.
pub trait SocketInventory: Send + Sync {
    /// Enumerate open sockets. An empty `pids` slice covers all processes;
    /// otherwise only sockets owned by a listed pid are retained.
    fn open_sockets(&self, pids: &[i32]) -> Result<OpenSockets>;
}

/// Build the socket inventory for the current platform.
pub fn create_socket_inventory() -> Box<dyn SocketInventory> {
    #[cfg(target_os = "linux")]
    {
        Box::new(NetlinkInventory::new())
    }
    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    {
        Box::new(LsofInventory::default())
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(WindowsInventory::new())
    }
}

/// Render an inventory-reported address the way flows key on it:
/// wildcard binds become `"*"`.
#[allow(dead_code)]
pub(crate) fn format_local_ip(ip: IpAddr) -> String {
    if ip.is_unspecified() {
        "*".to_string()
    } else {
        ip.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_bind_formatting() {
        assert_eq!(format_local_ip("0.0.0.0".parse().unwrap()), "*");
        assert_eq!(format_local_ip("::".parse().unwrap()), "*");
        assert_eq!(format_local_ip("10.0.0.5".parse().unwrap()), "10.0.0.5");
    }
}
