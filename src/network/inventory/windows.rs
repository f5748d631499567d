// network/inventory/windows.rs - IP Helper API socket enumeration

use anyhow::Result;
use log::debug;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::windows::ffi::OsStringExt;

use windows::Win32::Foundation::{CloseHandle, ERROR_INSUFFICIENT_BUFFER, WIN32_ERROR};
use windows::Win32::NetworkManagement::IpHelper::{
    GetExtendedTcpTable, GetExtendedUdpTable, MIB_TCP6ROW_OWNER_PID, MIB_TCPROW_OWNER_PID,
    MIB_UDP6ROW_OWNER_PID, MIB_UDPROW_OWNER_PID, TCP_TABLE_OWNER_PID_ALL, UDP_TABLE_OWNER_PID,
};
use windows::Win32::Networking::WinSock::{AF_INET, AF_INET6};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
};

use super::{SocketInventory, format_local_ip};
use crate::network::types::{LocalSocket, OpenSockets, ProcessInfo, Protocol};

const MIB_TCP_STATE_ESTAB: u32 = 5;

/// Socket inventory built from the extended TCP/UDP owner-pid tables.
#[derive(Default)]
pub struct WindowsInventory;

impl WindowsInventory {
    pub fn new() -> Self {
        Self
    }
}

impl SocketInventory for WindowsInventory {
    fn open_sockets(&self, pids: &[i32]) -> Result<OpenSockets> {
        let mut sockets = OpenSockets::new();

        collect_tcp_v4(&mut sockets);
        collect_tcp_v6(&mut sockets);
        collect_udp_v4(&mut sockets);
        collect_udp_v6(&mut sockets);

        if !pids.is_empty() {
            sockets.retain(|_, info| pids.contains(&info.pid));
        }

        Ok(sockets)
    }
}

/// Double-call pattern shared by all four tables: probe for the buffer
/// size, then fetch. Returns None when the channel yields nothing.
fn fetch_table(af: u32, tcp: bool) -> Option<Vec<u8>> {
    unsafe {
        let mut size: u32 = 0;
        let probe = if tcp {
            GetExtendedTcpTable(None, &mut size, false, af, TCP_TABLE_OWNER_PID_ALL, 0)
        } else {
            GetExtendedUdpTable(None, &mut size, false, af, UDP_TABLE_OWNER_PID, 0)
        };
        if WIN32_ERROR(probe) != ERROR_INSUFFICIENT_BUFFER || size == 0 || size > 100_000_000 {
            debug!("extended table probe failed (af {af}, tcp {tcp}): {probe}");
            return None;
        }

        let mut table = vec![0u8; size as usize];
        let result = if tcp {
            GetExtendedTcpTable(
                Some(table.as_mut_ptr() as *mut _),
                &mut size,
                false,
                af,
                TCP_TABLE_OWNER_PID_ALL,
                0,
            )
        } else {
            GetExtendedUdpTable(
                Some(table.as_mut_ptr() as *mut _),
                &mut size,
                false,
                af,
                UDP_TABLE_OWNER_PID,
                0,
            )
        };
        if result != 0 {
            debug!("extended table fetch failed (af {af}, tcp {tcp}): {result}");
            return None;
        }
        Some(table)
    }
}

/// Bounds-checked view of the rows in a fetched table buffer.
/// Every MIB_*TABLE_OWNER_PID starts with a dwNumEntries u32 followed by
/// the row array.
unsafe fn table_rows<R>(buf: &[u8]) -> &[R] {
    let Some(count_bytes) = buf.get(..4) else {
        return &[];
    };
    let count = u32::from_ne_bytes(count_bytes.try_into().unwrap()) as usize;
    let rows_offset = std::mem::size_of::<u32>().max(std::mem::align_of::<R>());
    let available = buf.len().saturating_sub(rows_offset) / std::mem::size_of::<R>();
    let rows = unsafe { buf.as_ptr().add(rows_offset) } as *const R;
    unsafe { std::slice::from_raw_parts(rows, count.min(available)) }
}

fn insert(sockets: &mut OpenSockets, ip: IpAddr, port: u16, protocol: Protocol, pid: u32) {
    if let Some(name) = process_name_from_pid(pid) {
        sockets.insert(
            LocalSocket {
                ip: format_local_ip(ip),
                port,
                protocol,
            },
            ProcessInfo {
                pid: pid as i32,
                name,
            },
        );
    }
}

fn collect_tcp_v4(sockets: &mut OpenSockets) {
    let Some(buf) = fetch_table(AF_INET.0 as u32, true) else {
        return;
    };
    let rows: &[MIB_TCPROW_OWNER_PID] =
        unsafe { table_rows(&buf) };
    for row in rows {
        if row.dwState != MIB_TCP_STATE_ESTAB {
            continue;
        }
        insert(
            sockets,
            IpAddr::V4(Ipv4Addr::from(row.dwLocalAddr.to_ne_bytes())),
            u16::from_be(row.dwLocalPort as u16),
            Protocol::Tcp,
            row.dwOwningPid,
        );
    }
}

fn collect_tcp_v6(sockets: &mut OpenSockets) {
    let Some(buf) = fetch_table(AF_INET6.0 as u32, true) else {
        return;
    };
    let rows: &[MIB_TCP6ROW_OWNER_PID] =
        unsafe { table_rows(&buf) };
    for row in rows {
        if row.dwState != MIB_TCP_STATE_ESTAB {
            continue;
        }
        insert(
            sockets,
            IpAddr::V6(Ipv6Addr::from(row.ucLocalAddr)),
            u16::from_be(row.dwLocalPort as u16),
            Protocol::Tcp,
            row.dwOwningPid,
        );
    }
}

fn collect_udp_v4(sockets: &mut OpenSockets) {
    let Some(buf) = fetch_table(AF_INET.0 as u32, false) else {
        return;
    };
    let rows: &[MIB_UDPROW_OWNER_PID] =
        unsafe { table_rows(&buf) };
    for row in rows {
        insert(
            sockets,
            IpAddr::V4(Ipv4Addr::from(row.dwLocalAddr.to_ne_bytes())),
            u16::from_be(row.dwLocalPort as u16),
            Protocol::Udp,
            row.dwOwningPid,
        );
    }
}

fn collect_udp_v6(sockets: &mut OpenSockets) {
    let Some(buf) = fetch_table(AF_INET6.0 as u32, false) else {
        return;
    };
    let rows: &[MIB_UDP6ROW_OWNER_PID] =
        unsafe { table_rows(&buf) };
    for row in rows {
        insert(
            sockets,
            IpAddr::V6(Ipv6Addr::from(row.ucLocalAddr)),
            u16::from_be(row.dwLocalPort as u16),
            Protocol::Udp,
            row.dwOwningPid,
        );
    }
}

/// Resolve a pid to its executable basename.
fn process_name_from_pid(pid: u32) -> Option<String> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;

        let mut size: u32 = 260;
        let mut buffer: Vec<u16> = vec![0; size as usize];
        let result = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(buffer.as_mut_ptr()),
            &mut size,
        );
        let _ = CloseHandle(handle);

        if result.is_err() || size == 0 {
            return None;
        }

        let path = OsString::from_wide(&buffer[..size as usize])
            .to_string_lossy()
            .to_string();
        path.split('\\').next_back().map(|name| name.to_string())
    }
}
