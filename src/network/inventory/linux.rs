// network/inventory/linux.rs - NETLINK_SOCK_DIAG socket enumeration with
// /proc inode attribution

use anyhow::{Result, anyhow};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::RawFd;

use super::{SocketInventory, format_local_ip};
use crate::network::types::{LocalSocket, OpenSockets, ProcessInfo, Protocol};

const SOCK_DIAG_BY_FAMILY: u16 = 20;

const TCP_ESTABLISHED: u8 = 1;
const UDP_LISTEN: u8 = 7;

const RECV_TIMEOUT_USEC: libc::suseconds_t = 200_000;

/// `struct inet_diag_sockid` from linux/inet_diag.h. Ports and addresses
/// are big-endian on the wire.
#[repr(C)]
#[derive(Clone, Copy)]
struct InetDiagSockId {
    sport: [u8; 2],
    dport: [u8; 2],
    src: [u8; 16],
    dst: [u8; 16],
    interface: u32,
    cookie: [u32; 2],
}

/// `struct inet_diag_req_v2`.
#[repr(C)]
struct InetDiagReqV2 {
    family: u8,
    protocol: u8,
    ext: u8,
    pad: u8,
    states: u32,
    id: InetDiagSockId,
}

/// One dump request: netlink header followed by the diag request.
#[repr(C)]
struct InetDiagRequest {
    header: libc::nlmsghdr,
    req: InetDiagReqV2,
}

/// `struct inet_diag_msg`.
#[repr(C)]
#[derive(Clone, Copy)]
struct InetDiagMsg {
    family: u8,
    state: u8,
    timer: u8,
    retrans: u8,
    id: InetDiagSockId,
    expires: u32,
    rqueue: u32,
    wqueue: u32,
    uid: u32,
    inode: u32,
}

/// Netlink fd with a guaranteed close path.
struct NetlinkSocket {
    fd: RawFd,
}

impl NetlinkSocket {
    fn open() -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_SOCK_DIAG,
            )
        };
        if fd < 0 {
            return Err(anyhow!(
                "failed to open NETLINK_SOCK_DIAG socket: {}",
                std::io::Error::last_os_error()
            ));
        }

        let timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: RECV_TIMEOUT_USEC,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const _ as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(anyhow!("failed to set netlink receive timeout: {err}"));
        }

        Ok(Self { fd })
    }

    fn send_dump_request(&self, protocol: u8, family: u8, states: u32) -> Result<()> {
        let request = InetDiagRequest {
            header: libc::nlmsghdr {
                nlmsg_len: mem::size_of::<InetDiagRequest>() as u32,
                nlmsg_type: SOCK_DIAG_BY_FAMILY,
                nlmsg_flags: (libc::NLM_F_REQUEST | libc::NLM_F_DUMP) as u16,
                nlmsg_seq: 0,
                nlmsg_pid: 0,
            },
            req: InetDiagReqV2 {
                family,
                protocol,
                ext: 0,
                pad: 0,
                states,
                id: unsafe { mem::zeroed() },
            },
        };

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        let sent = unsafe {
            libc::sendto(
                self.fd,
                &request as *const _ as *const libc::c_void,
                mem::size_of::<InetDiagRequest>(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(anyhow!(
                "failed to send sock_diag request: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(())
    }

    /// Read dump responses until NLMSG_DONE, collecting (socket, inode)
    /// pairs.
    fn recv_dump(&self, protocol: Protocol) -> Result<Vec<(LocalSocket, u32)>> {
        let mut sockets = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];

        loop {
            let n = unsafe {
                libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n < 0 {
                return Err(anyhow!(
                    "sock_diag recv failed: {}",
                    std::io::Error::last_os_error()
                ));
            }
            if n == 0 {
                return Ok(sockets);
            }

            if parse_diag_messages(&buf[..n as usize], protocol, &mut sockets) {
                return Ok(sockets);
            }
        }
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Walk one recv buffer of netlink messages. Returns true once NLMSG_DONE
/// is seen.
fn parse_diag_messages(
    buf: &[u8],
    protocol: Protocol,
    sockets: &mut Vec<(LocalSocket, u32)>,
) -> bool {
    const HEADER_LEN: usize = mem::size_of::<libc::nlmsghdr>();
    const MSG_LEN: usize = mem::size_of::<InetDiagMsg>();

    let mut offset = 0;
    while offset + HEADER_LEN <= buf.len() {
        // nlmsghdr is host byte order.
        let nlmsg_len =
            u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        let nlmsg_type = u16::from_ne_bytes(buf[offset + 4..offset + 6].try_into().unwrap());

        if nlmsg_len < HEADER_LEN || offset + nlmsg_len > buf.len() {
            break;
        }
        if nlmsg_type == libc::NLMSG_DONE as u16 || nlmsg_type == libc::NLMSG_ERROR as u16 {
            return true;
        }

        let payload = &buf[offset + HEADER_LEN..offset + nlmsg_len];
        if payload.len() >= MSG_LEN {
            let msg = unsafe { &*(payload.as_ptr() as *const InetDiagMsg) };
            if let Some(ip) = diag_source_ip(msg.family, &msg.id.src) {
                sockets.push((
                    LocalSocket {
                        ip: format_local_ip(ip),
                        port: u16::from_be_bytes(msg.id.sport),
                        protocol,
                    },
                    msg.inode,
                ));
            }
        }

        // Netlink messages are 4-byte aligned.
        offset += (nlmsg_len + 3) & !3;
    }

    false
}

fn diag_source_ip(family: u8, src: &[u8; 16]) -> Option<IpAddr> {
    match family as i32 {
        libc::AF_INET => {
            let bytes: [u8; 4] = src[..4].try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(bytes)))
        }
        libc::AF_INET6 => Some(IpAddr::V6(Ipv6Addr::from(*src))),
        _ => None,
    }
}

/// Extract the socket inode from a /proc fd symlink target like
/// `socket:[1070205860]`.
fn parse_socket_inode(link: &str) -> Option<u32> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn list_all_pids() -> Vec<i32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect()
}

/// Map socket inodes to their owning process for the given pids (all pids
/// when empty). Unreadable processes are skipped.
fn build_inode_map(pids: &[i32]) -> HashMap<u32, ProcessInfo> {
    let pids = if pids.is_empty() {
        list_all_pids()
    } else {
        pids.to_vec()
    };

    let mut inodes = HashMap::new();
    for pid in pids {
        let Ok(exe) = fs::read_link(format!("/proc/{pid}/exe")) else {
            continue;
        };
        let name = exe
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Ok(fds) = fs::read_dir(format!("/proc/{pid}/fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = fs::read_link(fd.path())
                && let Some(inode) = link.to_str().and_then(parse_socket_inode)
            {
                inodes.insert(
                    inode,
                    ProcessInfo {
                        pid,
                        name: name.clone(),
                    },
                );
            }
        }
    }
    inodes
}

/// Socket inventory speaking NETLINK_SOCK_DIAG, joined against /proc fd
/// inodes for process attribution.
#[derive(Default)]
pub struct NetlinkInventory;

impl NetlinkInventory {
    pub fn new() -> Self {
        Self
    }

    fn query_channel(protocol: u8, family: u8, states: u32) -> Result<Vec<(LocalSocket, u32)>> {
        let socket = NetlinkSocket::open()?;
        socket.send_dump_request(protocol, family, states)?;
        let proto = if protocol == libc::IPPROTO_TCP as u8 {
            Protocol::Tcp
        } else {
            Protocol::Udp
        };
        socket.recv_dump(proto)
    }
}

impl SocketInventory for NetlinkInventory {
    fn open_sockets(&self, pids: &[i32]) -> Result<OpenSockets> {
        let inodes = build_inode_map(pids);

        let channels: [(u8, u8, u32); 4] = [
            (
                libc::IPPROTO_TCP as u8,
                libc::AF_INET as u8,
                1 << TCP_ESTABLISHED,
            ),
            (
                libc::IPPROTO_TCP as u8,
                libc::AF_INET6 as u8,
                1 << TCP_ESTABLISHED,
            ),
            (libc::IPPROTO_UDP as u8, libc::AF_INET as u8, 1 << UDP_LISTEN),
            (
                libc::IPPROTO_UDP as u8,
                libc::AF_INET6 as u8,
                1 << UDP_LISTEN,
            ),
        ];

        let mut sockets = OpenSockets::new();
        for (protocol, family, states) in channels {
            match Self::query_channel(protocol, family, states) {
                Ok(entries) => {
                    for (socket, inode) in entries {
                        if let Some(info) = inodes.get(&inode) {
                            sockets.insert(socket, info.clone());
                        }
                    }
                }
                // Best effort: a failed channel contributes nothing.
                Err(err) => debug!(
                    "sock_diag dump failed (proto {protocol}, family {family}): {err}"
                ),
            }
        }

        Ok(sockets)
    }
}
