use std::collections::HashMap;
use std::fmt;

/// Transport protocol of a tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Direction of a captured frame relative to the host.
///
/// Upload iff the frame's source IP is one of the addresses bound to the
/// monitored interfaces at capture start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Host-side endpoint of a flow. Used as the join key against the socket
/// inventory, so the IP is kept as a string (the inventory reports
/// wildcard-bound sockets as `"*"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalSocket {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Remote peer of a flow. The protocol is carried on the [`LocalSocket`].
/// When DNS resolution is enabled the `ip` field may hold a hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteSocket {
    pub ip: String,
    pub port: u16,
}

/// Unique flow identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub local: LocalSocket,
    pub remote: RemoteSocket,
}

/// One classified frame: where it was seen, how big it was, and which
/// directed flow it belongs to.
///
/// `data_len` is the L4 payload length. The transport header is not counted;
/// tests assert this convention.
#[derive(Debug, Clone)]
pub struct Segment {
    pub interface: String,
    pub data_len: u64,
    pub connection: Connection,
    pub direction: Direction,
}

/// Counters accumulated for one flow over one sampling interval.
///
/// `interface` is fixed on first insertion and never rewritten.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub interface: String,
    pub upload_packets: u64,
    pub download_packets: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

/// One sampling interval's worth of accounting, keyed by flow.
pub type Utilization = HashMap<Connection, ConnectionInfo>;

/// Owning process of an open socket. `pid` is 0 when the platform cannot
/// attribute the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>:{}", self.pid, self.name)
    }
}

/// Point-in-time inventory of open sockets, immutable once produced.
pub type OpenSockets = HashMap<LocalSocket, ProcessInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }

    #[test]
    fn test_process_info_label() {
        let info = ProcessInfo {
            pid: 4242,
            name: "mdns".to_string(),
        };
        assert_eq!(info.to_string(), "<4242>:mdns");
    }

    #[test]
    fn test_local_socket_as_map_key() {
        let mut sockets: OpenSockets = HashMap::new();
        sockets.insert(
            LocalSocket {
                ip: "*".to_string(),
                port: 5353,
                protocol: Protocol::Udp,
            },
            ProcessInfo {
                pid: 4242,
                name: "mdns".to_string(),
            },
        );

        let probe = LocalSocket {
            ip: "*".to_string(),
            port: 5353,
            protocol: Protocol::Udp,
        };
        assert_eq!(sockets.get(&probe).unwrap().pid, 4242);
    }
}
