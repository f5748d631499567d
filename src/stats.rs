// stats.rs - Bounded sample ring and per-tick snapshot aggregation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::config::ViewMode;
use crate::network::types::{Connection, ConnectionInfo, LocalSocket, OpenSockets, Utilization};

pub const UNKNOWN_PROCESS_NAME: &str = "<UNKNOWN>";

/// Samples kept per window: totals reflect roughly the last
/// `RING_SIZE * interval` seconds rather than process lifetime.
const RING_SIZE: usize = 3;

/// One sampling interval: the socket inventory taken at the tick paired
/// with the utilization accumulated since the previous tick.
pub struct Stat {
    pub open_sockets: OpenSockets,
    pub utilization: Utilization,
}

/// Aggregated counters for one process or one remote address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkData {
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub upload_packets: u64,
    pub download_packets: u64,
    pub conn_count: u64,
}

impl NetworkData {
    fn add(&mut self, info: &ConnectionInfo) {
        self.upload_bytes += info.upload_bytes;
        self.download_bytes += info.download_bytes;
        self.upload_packets += info.upload_packets;
        self.download_packets += info.download_packets;
    }

    fn divide_by(&mut self, divisor: u64) {
        self.upload_bytes /= divisor;
        self.download_bytes /= divisor;
        self.upload_packets /= divisor;
        self.download_packets /= divisor;
    }
}

/// Aggregated counters for one connection, with its fixed interface and
/// first-resolved process label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionData {
    pub interface_name: String,
    pub process_name: String,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub upload_packets: u64,
    pub download_packets: u64,
}

impl ConnectionData {
    fn add(&mut self, info: &ConnectionInfo) {
        self.upload_bytes += info.upload_bytes;
        self.download_bytes += info.download_bytes;
        self.upload_packets += info.upload_packets;
        self.download_packets += info.download_packets;
    }

    fn divide_by(&mut self, divisor: u64) {
        self.upload_bytes /= divisor;
        self.download_bytes /= divisor;
        self.upload_packets /= divisor;
        self.download_packets /= divisor;
    }
}

/// Window roll-up handed to the table views. All byte/packet fields are
/// per-second rates; connection counts are first-seen totals.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub processes: HashMap<String, NetworkData>,
    pub remote_addrs: HashMap<String, NetworkData>,
    pub connections: HashMap<Connection, ConnectionData>,
    pub total_upload_bytes: u64,
    pub total_download_bytes: u64,
    pub total_upload_packets: u64,
    pub total_download_packets: u64,
    pub total_connections: u64,
}

fn traffic_key(data: &NetworkData, mode: ViewMode) -> u64 {
    match mode {
        ViewMode::TablePackets => data.upload_packets + data.download_packets,
        _ => data.upload_bytes + data.download_bytes,
    }
}

impl Snapshot {
    pub fn top_n_processes(&self, n: usize, mode: ViewMode) -> Vec<(String, NetworkData)> {
        let mut items: Vec<_> = self
            .processes
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect();
        items.sort_by_key(|(_, data)| std::cmp::Reverse(traffic_key(data, mode)));
        items.truncate(n.min(items.len()));
        items
    }

    pub fn top_n_remote_addrs(&self, n: usize, mode: ViewMode) -> Vec<(String, NetworkData)> {
        let mut items: Vec<_> = self
            .remote_addrs
            .iter()
            .map(|(addr, data)| (addr.clone(), data.clone()))
            .collect();
        items.sort_by_key(|(_, data)| std::cmp::Reverse(traffic_key(data, mode)));
        items.truncate(n.min(items.len()));
        items
    }

    pub fn top_n_connections(&self, n: usize, mode: ViewMode) -> Vec<(Connection, ConnectionData)> {
        let mut items: Vec<_> = self
            .connections
            .iter()
            .map(|(conn, data)| (conn.clone(), data.clone()))
            .collect();
        items.sort_by_key(|(_, data)| match mode {
            ViewMode::TablePackets => {
                std::cmp::Reverse(data.upload_packets + data.download_packets)
            }
            _ => std::cmp::Reverse(data.upload_bytes + data.download_bytes),
        });
        items.truncate(n.min(items.len()));
        items
    }
}

/// What one tick hands to the render sink.
pub enum StatsView {
    Table(Box<Snapshot>),
    Plot(NetworkData),
}

/// Bounded ring of [`Stat`] samples. The controller is both writer and
/// reader, but the ring is mutex-guarded so an off-thread inventory fetch
/// stays safe.
pub struct StatsManager {
    ring: Mutex<VecDeque<Stat>>,
    ratio: u64,
    mode: ViewMode,
}

impl StatsManager {
    pub fn new(interval: u64, mode: ViewMode) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_SIZE)),
            ratio: interval.max(1),
            mode,
        }
    }

    /// Append a sample, dropping the oldest once the window is full.
    pub fn put(&self, stat: Stat) {
        let mut ring = self.ring.lock().unwrap();
        if ring.len() >= RING_SIZE {
            ring.pop_front();
        }
        ring.push_back(stat);
    }

    #[cfg(test)]
    fn ring_len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    /// Aggregate the current window for the active view mode. Returns
    /// `None` while the ring is empty.
    pub fn get_stats(&self) -> Option<StatsView> {
        let ring = self.ring.lock().unwrap();
        if ring.is_empty() {
            return None;
        }

        let divisor = ring.len() as u64 * self.ratio;
        match self.mode {
            ViewMode::PlotProcesses => Some(StatsView::Plot(network_data(&ring, divisor))),
            _ => Some(StatsView::Table(Box::new(snapshot(&ring, divisor)))),
        }
    }
}

/// Resolve a flow's process label against one inventory sample. Sockets
/// bound to the wildcard address are listed under `"*"`, hence the two-step
/// lookup.
fn proc_name(open_sockets: &OpenSockets, local: &LocalSocket) -> String {
    for ip in [local.ip.as_str(), "*"] {
        let probe = LocalSocket {
            ip: ip.to_string(),
            port: local.port,
            protocol: local.protocol,
        };
        if let Some(info) = open_sockets.get(&probe) {
            return info.to_string();
        }
    }
    UNKNOWN_PROCESS_NAME.to_string()
}

/// Plot-mode aggregation: one summed series over attributable flows.
fn network_data(ring: &VecDeque<Stat>, divisor: u64) -> NetworkData {
    let mut visited: HashSet<&Connection> = HashSet::new();
    let mut data = NetworkData::default();

    for stat in ring {
        for (conn, info) in &stat.utilization {
            if proc_name(&stat.open_sockets, &conn.local) == UNKNOWN_PROCESS_NAME {
                continue;
            }
            if visited.insert(conn) {
                data.conn_count += 1;
            }
            data.add(info);
        }
    }

    data.divide_by(divisor);
    data
}

/// Table-mode aggregation over the whole window.
///
/// A connection appearing in several samples accumulates bytes and packets
/// each time but contributes exactly once to every `conn_count`.
fn snapshot(ring: &VecDeque<Stat>, divisor: u64) -> Snapshot {
    let mut result = Snapshot::default();
    let mut visited: HashSet<&Connection> = HashSet::new();

    for stat in ring {
        for (conn, info) in &stat.utilization {
            let proc_name = proc_name(&stat.open_sockets, &conn.local);
            let first_seen = visited.insert(conn);

            result
                .connections
                .entry(conn.clone())
                .or_insert_with(|| ConnectionData {
                    interface_name: info.interface.clone(),
                    process_name: proc_name.clone(),
                    ..Default::default()
                })
                .add(info);

            let remote = result.remote_addrs.entry(conn.remote.ip.clone()).or_default();
            if first_seen {
                remote.conn_count += 1;
            }
            remote.add(info);

            let process = result.processes.entry(proc_name).or_default();
            if first_seen {
                process.conn_count += 1;
                result.total_connections += 1;
            }
            process.add(info);

            result.total_upload_bytes += info.upload_bytes;
            result.total_download_bytes += info.download_bytes;
            result.total_upload_packets += info.upload_packets;
            result.total_download_packets += info.download_packets;
        }
    }

    for data in result.processes.values_mut() {
        data.divide_by(divisor);
    }
    for data in result.remote_addrs.values_mut() {
        data.divide_by(divisor);
    }
    for data in result.connections.values_mut() {
        data.divide_by(divisor);
    }
    result.total_upload_bytes /= divisor;
    result.total_download_bytes /= divisor;
    result.total_upload_packets /= divisor;
    result.total_download_packets /= divisor;

    result
}
