// network/sinker.rs - Concurrent accumulator for classified segments

use std::mem;
use std::sync::Mutex;

use crate::network::types::{ConnectionInfo, Direction, Segment, Utilization};

/// Shared accumulator between the capture workers and the refresh tick.
///
/// All capture threads credit segments into the current [`Utilization`]
/// under one mutex; the tick swaps the whole map out, so a segment is
/// credited to exactly one interval.
#[derive(Default)]
pub struct Sinker {
    utilization: Mutex<Utilization>,
}

impl Sinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit one segment to its flow, creating the entry on first sight.
    /// The entry's interface is fixed at creation.
    pub fn fetch(&self, segment: Segment) {
        let mut utilization = self.utilization.lock().unwrap();
        let info = utilization
            .entry(segment.connection)
            .or_insert_with(|| ConnectionInfo {
                interface: segment.interface,
                ..Default::default()
            });

        match segment.direction {
            Direction::Upload => {
                info.upload_bytes += segment.data_len;
                info.upload_packets += 1;
            }
            Direction::Download => {
                info.download_bytes += segment.data_len;
                info.download_packets += 1;
            }
        }
    }

    /// Move the accumulated map out and install a fresh empty one.
    ///
    /// Ownership must transfer here: clearing in place would let a
    /// concurrent `fetch` land in a half-drained map.
    pub fn get_utilization(&self) -> Utilization {
        let mut utilization = self.utilization.lock().unwrap();
        mem::take(&mut *utilization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::{Connection, LocalSocket, Protocol, RemoteSocket};

    fn segment(direction: Direction, data_len: u64) -> Segment {
        Segment {
            interface: "eth0".to_string(),
            data_len,
            direction,
            connection: Connection {
                local: LocalSocket {
                    ip: "10.0.0.5".to_string(),
                    port: 55000,
                    protocol: Protocol::Tcp,
                },
                remote: RemoteSocket {
                    ip: "93.184.216.34".to_string(),
                    port: 443,
                },
            },
        }
    }

    #[test]
    fn test_fetch_accumulates_by_direction() {
        let sinker = Sinker::new();
        sinker.fetch(segment(Direction::Upload, 120));
        sinker.fetch(segment(Direction::Upload, 80));
        sinker.fetch(segment(Direction::Download, 1400));

        let utilization = sinker.get_utilization();
        assert_eq!(utilization.len(), 1);

        let info = utilization.values().next().unwrap();
        assert_eq!(info.interface, "eth0");
        assert_eq!(info.upload_bytes, 200);
        assert_eq!(info.upload_packets, 2);
        assert_eq!(info.download_bytes, 1400);
        assert_eq!(info.download_packets, 1);
    }

    #[test]
    fn test_swap_leaves_empty_map() {
        let sinker = Sinker::new();
        sinker.fetch(segment(Direction::Upload, 10));

        assert_eq!(sinker.get_utilization().len(), 1);
        // No fetch in between: the second swap must yield an empty map.
        assert!(sinker.get_utilization().is_empty());
    }

    #[test]
    fn test_interface_fixed_on_first_insertion() {
        let sinker = Sinker::new();
        sinker.fetch(segment(Direction::Upload, 10));

        let mut other = segment(Direction::Download, 20);
        other.interface = "eth1".to_string();
        sinker.fetch(other);

        let utilization = sinker.get_utilization();
        assert_eq!(utilization.values().next().unwrap().interface, "eth0");
    }

    #[test]
    fn test_concurrent_fetch_and_swap() {
        use std::sync::Arc;
        use std::thread;

        let sinker = Arc::new(Sinker::new());
        let mut workers = Vec::new();

        for _ in 0..4 {
            let sinker = Arc::clone(&sinker);
            workers.push(thread::spawn(move || {
                for _ in 0..1000 {
                    sinker.fetch(segment(Direction::Upload, 1));
                }
            }));
        }

        let mut total = 0;
        for _ in 0..50 {
            for info in sinker.get_utilization().values() {
                total += info.upload_bytes;
            }
        }
        for worker in workers {
            worker.join().unwrap();
        }
        for info in sinker.get_utilization().values() {
            total += info.upload_bytes;
        }

        // Every credited byte lands in exactly one swapped map.
        assert_eq!(total, 4000);
    }
}
