// network/capture.rs - Live capture workers and flow classification

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use pcap::{Active, Capture, Error as PcapError};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::config::Options;
use crate::network::device::list_selected_devices;
use crate::network::dns::NameResolver;
use crate::network::parser::{PacketDecoder, PacketMeta};
use crate::network::sinker::Sinker;
use crate::network::types::{Connection, Direction, LocalSocket, Protocol, RemoteSocket, Segment};

const SNAPLEN: i32 = 65535;
/// Read timeout so workers can observe the stop flag between kernel reads.
const READ_TIMEOUT_MS: i32 = 150;

/// Turns decoded frames from one interface into directed segments.
///
/// The host IP set is fixed at capture start: a frame whose source address
/// is in the set is an upload, everything else is a download. For TCP
/// remotes the resolver (when enabled) substitutes the hostname before the
/// segment is emitted, so downstream maps key on the resolved string.
struct FlowClassifier {
    interface: String,
    bind_ips: Arc<HashSet<IpAddr>>,
    resolver: Option<Arc<NameResolver>>,
}

impl FlowClassifier {
    fn classify(&self, meta: PacketMeta) -> Segment {
        let direction = if self.bind_ips.contains(&meta.src_ip) {
            Direction::Upload
        } else {
            Direction::Download
        };

        let (local_ip, local_port, remote_ip, remote_port) = match direction {
            Direction::Upload => (meta.src_ip, meta.src_port, meta.dst_ip, meta.dst_port),
            Direction::Download => (meta.dst_ip, meta.dst_port, meta.src_ip, meta.src_port),
        };

        let mut remote_ip = remote_ip.to_string();
        if meta.protocol == Protocol::Tcp
            && let Some(resolver) = &self.resolver
        {
            remote_ip = resolver.lookup(&remote_ip);
        }

        Segment {
            interface: self.interface.clone(),
            data_len: meta.data_len,
            direction,
            connection: Connection {
                local: LocalSocket {
                    ip: local_ip.to_string(),
                    port: local_port,
                    protocol: meta.protocol,
                },
                remote: RemoteSocket {
                    ip: remote_ip,
                    port: remote_port,
                },
            },
        }
    }
}

/// Owns one capture worker per selected interface, all feeding the shared
/// [`Sinker`].
pub struct PcapClient {
    sinker: Arc<Sinker>,
    should_stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl PcapClient {
    /// Open every selected device and start its capture worker. Devices
    /// that fail to open are skipped; having none left is fatal.
    pub fn new(resolver: Option<Arc<NameResolver>>, opts: &Options) -> Result<Self> {
        let devices = list_selected_devices(&opts.devices_prefix, opts.all_devices)?;

        let mut bind_ips = HashSet::new();
        let mut handles = Vec::new();
        for device in devices {
            match open_capture(&device.name, &opts.bpf_filter) {
                Ok(capture) => {
                    for addr in &device.addresses {
                        bind_ips.insert(addr.addr);
                    }
                    handles.push((device.name.clone(), capture));
                }
                Err(err) => {
                    warn!("skipping device {}: {err}", device.name);
                }
            }
        }

        if handles.is_empty() {
            return Err(anyhow!("no available devices found"));
        }

        let sinker = Arc::new(Sinker::new());
        let should_stop = Arc::new(AtomicBool::new(false));
        let bind_ips = Arc::new(bind_ips);

        let mut workers = Vec::with_capacity(handles.len());
        for (name, capture) in handles {
            info!("capturing on {name}");
            let classifier = FlowClassifier {
                interface: name.clone(),
                bind_ips: Arc::clone(&bind_ips),
                resolver: resolver.clone(),
            };
            let sinker = Arc::clone(&sinker);
            let should_stop = Arc::clone(&should_stop);
            workers.push(
                thread::Builder::new()
                    .name(format!("capture-{name}"))
                    .spawn(move || run_capture_worker(capture, classifier, sinker, should_stop))?,
            );
        }

        Ok(Self {
            sinker,
            should_stop,
            workers,
        })
    }

    pub fn sinker(&self) -> &Arc<Sinker> {
        &self.sinker
    }

    /// Cancel all capture workers and join them. Each worker drops its
    /// pcap handle on exit, releasing the kernel resources.
    pub fn close(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for PcapClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open a live handle: full snaplen, promiscuous off, immediate delivery.
/// The BPF filter (if any) is compiled and attached before the first read,
/// so filtered-out packets never reach user space.
fn open_capture(device: &str, bpf_filter: &str) -> Result<Capture<Active>> {
    let mut capture = Capture::from_device(device)?
        .promisc(false)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()?;

    if !bpf_filter.is_empty() {
        capture.filter(bpf_filter, true)?;
    }

    Ok(capture)
}

fn run_capture_worker(
    mut capture: Capture<Active>,
    classifier: FlowClassifier,
    sinker: Arc<Sinker>,
    should_stop: Arc<AtomicBool>,
) {
    let decoder = PacketDecoder::new(capture.get_datalink().0);

    loop {
        if should_stop.load(Ordering::Relaxed) {
            break;
        }

        match capture.next_packet() {
            Ok(packet) => {
                if let Some(meta) = decoder.decode(packet.data) {
                    sinker.fetch(classifier.classify(meta));
                }
            }
            Err(PcapError::TimeoutExpired) => continue,
            Err(err) => {
                debug!("capture on {} ended: {err}", classifier.interface);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(bind_ips: &[&str]) -> FlowClassifier {
        FlowClassifier {
            interface: "eth0".to_string(),
            bind_ips: Arc::new(bind_ips.iter().map(|ip| ip.parse().unwrap()).collect()),
            resolver: None,
        }
    }

    fn meta(src: &str, src_port: u16, dst: &str, dst_port: u16, data_len: u64) -> PacketMeta {
        PacketMeta {
            protocol: Protocol::Tcp,
            src_ip: src.parse().unwrap(),
            src_port,
            dst_ip: dst.parse().unwrap(),
            dst_port,
            data_len,
        }
    }

    #[test]
    fn test_upload_orientation() {
        let segment = classifier(&["10.0.0.5"]).classify(meta(
            "10.0.0.5",
            55000,
            "93.184.216.34",
            443,
            120,
        ));

        assert_eq!(segment.direction, Direction::Upload);
        assert_eq!(segment.data_len, 120);
        assert_eq!(segment.connection.local.ip, "10.0.0.5");
        assert_eq!(segment.connection.local.port, 55000);
        assert_eq!(segment.connection.local.protocol, Protocol::Tcp);
        assert_eq!(segment.connection.remote.ip, "93.184.216.34");
        assert_eq!(segment.connection.remote.port, 443);
    }

    #[test]
    fn test_download_orientation() {
        let segment = classifier(&["10.0.0.5"]).classify(meta(
            "93.184.216.34",
            443,
            "10.0.0.5",
            55000,
            1400,
        ));

        assert_eq!(segment.direction, Direction::Download);
        // Local is the destination side on downloads.
        assert_eq!(segment.connection.local.ip, "10.0.0.5");
        assert_eq!(segment.connection.local.port, 55000);
        assert_eq!(segment.connection.remote.ip, "93.184.216.34");
        assert_eq!(segment.connection.remote.port, 443);
    }

    #[test]
    fn test_unknown_source_defaults_to_download() {
        // A multihomed host with an unobserved address classifies its own
        // traffic as download; accepted skew.
        let segment = classifier(&["10.0.0.5"]).classify(meta(
            "172.16.0.9",
            1234,
            "192.0.2.7",
            80,
            10,
        ));
        assert_eq!(segment.direction, Direction::Download);
    }
}
