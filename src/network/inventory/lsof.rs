// network/inventory/lsof.rs - lsof-based socket enumeration for macOS and
// FreeBSD

use anyhow::{Result, anyhow};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::SocketInventory;
use crate::network::types::{LocalSocket, OpenSockets, ProcessInfo, Protocol};

const LSOF_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs the external enumeration command. Separated from parsing so tests
/// can feed canned output.
pub trait Invoker: Send + Sync {
    fn exec(&self) -> Result<Vec<u8>>;
}

/// Real `lsof` invocation: numeric addresses/ports, no name escaping limit,
/// TCP restricted to established connections.
#[derive(Default)]
pub struct LsofInvoker;

impl Invoker for LsofInvoker {
    fn exec(&self) -> Result<Vec<u8>> {
        let mut child = Command::new("lsof")
            .args([
                "-n",
                "-P",
                "-R",
                "-iTCP",
                "-iUDP",
                "-s",
                "TCP:ESTABLISHED",
                "+c",
                "0",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()?;

        // Drain stdout off-thread so a chatty lsof cannot dead-lock on a
        // full pipe while we poll for exit.
        let mut stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });

        let started = Instant::now();
        loop {
            match child.try_wait()? {
                Some(_) => break,
                None if started.elapsed() >= LSOF_TIMEOUT => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(anyhow!("lsof timed out after {LSOF_TIMEOUT:?}"));
                }
                None => thread::sleep(Duration::from_millis(10)),
            }
        }

        reader
            .join()
            .map_err(|_| anyhow!("lsof reader thread panicked"))
    }
}

/// Socket inventory shelling out to lsof.
pub struct LsofInventory {
    invoker: Box<dyn Invoker>,
}

impl Default for LsofInventory {
    fn default() -> Self {
        Self {
            invoker: Box::new(LsofInvoker),
        }
    }
}

impl LsofInventory {
    #[cfg(test)]
    fn with_invoker(invoker: Box<dyn Invoker>) -> Self {
        Self { invoker }
    }
}

impl SocketInventory for LsofInventory {
    fn open_sockets(&self, pids: &[i32]) -> Result<OpenSockets> {
        let output = self.invoker.exec()?;
        let mut sockets = parse_lsof_output(&String::from_utf8_lossy(&output));

        if !pids.is_empty() {
            sockets.retain(|_, info| pids.contains(&info.pid));
        }

        Ok(sockets)
    }
}

/// Parse `lsof -R` output. Field layout per line:
/// 0 = command, 1 = pid, 2 = ppid, 8 = protocol, 9 = address.
/// TCP addresses look like `local->remote`, UDP like `ip:port`; anything
/// that does not fit is skipped.
fn parse_lsof_output(output: &str) -> OpenSockets {
    let mut sockets = OpenSockets::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }

        let name = fields[0].replace("\\x20", " ");
        let Ok(pid) = fields[1].parse::<i32>() else {
            continue;
        };

        let (protocol, local) = match fields[8] {
            "TCP" => {
                let Some((local, _remote)) = fields[9].split_once("->") else {
                    continue;
                };
                (Protocol::Tcp, local)
            }
            "UDP" => (Protocol::Udp, fields[9]),
            _ => continue,
        };

        let parts: Vec<&str> = local.split(':').collect();
        if parts.len() != 2 {
            continue;
        }
        let Ok(port) = parts[1].parse::<u16>() else {
            continue;
        };

        sockets.insert(
            LocalSocket {
                ip: parts[0].to_string(),
                port,
                protocol,
            },
            ProcessInfo { pid, name },
        );
    }

    sockets
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedInvoker(&'static str);

    impl Invoker for CannedInvoker {
        fn exec(&self) -> Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    const SAMPLE: &str = "
goland                          44546     1 chenjiandongx   14u  IPv4 0x22b93638598dd98d      0t0  UDP *:60203
goland                          44546     1 chenjiandongx   17u  IPv4 0x22b93638598dfb3d      0t0  UDP *:8976
wget                            44817 44815 chenjiandongx   19u  IPv4 0x22b9363883c47b35      0t0  TCP 127.0.0.1:53747->127.0.0.1:49152 (ESTABLISHED)";

    fn expected(ip: &str, port: u16, protocol: Protocol) -> LocalSocket {
        LocalSocket {
            ip: ip.to_string(),
            port,
            protocol,
        }
    }

    #[test]
    fn test_parse_lsof_sample() {
        let inventory = LsofInventory::with_invoker(Box::new(CannedInvoker(SAMPLE)));
        let sockets = inventory.open_sockets(&[]).unwrap();

        assert_eq!(sockets.len(), 3);
        assert_eq!(
            sockets[&expected("*", 60203, Protocol::Udp)],
            ProcessInfo {
                pid: 44546,
                name: "goland".to_string()
            }
        );
        assert_eq!(
            sockets[&expected("*", 8976, Protocol::Udp)],
            ProcessInfo {
                pid: 44546,
                name: "goland".to_string()
            }
        );
        assert_eq!(
            sockets[&expected("127.0.0.1", 53747, Protocol::Tcp)],
            ProcessInfo {
                pid: 44817,
                name: "wget".to_string()
            }
        );
    }

    #[test]
    fn test_pid_filter_retains_listed_only() {
        let inventory = LsofInventory::with_invoker(Box::new(CannedInvoker(SAMPLE)));
        let sockets = inventory.open_sockets(&[44817]).unwrap();

        assert_eq!(sockets.len(), 1);
        assert!(sockets.contains_key(&expected("127.0.0.1", 53747, Protocol::Tcp)));
    }

    #[test]
    fn test_escaped_space_in_command_name() {
        let line = "Google\\x20Chrome 500 1 user 10u IPv4 0xdead 0t0 UDP *:5353";
        let sockets = parse_lsof_output(line);
        assert_eq!(
            sockets[&expected("*", 5353, Protocol::Udp)].name,
            "Google Chrome"
        );
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let output = "\
COMMAND PID PPID USER FD TYPE DEVICE SIZE/OFF NODE NAME
short line
proc 123 1 user 10u IPv6 0xbeef 0t0 TCP [::1]:8080->[::1]:9090 (ESTABLISHED)
proc 123 1 user 11u IPv4 0xbeef 0t0 ICMP *:*";
        // Header, short, IPv6-bracketed, and non-TCP/UDP lines all drop out.
        assert!(parse_lsof_output(output).is_empty());
    }
}
