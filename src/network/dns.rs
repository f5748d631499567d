// network/dns.rs - Cached reverse DNS with bounded lookup latency

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use dns_lookup::lookup_addr;
use log::debug;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a waiting classifier blocks on an unresolved address.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);
/// Cache entries older than this are purged by the refresher.
const CACHE_TTL: Duration = Duration::from_secs(120);

const RESOLVER_THREADS: usize = 2;

struct CachedName {
    hostname: String,
    resolved_at: Instant,
}

struct ResolveRequest {
    addr: IpAddr,
    key: String,
    reply_tx: Sender<String>,
}

/// Reverse DNS resolver backing the flow classifier.
///
/// `lookup` blocks for at most one second; slow resolutions keep running on
/// a worker thread and still warm the cache for the next caller. A
/// background refresher drops entries older than two minutes so renamed
/// PTR records are eventually picked up.
pub struct NameResolver {
    cache: Arc<DashMap<String, CachedName>>,
    request_tx: Sender<ResolveRequest>,
    should_stop: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NameResolver {
    pub fn new() -> Self {
        let cache: Arc<DashMap<String, CachedName>> = Arc::new(DashMap::new());
        let (request_tx, request_rx) = channel::unbounded();
        let should_stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(RESOLVER_THREADS + 1);
        for i in 0..RESOLVER_THREADS {
            workers.push(spawn_resolver(
                i,
                request_rx.clone(),
                Arc::clone(&cache),
                Arc::clone(&should_stop),
            ));
        }
        workers.push(spawn_refresher(Arc::clone(&cache), Arc::clone(&should_stop)));

        Self {
            cache,
            request_tx,
            should_stop,
            workers: Mutex::new(workers),
        }
    }

    /// Resolve `ip` to a hostname, returning the input unchanged on any
    /// failure, timeout, or unparsable address.
    pub fn lookup(&self, ip: &str) -> String {
        if let Some(entry) = self.cache.get(ip) {
            return entry.hostname.clone();
        }

        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => return ip.to_string(),
        };

        let (reply_tx, reply_rx) = channel::bounded(1);
        let request = ResolveRequest {
            addr,
            key: ip.to_string(),
            reply_tx,
        };
        if self.request_tx.send(request).is_err() {
            return ip.to_string();
        }

        match reply_rx.recv_timeout(LOOKUP_TIMEOUT) {
            Ok(hostname) => hostname,
            Err(_) => ip.to_string(),
        }
    }

    /// Stop the refresher and resolver workers and join them.
    pub fn close(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_resolver(
    id: usize,
    request_rx: Receiver<ResolveRequest>,
    cache: Arc<DashMap<String, CachedName>>,
    should_stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("dns-resolver-{id}"))
        .spawn(move || {
            while !should_stop.load(Ordering::Relaxed) {
                let request = match request_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(request) => request,
                    Err(channel::RecvTimeoutError::Timeout) => continue,
                    Err(channel::RecvTimeoutError::Disconnected) => break,
                };

                // Another caller may have resolved the same address while
                // this request sat in the queue.
                if let Some(entry) = cache.get(&request.key) {
                    let _ = request.reply_tx.send(entry.hostname.clone());
                    continue;
                }

                let hostname = match lookup_addr(&request.addr) {
                    Ok(name) if !name.is_empty() => name,
                    _ => request.key.clone(),
                };

                cache.insert(
                    request.key,
                    CachedName {
                        hostname: hostname.clone(),
                        resolved_at: Instant::now(),
                    },
                );
                // The caller may already have timed out; the cache entry is
                // the result that matters then.
                let _ = request.reply_tx.send(hostname);
            }

            debug!("dns resolver {id} stopped");
        })
        .expect("failed to spawn dns resolver thread")
}

fn spawn_refresher(
    cache: Arc<DashMap<String, CachedName>>,
    should_stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("dns-refresher".to_string())
        .spawn(move || {
            let mut last_purge = Instant::now();
            while !should_stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(200));
                if last_purge.elapsed() < CACHE_TTL {
                    continue;
                }
                let before = cache.len();
                cache.retain(|_, entry| entry.resolved_at.elapsed() < CACHE_TTL);
                debug!("dns cache purge: {} -> {} entries", before, cache.len());
                last_purge = Instant::now();
            }
        })
        .expect("failed to spawn dns refresher thread")
}
