// app.rs - Sniffer orchestration: capture workers, inventory, stats window

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use crate::config::{Options, ViewMode};
use crate::network::{
    NameResolver, PcapClient, SocketInventory, create_socket_inventory, types::OpenSockets,
};
use crate::stats::{Stat, StatsManager, StatsView};

/// The traffic-accounting pipeline behind the UI: one capture worker per
/// interface feeding the sinker, a per-platform socket inventory, and the
/// bounded stats window the render sink reads from.
pub struct Sniffer {
    opts: Options,
    resolver: Arc<NameResolver>,
    client: PcapClient,
    stats_manager: StatsManager,
    inventory: Box<dyn SocketInventory>,
}

impl Sniffer {
    pub fn new(opts: Options) -> Result<Self> {
        let resolver = Arc::new(NameResolver::new());
        let lookup = if opts.disable_dns_resolve {
            None
        } else {
            Some(Arc::clone(&resolver))
        };
        let client = PcapClient::new(lookup, &opts)?;

        Ok(Self {
            stats_manager: StatsManager::new(opts.interval, opts.view_mode),
            inventory: create_socket_inventory(),
            resolver,
            client,
            opts,
        })
    }

    pub fn interval(&self) -> u64 {
        self.opts.interval
    }

    pub fn view_mode(&self) -> ViewMode {
        self.opts.view_mode
    }

    /// One tick: swap the utilization accumulated since the last tick,
    /// snapshot the socket inventory, fold both into the window, and read
    /// the aggregate back for rendering.
    ///
    /// The inventory reflects the moment of enumeration while utilization
    /// covers the whole interval; flows the inventory missed surface as
    /// `<UNKNOWN>` rather than failing the tick.
    pub fn refresh(&self) -> Option<StatsView> {
        let utilization = self.client.sinker().get_utilization();
        let open_sockets = match self.inventory.open_sockets(&self.opts.pids) {
            Ok(sockets) => sockets,
            Err(err) => {
                debug!("socket inventory unavailable this tick: {err}");
                OpenSockets::new()
            }
        };

        self.stats_manager.put(Stat {
            open_sockets,
            utilization,
        });
        self.stats_manager.get_stats()
    }

    /// Cycle bytes -> packets -> plot and start a fresh stats window so the
    /// new view never mixes samples aggregated for the old one.
    pub fn switch_view_mode(&mut self) {
        self.opts.view_mode = self.opts.view_mode.next();
        self.stats_manager = StatsManager::new(self.opts.interval, self.opts.view_mode);
        info!("switched view mode to {:?}", self.opts.view_mode);
    }

    /// Shut the pipeline down. Capture workers are joined before the
    /// resolver because classifiers may still be resolving names for
    /// in-flight packets.
    pub fn close(&mut self) {
        self.client.close();
        self.resolver.close();
    }
}
