use anyhow::{Result, bail};
use std::str::FromStr;

/// What the UI renders: rolling tables keyed by bytes or packets, or the
/// per-process rate plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    TableBytes,
    TablePackets,
    PlotProcesses,
}

impl ViewMode {
    /// Cycle bytes -> packets -> plot -> bytes.
    pub fn next(self) -> Self {
        match self {
            ViewMode::TableBytes => ViewMode::TablePackets,
            ViewMode::TablePackets => ViewMode::PlotProcesses,
            ViewMode::PlotProcesses => ViewMode::TableBytes,
        }
    }
}

impl TryFrom<i64> for ViewMode {
    type Error = anyhow::Error;

    fn try_from(mode: i64) -> Result<Self> {
        match mode {
            0 => Ok(ViewMode::TableBytes),
            1 => Ok(ViewMode::TablePackets),
            2 => Ok(ViewMode::PlotProcesses),
            _ => bail!("invalid view mode {mode}"),
        }
    }
}

/// Display unit for byte counters. `ratio` is bytes per unit; the lowercase
/// `b` variants are bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    B,
    Kb,
    KB,
    Mb,
    MB,
    Gb,
    GB,
}

impl Unit {
    pub fn ratio(self) -> f64 {
        match self {
            Unit::B => 1.0,
            Unit::KB => 1024.0,
            Unit::Kb => 1024.0 / 8.0,
            Unit::MB => 1024.0 * 1024.0,
            Unit::Mb => 1024.0 * 1024.0 / 8.0,
            Unit::GB => 1024.0 * 1024.0 * 1024.0,
            Unit::Gb => 1024.0 * 1024.0 * 1024.0 / 8.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::B => "B",
            Unit::KB => "KB",
            Unit::Kb => "Kb",
            Unit::MB => "MB",
            Unit::Mb => "Mb",
            Unit::GB => "GB",
            Unit::Gb => "Gb",
        }
    }
}

impl FromStr for Unit {
    type Err = anyhow::Error;

    fn from_str(unit: &str) -> Result<Self> {
        match unit {
            "B" => Ok(Unit::B),
            "KB" => Ok(Unit::KB),
            "Kb" => Ok(Unit::Kb),
            "MB" => Ok(Unit::MB),
            "Mb" => Ok(Unit::Mb),
            "GB" => Ok(Unit::GB),
            "Gb" => Ok(Unit::Gb),
            _ => bail!("invalid unit {unit}"),
        }
    }
}

/// Runtime options, assembled from the command line.
#[derive(Debug, Clone)]
pub struct Options {
    /// pcap filter in BPF syntax, e.g. "tcp and port 80".
    pub bpf_filter: String,
    /// Refresh interval in seconds.
    pub interval: u64,
    pub view_mode: ViewMode,
    /// Name prefixes selecting which devices to capture on.
    pub devices_prefix: Vec<String>,
    /// Pids to watch; empty means all processes.
    pub pids: Vec<i32>,
    pub unit: Unit,
    pub disable_dns_resolve: bool,
    /// Capture on every device, ignoring the prefix list.
    pub all_devices: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bpf_filter: "tcp or udp".to_string(),
            interval: 1,
            view_mode: ViewMode::TableBytes,
            devices_prefix: ["en", "lo", "eth", "em", "bond"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pids: Vec::new(),
            unit: Unit::KB,
            disable_dns_resolve: false,
            all_devices: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_mode_cycle_wraps() {
        let mut mode = ViewMode::TableBytes;
        mode = mode.next();
        assert_eq!(mode, ViewMode::TablePackets);
        mode = mode.next();
        assert_eq!(mode, ViewMode::PlotProcesses);
        mode = mode.next();
        assert_eq!(mode, ViewMode::TableBytes);
    }

    #[test]
    fn test_view_mode_from_int() {
        assert_eq!(ViewMode::try_from(0).unwrap(), ViewMode::TableBytes);
        assert_eq!(ViewMode::try_from(2).unwrap(), ViewMode::PlotProcesses);
        assert!(ViewMode::try_from(3).is_err());
    }

    #[test]
    fn test_unit_ratios() {
        assert_eq!(Unit::B.ratio(), 1.0);
        assert_eq!(Unit::KB.ratio(), 1024.0);
        assert_eq!(Unit::Kb.ratio(), 128.0);
        assert_eq!(Unit::MB.ratio(), 1_048_576.0);
        assert_eq!(Unit::Mb.ratio(), 131_072.0);
        assert_eq!(Unit::GB.ratio(), 1_073_741_824.0);
        assert_eq!(Unit::Gb.ratio(), 134_217_728.0);
    }

    #[test]
    fn test_unit_parse() {
        assert_eq!("KB".parse::<Unit>().unwrap(), Unit::KB);
        assert_eq!("Gb".parse::<Unit>().unwrap(), Unit::Gb);
        assert!("kb".parse::<Unit>().is_err());
        assert!("TB".parse::<Unit>().is_err());
    }

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.bpf_filter, "tcp or udp");
        assert_eq!(opts.interval, 1);
        assert_eq!(opts.unit, Unit::KB);
        assert_eq!(
            opts.devices_prefix,
            vec!["en", "lo", "eth", "em", "bond"]
        );
        assert!(!opts.all_devices);
    }
}
