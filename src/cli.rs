use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use crate::config::{Options, Unit, ViewMode};

pub fn build_cli() -> Command {
    let defaults = Options::default();

    Command::new("netpeek")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A modern alternative network traffic sniffer")
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .help("List all devices name")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("all-devices")
                .short('a')
                .long("all-devices")
                .help("Listen all devices if present")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("bpf")
                .short('b')
                .long("bpf")
                .value_name("FILTER")
                .help("Specify string pcap filter with the BPF syntax")
                .default_value(defaults.bpf_filter),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Interval for refresh rate in seconds")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("1"),
        )
        .arg(
            Arg::new("devices-prefix")
                .short('d')
                .long("devices-prefix")
                .value_name("PREFIX")
                .help("Prefixed devices to monitor")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("no-dns-resolve")
                .short('n')
                .long("no-dns-resolve")
                .help("Disable the DNS resolution")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pids")
                .short('p')
                .long("pids")
                .value_name("PID")
                .help("Pids to watch, empty stands for all pids")
                .value_parser(clap::value_parser!(i32))
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("View mode of sniffer (0: bytes 1: packets 2: processes)")
                .value_parser(clap::value_parser!(i64))
                .default_value("0"),
        )
        .arg(
            Arg::new("unit")
                .short('u')
                .long("unit")
                .value_name("UNIT")
                .help("Unit of traffic stats, optional: B, Kb, KB, Mb, MB, Gb, GB")
                .default_value(defaults.unit.as_str()),
        )
}

/// Assemble runtime options from parsed arguments. Invalid view modes and
/// units are startup validation failures.
pub fn options_from_matches(matches: &ArgMatches) -> Result<Options> {
    let defaults = Options::default();

    let devices_prefix = matches
        .get_many::<String>("devices-prefix")
        .map(|values| values.cloned().collect())
        .unwrap_or(defaults.devices_prefix);

    let pids = matches
        .get_many::<i32>("pids")
        .map(|values| values.copied().collect())
        .unwrap_or_default();

    Ok(Options {
        bpf_filter: matches.get_one::<String>("bpf").cloned().unwrap_or_default(),
        interval: *matches.get_one::<u64>("interval").unwrap_or(&1),
        view_mode: ViewMode::try_from(*matches.get_one::<i64>("mode").unwrap_or(&0))?,
        devices_prefix,
        pids,
        unit: matches
            .get_one::<String>("unit")
            .map(|unit| unit.parse())
            .transpose()?
            .unwrap_or(defaults.unit),
        disable_dns_resolve: matches.get_flag("no-dns-resolve"),
        all_devices: matches.get_flag("all-devices"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgMatches {
        build_cli().try_get_matches_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let opts = options_from_matches(&parse(&["netpeek"])).unwrap();
        assert_eq!(opts.bpf_filter, "tcp or udp");
        assert_eq!(opts.interval, 1);
        assert_eq!(opts.view_mode, ViewMode::TableBytes);
        assert_eq!(opts.unit, Unit::KB);
        assert_eq!(opts.devices_prefix, vec!["en", "lo", "eth", "em", "bond"]);
        assert!(opts.pids.is_empty());
        assert!(!opts.all_devices);
        assert!(!opts.disable_dns_resolve);
    }

    #[test]
    fn test_repeatable_flags() {
        let opts = options_from_matches(&parse(&[
            "netpeek", "-d", "lo", "-d", "eth", "-p", "1024", "-p", "2048",
        ]))
        .unwrap();
        assert_eq!(opts.devices_prefix, vec!["lo", "eth"]);
        assert_eq!(opts.pids, vec![1024, 2048]);
    }

    #[test]
    fn test_mode_and_unit() {
        let opts =
            options_from_matches(&parse(&["netpeek", "-m", "2", "-u", "MB"])).unwrap();
        assert_eq!(opts.view_mode, ViewMode::PlotProcesses);
        assert_eq!(opts.unit, Unit::MB);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(options_from_matches(&parse(&["netpeek", "-m", "7"])).is_err());
    }

    #[test]
    fn test_invalid_unit_rejected() {
        assert!(options_from_matches(&parse(&["netpeek", "-u", "TB"])).is_err());
    }
}
