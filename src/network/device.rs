// network/device.rs - Capture device enumeration and prefix selection

use anyhow::{Context, Result};
use pcap::Device;

/// List every capture-capable device known to libpcap.
pub fn list_all_devices() -> Result<Vec<Device>> {
    Device::list().context("failed to list network devices")
}

/// Select the devices to capture on.
///
/// With `all_devices` set every enumerated interface is returned; otherwise
/// only interfaces whose name starts with one of `prefixes` are kept.
pub fn list_selected_devices(prefixes: &[String], all_devices: bool) -> Result<Vec<Device>> {
    Ok(filter_devices(list_all_devices()?, prefixes, all_devices))
}

/// The `any` pseudo-interface is always excluded: it has no bound addresses
/// and would break direction classification.
fn filter_devices(devices: Vec<Device>, prefixes: &[String], all_devices: bool) -> Vec<Device> {
    devices
        .into_iter()
        .filter(|d| d.name != "any")
        .filter(|d| all_devices || prefixes.iter().any(|p| d.name.starts_with(p.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(names: &[&str]) -> Vec<Device> {
        names.iter().map(|name| Device::from(*name)).collect()
    }

    fn prefixes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn names(devices: &[Device]) -> Vec<&str> {
        devices.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_prefix_filter() {
        let selected = filter_devices(
            devices(&["eth0", "lo", "docker0", "wlan0"]),
            &prefixes(&["en", "lo", "eth", "em", "bond"]),
            false,
        );
        assert_eq!(names(&selected), vec!["eth0", "lo"]);
    }

    #[test]
    fn test_all_devices_bypasses_prefixes() {
        let selected = filter_devices(devices(&["docker0", "wlan0"]), &prefixes(&["eth"]), true);
        assert_eq!(names(&selected), vec!["docker0", "wlan0"]);
    }

    #[test]
    fn test_any_pseudo_device_always_excluded() {
        let selected = filter_devices(devices(&["any", "eth0"]), &prefixes(&["eth"]), true);
        assert_eq!(names(&selected), vec!["eth0"]);
    }
}
