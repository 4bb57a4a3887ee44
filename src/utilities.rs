//! Utilities.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::Device;
use pnet::datalink::MacAddr;

/// Return the default pcap capture device, if any.
pub fn get_default_interface() -> String {
    Device::lookup()
        .ok()
        .flatten()
        .map(|device| device.name)
        .unwrap_or_default()
}

/// Return the MAC address of the device (if any).
pub fn get_mac_address(interface: &str) -> Option<MacAddr> {
    pnet::datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == interface)
        .and_then(|iface| iface.mac)
}

/// Time elapsed since the UNIX epoch, in the same clock as capture timestamps.
pub fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
