//! Engine configuration.
use std::fmt::{Display, Formatter};
use std::time::Duration;

use pnet::util::MacAddr;

use crate::utilities::get_default_interface;

/// Configuration of [`crate::engine::Confirm::open`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Interface from which to send the probes and capture the replies.
    pub interface: String,
    /// Time to wait for a reply before retransmitting a probe.
    pub timeout: Duration,
    /// Whether to actually send the probes on the network or not.
    pub dry_run: bool,
    /// Destination MAC address of IPv4 probes on Ethernet links.
    pub gateway_mac_v4: Option<MacAddr>,
    /// Destination MAC address of IPv6 probes on Ethernet links.
    pub gateway_mac_v6: Option<MacAddr>,
    /// Size of the capture buffer, in bytes.
    pub capture_buffer_size: i32,
    /// How long the capture blocks before checking whether it should stop.
    pub capture_timeout: Duration,
    /// Period of the statistics log, `None` to disable it.
    pub statistics_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: get_default_interface(),
            timeout: Duration::from_secs(1),
            dry_run: false,
            gateway_mac_v4: None,
            gateway_mac_v6: None,
            capture_buffer_size: 1024 * 1024,
            capture_timeout: Duration::from_millis(100),
            statistics_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "interface={:?}", self.interface)?;
        write!(f, " timeout={:?}", self.timeout)?;
        write!(f, " dry_run={:?}", self.dry_run)?;
        write!(f, " gateway_mac_v4={:?}", self.gateway_mac_v4)?;
        write!(f, " gateway_mac_v6={:?}", self.gateway_mac_v6)?;
        write!(f, " capture_buffer_size={:?}", self.capture_buffer_size)?;
        write!(f, " capture_timeout={:?}", self.capture_timeout)?;
        write!(f, " statistics_interval={:?}", self.statistics_interval)
    }
}
