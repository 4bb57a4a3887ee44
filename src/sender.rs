//! Send probes on the network.
use std::net::IpAddr;

use anyhow::{bail, Context, Result};
use log::{info, trace, warn};
use pcap::{Active, Capture, Linktype};
use pnet::util::MacAddr;

use crate::models::L2;
use crate::utilities::get_mac_address;

/// Link-layer framing of the probes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Link {
    pub l2_protocol: L2,
    pub src_mac: MacAddr,
    /// Next-hop MAC address for IPv4 probes.
    pub dst_mac_v4: MacAddr,
    /// Next-hop MAC address for IPv6 probes.
    pub dst_mac_v6: MacAddr,
}

impl Link {
    /// A link without a layer 2 header (e.g. VPN), also used for raw IP tests.
    pub fn raw() -> Self {
        Link {
            l2_protocol: L2::None,
            src_mac: MacAddr::zero(),
            dst_mac_v4: MacAddr::zero(),
            dst_mac_v6: MacAddr::zero(),
        }
    }
}

/// The framing of a pcap handle with the given link type.
pub fn l2_protocol_of(linktype: Linktype) -> Result<L2> {
    match linktype {
        Linktype::NULL => Ok(L2::BSDLoopback),
        Linktype::ETHERNET => Ok(L2::Ethernet),
        // DLT_RAW
        Linktype(12) => Ok(L2::None),
        other => bail!(
            "Unsupported link type: {} ({})",
            other.get_name().unwrap_or_default(),
            other.0
        ),
    }
}

/// An injector of fully-formed link-layer frames.
#[cfg_attr(test, mockall::automock)]
pub trait Transmit {
    /// The framing expected by [`Transmit::send`].
    fn link(&self) -> Link;

    /// Send a frame towards `dst_addr`.
    fn send(&mut self, frame: &[u8], dst_addr: IpAddr) -> Result<()>;
}

/// Sends frames through a pcap handle.
pub struct Sender {
    dry_run: bool,
    handle: Capture<Active>,
    link: Link,
}

impl Sender {
    pub fn new(
        interface: &str,
        gateway_mac_v4: Option<MacAddr>,
        gateway_mac_v6: Option<MacAddr>,
        dry_run: bool,
    ) -> Result<Self> {
        let handle = pcap::Capture::from_device(interface)?
            .buffer_size(0)
            .snaplen(0)
            .open()?;

        let l2_protocol = l2_protocol_of(handle.get_datalink())?;

        let link = if l2_protocol == L2::Ethernet {
            if gateway_mac_v4.is_none() || gateway_mac_v6.is_none() {
                warn!(
                    "missing gateway MAC address (v4={:?} v6={:?}), using {}",
                    gateway_mac_v4,
                    gateway_mac_v6,
                    MacAddr::zero()
                );
            }
            Link {
                l2_protocol,
                src_mac: get_mac_address(interface)
                    .context("Ethernet device has no MAC address")?,
                dst_mac_v4: gateway_mac_v4.unwrap_or(MacAddr::zero()),
                dst_mac_v6: gateway_mac_v6.unwrap_or(MacAddr::zero()),
            }
        } else {
            Link {
                l2_protocol,
                ..Link::raw()
            }
        };

        info!(
            "interface={} l2_protocol={:?} src_mac={} dst_mac_v4={} dst_mac_v6={}",
            interface, link.l2_protocol, link.src_mac, link.dst_mac_v4, link.dst_mac_v6
        );

        Ok(Sender {
            dry_run,
            handle,
            link,
        })
    }
}

impl Transmit for Sender {
    fn link(&self) -> Link {
        self.link
    }

    fn send(&mut self, frame: &[u8], dst_addr: IpAddr) -> Result<()> {
        trace!("send dst_addr={} size={}", dst_addr, frame.len());
        if !self.dry_run {
            self.handle
                .sendpacket(frame)
                .with_context(|| format!("Cannot send probe to {}", dst_addr))?;
        }
        Ok(())
    }
}
