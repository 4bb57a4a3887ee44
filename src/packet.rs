//! Owned, parsed view over a captured or crafted IP packet.
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::{IcmpPacket, IcmpType, IcmpTypes};
use pnet::packet::icmpv6::{Icmpv6Packet, Icmpv6Type, Icmpv6Types};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;

use crate::models::{L2, L3, L4};

/// Number of transport bytes an ICMP error is guaranteed to quote (RFC 792).
pub const QUOTED_TRANSPORT_SIZE: usize = 8;

/// Size of the TCP header without options.
const TCP_HEADER_SIZE: usize = 20;

/// Size of the ICMP header for the given message type.
///
/// Unknown types fall back to the Echo header size.
pub fn icmp_header_size(icmp_type: IcmpType) -> usize {
    match icmp_type {
        IcmpTypes::Timestamp | IcmpTypes::TimestampReply => 20,
        IcmpTypes::AddressMaskRequest | IcmpTypes::AddressMaskReply => 12,
        // Echo, Destination Unreachable, Redirect, Time Exceeded, and the rest.
        _ => 8,
    }
}

/// Size of the ICMPv6 header for the given message type.
///
/// Unknown types fall back to the Echo header size.
pub fn icmpv6_header_size(icmpv6_type: Icmpv6Type) -> usize {
    match icmpv6_type {
        Icmpv6Types::RouterAdvert => 16,
        Icmpv6Types::NeighborSolicit | Icmpv6Types::NeighborAdvert => 24,
        Icmpv6Types::Redirect => 40,
        _ => 8,
    }
}

/// A Packet owns a copy of the captured bytes and the offsets of its IP header,
/// its transport header and its payload.
///
/// Views are bounded by the length declared in the IP header, so that
/// link-layer trailers are never seen as payload.
/// Cloning a packet copies the buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    buffer: Vec<u8>,
    timestamp: Duration,
    l3_protocol: L3,
    l4_protocol: L4,
    l3_start: usize,
    l4_start: usize,
    payload_start: usize,
    end: usize,
}

impl Packet {
    /// Parse the IP packet starting `l3_start` bytes into `buffer`.
    pub fn new(buffer: &[u8], l3_start: usize, l3_protocol: L3) -> Result<Self> {
        Self::parse(buffer, l3_start, l3_protocol, false)
    }

    /// Parse a link-layer frame, guessing the IP version from the frame.
    pub fn from_frame(data: &[u8], l2_protocol: L2, timestamp: Duration) -> Result<Self> {
        let l3_start = l2_protocol.header_size();
        let l3_protocol = match l2_protocol {
            L2::Ethernet => {
                let ethernet = EthernetPacket::new(data).context("Cannot build Ethernet header")?;
                match ethernet.get_ethertype() {
                    EtherTypes::Ipv4 => L3::IPv4,
                    EtherTypes::Ipv6 => L3::IPv6,
                    other => bail!("Unsupported L3 protocol: {}", other),
                }
            }
            L2::BSDLoopback | L2::None => {
                let version = data
                    .get(l3_start)
                    .map(|x| x >> 4)
                    .context("Empty packet")?;
                match version {
                    4 => L3::IPv4,
                    6 => L3::IPv6,
                    other => bail!("Unsupported IP version: {}", other),
                }
            }
        };
        Ok(Self::new(data, l3_start, l3_protocol)?.with_timestamp(timestamp))
    }

    /// Parse the original datagram quoted in an ICMP error message.
    ///
    /// Routers quote at least the IP header and the first 8 bytes of the
    /// transport header, so the declared lengths may exceed the data.
    pub fn quoted(buffer: &[u8], l3_protocol: L3) -> Result<Self> {
        Self::parse(buffer, 0, l3_protocol, true)
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn parse(buffer: &[u8], l3_start: usize, l3_protocol: L3, quoted: bool) -> Result<Self> {
        let data = buffer
            .get(l3_start..)
            .context("IP header offset is past the end of the buffer")?;

        let (header_size, declared_size, l4_protocol) = match l3_protocol {
            L3::IPv4 => {
                let ip = Ipv4Packet::new(data).context("Buffer too short for IPv4 header")?;
                if ip.get_version() != 4 {
                    bail!("Invalid IPv4 version: {}", ip.get_version());
                }
                let header_size = ip.get_header_length() as usize * 4;
                if header_size < L3::IPv4.header_size() {
                    bail!("Invalid IPv4 header length: {}", header_size);
                }
                let l4_protocol = match ip.get_next_level_protocol() {
                    IpNextHeaderProtocols::Icmp => L4::ICMP,
                    // We only capture ICMP over IPv4, TCP can only show up in a quote.
                    IpNextHeaderProtocols::Tcp if quoted => L4::TCP,
                    IpNextHeaderProtocols::Tcp => bail!("Unexpected TCP over IPv4"),
                    other => bail!("Unsupported L4 protocol: {}", other),
                };
                (header_size, ip.get_total_length() as usize, l4_protocol)
            }
            L3::IPv6 => {
                let ip = Ipv6Packet::new(data).context("Buffer too short for IPv6 header")?;
                if ip.get_version() != 6 {
                    bail!("Invalid IPv6 version: {}", ip.get_version());
                }
                let header_size = L3::IPv6.header_size();
                // Extension headers are not supported.
                let l4_protocol = match ip.get_next_header() {
                    IpNextHeaderProtocols::Icmpv6 => L4::ICMPv6,
                    IpNextHeaderProtocols::Tcp => L4::TCP,
                    other => bail!("Unsupported L4 protocol: {}", other),
                };
                (
                    header_size,
                    header_size + ip.get_payload_length() as usize,
                    l4_protocol,
                )
            }
        };

        if declared_size < header_size {
            bail!(
                "Declared IP length {} is shorter than the header ({})",
                declared_size,
                header_size
            );
        }
        let size = if declared_size <= data.len() {
            declared_size
        } else if quoted {
            data.len()
        } else {
            bail!(
                "Declared IP length {} exceeds the {} bytes available",
                declared_size,
                data.len()
            );
        };
        if size < header_size {
            bail!("Buffer too short for {:?} header", l3_protocol);
        }

        let l4_start = l3_start + header_size;
        let end = l3_start + size;
        let l4 = &buffer[l4_start..end];

        let l4_header_size = match l4_protocol {
            L4::ICMP => {
                let icmp = IcmpPacket::new(l4).context("Buffer too short for ICMP header")?;
                icmp_header_size(icmp.get_icmp_type())
            }
            L4::ICMPv6 => {
                let icmp = Icmpv6Packet::new(l4).context("Buffer too short for ICMPv6 header")?;
                icmpv6_header_size(icmp.get_icmpv6_type())
            }
            L4::TCP => match l4.get(12) {
                Some(offset) => ((offset >> 4) as usize * 4).max(TCP_HEADER_SIZE),
                None => TCP_HEADER_SIZE,
            },
        };

        let payload_start = if l4_start + l4_header_size <= end {
            l4_start + l4_header_size
        } else if quoted && l4.len() >= QUOTED_TRANSPORT_SIZE {
            end
        } else {
            bail!(
                "Buffer too short for {:?} header ({} < {})",
                l4_protocol,
                l4.len(),
                l4_header_size
            );
        };

        Ok(Packet {
            buffer: buffer.to_vec(),
            timestamp: Duration::ZERO,
            l3_protocol,
            l4_protocol,
            l3_start,
            l4_start,
            payload_start,
            end,
        })
    }

    /// The capture timestamp since the UNIX epoch, zero for synthetic packets.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// The layer 3 protocol.
    pub fn l3_protocol(&self) -> L3 {
        self.l3_protocol
    }

    /// The layer 4 protocol.
    pub fn l4_protocol(&self) -> L4 {
        self.l4_protocol
    }

    /// The whole buffer, including the link-layer header and trailer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// A slice from the start of the IP header to the end of the IP packet.
    pub fn l3(&self) -> &[u8] {
        &self.buffer[self.l3_start..self.end]
    }

    /// A slice from the start of the transport header to the end of the IP packet.
    pub fn l4(&self) -> &[u8] {
        &self.buffer[self.l4_start..self.end]
    }

    /// A slice from the end of the transport header to the end of the IP packet.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.payload_start..self.end]
    }

    pub fn ipv4(&self) -> Option<Ipv4Packet<'_>> {
        match self.l3_protocol {
            L3::IPv4 => Ipv4Packet::new(self.l3()),
            L3::IPv6 => None,
        }
    }

    pub fn ipv6(&self) -> Option<Ipv6Packet<'_>> {
        match self.l3_protocol {
            L3::IPv4 => None,
            L3::IPv6 => Ipv6Packet::new(self.l3()),
        }
    }

    pub fn icmp(&self) -> Option<IcmpPacket<'_>> {
        match self.l4_protocol {
            L4::ICMP => IcmpPacket::new(self.l4()),
            _ => None,
        }
    }

    pub fn icmpv6(&self) -> Option<Icmpv6Packet<'_>> {
        match self.l4_protocol {
            L4::ICMPv6 => Icmpv6Packet::new(self.l4()),
            _ => None,
        }
    }

    /// The TCP header, `None` if it was truncated.
    pub fn tcp(&self) -> Option<TcpPacket<'_>> {
        match self.l4_protocol {
            L4::TCP => TcpPacket::new(self.l4()),
            _ => None,
        }
    }

    pub fn src_addr(&self) -> IpAddr {
        match (self.ipv4(), self.ipv6()) {
            (Some(ip), _) => IpAddr::V4(ip.get_source()),
            (_, Some(ip)) => IpAddr::V6(ip.get_source()),
            _ => unreachable!("the IP header was validated when parsing"),
        }
    }

    pub fn dst_addr(&self) -> IpAddr {
        match (self.ipv4(), self.ipv6()) {
            (Some(ip), _) => IpAddr::V4(ip.get_destination()),
            (_, Some(ip)) => IpAddr::V6(ip.get_destination()),
            _ => unreachable!("the IP header was validated when parsing"),
        }
    }

    /// The IPv4 TTL or the IPv6 hop limit.
    pub fn ttl(&self) -> u8 {
        match self.l3_protocol {
            L3::IPv4 => self.l3()[8],
            L3::IPv6 => self.l3()[7],
        }
    }

    fn l4_u8(&self, offset: usize) -> Option<u8> {
        self.l4().get(offset).copied()
    }

    fn l4_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.l4().get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn l4_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.l4().get(offset..offset + 4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn is_icmp(&self) -> bool {
        matches!(self.l4_protocol, L4::ICMP | L4::ICMPv6)
    }

    /// The ICMP or ICMPv6 message type.
    pub fn icmp_type(&self) -> Option<u8> {
        self.is_icmp().then(|| self.l4_u8(0)).flatten()
    }

    pub fn icmp_code(&self) -> Option<u8> {
        self.is_icmp().then(|| self.l4_u8(1)).flatten()
    }

    pub fn icmp_checksum(&self) -> Option<u16> {
        self.is_icmp().then(|| self.l4_u16(2)).flatten()
    }

    /// The Echo identifier; only meaningful for Echo messages.
    pub fn icmp_identifier(&self) -> Option<u16> {
        self.is_icmp().then(|| self.l4_u16(4)).flatten()
    }

    /// The Echo sequence number; only meaningful for Echo messages.
    pub fn icmp_sequence(&self) -> Option<u16> {
        self.is_icmp().then(|| self.l4_u16(6)).flatten()
    }

    /// The TCP source and destination ports.
    pub fn tcp_ports(&self) -> Option<(u16, u16)> {
        if self.l4_protocol != L4::TCP {
            return None;
        }
        Some((self.l4_u16(0)?, self.l4_u16(2)?))
    }

    pub fn tcp_sequence(&self) -> Option<u32> {
        (self.l4_protocol == L4::TCP)
            .then(|| self.l4_u32(4))
            .flatten()
    }

    /// The TCP acknowledgment number, `None` if the header was truncated.
    pub fn tcp_acknowledgement(&self) -> Option<u32> {
        (self.l4_protocol == L4::TCP)
            .then(|| self.l4_u32(8))
            .flatten()
    }

    /// The TCP control flags (without NS), `None` if the header was truncated.
    pub fn tcp_flags(&self) -> Option<u8> {
        (self.l4_protocol == L4::TCP)
            .then(|| self.l4_u8(13))
            .flatten()
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(ip) = self.ipv4() {
            writeln!(
                f,
                "IP hdrlen {} tos {:#x} len {}",
                ip.get_header_length() as usize * 4,
                (ip.get_dscp() << 2) | ip.get_ecn(),
                ip.get_total_length()
            )?;
            writeln!(
                f,
                "IP id {} frag {:#x}",
                ip.get_identification(),
                ((ip.get_flags() as u16) << 13) | ip.get_fragment_offset()
            )?;
            writeln!(
                f,
                "IP ttl {} proto {} chksum {:#x}",
                ip.get_ttl(),
                ip.get_next_level_protocol().0,
                ip.get_checksum()
            )?;
            writeln!(f, "IP src {}", ip.get_source())?;
            writeln!(f, "IP dst {}", ip.get_destination())?;
        }
        if let Some(ip) = self.ipv6() {
            writeln!(
                f,
                "IPv6 tc {:#x} flow {:#x} len {}",
                ip.get_traffic_class(),
                ip.get_flow_label(),
                ip.get_payload_length()
            )?;
            writeln!(
                f,
                "IPv6 hlim {} next {}",
                ip.get_hop_limit(),
                ip.get_next_header().0
            )?;
            writeln!(f, "IPv6 src {}", ip.get_source())?;
            writeln!(f, "IPv6 dst {}", ip.get_destination())?;
        }
        match self.l4_protocol {
            L4::ICMP | L4::ICMPv6 => {
                let icmp_type = self.icmp_type().unwrap_or_default();
                write!(
                    f,
                    "ICMP type {} code {} chksum {:#x}",
                    icmp_type,
                    self.icmp_code().unwrap_or_default(),
                    self.icmp_checksum().unwrap_or_default()
                )?;
                let is_echo = match self.l4_protocol {
                    L4::ICMP => matches!(
                        IcmpType(icmp_type),
                        IcmpTypes::EchoRequest | IcmpTypes::EchoReply
                    ),
                    _ => matches!(
                        Icmpv6Type(icmp_type),
                        Icmpv6Types::EchoRequest | Icmpv6Types::EchoReply
                    ),
                };
                if is_echo {
                    write!(
                        f,
                        "\nICMP id {} seq {}",
                        self.icmp_identifier().unwrap_or_default(),
                        self.icmp_sequence().unwrap_or_default()
                    )?;
                }
            }
            L4::TCP => {
                let (src_port, dst_port) = self.tcp_ports().unwrap_or_default();
                write!(
                    f,
                    "TCP sport {} dport {} seq {}",
                    src_port,
                    dst_port,
                    self.tcp_sequence().unwrap_or_default()
                )?;
                if let Some(tcp) = self.tcp() {
                    write!(
                        f,
                        "\nTCP ack {} flags {:#x} win {} urp {}",
                        tcp.get_acknowledgement(),
                        self.tcp_flags().unwrap_or_default(),
                        tcp.get_window(),
                        tcp.get_urgent_ptr()
                    )?;
                }
            }
        }
        let payload = self.payload();
        if !payload.is_empty() {
            let preview = &payload[..payload.len().min(16)];
            write!(f, "\npayload {} bytes {}", payload.len(), hex::encode(preview))?;
        }
        Ok(())
    }
}
