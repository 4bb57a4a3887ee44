use pnet::packet::ethernet::{EtherType, EtherTypes};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Layer 2 protocol.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum L2 {
    /// 4-byte BSD Loopback header (e.g. lo0 on macOS).
    BSDLoopback,
    /// 14-byte Ethernet header.
    Ethernet,
    /// L3 link (e.g. VPN).
    None,
}

impl L2 {
    /// Size of the link-layer header in bytes.
    pub fn header_size(self) -> usize {
        match self {
            L2::BSDLoopback => 4,
            L2::Ethernet => 14,
            L2::None => 0,
        }
    }
}

/// Layer 3 protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum L3 {
    IPv4,
    IPv6,
}

impl L3 {
    /// Size of the fixed IP header in bytes.
    pub fn header_size(self) -> usize {
        match self {
            L3::IPv4 => 20,
            L3::IPv6 => 40,
        }
    }
}

impl From<L3> for EtherType {
    fn from(value: L3) -> Self {
        match value {
            L3::IPv4 => EtherTypes::Ipv4,
            L3::IPv6 => EtherTypes::Ipv6,
        }
    }
}

/// Layer 4 protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum L4 {
    ICMP,
    ICMPv6,
    TCP,
}

impl From<L4> for u8 {
    fn from(value: L4) -> Self {
        let val: IpNextHeaderProtocol = value.into();
        val.0
    }
}

impl From<L4> for IpNextHeaderProtocol {
    fn from(value: L4) -> Self {
        match value {
            L4::ICMP => IpNextHeaderProtocols::Icmp,
            L4::ICMPv6 => IpNextHeaderProtocols::Icmpv6,
            L4::TCP => IpNextHeaderProtocols::Tcp,
        }
    }
}

/// The kind of probe a query sends.
#[derive(
    Copy, Clone, Debug, Display, EnumString, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum ProbeKind {
    /// ICMP Echo Request over IPv4.
    Icmp4,
    /// ICMPv6 Echo Request over IPv6.
    Icmp6,
    /// TCP segment over IPv6.
    Tcp6,
}

impl ProbeKind {
    pub fn l3_protocol(self) -> L3 {
        match self {
            ProbeKind::Icmp4 => L3::IPv4,
            ProbeKind::Icmp6 | ProbeKind::Tcp6 => L3::IPv6,
        }
    }

    pub fn l4_protocol(self) -> L4 {
        match self {
            ProbeKind::Icmp4 => L4::ICMP,
            ProbeKind::Icmp6 => L4::ICMPv6,
            ProbeKind::Tcp6 => L4::TCP,
        }
    }
}
