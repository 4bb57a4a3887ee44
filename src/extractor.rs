//! Recover the identity of the probe that caused a reply.
//!
//! Two kinds of replies are recognized:
//! - direct replies (ICMP Echo Reply, TCP segment from the destination), where
//!   the probe fields are mirrored in the reply;
//! - ICMP Time Exceeded and Destination Unreachable messages, which quote the
//!   beginning of the probe.
//!
//! A direct TCP reply does not return the probe sequence number as is, so it
//! only yields a [`Segment`], resolved against the outstanding queries by the
//! matcher.
use std::net::IpAddr;

use pnet::packet::icmp::{IcmpType, IcmpTypes};
use pnet::packet::icmpv6::{Icmpv6Type, Icmpv6Types};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::util;

use crate::checksum::{flowid_from_checksum, flowid_from_sequence};
use crate::models::{Identity, ProbeKind, SegmentEcho, SegmentKey, L3, L4, TCP_ACK, TCP_RST};
use crate::packet::Packet;

/// How the probe identity was recovered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// The reply comes from the probe destination.
    Direct,
    /// The reply quotes the probe.
    Quoted,
}

/// A reply that may answer an outstanding query.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// The identity of the probe, in the probe direction.
    pub identity: Identity,
    /// The host that sent the reply.
    pub responder: IpAddr,
    pub origin: Origin,
}

/// A direct TCP reply from the destination of a TCP-style probe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub key: SegmentKey,
    pub responder: IpAddr,
}

/// Extract the probe identity from a reply.
///
/// Returns `None` if the packet is not a reply to one of our probe kinds,
/// if it is too damaged to be matched, or if it is a direct TCP reply (see
/// [`extract_segment`]).
pub fn extract(packet: &Packet) -> Option<Candidate> {
    match packet.l4_protocol() {
        L4::ICMP => extract_icmp(packet),
        L4::ICMPv6 => extract_icmpv6(packet),
        L4::TCP => None,
    }
}

/// Extract the key of a direct TCP reply.
///
/// TCP replies are only captured over IPv6. A segment with ACK refers to the
/// probe through its acknowledgment number, a bare RST through its sequence
/// number. Any other segment does not answer a probe.
pub fn extract_segment(packet: &Packet) -> Option<Segment> {
    if packet.l4_protocol() != L4::TCP || packet.l3_protocol() != L3::IPv6 {
        return None;
    }
    let flags = packet.tcp_flags()?;
    let echo = if flags & TCP_ACK != 0 {
        SegmentEcho::Acknowledgement(packet.tcp_acknowledgement()?)
    } else if flags & TCP_RST != 0 {
        SegmentEcho::Reset(packet.tcp_sequence()?)
    } else {
        return None;
    };
    let (src_port, dst_port) = packet.tcp_ports()?;
    Some(Segment {
        key: SegmentKey {
            src_addr: packet.dst_addr(),
            dst_addr: packet.src_addr(),
            ports: (dst_port, src_port),
            echo,
        },
        responder: packet.src_addr(),
    })
}

fn extract_icmp(packet: &Packet) -> Option<Candidate> {
    match IcmpType(packet.icmp_type()?) {
        IcmpTypes::EchoReply => {
            let checksum = request_checksum_v4(packet.l4());
            direct(packet, ProbeKind::Icmp4, flowid_from_checksum(checksum)?)
        }
        IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable => {
            let inner = Packet::quoted(packet.payload(), L3::IPv4).ok()?;
            if inner.l4_protocol() != L4::ICMP
                || IcmpType(inner.icmp_type()?) != IcmpTypes::EchoRequest
            {
                return None;
            }
            let flowid = flowid_from_checksum(inner.icmp_checksum()?)?;
            quoted(packet, &inner, ProbeKind::Icmp4, flowid, None)
        }
        _ => None,
    }
}

fn extract_icmpv6(packet: &Packet) -> Option<Candidate> {
    match Icmpv6Type(packet.icmp_type()?) {
        Icmpv6Types::EchoReply => {
            // The pseudo-header sum does not depend on the direction.
            let checksum = request_checksum_v6(packet);
            direct(packet, ProbeKind::Icmp6, flowid_from_checksum(checksum)?)
        }
        Icmpv6Types::TimeExceeded | Icmpv6Types::DestinationUnreachable => {
            let inner = Packet::quoted(packet.payload(), L3::IPv6).ok()?;
            match inner.l4_protocol() {
                L4::ICMPv6 => {
                    if Icmpv6Type(inner.icmp_type()?) != Icmpv6Types::EchoRequest {
                        return None;
                    }
                    let flowid = flowid_from_checksum(inner.icmp_checksum()?)?;
                    quoted(packet, &inner, ProbeKind::Icmp6, flowid, None)
                }
                L4::TCP => {
                    let flowid = flowid_from_sequence(inner.tcp_sequence()?)?;
                    let ports = inner.tcp_ports()?;
                    quoted(packet, &inner, ProbeKind::Tcp6, flowid, Some(ports))
                }
                L4::ICMP => None,
            }
        }
        _ => None,
    }
}

fn direct(packet: &Packet, kind: ProbeKind, flowid: u8) -> Option<Candidate> {
    Some(Candidate {
        identity: Identity {
            src_addr: packet.dst_addr(),
            dst_addr: packet.src_addr(),
            kind,
            flowid,
            ports: None,
        },
        responder: packet.src_addr(),
        origin: Origin::Direct,
    })
}

fn quoted(
    packet: &Packet,
    inner: &Packet,
    kind: ProbeKind,
    flowid: u8,
    ports: Option<(u16, u16)>,
) -> Option<Candidate> {
    Some(Candidate {
        identity: Identity {
            src_addr: inner.src_addr(),
            dst_addr: inner.dst_addr(),
            kind,
            flowid,
            ports,
        },
        responder: packet.src_addr(),
        origin: Origin::Quoted,
    })
}

/// The checksum of the Echo Request that an Echo Reply answers.
fn request_checksum_v4(reply: &[u8]) -> u16 {
    let mut request = reply.to_vec();
    request[0] = IcmpTypes::EchoRequest.0;
    util::checksum(&request, 1)
}

fn request_checksum_v6(packet: &Packet) -> u16 {
    let mut request = packet.l4().to_vec();
    request[0] = Icmpv6Types::EchoRequest.0;
    match (packet.src_addr(), packet.dst_addr()) {
        (IpAddr::V6(src_addr), IpAddr::V6(dst_addr)) => util::ipv6_checksum(
            &request,
            1,
            &[],
            &dst_addr,
            &src_addr,
            IpNextHeaderProtocols::Icmpv6,
        ),
        _ => unreachable!("ICMPv6 is only parsed over IPv6"),
    }
}
