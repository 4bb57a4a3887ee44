use std::net::{Ipv4Addr, Ipv6Addr};

use pnet::datalink::MacAddr;
use pnet::packet::ethernet::MutableEthernetPacket;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::ipv6::{Ipv6Packet, MutableIpv6Packet};
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::{icmp, icmpv6, Packet as _};
use pnet::util;

use crate::builder::Frame;
use crate::checksum::checksum_compensation;
use crate::models::{TcpFields, L3};

/// BSD address family values written in the loopback header.
const AF_INET: u8 = 2;
/// macOS value; the other BSDs use 24 or 28 but accept it on lo0.
const AF_INET6: u8 = 30;

/// Build the BSD/macOS Loopback header.
///
/// On Linux the loopback interface uses the Ethernet header,
/// but on macOS it uses a different 32-bit header.
pub fn build_loopback(frame: &mut Frame) {
    let family = match frame.l3_protocol() {
        L3::IPv4 => AF_INET,
        L3::IPv6 => AF_INET6,
    };
    let loopback = frame.l2_mut();
    loopback[..4].copy_from_slice(&[family, 0x00, 0x00, 0x00]);
}

/// Build the Ethernet header.
pub fn build_ethernet(frame: &mut Frame, src_addr: MacAddr, dst_addr: MacAddr) {
    let ethertype = frame.l3_protocol();
    let mut ethernet = MutableEthernetPacket::new(frame.l2_mut()).unwrap();
    ethernet.set_source(src_addr);
    ethernet.set_destination(dst_addr);
    ethernet.set_ethertype(ethertype.into());
}

/// Build the IPv4 header.
///
/// The identification field carries either an explicit value or the reverse
/// flow ID; it is never used to identify the probe.
pub fn build_ipv4(frame: &mut Frame, src_addr: Ipv4Addr, dst_addr: Ipv4Addr, ttl: u8, id: u16) {
    let next_level_protocol = frame.l4_protocol();
    let total_length = frame.l3_size();
    let mut ip = MutableIpv4Packet::new(frame.l3_mut()).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_dscp(0);
    ip.set_ecn(0);
    ip.set_total_length(total_length);
    ip.set_identification(id);
    ip.set_flags(0);
    ip.set_fragment_offset(0);
    ip.set_ttl(ttl);
    ip.set_next_level_protocol(next_level_protocol.into());
    ip.set_source(src_addr);
    ip.set_destination(dst_addr);
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
}

/// Build the IPv6 header.
///
/// The traffic class and the flow label are used for per-flow load-balancing,
/// so they are part of the query flow and written as given.
pub fn build_ipv6(
    frame: &mut Frame,
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
    ttl: u8,
    traffic_class: u8,
    flow_label: u32,
) {
    let next_header = frame.l4_protocol();
    let payload_length = frame.l4_size();
    let mut ip = MutableIpv6Packet::new(frame.l3_mut()).unwrap();
    ip.set_version(6);
    ip.set_traffic_class(traffic_class);
    ip.set_flow_label(flow_label);
    ip.set_payload_length(payload_length);
    ip.set_next_header(next_header.into());
    ip.set_hop_limit(ttl);
    ip.set_source(src_addr);
    ip.set_destination(dst_addr);
}

/// Build the ICMP Echo Request header.
///
/// Routers quote the first 8 bytes of the ICMP header in Time Exceeded and
/// Destination Unreachable messages, and echo replies mirror the identifier,
/// the sequence number and the data. We write the flow ID in the checksum
/// field and pick the sequence number so that this checksum is valid; the
/// payload is left zeroed.
pub fn build_icmp(frame: &mut Frame, identifier: u16, target_checksum: u16) {
    let mut echo = icmp::echo_request::MutableEchoRequestPacket::new(frame.l4_mut()).unwrap();
    echo.set_icmp_type(icmp::IcmpTypes::EchoRequest);
    echo.set_icmp_code(icmp::echo_request::IcmpCodes::NoCode);
    echo.set_identifier(identifier);
    echo.set_sequence_number(0);
    echo.set_checksum(target_checksum);
    let original_checksum = util::checksum(echo.packet(), 1);
    echo.set_sequence_number(checksum_compensation(original_checksum, target_checksum));
}

/// Build the ICMPv6 Echo Request header.
///
/// Same encoding as [`build_icmp`], the checksum also covers the IPv6 pseudo-header.
pub fn build_icmpv6(frame: &mut Frame, identifier: u16, target_checksum: u16) {
    {
        let mut echo =
            icmpv6::echo_request::MutableEchoRequestPacket::new(frame.l4_mut()).unwrap();
        echo.set_icmpv6_type(icmpv6::Icmpv6Types::EchoRequest);
        echo.set_icmpv6_code(icmpv6::echo_request::Icmpv6Codes::NoCode);
        echo.set_identifier(identifier);
        echo.set_sequence_number(0);
        echo.set_checksum(target_checksum);
    }
    let original_checksum = transport_checksum(frame, 1);
    let mut echo = icmpv6::echo_request::MutableEchoRequestPacket::new(frame.l4_mut()).unwrap();
    echo.set_sequence_number(checksum_compensation(original_checksum, target_checksum));
}

/// Build the TCP header.
///
/// The sequence number carries the flow ID, the other fields come from the
/// query. Unlike ICMP probes, the checksum is computed normally.
pub fn build_tcp(frame: &mut Frame, fields: &TcpFields, sequence: u32) {
    {
        let mut tcp = MutableTcpPacket::new(frame.l4_mut()).unwrap();
        tcp.set_source(fields.src_port);
        tcp.set_destination(fields.dst_port);
        tcp.set_sequence(sequence);
        tcp.set_acknowledgement(fields.ack_number);
        tcp.set_data_offset(5);
        tcp.set_reserved(0);
        tcp.set_flags(fields.control_flags.into());
        tcp.set_window(fields.window);
        tcp.set_urgent_ptr(fields.urgent_pointer);
        tcp.set_checksum(0);
    }
    let checksum = transport_checksum(frame, 8);
    let mut tcp = MutableTcpPacket::new(frame.l4_mut()).unwrap();
    tcp.set_checksum(checksum);
}

fn transport_checksum(frame: &Frame, skipword: usize) -> u16 {
    let l4 = frame.l4();
    match frame.l3_protocol() {
        L3::IPv4 => {
            let ip = Ipv4Packet::new(frame.l3()).unwrap();
            util::ipv4_checksum(
                l4,
                skipword,
                &[],
                &ip.get_source(),
                &ip.get_destination(),
                frame.l4_protocol().into(),
            )
        }
        L3::IPv6 => {
            let ip = Ipv6Packet::new(frame.l3()).unwrap();
            util::ipv6_checksum(
                l4,
                skipword,
                &[],
                &ip.get_source(),
                &ip.get_destination(),
                frame.l4_protocol().into(),
            )
        }
    }
}
