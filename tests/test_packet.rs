use std::net::IpAddr;
use std::time::Duration;

use hopconfirm::encoder::encode;
use hopconfirm::models::{Query, TcpFields, L2, L3, L4};
use hopconfirm::packet::Packet;
use hopconfirm::sender::Link;
use pnet::util::MacAddr;

mod common;
use common::*;

fn ethernet() -> Link {
    Link {
        l2_protocol: L2::Ethernet,
        src_mac: MacAddr::new(0x02, 0, 0, 0, 0, 1),
        dst_mac_v4: MacAddr::new(0x02, 0, 0, 0, 0, 2),
        dst_mac_v6: MacAddr::new(0x02, 0, 0, 0, 0, 3),
    }
}

fn icmp4_probe() -> Vec<u8> {
    let query = Query::icmp4(PROBER_V4, TARGET_V4, 5, 0, 0, 3, 7).unwrap();
    encode(&query, &Link::raw())
}

#[test]
fn test_parse_too_short() {
    // Shorter than the minimum IPv4 header.
    let buffer = [0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x40, 0x01];
    assert!(Packet::new(&buffer, 0, L3::IPv4).is_err());
    assert!(Packet::from_frame(&buffer, L2::None, Duration::ZERO).is_err());
    assert!(Packet::from_frame(&[], L2::None, Duration::ZERO).is_err());
    assert!(Packet::from_frame(&buffer[..3], L2::Ethernet, Duration::ZERO).is_err());
}

#[test]
fn test_parse_version_mismatch() {
    let probe = icmp4_probe();
    assert!(Packet::new(&probe, 0, L3::IPv6).is_err());
    let mut probe = probe;
    probe[0] = 0x65;
    assert!(Packet::new(&probe, 0, L3::IPv4).is_err());
}

#[test]
fn test_parse_icmp4_probe() {
    let probe = icmp4_probe();
    let packet = Packet::from_frame(&probe, L2::None, Duration::from_secs(10)).unwrap();
    assert_eq!(packet.timestamp(), Duration::from_secs(10));
    assert_eq!(packet.l3_protocol(), L3::IPv4);
    assert_eq!(packet.l4_protocol(), L4::ICMP);
    assert_eq!(packet.src_addr(), IpAddr::V4(PROBER_V4));
    assert_eq!(packet.dst_addr(), IpAddr::V4(TARGET_V4));
    assert_eq!(packet.ttl(), 5);
    assert_eq!(packet.ipv4().unwrap().get_identification(), 7);
    assert_eq!(packet.icmp_type(), Some(8));
    assert_eq!(packet.icmp_checksum(), Some(3));
    assert_eq!(packet.icmp_identifier(), Some(0));
    assert_eq!(packet.l4().len(), 8);
    assert!(packet.payload().is_empty());
    assert!(packet.tcp_ports().is_none());
}

#[test]
fn test_parse_tcp_over_ipv4_is_rejected() {
    let mut probe = icmp4_probe();
    probe[9] = 6;
    let error = Packet::new(&probe, 0, L3::IPv4).unwrap_err();
    assert!(error.to_string().contains("TCP"));
}

#[test]
fn test_parse_unsupported_protocol() {
    let mut probe = icmp4_probe();
    // UDP
    probe[9] = 17;
    assert!(Packet::new(&probe, 0, L3::IPv4).is_err());
}

#[test]
fn test_parse_ethernet_trailer() {
    let query = Query::icmp4(PROBER_V4, TARGET_V4, 5, 0, 0, 3, 7)
        .unwrap()
        .with_padding(4)
        .unwrap();
    let mut frame = encode(&query, &ethernet());
    assert_eq!(frame.len(), 14 + 20 + 8 + 4);
    // Ethernet frames are padded to 60 bytes.
    frame.resize(60, 0xAA);

    let packet = Packet::from_frame(&frame, L2::Ethernet, Duration::ZERO).unwrap();
    assert_eq!(packet.l3().len(), 32);
    assert_eq!(packet.payload(), &[0, 0, 0, 0]);
    assert_eq!(packet.buffer().len(), 60);
}

#[test]
fn test_parse_declared_length_exceeds_capture() {
    let query = Query::icmp4(PROBER_V4, TARGET_V4, 5, 0, 0, 3, 7)
        .unwrap()
        .with_padding(32)
        .unwrap();
    let probe = encode(&query, &Link::raw());
    assert!(Packet::new(&probe[..40], 0, L3::IPv4).is_err());
    // Quoted datagrams are allowed to be truncated.
    let quoted = Packet::quoted(&probe[..28], L3::IPv4).unwrap();
    assert_eq!(quoted.icmp_checksum(), Some(3));
    assert!(Packet::quoted(&probe[..24], L3::IPv4).is_err());
}

#[test]
fn test_parse_quoted_truncated_tcp() {
    let tcp = TcpFields {
        src_port: 33434,
        dst_port: 80,
        ack_number: 1000,
        ..Default::default()
    };
    let query = Query::tcp6(PROBER_V6, TARGET_V6, 5, 0, 0, 9, tcp).unwrap();
    let probe = encode(&query, &Link::raw());
    let quoted = Packet::quoted(&probe[..48], L3::IPv6).unwrap();
    assert_eq!(quoted.l4_protocol(), L4::TCP);
    assert_eq!(quoted.tcp_ports(), Some((33434, 80)));
    assert_eq!(quoted.tcp_sequence(), Some(9));
    assert!(quoted.tcp_acknowledgement().is_none());
    assert!(quoted.tcp().is_none());
}

#[test]
fn test_parse_ipv6_time_exceeded() {
    let query = Query::icmp6(PROBER_V6, TARGET_V6, 5, 0, 0, 1234, 3).unwrap();
    let probe = encode(&query, &Link::raw());
    let reply = time_exceeded_v6(ROUTER_V6, &probe);
    let packet = Packet::from_frame(&reply, L2::None, Duration::ZERO).unwrap();
    assert_eq!(packet.l3_protocol(), L3::IPv6);
    assert_eq!(packet.l4_protocol(), L4::ICMPv6);
    assert_eq!(packet.icmp_type(), Some(3));
    assert_eq!(packet.src_addr(), IpAddr::V6(ROUTER_V6));
    assert_eq!(packet.payload(), probe.as_slice());
}

#[test]
fn test_clone_is_independent() {
    let probe = icmp4_probe();
    let packet = Packet::from_frame(&probe, L2::None, Duration::from_millis(5)).unwrap();
    let clone = packet.clone();
    drop(packet);
    assert_eq!(clone.l3(), probe.as_slice());
    assert_eq!(clone.timestamp(), Duration::from_millis(5));
    assert_eq!(clone.icmp_checksum(), Some(3));
}

#[test]
fn test_describe() {
    let query = Query::icmp4(PROBER_V4, TARGET_V4, 5, 0, 4242, 3, 0)
        .unwrap()
        .with_padding(2)
        .unwrap();
    let probe = encode(&query, &Link::raw());
    let packet = Packet::from_frame(&probe, L2::None, Duration::ZERO).unwrap();
    let text = packet.to_string();
    assert!(text.contains("IP ttl 5 proto 1"));
    assert!(text.contains("IP src 192.0.2.1"));
    assert!(text.contains("IP dst 198.51.100.1"));
    assert!(text.contains("ICMP type 8 code 0 chksum 0x3"));
    assert!(text.contains("ICMP id 4242 seq"));
    assert!(text.ends_with("payload 2 bytes 0000"));

    let reply = time_exceeded_v4(ROUTER_V4, &probe);
    let packet = Packet::from_frame(&reply, L2::None, Duration::ZERO).unwrap();
    let text = packet.to_string();
    assert!(text.contains("ICMP type 11 code 0"));
    assert!(!text.contains("ICMP id"));
}
