//! Serialize queries into probe frames.
use std::net::IpAddr;

use crate::builder::{
    build_ethernet, build_icmp, build_icmpv6, build_ipv4, build_ipv6, build_loopback, build_tcp,
    Frame,
};
use crate::checksum::{flowid_checksum, flowid_sequence};
use crate::models::{Flow, Query, L2};
use crate::sender::Link;

/// Build the frame to transmit for `query` on `link`.
///
/// The encoding only depends on the query identity fields, so that every
/// attempt of a query sends the same bytes.
pub fn encode(query: &Query, link: &Link) -> Vec<u8> {
    let l3_protocol = query.l3_protocol();
    let l4_protocol = query.kind().l4_protocol();
    let payload_size = query.padding();

    let mut buffer = vec![
        0u8;
        Frame::buffer_size(link.l2_protocol, l3_protocol, l4_protocol, payload_size)
    ];
    let mut frame = Frame::new(
        &mut buffer,
        link.l2_protocol,
        l3_protocol,
        l4_protocol,
        payload_size,
    );

    match link.l2_protocol {
        L2::BSDLoopback => build_loopback(&mut frame),
        L2::Ethernet => match query.dst_addr() {
            IpAddr::V4(_) => build_ethernet(&mut frame, link.src_mac, link.dst_mac_v4),
            IpAddr::V6(_) => build_ethernet(&mut frame, link.src_mac, link.dst_mac_v6),
        },
        L2::None => {}
    }

    match (query.src_addr(), query.dst_addr(), query.flow()) {
        (IpAddr::V4(src_addr), IpAddr::V4(dst_addr), Flow::Icmp4 { icmpid, .. }) => {
            build_ipv4(
                &mut frame,
                src_addr,
                dst_addr,
                query.ttl(),
                query.ip_identification(),
            );
            build_icmp(&mut frame, *icmpid, flowid_checksum(query.flowid()));
        }
        (
            IpAddr::V6(src_addr),
            IpAddr::V6(dst_addr),
            Flow::Icmp6 {
                traffic_class,
                flow_label,
                icmpid,
            },
        ) => {
            build_ipv6(
                &mut frame,
                src_addr,
                dst_addr,
                query.ttl(),
                *traffic_class,
                *flow_label,
            );
            build_icmpv6(&mut frame, *icmpid, flowid_checksum(query.flowid()));
        }
        (
            IpAddr::V6(src_addr),
            IpAddr::V6(dst_addr),
            Flow::Tcp6 {
                traffic_class,
                flow_label,
                tcp,
            },
        ) => {
            build_ipv6(
                &mut frame,
                src_addr,
                dst_addr,
                query.ttl(),
                *traffic_class,
                *flow_label,
            );
            build_tcp(&mut frame, tcp, flowid_sequence(query.flowid()));
        }
        _ => unreachable!("query constructors keep addresses and flow in the same family"),
    }

    frame.l2().to_vec()
}
