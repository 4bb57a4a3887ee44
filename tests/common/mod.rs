// Each integration test uses a different subset of these helpers.
#![allow(dead_code)]
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use hopconfirm::scheduler::{Scheduler, TimerHandle, TimerTask};
use hopconfirm::sender::{Link, Transmit};
use pnet::packet::icmp::{self, IcmpCode, IcmpTypes, MutableIcmpPacket};
use pnet::packet::icmpv6::{self, Icmpv6Code, Icmpv6Types, MutableIcmpv6Packet};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::ipv6::{Ipv6Packet, MutableIpv6Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};

pub const PROBER_V4: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
pub const TARGET_V4: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);
pub const ROUTER_V4: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
pub const PROBER_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
pub const TARGET_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0xffff, 0, 0, 0, 0, 1);
pub const ROUTER_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0xaaaa, 0, 0, 0, 0, 1);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A transmitter on a raw IP link that records the frames it sends.
#[derive(Clone, Default)]
pub struct RecordingTransmitter {
    pub frames: Arc<Mutex<Vec<(Vec<u8>, IpAddr)>>>,
    pub fail: Arc<AtomicBool>,
}

impl RecordingTransmitter {
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(frame, _)| frame.clone())
            .collect()
    }

    pub fn last(&self) -> Vec<u8> {
        self.sent().pop().expect("no frame was sent")
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Transmit for RecordingTransmitter {
    fn link(&self) -> Link {
        Link::raw()
    }

    fn send(&mut self, frame: &[u8], dst_addr: IpAddr) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("device unavailable");
        }
        self.frames.lock().unwrap().push((frame.to_vec(), dst_addr));
        Ok(())
    }
}

/// A scheduler whose timers only fire when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    timers: Mutex<BTreeMap<u64, (Duration, TimerTask)>>,
    next_id: Mutex<u64>,
    /// Keep cancelled timers, as if they had already fired.
    ignore_cancel: bool,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ignoring_cancel() -> Arc<Self> {
        Arc::new(Self {
            ignore_cancel: true,
            ..Default::default()
        })
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    /// Delays of the pending timers, oldest first.
    pub fn delays(&self) -> Vec<Duration> {
        self.timers
            .lock()
            .unwrap()
            .values()
            .map(|(delay, _)| *delay)
            .collect()
    }

    /// Run the oldest pending timer, returns false if there was none.
    pub fn fire_next(&self) -> bool {
        let next = self.timers.lock().unwrap().pop_first();
        match next {
            Some((_, (_, task))) => {
                task();
                true
            }
            None => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        self.timers.lock().unwrap().insert(id, (delay, task));
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if !self.ignore_cancel {
            self.timers.lock().unwrap().remove(&handle.0);
        }
    }
}

fn finish_ipv4(
    buffer: &mut [u8],
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    protocol: IpNextHeaderProtocol,
) {
    let total_length = buffer.len() as u16;
    let mut ip = MutableIpv4Packet::new(buffer).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total_length);
    ip.set_ttl(250);
    ip.set_next_level_protocol(protocol);
    ip.set_source(src_addr);
    ip.set_destination(dst_addr);
    ip.set_checksum(0);
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
}

fn finish_ipv6(
    buffer: &mut [u8],
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
    next_header: IpNextHeaderProtocol,
) {
    let payload_length = (buffer.len() - 40) as u16;
    let mut ip = MutableIpv6Packet::new(buffer).unwrap();
    ip.set_version(6);
    ip.set_payload_length(payload_length);
    ip.set_next_header(next_header);
    ip.set_hop_limit(250);
    ip.set_source(src_addr);
    ip.set_destination(dst_addr);
}

fn finish_icmpv6(buffer: &mut [u8], src_addr: Ipv6Addr, dst_addr: Ipv6Addr) {
    let mut icmp = MutableIcmpv6Packet::new(&mut buffer[40..]).unwrap();
    let checksum = icmpv6::checksum(&icmp.to_immutable(), &src_addr, &dst_addr);
    icmp.set_checksum(checksum);
}

/// An ICMP Time Exceeded message from `router`, quoting the IP header and
/// the first 8 bytes of the transport header of an IPv4 `probe`.
pub fn time_exceeded_v4(router: Ipv4Addr, probe: &[u8]) -> Vec<u8> {
    let prober = Ipv4Packet::new(probe).unwrap().get_source();
    let quoted = &probe[..probe.len().min(28)];
    let mut buffer = vec![0u8; 28 + quoted.len()];
    buffer[28..].copy_from_slice(quoted);
    {
        let mut icmp = MutableIcmpPacket::new(&mut buffer[20..]).unwrap();
        icmp.set_icmp_type(IcmpTypes::TimeExceeded);
        icmp.set_icmp_code(IcmpCode(0));
        let checksum = icmp::checksum(&icmp.to_immutable());
        icmp.set_checksum(checksum);
    }
    finish_ipv4(&mut buffer, router, prober, IpNextHeaderProtocols::Icmp);
    buffer
}

/// The Echo Reply sent by the destination of an IPv4 `probe`.
pub fn echo_reply_v4(probe: &[u8]) -> Vec<u8> {
    let ip = Ipv4Packet::new(probe).unwrap();
    let (prober, target) = (ip.get_source(), ip.get_destination());
    let mut buffer = probe.to_vec();
    {
        let mut icmp = MutableIcmpPacket::new(&mut buffer[20..]).unwrap();
        icmp.set_icmp_type(IcmpTypes::EchoReply);
        let checksum = icmp::checksum(&icmp.to_immutable());
        icmp.set_checksum(checksum);
    }
    finish_ipv4(&mut buffer, target, prober, IpNextHeaderProtocols::Icmp);
    buffer
}

/// An ICMPv6 Time Exceeded message from `router`, quoting the whole IPv6 `probe`.
pub fn time_exceeded_v6(router: Ipv6Addr, probe: &[u8]) -> Vec<u8> {
    let prober = Ipv6Packet::new(probe).unwrap().get_source();
    let mut buffer = vec![0u8; 48 + probe.len()];
    buffer[48..].copy_from_slice(probe);
    {
        let mut icmp = MutableIcmpv6Packet::new(&mut buffer[40..]).unwrap();
        icmp.set_icmpv6_type(Icmpv6Types::TimeExceeded);
        icmp.set_icmpv6_code(Icmpv6Code(0));
    }
    finish_ipv6(&mut buffer, router, prober, IpNextHeaderProtocols::Icmpv6);
    finish_icmpv6(&mut buffer, router, prober);
    buffer
}

/// The Echo Reply sent by the destination of an IPv6 `probe`.
pub fn echo_reply_v6(probe: &[u8]) -> Vec<u8> {
    let ip = Ipv6Packet::new(probe).unwrap();
    let (prober, target) = (ip.get_source(), ip.get_destination());
    let mut buffer = probe.to_vec();
    {
        let mut icmp = MutableIcmpv6Packet::new(&mut buffer[40..]).unwrap();
        icmp.set_icmpv6_type(Icmpv6Types::EchoReply);
    }
    finish_ipv6(&mut buffer, target, prober, IpNextHeaderProtocols::Icmpv6);
    finish_icmpv6(&mut buffer, target, prober);
    buffer
}

/// Answer an IPv6 TCP probe from its destination, as a TCP stack would.
///
/// With ACK, the reply acknowledges the probe sequence number plus its SYN
/// and FIN flags and data length. A bare RST takes its sequence number from
/// the probe acknowledgment number.
pub fn tcp_reply_v6(probe: &[u8], flags: u8) -> Vec<u8> {
    let ip = Ipv6Packet::new(probe).unwrap();
    let (prober, target) = (ip.get_source(), ip.get_destination());
    let probe_tcp = TcpPacket::new(&probe[40..]).unwrap();
    let probe_flags = probe[40 + 13];
    let mut length = (probe.len() - 40 - probe_tcp.get_data_offset() as usize * 4) as u32;
    length += (probe_flags & 0x02 != 0) as u32 + (probe_flags & 0x01 != 0) as u32;
    let (sequence, acknowledgement) = if flags & 0x10 != 0 {
        (0x1234_5678, probe_tcp.get_sequence().wrapping_add(length))
    } else {
        (probe_tcp.get_acknowledgement(), 0)
    };
    let mut buffer = vec![0u8; 60];
    {
        let mut segment = MutableTcpPacket::new(&mut buffer[40..]).unwrap();
        segment.set_source(probe_tcp.get_destination());
        segment.set_destination(probe_tcp.get_source());
        segment.set_sequence(sequence);
        segment.set_acknowledgement(acknowledgement);
        segment.set_data_offset(5);
        segment.set_flags(flags.into());
        segment.set_window(65535);
    }
    finish_ipv6(&mut buffer, target, prober, IpNextHeaderProtocols::Tcp);
    let checksum = tcp::ipv6_checksum(&TcpPacket::new(&buffer[40..]).unwrap(), &target, &prober);
    MutableTcpPacket::new(&mut buffer[40..])
        .unwrap()
        .set_checksum(checksum);
    buffer
}

/// Swap the source and destination ports of an IPv6 TCP probe.
pub fn swap_tcp_ports_v6(probe: &[u8]) -> Vec<u8> {
    let mut buffer = probe.to_vec();
    let mut segment = MutableTcpPacket::new(&mut buffer[40..]).unwrap();
    let (src_port, dst_port) = (segment.get_source(), segment.get_destination());
    segment.set_source(dst_port);
    segment.set_destination(src_port);
    buffer
}
