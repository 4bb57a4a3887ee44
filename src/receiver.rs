//! Capture replies from the network.
use std::time::Duration;

use anyhow::Result;
use pcap::{Active, Capture, Direction};

use crate::models::L2;
use crate::sender::l2_protocol_of;

/// A frame captured on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    /// Capture time since the UNIX epoch.
    pub timestamp: Duration,
}

/// A source of captured frames.
pub trait Sniff {
    /// Wait for the next frame.
    ///
    /// Returns `None` when no frame arrived before the source timeout, so
    /// that callers can check whether they should stop.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;
}

pub struct Receiver {
    cap: Capture<Active>,
    l2_protocol: L2,
}

impl Receiver {
    pub fn new(interface: &str, buffer_size: i32, timeout_ms: i32) -> Result<Self> {
        let mut cap = pcap::Capture::from_device(interface)?
            .buffer_size(buffer_size)
            // `timeout` lets the receive loop check its stop flag.
            // Packets are timestamped by pcap as soon as they are captured,
            // so this has no impact on RTT computation.
            .timeout(timeout_ms)
            .immediate_mode(true)
            .open()?;

        // Filter as much as possible at the kernel level.
        // We're only interested in incoming replies to ICMP and TCP probes.
        cap.direction(Direction::In)?;
        cap.filter(
            "(ip and icmp and (
                    icmp[icmptype] = icmp-echoreply or
                    icmp[icmptype] = icmp-timxceed or
                    icmp[icmptype] = icmp-unreach))
                    or
                    (ip6 and icmp6 and (
                    icmp6[icmp6type] = icmp6-echoreply or
                    icmp6[icmp6type] = icmp6-timeexceeded or
                    icmp6[icmp6type] = icmp6-destinationunreach))
                    or
                    (ip6 and tcp)",
            true,
        )?;

        let l2_protocol = l2_protocol_of(cap.get_datalink())?;
        Ok(Self { cap, l2_protocol })
    }

    /// The framing of the captured frames.
    pub fn l2_protocol(&self) -> L2 {
        self.l2_protocol
    }
}

impl Sniff for Receiver {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        match self.cap.next_packet() {
            Ok(packet) => {
                let timestamp = Duration::from_micros(
                    packet.header.ts.tv_sec as u64 * 1_000_000 + packet.header.ts.tv_usec as u64,
                );
                Ok(Some(CapturedFrame {
                    data: packet.data.to_vec(),
                    timestamp,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}
