use std::fmt::{Display, Formatter};
use std::net::IpAddr;

use crate::models::protocols::ProbeKind;

/// The fields that tie a reply to the query that caused it.
///
/// Addresses are in the probe direction: `src_addr` is the prober.
/// The TTL, the ICMP identifier and the IP identification are not part of
/// the identity, as they are either not stable across attempts or not
/// returned by every kind of reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub kind: ProbeKind,
    pub flowid: u8,
    /// Source and destination ports of TCP-style probes.
    pub ports: Option<(u16, u16)>,
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "kind={} src_addr={} dst_addr={} flowid={}",
            self.kind, self.src_addr, self.dst_addr, self.flowid
        )?;
        if let Some((src_port, dst_port)) = self.ports {
            write!(f, " src_port={} dst_port={}", src_port, dst_port)?;
        }
        Ok(())
    }
}

/// The part of a probe that a direct TCP reply refers to.
///
/// A TCP stack does not return the probe sequence number verbatim: it
/// acknowledges the whole segment, or resets it using the probe
/// acknowledgment number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentEcho {
    /// Reply with ACK: sequence number plus SYN, FIN and data length.
    Acknowledgement(u32),
    /// Bare RST to a probe with ACK: its sequence number is the probe
    /// acknowledgment number.
    Reset(u32),
}

/// Key of a direct TCP reply, in the probe direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub ports: (u16, u16),
    pub echo: SegmentEcho,
}

impl Display for SegmentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "src_addr={} dst_addr={} src_port={} dst_port={} echo={:?}",
            self.src_addr, self.dst_addr, self.ports.0, self.ports.1, self.echo
        )
    }
}
