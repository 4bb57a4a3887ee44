use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::checksum::flowid_sequence;
use crate::models::identity::{Identity, SegmentEcho, SegmentKey};
use crate::models::protocols::{ProbeKind, L3};
use crate::packet::Packet;

/// Number of retransmissions used by the query constructors.
pub const DEFAULT_RETRIES: u32 = 2;

/// Largest padding that still fits in the IP length fields.
pub const MAX_PADDING: usize = u16::MAX as usize - 40 - 20;

/// Largest value of the 20-bit IPv6 flow label.
pub const MAX_FLOW_LABEL: u32 = 0xF_FFFF;

/// TCP control flags.
pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_ACK: u8 = 0x10;

/// TCP fields passed through to TCP-style probes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFields {
    pub src_port: u16,
    pub dst_port: u16,
    pub ack_number: u32,
    pub control_flags: u8,
    pub window: u16,
    pub urgent_pointer: u16,
}

/// Kind-specific flow identity of a query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flow {
    Icmp4 {
        /// Explicit IP identification (0 to carry `revflow` instead).
        ipid: u16,
        /// ICMP echo identifier (0 when the revflow scheme is used).
        icmpid: u16,
        /// Reverse flow identifier carried in the IP identification field.
        revflow: u8,
    },
    Icmp6 {
        traffic_class: u8,
        flow_label: u32,
        icmpid: u16,
    },
    Tcp6 {
        traffic_class: u8,
        flow_label: u32,
        tcp: TcpFields,
    },
}

impl Flow {
    pub fn kind(&self) -> ProbeKind {
        match self {
            Flow::Icmp4 { .. } => ProbeKind::Icmp4,
            Flow::Icmp6 { .. } => ProbeKind::Icmp6,
            Flow::Tcp6 { .. } => ProbeKind::Tcp6,
        }
    }
}

/// Lifecycle state of a query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    /// Built but not submitted.
    Idle,
    /// Submitted, waiting for an answer or a timeout.
    Sent,
    /// A matching reply was received.
    Answered,
    /// All the attempts timed out, or the probe could not be sent.
    Exhausted,
}

/// Timestamps recorded during the lifetime of a query, since the UNIX epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Timestamps {
    /// Time at which the first attempt was sent.
    pub first_sent: Option<Duration>,
    /// Time at which the latest attempt was sent.
    pub last_sent: Option<Duration>,
    /// Time at which the latest attempt times out.
    pub deadline: Option<Duration>,
    /// Capture time of the matched reply.
    pub answered: Option<Duration>,
}

/// One probe transaction: a (destination, ttl, flow) triple sent until it is
/// answered or its retransmissions are exhausted.
///
/// Queries are built by the kind-specific constructors, handed over to
/// [`crate::engine::Confirm::submit`], and given back to the completion
/// handler once they reach a terminal state.
#[derive(Debug)]
pub struct Query {
    pub(crate) src_addr: IpAddr,
    pub(crate) dst_addr: IpAddr,
    pub(crate) ttl: u8,
    pub(crate) flow: Flow,
    pub(crate) flowid: u8,
    pub(crate) padding: usize,
    pub(crate) max_retries: u32,
    pub(crate) state: State,
    pub(crate) attempts: u32,
    pub(crate) responder: Option<IpAddr>,
    pub(crate) probe: Option<Packet>,
    pub(crate) response: Option<Packet>,
    pub(crate) timestamps: Timestamps,
}

impl Query {
    fn new(src_addr: IpAddr, dst_addr: IpAddr, ttl: u8, flow: Flow, flowid: u8) -> Self {
        Query {
            src_addr,
            dst_addr,
            ttl,
            flow,
            flowid,
            padding: 0,
            max_retries: DEFAULT_RETRIES,
            state: State::Idle,
            attempts: 0,
            responder: None,
            probe: None,
            response: None,
            timestamps: Timestamps::default(),
        }
    }

    /// Build an ICMP Echo Request query over IPv4.
    ///
    /// `icmpid` and `revflow` are mutually exclusive: an ICMP identifier of 0
    /// selects the revflow scheme, where `revflow` is carried in the IP
    /// identification field. A non-zero `ipid` takes precedence over `revflow`.
    pub fn icmp4(
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        ttl: u8,
        ipid: u16,
        icmpid: u16,
        flowid: u8,
        revflow: u8,
    ) -> Result<Self> {
        if icmpid != 0 && revflow != 0 {
            bail!(
                "icmpid={} and revflow={} are mutually exclusive",
                icmpid,
                revflow
            );
        }
        let flow = Flow::Icmp4 {
            ipid,
            icmpid,
            revflow,
        };
        Ok(Self::new(
            src_addr.into(),
            dst_addr.into(),
            ttl,
            flow,
            flowid,
        ))
    }

    /// Build an ICMPv6 Echo Request query.
    pub fn icmp6(
        src_addr: Ipv6Addr,
        dst_addr: Ipv6Addr,
        ttl: u8,
        traffic_class: u8,
        flow_label: u32,
        icmpid: u16,
        flowid: u8,
    ) -> Result<Self> {
        check_flow_label(flow_label)?;
        let flow = Flow::Icmp6 {
            traffic_class,
            flow_label,
            icmpid,
        };
        Ok(Self::new(
            src_addr.into(),
            dst_addr.into(),
            ttl,
            flow,
            flowid,
        ))
    }

    /// Build a TCP-style query over IPv6.
    ///
    /// The flowid is sent in the sequence number; the other TCP fields are
    /// sent as given.
    pub fn tcp6(
        src_addr: Ipv6Addr,
        dst_addr: Ipv6Addr,
        ttl: u8,
        traffic_class: u8,
        flow_label: u32,
        flowid: u8,
        tcp: TcpFields,
    ) -> Result<Self> {
        check_flow_label(flow_label)?;
        let flow = Flow::Tcp6 {
            traffic_class,
            flow_label,
            tcp,
        };
        Ok(Self::new(
            src_addr.into(),
            dst_addr.into(),
            ttl,
            flow,
            flowid,
        ))
    }

    /// Set the maximum number of retransmissions.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Append `padding` zero bytes to the probe.
    pub fn with_padding(mut self, padding: usize) -> Result<Self> {
        if padding > MAX_PADDING {
            bail!("padding={} exceeds {}", padding, MAX_PADDING);
        }
        self.padding = padding;
        Ok(self)
    }

    pub fn src_addr(&self) -> IpAddr {
        self.src_addr
    }

    pub fn dst_addr(&self) -> IpAddr {
        self.dst_addr
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn flowid(&self) -> u8 {
        self.flowid
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn kind(&self) -> ProbeKind {
        self.flow.kind()
    }

    pub fn l3_protocol(&self) -> L3 {
        self.kind().l3_protocol()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of retransmissions performed so far, `max_retries + 1` if the
    /// query was exhausted without an answer.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Address of the host that answered, `None` if there was no answer.
    pub fn responder(&self) -> Option<IpAddr> {
        self.responder
    }

    /// The last probe sent for this query.
    pub fn probe(&self) -> Option<&Packet> {
        self.probe.as_ref()
    }

    /// The reply matched to this query.
    pub fn response(&self) -> Option<&Packet> {
        self.response.as_ref()
    }

    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    /// Time between the last attempt and the matched reply.
    pub fn rtt(&self) -> Option<Duration> {
        let answered = self.timestamps.answered?;
        answered.checked_sub(self.timestamps.last_sent?)
    }

    /// The value carried in the IPv4 identification field.
    pub fn ip_identification(&self) -> u16 {
        match self.flow {
            Flow::Icmp4 { ipid, revflow, .. } if ipid == 0 => revflow as u16,
            Flow::Icmp4 { ipid, .. } => ipid,
            _ => 0,
        }
    }

    /// The key under which this query is matched against replies.
    pub fn identity(&self) -> Identity {
        let ports = match self.flow {
            Flow::Tcp6 { tcp, .. } => Some((tcp.src_port, tcp.dst_port)),
            _ => None,
        };
        Identity {
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            kind: self.kind(),
            flowid: self.flowid,
            ports,
        }
    }

    /// The key of a direct reply from the destination of a TCP-style query.
    ///
    /// Returns `None` for ICMP queries, which are matched on their identity.
    pub fn segment_key(&self) -> Option<SegmentKey> {
        let tcp = match self.flow {
            Flow::Tcp6 { tcp, .. } => tcp,
            _ => return None,
        };
        let echo = if tcp.control_flags & TCP_ACK != 0 {
            SegmentEcho::Reset(tcp.ack_number)
        } else {
            let mut length = self.padding as u32;
            if tcp.control_flags & TCP_SYN != 0 {
                length += 1;
            }
            if tcp.control_flags & TCP_FIN != 0 {
                length += 1;
            }
            SegmentEcho::Acknowledgement(flowid_sequence(self.flowid).wrapping_add(length))
        };
        Some(SegmentKey {
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            ports: (tcp.src_port, tcp.dst_port),
            echo,
        })
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ttl={} state={:?} attempts={}/{}",
            self.identity(),
            self.ttl,
            self.state,
            self.attempts,
            self.max_retries
        )?;
        if let Some(responder) = self.responder {
            write!(f, " responder={}", responder)?;
        }
        Ok(())
    }
}

fn check_flow_label(flow_label: u32) -> Result<()> {
    if flow_label > MAX_FLOW_LABEL {
        bail!("flow_label={:#x} does not fit in 20 bits", flow_label);
    }
    Ok(())
}
