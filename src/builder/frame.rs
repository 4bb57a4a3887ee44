use crate::models::{L2, L3, L4};

/// A Frame holds the L2/L3/L4 layer boundaries of a probe being built over a buffer.
///
/// ```
/// use std::io::Write;
/// use hopconfirm::builder::Frame;
/// use hopconfirm::models::{L2, L3, L4};
///
/// let mut buffer = vec![0u8; Frame::buffer_size(L2::Ethernet, L3::IPv4, L4::ICMP, 0)];
/// let mut frame = Frame::new(&mut buffer, L2::Ethernet, L3::IPv4, L4::ICMP, 0);
///
/// // Write some data in the L3 header:
/// frame.l3_mut().write(&[0x45, 0x00]).unwrap();
///
/// // Get the full frame, from the L2 header to the end of the payload:
/// println!("{:?}", frame.l2());
/// ```
pub struct Frame<'a> {
    buffer: &'a mut [u8],
    l3_protocol: L3,
    l4_protocol: L4,
    l2_start: usize,
    l3_start: usize,
    l4_start: usize,
    payload_end: usize,
}

/// Size of the L4 header written by the builders.
pub fn l4_header_size(l4_protocol: L4) -> usize {
    match l4_protocol {
        // Echo Request header only, the payload is the padding.
        L4::ICMP => 8,
        L4::ICMPv6 => 8,
        // No options.
        L4::TCP => 20,
    }
}

/// Padding inserted before the Ethernet header so that the IP header is
/// aligned on a four-byte boundary. See https://lwn.net/Articles/89597/.
fn alignment_padding(l2_protocol: L2) -> usize {
    match l2_protocol {
        L2::Ethernet => 2,
        L2::BSDLoopback | L2::None => 0,
    }
}

impl Frame<'_> {
    /// Size of the buffer needed to build a frame with these protocols.
    pub fn buffer_size(l2_protocol: L2, l3_protocol: L3, l4_protocol: L4, payload_size: usize) -> usize {
        alignment_padding(l2_protocol)
            + l2_protocol.header_size()
            + l3_protocol.header_size()
            + l4_header_size(l4_protocol)
            + payload_size
    }

    /// Build a new frame over an existing buffer.
    ///
    /// Panics if the buffer is smaller than [`Frame::buffer_size`].
    pub fn new(
        buffer: &'_ mut [u8],
        l2_protocol: L2,
        l3_protocol: L3,
        l4_protocol: L4,
        payload_size: usize,
    ) -> Frame<'_> {
        let l2_start = alignment_padding(l2_protocol);
        let l3_start = l2_start + l2_protocol.header_size();
        let l4_start = l3_start + l3_protocol.header_size();
        let payload_start = l4_start + l4_header_size(l4_protocol);
        let payload_end = payload_start + payload_size;
        assert!(
            payload_end <= buffer.len(),
            "buffer of {} bytes cannot hold a {} bytes frame",
            buffer.len(),
            payload_end
        );

        Frame {
            buffer,
            l3_protocol,
            l4_protocol,
            l2_start,
            l3_start,
            l4_start,
            payload_end,
        }
    }

    /// A slice from the start of the layer 2 header to the end of the payload.
    pub fn l2(&self) -> &[u8] {
        &self.buffer[self.l2_start..self.payload_end]
    }

    /// A slice from the start of the layer 3 header to the end of the payload.
    pub fn l3(&self) -> &[u8] {
        &self.buffer[self.l3_start..self.payload_end]
    }

    /// A slice from the start of the layer 4 header to the end of the payload.
    pub fn l4(&self) -> &[u8] {
        &self.buffer[self.l4_start..self.payload_end]
    }

    /// A mutable slice from the start of the layer 2 header to the end of the payload.
    pub fn l2_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.l2_start..self.payload_end]
    }

    /// A mutable slice from the start of the layer 3 header to the end of the payload.
    pub fn l3_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.l3_start..self.payload_end]
    }

    /// A mutable slice from the start of the layer 4 header to the end of the payload.
    pub fn l4_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.l4_start..self.payload_end]
    }

    /// The layer 3 protocol.
    pub fn l3_protocol(&self) -> L3 {
        self.l3_protocol
    }

    /// The layer 4 protocol.
    pub fn l4_protocol(&self) -> L4 {
        self.l4_protocol
    }

    /// The size of the frame from the start of the layer 3 header to the end of the payload.
    pub fn l3_size(&self) -> u16 {
        (self.payload_end - self.l3_start) as u16
    }

    /// The size of the frame from the start of the layer 4 header to the end of the payload.
    pub fn l4_size(&self) -> u16 {
        (self.payload_end - self.l4_start) as u16
    }
}
