//! Functions for embedding the flow ID in probe fields.
//!
//! The flow ID must survive both a direct reply and the quotation of the
//! probe inside an ICMP error. For ICMP probes it is carried in the checksum
//! field, for TCP-style probes in the sequence number. The IP identification
//! field is not used as echo replies do not return it.

/// The ICMP checksum carrying `flowid`.
pub fn flowid_checksum(flowid: u8) -> u16 {
    flowid as u16
}

/// Recover the flow ID from an ICMP checksum, if it can carry one.
pub fn flowid_from_checksum(checksum: u16) -> Option<u8> {
    u8::try_from(checksum).ok()
}

/// The TCP sequence number carrying `flowid`.
pub fn flowid_sequence(flowid: u8) -> u32 {
    flowid as u32
}

/// Recover the flow ID from a TCP sequence number, if it can carry one.
pub fn flowid_from_sequence(sequence: u32) -> Option<u8> {
    u8::try_from(sequence).ok()
}

/// Return the 16-bit word to add to a packet so that its checksum becomes `target_checksum`.
///
/// `original_checksum` is the checksum of the packet with this word set to zero.
pub fn checksum_compensation(original_checksum: u16, target_checksum: u16) -> u16 {
    let original_ = !original_checksum as u32 & 0xFFFF;
    let mut target_ = !target_checksum as u32 & 0xFFFF;
    if target_ < original_ {
        target_ += 0xFFFF;
    }
    (target_ - original_) as u16
}
