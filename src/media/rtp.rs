//! RTP payload extraction
//!
//! Multicast MPEG-TS sources send either raw transport-stream packets or
//! RTP-encapsulated ones. [`extract_payload`] strips the RTP framing when it
//! is present and passes everything else through untouched, so the hub can
//! broadcast plain TS bytes regardless of what the source emits.
//!
//! The extraction rules mirror the common VLC behavior for MPEG-over-RTP:
//! MPEG audio/video payload types carry an extra 4-byte header after the
//! RTP header proper, and a packet only counts as RTP if the stripped
//! window still holds at least one whole TS packet.

use bytes::Bytes;

/// MPEG-TS sync byte starting every transport-stream packet
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Size of one MPEG-TS packet; anything smaller cannot carry TS payload
pub const TS_PACKET_SIZE: usize = 188;

/// RTP protocol version, top two bits of the first header byte
const RTP_VERSION: u8 = 2;

/// Fixed RTP header length before any CSRC entries
const RTP_HEADER_LEN: usize = 12;

// MPEG payload-type constants, adopted from VLC (RFC 2250 encapsulation).
const PT_MPEG_AUDIO: u8 = 0x0E;
const PT_MPEG_VIDEO: u8 = 0x20;

/// Locate the RTP payload window: `(start offset, trailing pad bytes)`.
///
/// Returns `None` when the buffer is not a plausible RTP packet, in which
/// case the caller passes the datagram through unchanged.
fn rtp_payload_bounds(data: &[u8]) -> Option<(usize, usize)> {
    if data.len() < RTP_HEADER_LEN {
        return None;
    }

    let version = (data[0] >> 6) & 0x03;
    if version != RTP_VERSION {
        return None;
    }

    let csrc_count = (data[0] & 0x0F) as usize;
    let mut start = RTP_HEADER_LEN + 4 * csrc_count;

    // Header extension: 16-bit word count at start+2, preceded by a
    // 4-byte extension header.
    if (data[0] >> 4) & 0x01 == 1 {
        if start + 4 > data.len() {
            return None;
        }
        let ext_len = u16::from_be_bytes([data[start + 2], data[start + 3]]) as usize;
        start += 4 + 4 * ext_len;
    }

    // Padding: the final byte holds the pad length, itself included.
    let end = if (data[0] >> 5) & 0x01 == 1 {
        data[data.len() - 1] as usize
    } else {
        0
    };

    if start + end > data.len() {
        return None;
    }

    Some((start, end))
}

/// Extract the media payload from one ingress datagram.
///
/// Raw MPEG-TS packets (sync byte `0x47`), datagrams too small to hold a
/// TS packet, and anything that fails RTP validation are returned
/// unchanged. For valid RTP the header, CSRC list, extension and padding
/// are stripped; MPEG audio/video payload types additionally skip the
/// 4-byte MPEG-on-RTP header.
///
/// The returned value shares the datagram's (already owned) allocation by
/// reference count; no pool buffer ever reaches this function.
pub fn extract_payload(data: Bytes) -> Bytes {
    if data.len() < TS_PACKET_SIZE {
        return data;
    }

    if data[0] == TS_SYNC_BYTE {
        return data;
    }

    let Some((mut start, end)) = rtp_payload_bounds(&data) else {
        return data;
    };

    let payload_type = data[1] & 0x7F;
    if payload_type == PT_MPEG_AUDIO || payload_type == PT_MPEG_VIDEO {
        if start + 4 < data.len() - end {
            start += 4;
        }
    }

    if start < data.len() && end < data.len() && start < data.len() - end {
        // A stripped window smaller than one TS packet means this was not
        // RTP-encapsulated TS after all.
        if data.len() - start - end < TS_PACKET_SIZE {
            return data;
        }
        return data.slice(start..data.len() - end);
    }

    data
}
