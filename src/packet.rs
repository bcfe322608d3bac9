//! Fixed-layout packette wire protocol codec.
//!
//! The packette transport packet is a 40-byte little-endian header
//! immediately followed by `num_samples` little-endian `i16` samples. There
//! is no framing, no checksum, and no file header or trailer: a backing
//! file is the raw concatenation of these packets in arrival order.

use std::fmt;

/// Size in bytes of a [`PacketHeader`] on the wire.
pub const HEADER_SIZE: usize = 40;

/// Width in bytes of one sample.
pub const SAMPLE_WIDTH: usize = 2;

/// Board identifier: a MAC-like 6-byte value, constant for the lifetime of
/// a run.
pub type BoardId = [u8; 6];

/// Format a board id the way `ifconfig`/`ip link` would: `aa:bb:cc:dd:ee:ff`.
#[must_use]
pub fn format_board_id(id: &BoardId) -> String {
    id.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Decoded packette packet header.
///
/// Field order matches the wire layout exactly; see module docs for the
/// byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// MAC-like board identifier. Constant per run.
    pub board_id: BoardId,

    /// Where this packet's samples start inside its channel's full
    /// payload.
    pub rel_offset: u16,

    /// Monotonically increasing per-board sequence number. Advisory only;
    /// this crate never repairs gaps in it (see spec non-goals).
    pub seqnum: u64,

    /// Event this packet belongs to.
    pub event_num: u32,

    /// Low word of the 32-bit trigger timestamp.
    pub trigger_low: u32,

    /// Bit `i` set means channel `i` is present in this event.
    pub channel_mask: u64,

    /// Number of samples following this header in this packet.
    pub num_samples: u16,

    /// Which channel (0..63) this packet fills.
    pub channel: u16,

    /// Full payload length for this (event, channel).
    pub total_samples: u16,

    /// Index of the "stop capacitor" for this channel in this event.
    pub drs4_stop: u16,
}

impl PacketHeader {
    /// Decode a header from the front of `data`.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
    /// Per spec, this is interpreted as EOF or a torn tail, not as
    /// corruption: callers rewind to the last good boundary and retry
    /// later rather than treating it as an error.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let mut board_id = [0u8; 6];
        board_id.copy_from_slice(&data[0..6]);
        let header = PacketHeader {
            board_id,
            rel_offset: u16::from_le_bytes(data[6..8].try_into().unwrap()),
            seqnum: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            event_num: u32::from_le_bytes(data[16..20].try_into().unwrap()),
            trigger_low: u32::from_le_bytes(data[20..24].try_into().unwrap()),
            channel_mask: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            num_samples: u16::from_le_bytes(data[32..34].try_into().unwrap()),
            channel: u16::from_le_bytes(data[34..36].try_into().unwrap()),
            total_samples: u16::from_le_bytes(data[36..38].try_into().unwrap()),
            drs4_stop: u16::from_le_bytes(data[38..40].try_into().unwrap()),
        };
        Some((header, &data[HEADER_SIZE..]))
    }

    /// Encode this header into `out`, which must have room for
    /// [`HEADER_SIZE`] more bytes (it is extended, not overwritten in
    /// place).
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.board_id);
        out.extend_from_slice(&self.rel_offset.to_le_bytes());
        out.extend_from_slice(&self.seqnum.to_le_bytes());
        out.extend_from_slice(&self.event_num.to_le_bytes());
        out.extend_from_slice(&self.trigger_low.to_le_bytes());
        out.extend_from_slice(&self.channel_mask.to_le_bytes());
        out.extend_from_slice(&self.num_samples.to_le_bytes());
        out.extend_from_slice(&self.channel.to_le_bytes());
        out.extend_from_slice(&self.total_samples.to_le_bytes());
        out.extend_from_slice(&self.drs4_stop.to_le_bytes());
    }

    /// Byte length of this packet on the wire, header plus payload.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.num_samples as usize * SAMPLE_WIDTH
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} chan {} [{}..{}) of {} stop={}",
            self.event_num,
            self.channel,
            self.rel_offset,
            self.rel_offset as u32 + self.num_samples as u32,
            self.total_samples,
            self.drs4_stop
        )
    }
}

/// Encode a whole packet (header + payload) to bytes, for synthesizing
/// test fixtures and for a future write-side collaborator.
#[must_use]
pub fn encode_packet(header: &PacketHeader, samples: &[i16]) -> Vec<u8> {
    debug_assert_eq!(samples.len(), header.num_samples as usize);
    let mut out = Vec::with_capacity(header.wire_len());
    header.encode(&mut out);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode `num_samples` little-endian `i16` values from the front of
/// `data`. Returns `None` if `data` is shorter than required: this is how
/// the reassembler detects that a packet's payload hasn't fully arrived
/// yet on a growing live-captured file.
#[must_use]
pub fn decode_samples(data: &[u8], num_samples: u16) -> Option<Vec<i16>> {
    let need = num_samples as usize * SAMPLE_WIDTH;
    if data.len() < need {
        return None;
    }
    Some(
        data[..need]
            .chunks_exact(SAMPLE_WIDTH)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PacketHeader {
        PacketHeader {
            board_id: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            rel_offset: 512,
            seqnum: 99,
            event_num: 7,
            trigger_low: 0x1234_5678,
            channel_mask: 0b1_0001,
            num_samples: 512,
            channel: 4,
            total_samples: 1024,
            drs4_stop: 126,
        }
    }

    #[test]
    fn round_trip_header() {
        let h = sample_header();
        let mut buf = Vec::new();
        h.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        let (decoded, rest) = PacketHeader::decode(&buf).unwrap();
        assert_eq!(decoded, h);
        assert!(rest.is_empty());
    }

    #[test]
    fn short_header_is_none_not_error() {
        let h = sample_header();
        let mut buf = Vec::new();
        h.encode(&mut buf);
        buf.truncate(HEADER_SIZE - 1);
        assert!(PacketHeader::decode(&buf).is_none());
        assert!(PacketHeader::decode(&[]).is_none());
    }

    #[test]
    fn encode_packet_round_trip() {
        let mut h = sample_header();
        h.num_samples = 4;
        let samples = vec![0i16, 16, 32, 48];
        let wire = encode_packet(&h, &samples);
        assert_eq!(wire.len(), HEADER_SIZE + 8);
        let (decoded, rest) = PacketHeader::decode(&wire).unwrap();
        assert_eq!(decoded, h);
        let back = decode_samples(rest, h.num_samples).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn torn_payload_is_none() {
        let mut h = sample_header();
        h.num_samples = 4;
        let samples = vec![0i16, 16, 32, 48];
        let mut wire = encode_packet(&h, &samples);
        wire.truncate(wire.len() - 1); // torn tail, one byte short
        let (_decoded, rest) = PacketHeader::decode(&wire).unwrap();
        assert!(decode_samples(rest, h.num_samples).is_none());
    }

    #[test]
    fn format_board_id_is_mac_like() {
        assert_eq!(
            format_board_id(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            "aa:bb:cc:dd:ee:ff"
        );
    }
}
