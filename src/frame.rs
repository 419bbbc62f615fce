//! ESB fragment framing (§4.3).

use std::time::SystemTime;

use byteorder::{BigEndian, ByteOrder};

use crate::address::ser_to_hm_addr;
use crate::crc;
use crate::error::{Error, Result};

/// Marks a fragment's `seq` as the terminal fragment of a transaction, i.e.
/// the high bit is set and the low 7 bits carry the total fragment count.
pub const TERMINAL_BIT: u8 = 0x80;

/// Maximum payload bytes carried by a single fragment.
pub const MTU: usize = 17;

/// A parsed ESB fragment (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// The constant ESB framing preamble byte (`0x15`).
    pub mid: u8,
    /// Source HM address, as a 32-bit big-endian value.
    pub src: u32,
    /// Destination HM address, as a 32-bit big-endian value.
    pub dst: u32,
    /// Sequence byte: `1..=0x7F` for intermediate fragments, `0x80 | n` for terminal.
    pub seq: u8,
    /// Payload chunk carried by this fragment (excludes framing and CRC-8).
    pub data: Vec<u8>,
    /// Radio channel the fragment was received on.
    pub rx_channel: u8,
    /// Wall-clock time the fragment was received.
    pub received_at: SystemTime,
}

impl Fragment {
    /// `true` if this is a terminal fragment (`seq` has the high bit set).
    pub fn is_terminal(&self) -> bool {
        self.seq & TERMINAL_BIT != 0
    }

    /// `true` if this is a retransmit request: terminal bit set and no payload.
    pub fn is_retransmit_request(&self) -> bool {
        self.is_terminal() && self.data.is_empty()
    }

    /// Total fragment count encoded in a terminal fragment's `seq`.
    pub fn terminal_count(&self) -> u8 {
        self.seq & !TERMINAL_BIT
    }
}

/// Compose one ESB fragment: `0x15 ‖ dst_hm ‖ src_hm ‖ seq ‖ payload ‖ crc8`,
/// per §4.3's literal wire layout (`hm(dst)` before `hm(src)`), matching
/// `compose_esb_fragment` in the original.
///
/// `bytes[1..5]` and `bytes[5..9]` are fixed address slots, not
/// sender/receiver labels that swap with direction: `parse_fragment` reads
/// `src` from `bytes[1..5]` regardless of who transmitted the frame, so
/// `parse_fragment(compose_fragment(payload, seq, src, dst, ..))` yields
/// `src == dst`'s HM address and `dst == src`'s HM address — satisfying §8
/// property 2 up to that src/dst swap, not by literal equality.
pub fn compose_fragment(
    payload_chunk: &[u8],
    seq: u8,
    src_serial: &str,
    dst_serial: &str,
) -> Result<Vec<u8>> {
    if payload_chunk.len() > MTU {
        return Err(Error::MtuExceeded(payload_chunk.len()));
    }

    let src_hm = ser_to_hm_addr(src_serial)?;
    let dst_hm = ser_to_hm_addr(dst_serial)?;

    let mut packet = Vec::with_capacity(1 + 4 + 4 + 1 + payload_chunk.len() + 1);
    packet.push(0x15);
    packet.extend_from_slice(&dst_hm);
    packet.extend_from_slice(&src_hm);
    packet.push(seq);
    packet.extend_from_slice(payload_chunk);

    let check = crc::crc8(&packet);
    packet.push(check);

    Ok(packet)
}

/// Parse a raw fragment received from the radio, verifying its CRC-8.
pub fn parse_fragment(bytes: &[u8], rx_channel: u8) -> Result<Fragment> {
    if bytes.len() < 11 {
        return Err(Error::FrameCorrupt);
    }

    let (body, check) = bytes.split_at(bytes.len() - 1);
    if crc::crc8(body) != check[0] {
        return Err(Error::FrameCorrupt);
    }

    Ok(Fragment {
        mid: bytes[0],
        src: BigEndian::read_u32(&bytes[1..5]),
        dst: BigEndian::read_u32(&bytes[5..9]),
        seq: bytes[9],
        data: bytes[10..bytes.len() - 1].to_vec(),
        rx_channel,
        received_at: SystemTime::now(),
    })
}
