//! Packet assembler: MTU-chunking and fragment reassembly (§4.4).

use byteorder::{BigEndian, ByteOrder};

use crate::crc;
use crate::error::{Error, Result};
use crate::frame::{self, Fragment, MTU, TERMINAL_BIT};

/// Split `payload` into one or more ESB fragments addressed `src -> dst`.
///
/// The first fragment always carries `seq = 0x80`, the request sentinel the
/// transaction engine uses for every outbound command — the engine only
/// ever issues single-fragment requests (§4.4, §9 Open Questions), so
/// callers use `chunk(..)[0]` and the remaining entries exist for
/// completeness of the MTU-splitting contract.
pub fn chunk(payload: &[u8], src_serial: &str, dst_serial: &str, mtu: usize) -> Result<Vec<Vec<u8>>> {
    let mtu = if mtu == 0 { MTU } else { mtu };

    if payload.is_empty() {
        let fragment = frame::compose_fragment(&[], TERMINAL_BIT, src_serial, dst_serial)?;
        return Ok(vec![fragment]);
    }

    let mut fragments = Vec::new();
    for (i, piece) in payload.chunks(mtu).enumerate() {
        let seq = if i == 0 { TERMINAL_BIT } else { i as u8 };
        fragments.push(frame::compose_fragment(piece, seq, src_serial, dst_serial)?);
    }
    Ok(fragments)
}

/// Build a retransmit-request fragment: empty payload, `seq = 0x80 | frame_id`.
///
/// Addressed DTU -> inverter (the DTU is asking the inverter to resend),
/// per §9's resolution of the original's swapped-address bug.
pub fn retransmit_request(frame_id: u8, dtu_serial: &str, inverter_serial: &str) -> Result<Vec<u8>> {
    frame::compose_fragment(&[], TERMINAL_BIT | frame_id, dtu_serial, inverter_serial)
}

/// Outcome of a reassembly attempt that needs a retransmit before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitNeeded {
    /// Sequence number of the fragment to request a resend for.
    pub frame_id: u8,
}

/// Reassemble a complete payload from a scratch buffer of received fragments.
///
/// Filters to fragments whose `src` equals `expected_src_hm`, locates the
/// terminal fragment, requires every intermediate fragment `1..n` exactly
/// once, concatenates their data in order, and validates the trailing
/// Modbus CRC-16.
pub fn reassemble(fragments: &[Fragment], expected_src_hm: u32) -> Result<Vec<u8>> {
    let matching: Vec<&Fragment> = fragments.iter().filter(|f| f.src == expected_src_hm).collect();

    // On `MissingTerminal` the caller issues a retransmit request for
    // `missing_terminal_retransmit_seq(..)` before the next retry.
    let terminal = match matching.iter().find(|f| f.seq > TERMINAL_BIT) {
        Some(f) => *f,
        None => return Err(Error::MissingTerminal),
    };

    let n = terminal.terminal_count();

    let mut payload = Vec::new();
    for i in 1..n {
        match matching.iter().find(|f| f.seq == i) {
            Some(f) => payload.extend_from_slice(&f.data),
            None => return Err(Error::MissingFragment(i)),
        }
    }
    payload.extend_from_slice(&terminal.data);

    if payload.len() < 2 {
        return Err(Error::CrcMismatch);
    }

    let (body, trailer) = payload.split_at(payload.len() - 2);
    let expected = BigEndian::read_u16(trailer);
    if crc::crc16_modbus(body) != expected {
        return Err(Error::CrcMismatch);
    }

    Ok(payload)
}

/// Sequence number to retransmit-request when reassembly has no terminal
/// fragment at all: `max(seq) + 1`, or `1` if the scratch buffer is empty,
/// per §4.4 step 3.
pub fn missing_terminal_retransmit_seq(fragments: &[Fragment], expected_src_hm: u32) -> u8 {
    fragments
        .iter()
        .filter(|f| f.src == expected_src_hm)
        .map(|f| f.seq)
        .max()
        .map(|seq| seq + 1)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ser_to_hm_addr;
    use byteorder::{BigEndian, ByteOrder};

    const DTU: &str = "100000000000";
    const INV: &str = "114100000001";

    fn hm_u32(serial: &str) -> u32 {
        BigEndian::read_u32(&ser_to_hm_addr(serial).unwrap())
    }

    fn with_trailer(mut body: Vec<u8>) -> Vec<u8> {
        let c = crc::crc16_modbus(&body);
        body.push((c >> 8) as u8);
        body.push(c as u8);
        body
    }

    // Fragments "received from the inverter" are fabricated with
    // compose_fragment(chunk, seq, DTU, INV): bytes[1..5] (dst_serial=INV) is
    // the fixed inverter-address slot that parse_fragment reads as `src`, so
    // the resulting fragment's `src` equals the inverter's HM address, as a
    // genuine response frame's would (§4.3/§4.4; see frame.rs's compose_fragment
    // doc comment for why the slot is fixed rather than sender/receiver-relative).

    #[test]
    fn single_terminal_fragment_round_trips() {
        let payload = with_trailer(vec![1, 2, 3, 4, 5]);
        let frame_bytes = frame::compose_fragment(&payload, 0x81, DTU, INV).unwrap();
        let frag = frame::parse_fragment(&frame_bytes, 40).unwrap();

        let reassembled = reassemble(&[frag], hm_u32(INV)).unwrap();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn missing_middle_fragment_reports_its_seq() {
        let payload = with_trailer(vec![0; 30]);
        let chunks: Vec<&[u8]> = payload.chunks(17).collect();
        let terminal_seq = TERMINAL_BIT | (chunks.len() as u8);

        let f1 = frame::parse_fragment(
            &frame::compose_fragment(chunks[0], 1, DTU, INV).unwrap(),
            3,
        )
        .unwrap();
        // fragment 2 (the terminal here, since len==2) is intentionally dropped.
        let _ = f1;

        let terminal = frame::parse_fragment(
            &frame::compose_fragment(chunks[1], terminal_seq, DTU, INV).unwrap(),
            3,
        )
        .unwrap();

        // Only the terminal fragment present; fragment 1 missing.
        let err = reassemble(&[terminal], hm_u32(INV)).unwrap_err();
        assert_eq!(err, Error::MissingFragment(1));
    }

    #[test]
    fn no_terminal_fragment_is_missing_terminal() {
        let f = frame::parse_fragment(
            &frame::compose_fragment(&[1, 2, 3], 1, DTU, INV).unwrap(),
            3,
        )
        .unwrap();
        assert_eq!(reassemble(&[f], hm_u32(INV)).unwrap_err(), Error::MissingTerminal);
    }

    #[test]
    fn bad_trailing_crc_is_crc_mismatch() {
        let mut payload = with_trailer(vec![9, 9, 9]);
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        let frame_bytes = frame::compose_fragment(&payload, 0x81, DTU, INV).unwrap();
        let frag = frame::parse_fragment(&frame_bytes, 3).unwrap();
        assert_eq!(reassemble(&[frag], hm_u32(INV)).unwrap_err(), Error::CrcMismatch);
    }

    #[test]
    fn missing_terminal_retransmit_seq_is_max_plus_one() {
        let f = frame::parse_fragment(
            &frame::compose_fragment(&[1], 3, DTU, INV).unwrap(),
            3,
        )
        .unwrap();
        assert_eq!(missing_terminal_retransmit_seq(&[f], hm_u32(INV)), 4);
        assert_eq!(missing_terminal_retransmit_seq(&[], hm_u32(INV)), 1);
    }

    #[test]
    fn retransmit_request_is_empty_payload_with_high_bit() {
        let req = retransmit_request(2, DTU, INV).unwrap();
        let parsed = frame::parse_fragment(&req, 3).unwrap();
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.seq, TERMINAL_BIT | 2);
    }
}
