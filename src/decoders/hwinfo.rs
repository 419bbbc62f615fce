//! `DevInform_All` (cmd `0x01`) decoding (§4.7, §3).

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::error::{Error, Result};

/// Decoded `DevInform_All` response.
///
/// Fields beyond the firmware version are best-effort: the original marks
/// them optional rather than failing the whole decode when a shorter
/// variant of this response omits them.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HardwareInfoResponse {
    /// Firmware major version.
    pub firmware_major: u8,
    /// Firmware minor version.
    pub firmware_minor: u8,
    /// Firmware patch version.
    pub firmware_patch: u8,
    /// Firmware build year (e.g. 2024).
    pub build_year: Option<u16>,
    /// Firmware build month (1-12).
    pub build_month: Option<u8>,
    /// Firmware build day (1-31).
    pub build_day: Option<u8>,
    /// Firmware build hour (0-23).
    pub build_hour: Option<u8>,
    /// Firmware build minute (0-59).
    pub build_minute: Option<u8>,
    /// Hardware part identifier.
    pub hardware_part_id: Option<u16>,
}

/// Decode a `0x01` payload (cmd byte through the byte before the trailing
/// CRC-16) into a [`HardwareInfoResponse`].
///
/// Layout: `cmd(1) ‖ fw_major(1) ‖ fw_minor(1) ‖ fw_patch(1) ‖`
/// `build_year_u16(2) ‖ build_month(1) ‖ build_day(1) ‖ build_hour(1) ‖`
/// `build_minute(1) ‖ hardware_part_id_u16(2)`. Only the firmware version
/// prefix is required; anything past it that's missing decodes to `None`.
pub fn decode(payload: &[u8]) -> Result<HardwareInfoResponse> {
    const MIN_LEN: usize = 4; // cmd + major + minor + patch

    if payload.len() < MIN_LEN {
        return Err(Error::ShortPayload { got: payload.len(), need: MIN_LEN });
    }

    let mut info = HardwareInfoResponse {
        firmware_major: payload[1],
        firmware_minor: payload[2],
        firmware_patch: payload[3],
        ..Default::default()
    };

    let mut cursor = 4;
    if payload.len() >= cursor + 2 {
        info.build_year = Some(BigEndian::read_u16(&payload[cursor..cursor + 2]));
        cursor += 2;
    }
    if payload.len() > cursor {
        info.build_month = Some(payload[cursor]);
        cursor += 1;
    }
    if payload.len() > cursor {
        info.build_day = Some(payload[cursor]);
        cursor += 1;
    }
    if payload.len() > cursor {
        info.build_hour = Some(payload[cursor]);
        cursor += 1;
    }
    if payload.len() > cursor {
        info.build_minute = Some(payload[cursor]);
        cursor += 1;
    }
    if payload.len() >= cursor + 2 {
        info.hardware_part_id = Some(BigEndian::read_u16(&payload[cursor..cursor + 2]));
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payload_decodes_every_field() {
        let mut p = vec![0x01u8, 1, 2, 3];
        p.extend_from_slice(&2024u16.to_be_bytes());
        p.extend_from_slice(&[9, 15, 10, 30]);
        p.extend_from_slice(&0x00A2u16.to_be_bytes());

        let info = decode(&p).unwrap();
        assert_eq!(info.firmware_major, 1);
        assert_eq!(info.build_year, Some(2024));
        assert_eq!(info.build_month, Some(9));
        assert_eq!(info.hardware_part_id, Some(0x00A2));
    }

    #[test]
    fn short_tail_yields_nulls_not_errors() {
        let p = vec![0x01u8, 1, 2, 3];
        let info = decode(&p).unwrap();
        assert_eq!(info.firmware_patch, 3);
        assert_eq!(info.build_year, None);
        assert_eq!(info.hardware_part_id, None);
    }

    #[test]
    fn missing_firmware_prefix_is_short_payload() {
        assert!(matches!(decode(&[0x01, 1]).unwrap_err(), Error::ShortPayload { .. }));
    }
}
