//! Serial-to-address codec (§4.2).

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Derive the 4-byte big-endian HM address from an inverter/DTU serial.
///
/// Takes the last 8 characters of the decimal serial, reinterprets them as
/// a hex number, and encodes that as 4 big-endian bytes.
pub fn ser_to_hm_addr(serial: &str) -> Result<[u8; 4]> {
    if serial.len() < 8 {
        return Err(Error::BadSerial(serial.to_string()));
    }
    let tail = &serial[serial.len() - 8..];
    let bcd = u32::from_str_radix(tail, 16).map_err(|_| Error::BadSerial(serial.to_string()))?;

    let mut addr = [0u8; 4];
    BigEndian::write_u32(&mut addr, bcd);
    Ok(addr)
}

/// Derive the 5-byte ESB air address from an inverter/DTU serial.
///
/// `reverse(hm_addr) ‖ 0x01`, with the whole 5-byte result reversed again —
/// the NRF24 register holds addresses LSB-first while the air order is
/// MSB-first, so the driver layer writes this value directly to the
/// register and the radio takes care of the final reversal on air.
pub fn ser_to_esb_addr(serial: &str) -> Result<[u8; 5]> {
    let hm = ser_to_hm_addr(serial)?;

    let mut air_order = [0u8; 5];
    air_order[..4].copy_from_slice(&{
        let mut rev = hm;
        rev.reverse();
        rev
    });
    air_order[4] = 0x01;

    air_order.reverse();
    Ok(air_order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hm_addr_is_hex_of_last_8_digits() {
        let addr = ser_to_hm_addr("114100000001").unwrap();
        assert_eq!(addr, [0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn hm_addr_full_width_tail() {
        let addr = ser_to_hm_addr("1161000000FF").unwrap();
        // last 8 chars "000000FF" parsed as hex = 0xFF
        assert_eq!(addr, [0x00, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn esb_addr_ends_with_0x01_after_reversal() {
        let esb = ser_to_esb_addr("114100000001").unwrap();
        assert_eq!(esb.len(), 5);
        // Un-reverse to recover the pre-final-reversal air_order, whose last byte is 0x01.
        let mut air_order = esb;
        air_order.reverse();
        assert_eq!(air_order[4], 0x01);
    }

    #[test]
    fn esb_addr_round_trips_through_double_reversal() {
        let esb = ser_to_esb_addr("116100000009").unwrap();
        let mut once = esb;
        once.reverse();
        let mut twice = once;
        twice.reverse();
        assert_eq!(twice, esb);
    }

    #[test]
    fn short_serial_is_bad_serial() {
        assert_eq!(
            ser_to_hm_addr("1234567"),
            Err(Error::BadSerial("1234567".to_string()))
        );
    }

    #[test]
    fn non_hex_tail_is_bad_serial() {
        assert!(matches!(
            ser_to_hm_addr("99990000000G"),
            Err(Error::BadSerial(_))
        ));
    }
}
