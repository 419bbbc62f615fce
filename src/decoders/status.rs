//! `RealTimeRunData_Debug` (cmd `0x0B`) decoding (§4.7, §3).

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::decoders::model::Model;
use crate::error::{Error, Result};

/// One AC phase reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phase {
    /// Line voltage, volts.
    pub voltage: f32,
    /// Line current, amps.
    pub current: f32,
    /// Real power, watts.
    pub power: f32,
    /// Reactive power, VAr.
    pub reactive_power: f32,
    /// Frequency, Hz.
    pub frequency: f32,
}

/// One DC string reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringReading {
    /// Configured name for this string, or `None` if not configured.
    pub name: Option<String>,
    /// String voltage, volts.
    pub voltage: f32,
    /// String current, amps.
    pub current: f32,
    /// String power, watts.
    pub power: f32,
    /// Energy generated today, Wh.
    pub energy_daily: u32,
    /// Lifetime energy generated, Wh.
    pub energy_total: u32,
    /// `power / nominal_Wp * 100`, percent, if `nominal_Wp > 0`.
    pub irradiation: Option<f32>,
}

/// Decoded `RealTimeRunData_Debug` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    /// Timestamp the inverter reports for this sample (unix seconds).
    pub timestamp: u32,
    /// Heatsink/module temperature, °C.
    pub temperature: f32,
    /// Energy generated today across all strings, Wh.
    pub yield_today: u32,
    /// Lifetime energy generated across all strings, Wh.
    pub yield_total: u32,
    /// AC power factor.
    pub powerfactor: f32,
    /// `ac_power / dc_power * 100`, percent, when DC power is nonzero.
    pub efficiency: Option<f32>,
    /// Monotonically increasing alarm/event counter.
    pub event_count: u16,
    /// AC phase readings, one per `model.phase_count()`.
    pub phases: Vec<Phase>,
    /// DC string readings, one per `model.string_count()`.
    pub strings: Vec<StringReading>,
}

/// `nominal_Wp` per configured string, in declaration order; `None` entries
/// mean "not configured" and leave `irradiation` unset for that string.
pub type NominalPower = Option<f32>;

/// Decode a `0x0B` payload (cmd byte through the byte before the trailing
/// CRC-16, which the caller has already stripped) into a [`StatusResponse`].
///
/// Layout (fixed offsets, scaling per §4.7):
/// `cmd(1) ‖ timestamp_be32(4) ‖ temperature_i16(2) ‖`
/// `[phase: voltage_u16 current_u16 power_u16 reactive_power_u16 frequency_u16](phase_count) ‖`
/// `[string: voltage_u16 current_u16 power_u16 energy_daily_u16 energy_total_u32](string_count) ‖`
/// `powerfactor_u16(2) ‖ event_count_u16(2)`
pub fn decode(model: Model, payload: &[u8], string_names: &[Option<String>], nominal_wp: &[NominalPower]) -> Result<StatusResponse> {
    const PHASE_BLOCK: usize = 10;
    const STRING_BLOCK: usize = 12;

    let phase_count = model.phase_count();
    let string_count = model.string_count();

    let need = 1 + 4 + 2 + phase_count * PHASE_BLOCK + string_count * STRING_BLOCK + 2 + 2;
    if payload.len() < need {
        return Err(Error::ShortPayload { got: payload.len(), need });
    }

    let mut cursor = 1; // skip cmd byte

    let timestamp = BigEndian::read_u32(&payload[cursor..cursor + 4]);
    cursor += 4;

    let temperature = BigEndian::read_i16(&payload[cursor..cursor + 2]) as f32 / 10.0;
    cursor += 2;

    let mut phases = Vec::with_capacity(phase_count);
    for _ in 0..phase_count {
        let voltage = BigEndian::read_u16(&payload[cursor..cursor + 2]) as f32 / 10.0;
        let current = BigEndian::read_u16(&payload[cursor + 2..cursor + 4]) as f32 / 100.0;
        let power = BigEndian::read_u16(&payload[cursor + 4..cursor + 6]) as f32 / 10.0;
        let reactive_power = BigEndian::read_u16(&payload[cursor + 6..cursor + 8]) as f32 / 10.0;
        let frequency = BigEndian::read_u16(&payload[cursor + 8..cursor + 10]) as f32 / 100.0;
        phases.push(Phase { voltage, current, power, reactive_power, frequency });
        cursor += PHASE_BLOCK;
    }

    let mut strings = Vec::with_capacity(string_count);
    for i in 0..string_count {
        let voltage = BigEndian::read_u16(&payload[cursor..cursor + 2]) as f32 / 10.0;
        let current = BigEndian::read_u16(&payload[cursor + 2..cursor + 4]) as f32 / 100.0;
        let power = BigEndian::read_u16(&payload[cursor + 4..cursor + 6]) as f32 / 10.0;
        let energy_daily = BigEndian::read_u16(&payload[cursor + 6..cursor + 8]) as u32;
        let energy_total = BigEndian::read_u32(&payload[cursor + 8..cursor + 12]);
        cursor += STRING_BLOCK;

        let wp = nominal_wp.get(i).copied().flatten();
        let irradiation = wp.filter(|wp| *wp > 0.0).map(|wp| power / wp * 100.0);

        strings.push(StringReading {
            name: string_names.get(i).cloned().flatten(),
            voltage,
            current,
            power,
            energy_daily,
            energy_total,
            irradiation,
        });
    }

    let powerfactor = BigEndian::read_u16(&payload[cursor..cursor + 2]) as f32 / 1000.0;
    cursor += 2;
    let event_count = BigEndian::read_u16(&payload[cursor..cursor + 2]);

    let yield_today = strings.iter().map(|s| s.energy_daily).sum();
    let yield_total = strings.iter().map(|s| s.energy_total).sum();

    let ac_power: f32 = phases.iter().map(|p| p.power).sum();
    let dc_power: f32 = strings.iter().map(|s| s.power).sum();
    let efficiency = (dc_power > 0.0).then(|| (ac_power / dc_power * 100.0 * 100.0).round() / 100.0);

    Ok(StatusResponse {
        timestamp,
        temperature,
        yield_today,
        yield_total,
        powerfactor,
        efficiency,
        event_count,
        phases,
        strings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_payload(event_count: u16) -> Vec<u8> {
        let mut p = vec![0x0Bu8];
        p.extend_from_slice(&0x6000_0000u32.to_be_bytes()); // timestamp
        p.extend_from_slice(&250i16.to_be_bytes()); // temperature 25.0C
        // phase 0: 230.0V, 2.00A, 450.0W, 5.0VAr, 50.00Hz
        p.extend_from_slice(&2300u16.to_be_bytes());
        p.extend_from_slice(&200u16.to_be_bytes());
        p.extend_from_slice(&4500u16.to_be_bytes());
        p.extend_from_slice(&50u16.to_be_bytes());
        p.extend_from_slice(&5000u16.to_be_bytes());
        // string 0: 32.0V, 5.00A, 160.0W, 1200Wh daily, 345600Wh total
        p.extend_from_slice(&320u16.to_be_bytes());
        p.extend_from_slice(&500u16.to_be_bytes());
        p.extend_from_slice(&1600u16.to_be_bytes());
        p.extend_from_slice(&1200u16.to_be_bytes());
        p.extend_from_slice(&345_600u32.to_be_bytes());
        // string 1: 31.0V, 4.80A, 148.0W, 1100Wh daily, 300000Wh total
        p.extend_from_slice(&310u16.to_be_bytes());
        p.extend_from_slice(&480u16.to_be_bytes());
        p.extend_from_slice(&1480u16.to_be_bytes());
        p.extend_from_slice(&1100u16.to_be_bytes());
        p.extend_from_slice(&300_000u32.to_be_bytes());
        p.extend_from_slice(&970u16.to_be_bytes()); // powerfactor 0.97
        p.extend_from_slice(&event_count.to_be_bytes());
        p
    }

    #[test]
    fn decodes_hm600_two_strings() {
        let payload = build_payload(3);
        let names = vec![Some("east".to_string()), Some("west".to_string())];
        let wp = vec![Some(250.0), Some(250.0)];

        let status = decode(Model::Hm600, &payload, &names, &wp).unwrap();
        assert_eq!(status.phases.len(), 1);
        assert_eq!(status.strings.len(), 2);
        assert_eq!(status.event_count, 3);
        assert_eq!(status.strings[0].name.as_deref(), Some("east"));
        assert_eq!(status.yield_today, 1200 + 1100);
        assert_eq!(status.yield_total, 345_600 + 300_000);
        assert!((status.temperature - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn efficiency_is_ac_over_dc_times_100() {
        let payload = build_payload(1);
        let status = decode(Model::Hm600, &payload, &[], &[]).unwrap();
        let dc = 160.0 + 148.0;
        let expected = (4500.0 / 10.0) / dc * 100.0;
        assert!((status.efficiency.unwrap() - expected).abs() < 0.01);
    }

    #[test]
    fn irradiation_only_when_nominal_wp_positive() {
        let payload = build_payload(1);
        let wp = vec![Some(250.0), None];
        let status = decode(Model::Hm600, &payload, &[], &wp).unwrap();
        assert!(status.strings[0].irradiation.is_some());
        assert!(status.strings[1].irradiation.is_none());
    }

    #[test]
    fn short_payload_is_rejected() {
        let err = decode(Model::Hm1200, &[0x0B, 0, 0], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::ShortPayload { .. }));
    }
}
