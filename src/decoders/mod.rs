//! Response decoding: `(model, command)` dispatch to fixed-offset decoders (§4.7).
//!
//! The original selects a decoder by string-concatenating model and command
//! and looking it up by attribute reflection; here dispatch is an exhaustive
//! `match` over `(Model, Command)`, so an unknown combination is a compile-time
//! reachable arm (`_ => debug`) rather than a runtime attribute-error.

pub mod hwinfo;
pub mod model;
pub mod status;

pub use hwinfo::HardwareInfoResponse;
pub use model::Model;
pub use status::{NominalPower, StatusResponse};

use crate::error::{Error, Result};

/// Command byte identifying the request/response kind (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `0x00`: brief device info.
    DevInformSimple,
    /// `0x01`: firmware/hardware info.
    DevInformAll,
    /// `0x05`: system configuration parameters.
    SystemConfigPara,
    /// `0x0B`: primary status / telemetry.
    RealTimeRunDataDebug,
    /// `0x11`: alarm/event backfill.
    AlarmData,
    /// Any command byte not named above.
    Other(u8),
}

impl Command {
    /// The wire command byte for this command.
    pub fn code(self) -> u8 {
        match self {
            Command::DevInformSimple => 0x00,
            Command::DevInformAll => 0x01,
            Command::SystemConfigPara => 0x05,
            Command::RealTimeRunDataDebug => 0x0B,
            Command::AlarmData => 0x11,
            Command::Other(code) => code,
        }
    }

    /// Resolve a command from its wire byte.
    pub fn from_code(code: u8) -> Command {
        match code {
            0x00 => Command::DevInformSimple,
            0x01 => Command::DevInformAll,
            0x05 => Command::SystemConfigPara,
            0x0B => Command::RealTimeRunDataDebug,
            0x11 => Command::AlarmData,
            other => Command::Other(other),
        }
    }
}

/// Result of decoding one reassembled payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    /// A `0x0B` status/telemetry record.
    Status(StatusResponse),
    /// A `0x01` firmware/hardware info record.
    HardwareInfo(HardwareInfoResponse),
    /// Any `(model, command)` combination with no dedicated decoder: the
    /// raw payload bytes, for logging/debugging.
    Debug(Vec<u8>),
}

/// Per-string configuration the status decoder needs (name + nominal Wp).
#[derive(Debug, Clone, Default)]
pub struct StringConfig {
    /// Configured display name for the string.
    pub name: Option<String>,
    /// Nominal panel power in Wp, used to compute irradiation.
    pub nominal_wp: NominalPower,
}

/// Decode a reassembled payload (CRC-16 already validated by the caller)
/// according to its `(model, command)` pair.
pub fn decode(model: Model, payload: &[u8], strings: &[StringConfig]) -> Result<DecodedResponse> {
    if payload.is_empty() {
        return Err(Error::ShortPayload { got: 0, need: 1 });
    }
    let command = Command::from_code(payload[0]);

    match command {
        Command::RealTimeRunDataDebug => {
            let names: Vec<_> = strings.iter().map(|s| s.name.clone()).collect();
            let wp: Vec<_> = strings.iter().map(|s| s.nominal_wp).collect();
            status::decode(model, payload, &names, &wp).map(DecodedResponse::Status)
        }
        Command::DevInformAll => hwinfo::decode(payload).map(DecodedResponse::HardwareInfo),
        // DevInform_Simple, SystemConfigPara, AlarmData, and any other
        // command have no dedicated fixed-offset decoder in this system;
        // they are surfaced to callers as raw bytes for logging.
        _ => Ok(DecodedResponse::Debug(payload.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_code() {
        assert_eq!(Command::from_code(0x0B), Command::RealTimeRunDataDebug);
        assert_eq!(Command::RealTimeRunDataDebug.code(), 0x0B);
        assert_eq!(Command::from_code(0x7F), Command::Other(0x7F));
    }

    #[test]
    fn unknown_command_falls_back_to_debug() {
        let payload = vec![0x7F, 1, 2, 3];
        let decoded = decode(Model::Hm300, &payload, &[]).unwrap();
        assert_eq!(decoded, DecodedResponse::Debug(payload));
    }

    #[test]
    fn empty_payload_is_short_payload() {
        assert!(matches!(
            decode(Model::Hm300, &[], &[]).unwrap_err(),
            Error::ShortPayload { got: 0, need: 1 }
        ));
    }
}
