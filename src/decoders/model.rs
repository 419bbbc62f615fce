//! Inverter model lookup by serial prefix (§3).

use crate::error::{Error, Result};

/// Inverter hardware model, determined by the serial's 4-digit prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    /// 1 phase, 1 string.
    Hm300,
    /// 1 phase, 2 strings.
    Hm600,
    /// 1 phase, 4 strings.
    Hm1200,
}

impl Model {
    /// Number of AC phases this model reports.
    pub fn phase_count(self) -> usize {
        1
    }

    /// Number of DC strings this model reports.
    pub fn string_count(self) -> usize {
        match self {
            Model::Hm300 => 1,
            Model::Hm600 => 2,
            Model::Hm1200 => 4,
        }
    }

    /// Resolve the model from an inverter serial's 4-digit prefix.
    pub fn from_serial(serial: &str) -> Result<Self> {
        if serial.len() < 4 {
            return Err(Error::BadSerial(serial.to_string()));
        }
        match &serial[..4] {
            "1121" => Ok(Model::Hm300),
            "1141" => Ok(Model::Hm600),
            "1161" => Ok(Model::Hm1200),
            _ => Err(Error::BadSerial(serial.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lookup_matches_known_prefixes() {
        assert_eq!(Model::from_serial("112100000007").unwrap(), Model::Hm300);
        assert_eq!(Model::from_serial("114100000008").unwrap(), Model::Hm600);
        assert_eq!(Model::from_serial("116100000009").unwrap(), Model::Hm1200);
        assert!(Model::from_serial("999900000000").is_err());
    }

    #[test]
    fn string_counts_match_model() {
        assert_eq!(Model::Hm300.string_count(), 1);
        assert_eq!(Model::Hm600.string_count(), 2);
        assert_eq!(Model::Hm1200.string_count(), 4);
    }
}
