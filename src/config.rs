//! Read-only configuration types (§6, §10.3).
//!
//! Loading these from YAML (file I/O, env-var expansion, CLI path argument)
//! is the explicit non-goal from §1 — these types are deserialize targets
//! for an external loader, plus a thin convenience constructor used by
//! tests and the demo binary.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration (`ahoy.yml` in the original).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// This DTU's own identity.
    pub dtu: DtuConfig,
    /// Poll loop period, seconds. Defaults to 2.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Transmit retry budget per command; must be `> 0`.
    #[serde(default = "default_transmit_retries")]
    pub transmit_retries: u32,
    /// Radio configurations (one NRF24 module each).
    #[serde(default)]
    pub nrf: Vec<RadioConfig>,
    /// Inverters to poll.
    #[serde(default)]
    pub inverters: Vec<InverterConfig>,
    /// Sunset/sunrise pause configuration.
    pub sunset: Option<SunsetConfig>,
    /// MQTT sink configuration.
    pub mqtt: Option<MqttConfig>,
    /// InfluxDB sink configuration.
    pub influxdb: Option<InfluxConfig>,
    /// Volkszähler sink configuration.
    pub volkszaehler: Option<VolkszaehlerConfig>,
}

fn default_interval() -> u64 {
    2
}

fn default_transmit_retries() -> u32 {
    5
}

/// This DTU's own identity.
#[derive(Debug, Clone, Deserialize)]
pub struct DtuConfig {
    /// DTU serial number.
    pub serial: String,
    /// Human-readable DTU name, defaults to `"hoymiles-dtu"`.
    #[serde(default = "default_dtu_name")]
    pub name: String,
}

fn default_dtu_name() -> String {
    "hoymiles-dtu".to_string()
}

/// One NRF24 radio module's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    /// Chip-enable GPIO pin.
    #[serde(default = "default_ce_pin")]
    pub ce_pin: u32,
    /// Chip-select GPIO pin / SPI device index.
    #[serde(default)]
    pub cs_pin: u32,
    /// SPI bus speed, Hz.
    #[serde(default = "default_spi_speed")]
    pub spispeed: u32,
    /// Transmit power: `min`, `low`, `high`, or `max`.
    #[serde(default = "default_txpower")]
    pub txpower: String,
}

fn default_ce_pin() -> u32 {
    22
}

fn default_spi_speed() -> u32 {
    1_000_000
}

fn default_txpower() -> String {
    "max".to_string()
}

/// Per-string configuration under an inverter.
#[derive(Debug, Clone, Deserialize)]
pub struct StringSetting {
    /// Display name for the string.
    pub name: String,
    /// Nominal panel power in Wp, used for irradiation.
    pub s_maxpower: f32,
}

/// One inverter's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InverterConfig {
    /// Inverter serial number.
    pub serial: String,
    /// Human-readable name. Defaults to `"hoymiles"` per the original.
    #[serde(default = "default_inverter_name")]
    pub name: String,
    /// Skip this inverter entirely when polling.
    #[serde(default)]
    pub disabled: bool,
    /// Per-inverter TX power override.
    pub txpower: Option<String>,
    /// DC string configuration, in wire order.
    #[serde(default)]
    pub strings: Vec<StringSetting>,
    /// Per-inverter MQTT topic override.
    pub mqtt_topic: Option<String>,
}

fn default_inverter_name() -> String {
    "hoymiles".to_string()
}

/// Sunset/sunrise pause configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SunsetConfig {
    /// Disable sunset pausing entirely.
    #[serde(default)]
    pub disabled: bool,
    /// Site latitude.
    pub latitude: f64,
    /// Site longitude.
    pub longitude: f64,
    /// Site altitude, meters.
    pub altitude: Option<f64>,
}

/// MQTT sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Disable this sink.
    #[serde(default)]
    pub disabled: bool,
    /// Broker host.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Base topic.
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "hoymiles-dtu".to_string()
}

/// InfluxDB sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Disable this sink.
    #[serde(default)]
    pub disabled: bool,
    /// Line-protocol write endpoint, e.g. `http://localhost:8086/write?db=hoymiles`.
    pub url: String,
}

/// Volkszähler sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VolkszaehlerConfig {
    /// Disable this sink.
    #[serde(default)]
    pub disabled: bool,
    /// Middleware base URL.
    pub url: String,
}

impl Config {
    /// Parse a `Config` from a YAML string. File I/O and CLI wiring are
    /// left to the caller per §1/§6.
    pub fn from_yaml_str(yaml: &str) -> Result<Config> {
        serde_yaml::from_str(yaml).map_err(|e| Error::ConfigInvalid(e.to_string()))
    }

    /// Validate the fatal-at-startup invariants from §7.
    pub fn validate(&self) -> Result<()> {
        if self.transmit_retries == 0 {
            return Err(Error::ConfigInvalid(
                "transmit_retries must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let yaml = r#"
dtu:
  serial: "100000000000"
inverters:
  - serial: "114100000001"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.interval, 2);
        assert_eq!(config.transmit_retries, 5);
        assert_eq!(config.dtu.name, "hoymiles-dtu");
        assert_eq!(config.inverters[0].name, "hoymiles");
        config.validate().unwrap();
    }

    #[test]
    fn zero_transmit_retries_is_invalid() {
        let yaml = r#"
dtu:
  serial: "100000000000"
transmit_retries: 0
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
