//! Host binary: load configuration, bring up an NRF24 radio over Linux SPI,
//! and run the poll loop against configured sinks.
//!
//! CLI argument parsing and config file loading beyond a single path
//! argument are explicit non-goals (§1/§6 of the core spec); this binary
//! does the minimum needed to exercise the library end to end.

use std::path::PathBuf;

use hoymiles_dtu::config::Config;
use hoymiles_dtu::poll::PollLoop;
use hoymiles_dtu::radio::Nrf24Radio;
use hoymiles_dtu::sinks::{HttpViewSink, OledSink};
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, SpidevDevice};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ahoy.yml"));

    let yaml = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", config_path.display()))?;
    let config = Config::from_yaml_str(&yaml)?;
    config.validate()?;

    let radio_config = config
        .nrf
        .first()
        .ok_or_else(|| anyhow::anyhow!("config has no nrf[] entries"))?;

    let mut spi = SpidevDevice::open("/dev/spidev0.0")?;
    spi.configure(
        &SpidevOptions::new()
            .max_speed_hz(radio_config.spispeed)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build(),
    )?;

    let mut chip = Chip::new("/dev/gpiochip0")?;
    let ce_line = chip.get_line(radio_config.ce_pin)?;
    let ce_handle = ce_line.request(LineRequestFlags::OUTPUT, 0, "hoymiles-dtu-ce")?;
    let ce = CdevPin::new(ce_handle)?;

    let radio = Nrf24Radio::new(spi, ce)?;

    let mut poll_loop = PollLoop::new(&config, radio)?;
    poll_loop.add_sink(Box::new(OledSink::default()));

    let http_sink = HttpViewSink::bind(([0, 0, 0, 0], 8080).into()).await?;
    poll_loop.add_sink(Box::new(http_sink));

    if let Some(mqtt) = config.mqtt.as_ref().filter(|c| !c.disabled) {
        poll_loop.add_async_sink(Box::new(hoymiles_dtu::sinks::MqttSink::new(mqtt)));
    }
    if let Some(influx) = config.influxdb.as_ref().filter(|c| !c.disabled) {
        poll_loop.add_async_sink(Box::new(hoymiles_dtu::sinks::InfluxSink::new(influx)));
    }

    poll_loop.run().await
}
