//! InfluxDB sink: writes decoded records as line-protocol points.

use tracing::warn;

use crate::config::InfluxConfig;
use crate::decoders::{HardwareInfoResponse, StatusResponse};
use crate::poll::{AsyncSink, Event, InverterMeta};

/// Writes one `status`/`hardware_info` measurement per record to the
/// configured `/write` endpoint.
pub struct InfluxSink {
    client: reqwest::Client,
    url: String,
}

impl InfluxSink {
    /// Build a sink targeting `config.url` (already carrying the database
    /// query string, e.g. `http://host:8086/write?db=hoymiles`).
    pub fn new(config: &InfluxConfig) -> Self {
        InfluxSink { client: reqwest::Client::new(), url: config.url.clone() }
    }

    async fn write_line(&self, line: String) {
        if let Err(e) = self.client.post(&self.url).body(line).send().await {
            warn!(error = %e, url = %self.url, "influxdb write failed");
        }
    }
}

fn escape_tag(value: &str) -> String {
    value.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

#[async_trait::async_trait]
impl AsyncSink for InfluxSink {
    async fn store_status(&mut self, status: &StatusResponse, meta: &InverterMeta) {
        let mut fields = format!(
            "temperature={},yield_today={}i,yield_total={}i,powerfactor={},event_count={}i",
            status.temperature, status.yield_today, status.yield_total, status.powerfactor, status.event_count
        );
        if let Some(efficiency) = status.efficiency {
            fields.push_str(&format!(",efficiency={efficiency}"));
        }
        for (i, phase) in status.phases.iter().enumerate() {
            fields.push_str(&format!(
                ",phase{i}_voltage={},phase{i}_current={},phase{i}_power={}",
                phase.voltage, phase.current, phase.power
            ));
        }
        for (i, string) in status.strings.iter().enumerate() {
            fields.push_str(&format!(
                ",string{i}_voltage={},string{i}_current={},string{i}_power={}",
                string.voltage, string.current, string.power
            ));
        }

        let line = format!(
            "status,inverter={},name={} {} {}",
            escape_tag(&meta.serial),
            escape_tag(&meta.name),
            fields,
            status.timestamp as u64 * 1_000_000_000,
        );
        self.write_line(line).await;
    }

    async fn store_info(&mut self, info: &HardwareInfoResponse, meta: &InverterMeta) {
        let line = format!(
            "hardware_info,inverter={} firmware_major={}i,firmware_minor={}i,firmware_patch={}i",
            escape_tag(&meta.serial),
            info.firmware_major,
            info.firmware_minor,
            info.firmware_patch,
        );
        self.write_line(line).await;
    }

    async fn on_event(&mut self, event: &Event) {
        let line = format!("dtu_event value=\"{event:?}\"");
        self.write_line(line).await;
    }
}
