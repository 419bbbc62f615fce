//! OLED display sink stub.
//!
//! Rendering to a physical display is out of scope (§1 non-goal); this sink
//! logs what would have been drawn, so a deployment without a display still
//! gets the same information on stdout/journald.

use tracing::info;

use crate::decoders::{HardwareInfoResponse, StatusResponse};
use crate::poll::{Event, InverterMeta, Sink};

/// Logs in place of driving a physical display.
#[derive(Default)]
pub struct OledSink;

impl Sink for OledSink {
    fn store_status(&mut self, status: &StatusResponse, meta: &InverterMeta) {
        info!(
            inverter = %meta.name,
            yield_today = status.yield_today,
            temperature = status.temperature,
            "oled: would display status"
        );
    }

    fn store_info(&mut self, info: &HardwareInfoResponse, meta: &InverterMeta) {
        tracing::info!(
            inverter = %meta.name,
            firmware = format!("{}.{}.{}", info.firmware_major, info.firmware_minor, info.firmware_patch),
            "oled: would display hardware info"
        );
    }

    fn on_event(&mut self, event: &Event) {
        info!(?event, "oled: would display event");
    }
}
