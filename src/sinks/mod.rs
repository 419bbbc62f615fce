//! Output sinks (§6): thin adapters between decoded records and the
//! systems an operator actually wants them in. None of these own decoding
//! or scheduling; they only format and forward what the poll loop hands them.

pub mod http;
pub mod influxdb;
pub mod mqtt;
pub mod oled;

pub use http::HttpViewSink;
pub use influxdb::InfluxSink;
pub use mqtt::MqttSink;
pub use oled::OledSink;
