//! DTU poll loop: per-inverter scheduling, alarm backfill, sink fan-out (§4.8).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{Config, InverterConfig};
use crate::crc;
use crate::decoders::{self, DecodedResponse, Model, StringConfig};
use crate::error::Result;
use crate::radio::{Radio, TxPower};
use crate::transaction::Transaction;

/// Lifecycle events the poll loop reports to sinks (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// About to poll this inverter.
    InverterPolling { serial: String },
    /// The inverter's overall poll budget was exceeded.
    InverterTimeout { serial: String },
    /// Sunset reached; pausing until sunrise.
    SuntimesSleeping,
    /// Sunrise reached; resuming polling.
    SuntimesWakeup,
    /// Wi-Fi association came up (external collaborator event, surfaced here
    /// only as a pass-through — Wi-Fi itself is out of scope, §1).
    WifiUp,
}

/// Identity metadata handed alongside decoded records to sinks.
#[derive(Debug, Clone)]
pub struct InverterMeta {
    /// Inverter serial number.
    pub serial: String,
    /// Configured (or defaulted) display name.
    pub name: String,
}

/// Synchronous output sink (§6). Invoked directly from the poll task.
pub trait Sink: Send {
    /// Deliver a decoded status/telemetry record.
    fn store_status(&mut self, status: &decoders::StatusResponse, meta: &InverterMeta);
    /// Deliver a decoded hardware-info record.
    fn store_info(&mut self, info: &decoders::HardwareInfoResponse, meta: &InverterMeta);
    /// Deliver a lifecycle event.
    fn on_event(&mut self, event: &Event);
}

/// Asynchronous output sink, awaited with a 2s budget and dropped on
/// overrun (§5, §10.1 of SPEC_FULL). Used by sinks that perform network I/O
/// (MQTT, InfluxDB) without blocking the poll task.
#[async_trait::async_trait]
pub trait AsyncSink: Send {
    /// Deliver a decoded status/telemetry record.
    async fn store_status(&mut self, status: &decoders::StatusResponse, meta: &InverterMeta);
    /// Deliver a decoded hardware-info record.
    async fn store_info(&mut self, info: &decoders::HardwareInfoResponse, meta: &InverterMeta);
    /// Deliver a lifecycle event.
    async fn on_event(&mut self, event: &Event);
}

const ASYNC_SINK_BUDGET: Duration = Duration::from_secs(2);

/// Waits out sunset-to-sunrise pauses. Sunrise/sunset computation itself is
/// an external collaborator (§1); `NoSunset` is the default no-op.
#[async_trait::async_trait]
pub trait SunriseWaiter: Send {
    /// Whether the loop is currently past sunset and should pause. Checked
    /// before each tick so the poll loop can fan out `SuntimesSleeping`
    /// before blocking in `await_sunrise` and `SuntimesWakeup` after it
    /// returns (§6, §11 of SPEC_FULL.md).
    fn is_past_sunset(&self) -> bool;
    /// Block the poll loop until sunrise, if currently past sunset.
    async fn await_sunrise(&mut self);
}

/// No sunset handling configured: never pauses.
pub struct NoSunset;

#[async_trait::async_trait]
impl SunriseWaiter for NoSunset {
    fn is_past_sunset(&self) -> bool {
        false
    }

    async fn await_sunrise(&mut self) {}
}

struct InverterState {
    config: InverterConfig,
    model: Model,
    strings: Vec<StringConfig>,
    command_queue: VecDeque<Vec<u8>>,
    event_watermark: u32,
    first_tick: bool,
}

/// Per-inverter command queue is FIFO; inverters are iterated in config
/// order. A single radio serialises the air interface, so there is no
/// cross-inverter parallelism (§4.8).
pub struct PollLoop<R: Radio> {
    radio: Arc<Mutex<R>>,
    dtu_serial: String,
    interval: Duration,
    transmit_retries: u32,
    default_txpower: TxPower,
    inverters: Vec<InverterState>,
    sinks: Vec<Box<dyn Sink>>,
    async_sinks: Vec<Box<dyn AsyncSink>>,
    sunset: Box<dyn SunriseWaiter>,
}

impl<R: Radio + Send + 'static> PollLoop<R> {
    /// Build a poll loop from validated configuration.
    pub fn new(config: &Config, radio: R) -> Result<Self> {
        config.validate()?;

        let inverters = config
            .inverters
            .iter()
            .filter(|inv| !inv.disabled)
            .map(|inv| {
                let model = Model::from_serial(&inv.serial)?;
                let strings = inv
                    .strings
                    .iter()
                    .map(|s| StringConfig {
                        name: Some(s.name.clone()),
                        nominal_wp: Some(s.s_maxpower),
                    })
                    .collect();
                Ok(InverterState {
                    config: inv.clone(),
                    model,
                    strings,
                    command_queue: VecDeque::new(),
                    event_watermark: 0,
                    first_tick: true,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let default_txpower = config
            .nrf
            .first()
            .and_then(|nrf| nrf.txpower.parse().ok())
            .unwrap_or(TxPower::Max);

        Ok(PollLoop {
            radio: Arc::new(Mutex::new(radio)),
            dtu_serial: config.dtu.serial.clone(),
            interval: Duration::from_secs(config.interval),
            transmit_retries: config.transmit_retries,
            default_txpower,
            inverters,
            sinks: Vec::new(),
            async_sinks: Vec::new(),
            sunset: Box::new(NoSunset),
        })
    }

    /// Register a synchronous sink.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Register an asynchronous sink.
    pub fn add_async_sink(&mut self, sink: Box<dyn AsyncSink>) {
        self.async_sinks.push(sink);
    }

    /// Install a sunset handler, replacing the default no-op.
    pub fn set_sunset(&mut self, sunset: Box<dyn SunriseWaiter>) {
        self.sunset = sunset;
    }

    /// Report that Wi-Fi association came up, fanning out `Event::WifiUp`.
    /// Wi-Fi itself is an external collaborator out of scope (§1); this is
    /// the pass-through hook the caller drives from its own Wi-Fi state.
    pub async fn report_wifi_up(&mut self) {
        self.fan_out_event(&Event::WifiUp).await;
    }

    /// Run the poll loop forever (§4.8).
    pub async fn run(&mut self) -> ! {
        loop {
            if self.sunset.is_past_sunset() {
                self.fan_out_event(&Event::SuntimesSleeping).await;
                self.sunset.await_sunrise().await;
                self.fan_out_event(&Event::SuntimesWakeup).await;
            }

            let loop_start = Instant::now();

            for idx in 0..self.inverters.len() {
                let serial = self.inverters[idx].config.serial.clone();
                self.fan_out_event(&Event::InverterPolling { serial: serial.clone() }).await;

                let budget = Duration::from_secs(self.transmit_retries as u64 + 5);
                let radio = Arc::clone(&self.radio);
                let dtu_serial = self.dtu_serial.clone();
                let transmit_retries = self.transmit_retries;

                // Commands are queued before dispatch so the blocking task
                // owns (and can drain) the queue without re-borrowing self.
                self.enqueue_periodic_commands(idx);
                let mut pending: VecDeque<Vec<u8>> = self.inverters[idx].command_queue.drain(..).collect();

                let inverter_serial = self.inverters[idx].config.serial.clone();
                let tx_power = self.inverters[idx]
                    .config
                    .txpower
                    .clone()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(self.default_txpower);

                let outcome = tokio::task::spawn_blocking(move || {
                    let mut radio = radio.lock().expect("radio mutex poisoned");
                    let mut responses = Vec::new();
                    while let Some(payload) = pending.pop_front() {
                        let mut txn = Transaction::new(&mut *radio, &dtu_serial, &inverter_serial, tx_power)?;
                        responses.push(txn.execute(&payload, transmit_retries));
                    }
                    Ok::<_, crate::error::Error>(responses)
                });

                match tokio::time::timeout(budget, outcome).await {
                    Ok(Ok(Ok(responses))) => {
                        for response in responses {
                            self.handle_response(idx, response).await;
                        }
                    }
                    Ok(Ok(Err(e))) => warn!(error = %e, inverter = %serial, "transaction setup failed"),
                    Ok(Err(_join_err)) => warn!(inverter = %serial, "poll task panicked"),
                    Err(_timeout) => {
                        self.fan_out_event(&Event::InverterTimeout { serial: serial.clone() }).await;
                    }
                }

                self.inverters[idx].first_tick = false;
            }

            let elapsed = loop_start.elapsed();
            if self.interval > elapsed {
                tokio::time::sleep(self.interval - elapsed).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn enqueue_periodic_commands(&mut self, idx: usize) {
        let now = now_unix();
        let inverter = &mut self.inverters[idx];
        if inverter.first_tick {
            inverter
                .command_queue
                .push_back(build_command_payload(0x01, 0, now));
        }
        inverter
            .command_queue
            .push_back(build_command_payload(0x0B, 0, now));
    }

    async fn handle_response(&mut self, idx: usize, response: Option<Vec<u8>>) {
        let Some(payload) = response else { return };
        let model = self.inverters[idx].model;
        let strings = self.inverters[idx].strings.clone();

        let decoded = match decoders::decode(model, &payload, &strings) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "decode failed");
                return;
            }
        };

        let meta = InverterMeta {
            serial: self.inverters[idx].config.serial.clone(),
            name: self.inverters[idx].config.name.clone(),
        };

        match decoded {
            DecodedResponse::Status(status) => {
                if status.event_count as u32 > self.inverters[idx].event_watermark {
                    self.inverters[idx].event_watermark = status.event_count as u32;
                    let now = now_unix();
                    self.inverters[idx]
                        .command_queue
                        .push_back(build_command_payload(0x11, status.event_count, now));
                }

                for sink in &mut self.sinks {
                    sink.store_status(&status, &meta);
                }
                for sink in &mut self.async_sinks {
                    let _ = tokio::time::timeout(ASYNC_SINK_BUDGET, sink.store_status(&status, &meta)).await;
                }
                info!(inverter = %meta.serial, event_count = status.event_count, "status delivered");
            }
            DecodedResponse::HardwareInfo(info) => {
                for sink in &mut self.sinks {
                    sink.store_info(&info, &meta);
                }
                for sink in &mut self.async_sinks {
                    let _ = tokio::time::timeout(ASYNC_SINK_BUDGET, sink.store_info(&info, &meta)).await;
                }
            }
            DecodedResponse::Debug(_) => {}
        }
    }

    async fn fan_out_event(&mut self, event: &Event) {
        for sink in &mut self.sinks {
            sink.on_event(event);
        }
        for sink in &mut self.async_sinks {
            let _ = tokio::time::timeout(ASYNC_SINK_BUDGET, sink.on_event(event)).await;
        }
    }
}

fn now_unix() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Build an outbound command payload: `cmd(1) ‖ 0x00 ‖ timestamp_be32 ‖`
/// `0x0000 ‖ alarm_id_be16 ‖ 0x00000000 ‖ crc16_modbus_be(2)` (§3).
pub fn build_command_payload(cmd: u8, alarm_id: u16, timestamp: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(14);
    payload.push(cmd);
    payload.push(0x00);
    payload.extend_from_slice(&timestamp.to_be_bytes());
    payload.extend_from_slice(&[0, 0]);
    payload.extend_from_slice(&alarm_id.to_be_bytes());
    payload.extend_from_slice(&[0, 0, 0, 0]);

    let check = crc::crc16_modbus(&payload);
    payload.extend_from_slice(&check.to_be_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    #[test]
    fn command_payload_has_valid_trailing_crc() {
        let payload = build_command_payload(0x0B, 0, 0x6000_0000);
        let (body, trailer) = payload.split_at(payload.len() - 2);
        let expected = crc::crc16_modbus(body);
        assert_eq!(byteorder::BigEndian::read_u16(trailer), expected);
    }

    #[test]
    fn command_payload_is_14_bytes() {
        assert_eq!(build_command_payload(0x01, 0, 0).len(), 14);
    }

    struct NoopRadio;

    impl Radio for NoopRadio {
        fn transmit(&mut self, _packet: &[u8], _tx_power: TxPower) -> Result<bool> {
            Ok(true)
        }

        fn receive_batch(&mut self, _timeout: Duration) -> Result<Vec<crate::radio::ReceivedPacket>> {
            Err(crate::error::Error::Timeout)
        }
    }

    struct RecordingSink {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Sink for RecordingSink {
        fn store_status(&mut self, _status: &decoders::StatusResponse, _meta: &InverterMeta) {}
        fn store_info(&mut self, _info: &decoders::HardwareInfoResponse, _meta: &InverterMeta) {}
        fn on_event(&mut self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn minimal_config(nrf_txpower: Option<&str>) -> Config {
        let nrf_block = match nrf_txpower {
            Some(tp) => format!("nrf:\n  - txpower: \"{tp}\"\n"),
            None => String::new(),
        };
        let yaml = format!(
            "dtu:\n  serial: \"100000000000\"\n{nrf_block}inverters:\n  - serial: \"114100000001\"\n"
        );
        Config::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn default_txpower_comes_from_first_nrf_block() {
        let config = minimal_config(Some("high"));
        let poll = PollLoop::new(&config, NoopRadio).unwrap();
        assert_eq!(poll.default_txpower, TxPower::High);
    }

    #[test]
    fn default_txpower_falls_back_to_max_without_nrf_config() {
        let config = minimal_config(None);
        let poll = PollLoop::new(&config, NoopRadio).unwrap();
        assert_eq!(poll.default_txpower, TxPower::Max);
    }

    #[tokio::test]
    async fn report_wifi_up_fans_out_to_sinks() {
        let config = minimal_config(None);
        let mut poll = PollLoop::new(&config, NoopRadio).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        poll.add_sink(Box::new(RecordingSink { events: Arc::clone(&events) }));

        poll.report_wifi_up().await;

        assert_eq!(*events.lock().unwrap(), vec![Event::WifiUp]);
    }

    struct AlreadyPastSunset {
        woken: bool,
    }

    #[async_trait::async_trait]
    impl SunriseWaiter for AlreadyPastSunset {
        fn is_past_sunset(&self) -> bool {
            !self.woken
        }

        async fn await_sunrise(&mut self) {
            self.woken = true;
        }
    }

    #[tokio::test]
    async fn sunset_transition_fans_out_sleeping_then_wakeup() {
        let config = minimal_config(None);
        let mut poll = PollLoop::new(&config, NoopRadio).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        poll.add_sink(Box::new(RecordingSink { events: Arc::clone(&events) }));
        poll.set_sunset(Box::new(AlreadyPastSunset { woken: false }));

        // Mirrors the transition `run()` performs at the top of its loop.
        if poll.sunset.is_past_sunset() {
            poll.fan_out_event(&Event::SuntimesSleeping).await;
            poll.sunset.await_sunrise().await;
            poll.fan_out_event(&Event::SuntimesWakeup).await;
        }

        assert!(!poll.sunset.is_past_sunset());
        assert_eq!(*events.lock().unwrap(), vec![Event::SuntimesSleeping, Event::SuntimesWakeup]);
    }
}
