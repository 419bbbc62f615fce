//! One request/response exchange with an inverter (§4.6).

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace, warn};

use crate::address::ser_to_hm_addr;
use crate::assembler;
use crate::error::{Error, Result};
use crate::frame::{self, Fragment};
use crate::radio::{Radio, TxPower, DEFAULT_RX_TIMEOUT};

/// Transaction state for one request/response cycle.
///
/// Strictly per-instance: the original's `tx_queue`/`scratch` were class
/// (module-level) defaults evidently meant to be per-instance (§9); here
/// they are plain fields with no sharing across transactions.
pub struct Transaction<'r, R: Radio> {
    radio: &'r mut R,
    tx_queue: Vec<Vec<u8>>,
    scratch: Vec<Fragment>,
    dtu_serial: String,
    inverter_serial: String,
    inverter_hm_addr: u32,
    tx_power: TxPower,
}

impl<'r, R: Radio> Transaction<'r, R> {
    /// Start a new transaction for one request/response exchange.
    pub fn new(radio: &'r mut R, dtu_serial: &str, inverter_serial: &str, tx_power: TxPower) -> Result<Self> {
        let inverter_hm_addr = BigEndian::read_u32(&ser_to_hm_addr(inverter_serial)?);
        Ok(Transaction {
            radio,
            tx_queue: Vec::new(),
            scratch: Vec::new(),
            dtu_serial: dtu_serial.to_string(),
            inverter_serial: inverter_serial.to_string(),
            inverter_hm_addr,
            tx_power,
        })
    }

    /// Queue a raw ESB fragment for transmission.
    pub fn queue_tx(&mut self, fragment: Vec<u8>) {
        self.tx_queue.push(fragment);
    }

    /// Queue a retransmit request at the head of the TX queue (§4.4).
    fn queue_retransmit_head(&mut self, frame_id: u8) -> Result<()> {
        let fragment = assembler::retransmit_request(frame_id, &self.dtu_serial, &self.inverter_serial)?;
        self.tx_queue.insert(0, fragment);
        Ok(())
    }

    /// Pop one queued fragment, transmit it, and collect everything the
    /// receive window yields. Returns `true` iff at least one fragment
    /// parsed successfully (CRC-8 failures are logged and discarded; the
    /// window keeps going).
    pub fn rxtx(&mut self) -> bool {
        if self.tx_queue.is_empty() {
            return false;
        }

        let packet = self.tx_queue.remove(0);
        if self.radio.transmit(&packet, self.tx_power).is_err() {
            return false;
        }

        let batch = match self.radio.receive_batch(DEFAULT_RX_TIMEOUT) {
            Ok(batch) => batch,
            Err(Error::Timeout) => return false,
            Err(_) => return false,
        };

        let mut got_any = false;
        for received in batch {
            match frame::parse_fragment(&received.payload, received.rx_channel) {
                Ok(fragment) => {
                    trace!(seq = fragment.seq, src = fragment.src, "received fragment");
                    self.scratch.push(fragment);
                    got_any = true;
                }
                Err(e) => warn!(error = %e, "dropping corrupt fragment"),
            }
        }
        got_any
    }

    /// Attempt to reassemble the response payload from the scratch buffer
    /// collected so far. On a missing fragment or terminal, enqueues the
    /// appropriate retransmit request before returning the error.
    pub fn get_payload(&mut self) -> Result<Vec<u8>> {
        match assembler::reassemble(&self.scratch, self.inverter_hm_addr) {
            Ok(payload) => Ok(payload),
            Err(Error::MissingTerminal) => {
                let seq = assembler::missing_terminal_retransmit_seq(&self.scratch, self.inverter_hm_addr);
                self.queue_retransmit_head(seq)?;
                Err(Error::MissingTerminal)
            }
            Err(Error::MissingFragment(i)) => {
                self.queue_retransmit_head(i)?;
                Err(Error::MissingFragment(i))
            }
            Err(other) => Err(other),
        }
    }

    /// Run the outer request/response control loop (§4.6): build a
    /// single-fragment request, retry up to `transmit_retries` times,
    /// draining `rxtx()` and attempting reassembly after each yield.
    pub fn execute(&mut self, payload: &[u8], transmit_retries: u32) -> Option<Vec<u8>> {
        if transmit_retries == 0 {
            return None;
        }

        for attempt in 0..transmit_retries {
            let request = match frame::compose_fragment(payload, 0x80, &self.dtu_serial, &self.inverter_serial) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "failed to compose request fragment");
                    return None;
                }
            };
            self.queue_tx(request);

            debug!(attempt, inverter = %self.inverter_serial, "tx attempt");

            while self.rxtx() {
                match self.get_payload() {
                    Ok(payload) => return Some(payload),
                    Err(_) => std::thread::sleep(Duration::from_millis(1)),
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::ReceivedPacket;
    use std::collections::VecDeque;

    struct MockRadio {
        responses: VecDeque<Vec<ReceivedPacket>>,
        transmits: usize,
    }

    impl MockRadio {
        fn new(responses: Vec<Vec<ReceivedPacket>>) -> Self {
            MockRadio {
                responses: responses.into(),
                transmits: 0,
            }
        }
    }

    impl Radio for MockRadio {
        fn transmit(&mut self, _packet: &[u8], _tx_power: TxPower) -> Result<bool> {
            self.transmits += 1;
            Ok(true)
        }

        fn receive_batch(&mut self, _timeout: Duration) -> Result<Vec<ReceivedPacket>> {
            match self.responses.pop_front() {
                Some(batch) if !batch.is_empty() => Ok(batch),
                _ => Err(Error::Timeout),
            }
        }
    }

    const DTU: &str = "100000000000";
    const INV: &str = "114100000001";

    fn single_fragment_response(payload: &[u8]) -> ReceivedPacket {
        let mut body = payload.to_vec();
        let crc = crate::crc::crc16_modbus(&body);
        body.push((crc >> 8) as u8);
        body.push(crc as u8);
        // bytes[1..5] (dst_serial=INV) is the fixed inverter-address slot
        // parse_fragment reads as `src`, matching a genuine response frame.
        let frame = frame::compose_fragment(&body, 0x81, DTU, INV).unwrap();
        ReceivedPacket {
            payload: frame,
            rx_channel: 3,
            tx_channel: 40,
        }
    }

    #[test]
    fn execute_succeeds_on_first_attempt() {
        let response = single_fragment_response(&[0x0B, 1, 2, 3]);
        let mut radio = MockRadio::new(vec![vec![response]]);
        let mut txn = Transaction::new(&mut radio, DTU, INV, TxPower::Max).unwrap();

        let payload = txn.execute(&[0x0B], 5);
        assert!(payload.is_some());
    }

    #[test]
    fn execute_exhausts_retries_when_radio_silent() {
        let mut radio = MockRadio::new(vec![]);
        let mut txn = Transaction::new(&mut radio, DTU, INV, TxPower::Max).unwrap();

        let payload = txn.execute(&[0x0B], 5);
        assert!(payload.is_none());
        assert_eq!(radio.transmits, 5);
    }

    #[test]
    fn execute_never_transmits_when_retries_is_zero() {
        let mut radio = MockRadio::new(vec![]);
        let mut txn = Transaction::new(&mut radio, DTU, INV, TxPower::Max).unwrap();

        assert!(txn.execute(&[0x0B], 0).is_none());
        assert_eq!(radio.transmits, 0);
    }
}
