//! NRF24L01(+) radio driver: register/SPI state machine, TX/RX channel
//! hopping, timed receive window (§4.5).

use std::thread::sleep;
use std::time::{Duration, Instant};

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::error::{Error, Result};

/// The channel-hop set used for both TX and RX (§3 invariant).
pub const HOP_SET: [u8; 5] = [3, 23, 40, 61, 75];

/// Default receive-window timeout: 500ms or first fragment, whichever first.
pub const DEFAULT_RX_TIMEOUT: Duration = Duration::from_micros(500_000);

// NRF24L01 register addresses (§6).
mod reg {
    pub const CONFIG: u8 = 0x00;
    pub const EN_AA: u8 = 0x01;
    pub const EN_RXADDR: u8 = 0x02;
    pub const SETUP_AW: u8 = 0x03;
    pub const SETUP_RETR: u8 = 0x04;
    pub const RF_CH: u8 = 0x05;
    pub const RF_SETUP: u8 = 0x06;
    pub const STATUS: u8 = 0x07;
    pub const RX_ADDR_P0: u8 = 0x0A;
    pub const TX_ADDR: u8 = 0x10;
    pub const RX_PW_P0: u8 = 0x11;
    pub const FIFO_STATUS: u8 = 0x17;
    pub const DYNPD: u8 = 0x1C;
    pub const FEATURE: u8 = 0x1D;
}

// SPI command bytes.
mod cmd {
    pub const R_REGISTER: u8 = 0x00;
    pub const W_REGISTER: u8 = 0x20;
    pub const R_RX_PAYLOAD: u8 = 0x61;
    pub const W_TX_PAYLOAD: u8 = 0xA0;
    pub const FLUSH_TX: u8 = 0xE1;
    pub const FLUSH_RX: u8 = 0xE2;
    pub const R_RX_PL_WID: u8 = 0x60;
    pub const NOP: u8 = 0xFF;
}

const STATUS_RX_DR: u8 = 1 << 6;
const STATUS_TX_DS: u8 = 1 << 5;
const STATUS_MAX_RT: u8 = 1 << 4;
const FIFO_STATUS_RX_EMPTY: u8 = 1 << 0;

/// Transmit power level, mirroring the `min|low|high|max` / `0..=3`
/// configuration option in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPower {
    /// RF24_PA_MIN: -18 dBm.
    Min,
    /// RF24_PA_LOW: -12 dBm.
    Low,
    /// RF24_PA_HIGH: -6 dBm.
    High,
    /// RF24_PA_MAX: 0 dBm.
    Max,
}

impl TxPower {
    fn rf_setup_bits(self) -> u8 {
        match self {
            TxPower::Min => 0b000,
            TxPower::Low => 0b010,
            TxPower::High => 0b100,
            TxPower::Max => 0b110,
        }
    }
}

impl TryFrom<u8> for TxPower {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TxPower::Min),
            1 => Ok(TxPower::Low),
            2 => Ok(TxPower::High),
            3 => Ok(TxPower::Max),
            other => Err(Error::ConfigInvalid(format!("txpower {other} out of range 0..=3"))),
        }
    }
}

impl std::str::FromStr for TxPower {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min" => Ok(TxPower::Min),
            "low" => Ok(TxPower::Low),
            "high" => Ok(TxPower::High),
            "max" => Ok(TxPower::Max),
            other => Err(Error::ConfigInvalid(format!("unknown txpower {other:?}"))),
        }
    }
}

/// One received fragment's raw payload along with the channels it crossed.
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    /// Raw ESB fragment bytes.
    pub payload: Vec<u8>,
    /// Channel the fragment was received on.
    pub rx_channel: u8,
    /// Channel the preceding transmit used.
    pub tx_channel: u8,
}

/// Thin radio interface the transaction engine depends on (§6).
///
/// Kept abstract so the transaction engine and poll loop can be exercised
/// against an in-memory fake without real SPI hardware.
pub trait Radio {
    /// Transmit `packet`, hopping the TX channel first. Returns whether the
    /// radio observed a Data-Sent (or ack-disabled success) status.
    fn transmit(&mut self, packet: &[u8], tx_power: TxPower) -> Result<bool>;

    /// Open a receive window of `timeout` (or until the first fragment, see
    /// `DEFAULT_RX_TIMEOUT`), returning every fragment observed.
    fn receive_batch(&mut self, timeout: Duration) -> Result<Vec<ReceivedPacket>>;
}

/// Register-level NRF24L01(+) driver bound to an `embedded-hal` 1.0 SPI
/// device and its chip-enable pin.
pub struct Nrf24Radio<SPI, CE> {
    spi: SPI,
    ce: CE,
    tx_channel_idx: usize,
    rx_channel_idx: usize,
    rx_channel_ack: bool,
    rx_error: u8,
}

impl<SPI, CE> Nrf24Radio<SPI, CE>
where
    SPI: SpiDevice,
    CE: OutputPin,
{
    /// Claim the radio device. Does not program any registers yet; the
    /// first `transmit`/`receive_batch` call configures the mode-specific
    /// registers, matching the original's "always reconfigure before use"
    /// behaviour rather than a fixed power-on profile.
    pub fn new(spi: SPI, ce: CE) -> Result<Self> {
        let mut radio = Nrf24Radio {
            spi,
            ce,
            tx_channel_idx: 2, // hop_set[2] == 40, the original's initial tx index
            rx_channel_idx: 0,
            rx_channel_ack: false,
            rx_error: 0,
        };
        radio.ce.set_low().map_err(|_| Error::RadioFailure("CE pin".into()))?;
        radio.write_register(reg::EN_AA, 0x00)?;
        radio.flush_tx()?;
        radio.flush_rx()?;
        Ok(radio)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        let header = cmd::W_REGISTER | (register & 0x1F);
        self.spi
            .transaction(&mut [Operation::Write(&[header, value])])
            .map_err(|_| Error::RadioFailure(format!("write register {register:#04x}")))
    }

    fn write_register_bytes(&mut self, register: u8, bytes: &[u8]) -> Result<()> {
        let header = cmd::W_REGISTER | (register & 0x1F);
        self.spi
            .transaction(&mut [Operation::Write(&[header]), Operation::Write(bytes)])
            .map_err(|_| Error::RadioFailure(format!("write register {register:#04x}")))
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        let header = cmd::R_REGISTER | (register & 0x1F);
        let mut value = [0u8];
        self.spi
            .transaction(&mut [Operation::Write(&[header]), Operation::Read(&mut value)])
            .map_err(|_| Error::RadioFailure(format!("read register {register:#04x}")))?;
        Ok(value[0])
    }

    fn flush_tx(&mut self) -> Result<()> {
        self.spi
            .write(&[cmd::FLUSH_TX])
            .map_err(|_| Error::RadioFailure("flush tx".into()))
    }

    fn flush_rx(&mut self) -> Result<()> {
        self.spi
            .write(&[cmd::FLUSH_RX])
            .map_err(|_| Error::RadioFailure("flush rx".into()))
    }

    fn clear_status(&mut self) -> Result<()> {
        self.write_register(reg::STATUS, STATUS_RX_DR | STATUS_TX_DS | STATUS_MAX_RT)
    }

    fn status(&mut self) -> Result<u8> {
        // The NRF24 returns STATUS on MISO while the command byte clocks out.
        let mut value = [cmd::NOP];
        self.spi
            .transaction(&mut [Operation::TransferInPlace(&mut value)])
            .map_err(|_| Error::RadioFailure("read status".into()))?;
        Ok(value[0])
    }

    fn rx_fifo_empty(&mut self) -> Result<bool> {
        let fifo = self.read_register(reg::FIFO_STATUS)?;
        Ok(fifo & FIFO_STATUS_RX_EMPTY != 0)
    }

    fn dynamic_payload_len(&mut self) -> Result<u8> {
        let mut value = [0u8];
        self.spi
            .transaction(&mut [Operation::Write(&[cmd::R_RX_PL_WID]), Operation::Read(&mut value)])
            .map_err(|_| Error::RadioFailure("read dynamic payload width".into()))?;
        Ok(value[0])
    }

    fn tx_channel(&self) -> u8 {
        HOP_SET[self.tx_channel_idx]
    }

    fn rx_channel(&self) -> u8 {
        HOP_SET[self.rx_channel_idx]
    }

    fn advance_tx_channel(&mut self) {
        self.tx_channel_idx = (self.tx_channel_idx + 1) % HOP_SET.len();
    }

    /// Advance the RX channel only while the current one has not yielded data.
    fn advance_rx_channel_if_unacked(&mut self) -> bool {
        if self.rx_channel_ack {
            return false;
        }
        self.rx_channel_idx = (self.rx_channel_idx + 1) % HOP_SET.len();
        true
    }
}

impl<SPI, CE> Radio for Nrf24Radio<SPI, CE>
where
    SPI: SpiDevice,
    CE: OutputPin,
{
    fn transmit(&mut self, packet: &[u8], tx_power: TxPower) -> Result<bool> {
        if packet.len() < 9 {
            return Err(Error::RadioFailure("packet too short to address".into()));
        }

        self.advance_tx_channel();

        // Pipe 0 reading address is the DTU address (for the ACK on this
        // exchange); the writing address is the inverter's.
        let mut pipe0_addr = [0x01u8; 5];
        pipe0_addr[1..].copy_from_slice(&packet[1..5]);
        let mut tx_addr = [0x01u8; 5];
        tx_addr[1..].copy_from_slice(&packet[5..9]);

        self.ce.set_low().map_err(|_| Error::RadioFailure("CE pin".into()))?;
        self.write_register_bytes(reg::RX_ADDR_P0, &pipe0_addr)?;
        self.write_register_bytes(reg::TX_ADDR, &tx_addr)?;
        self.write_register(reg::RF_CH, self.tx_channel())?;
        self.write_register(reg::EN_AA, 0x01)?;
        self.write_register(reg::SETUP_RETR, (15 << 4) | 0x0F)?;
        self.write_register(reg::RF_SETUP, 0x20 | tx_power.rf_setup_bits())?; // 0x20: 250kbps
        self.write_register(reg::DYNPD, 0x01)?;
        self.write_register(reg::FEATURE, 0x04)?; // EN_DPL
        self.write_register(reg::CONFIG, 0x0E)?; // PWR_UP, CRC 2 bytes, PRIM_RX=0
        self.clear_status()?;
        self.flush_tx()?;

        self.spi
            .transaction(&mut [Operation::Write(&[cmd::W_TX_PAYLOAD]), Operation::Write(packet)])
            .map_err(|_| Error::RadioFailure("write tx payload".into()))?;

        self.ce.set_high().map_err(|_| Error::RadioFailure("CE pin".into()))?;
        sleep(Duration::from_micros(10));

        let deadline = Instant::now() + Duration::from_millis(50);
        let outcome = loop {
            let status = self.status()?;
            if status & STATUS_TX_DS != 0 {
                break true;
            }
            if status & STATUS_MAX_RT != 0 {
                break false;
            }
            if Instant::now() >= deadline {
                break false;
            }
        };

        self.ce.set_low().map_err(|_| Error::RadioFailure("CE pin".into()))?;
        self.clear_status()?;
        Ok(outcome)
    }

    fn receive_batch(&mut self, timeout: Duration) -> Result<Vec<ReceivedPacket>> {
        self.write_register(reg::EN_AA, 0x00)?;
        self.write_register(reg::SETUP_RETR, 0x00)?;
        self.write_register(reg::DYNPD, 0x01)?;
        self.write_register(reg::FEATURE, 0x04)?;
        self.write_register(reg::RF_CH, self.rx_channel())?;
        self.write_register(reg::CONFIG, 0x0F)?; // PWR_UP, CRC 2 bytes, PRIM_RX=1
        self.ce.set_high().map_err(|_| Error::RadioFailure("CE pin".into()))?;

        let mut received = Vec::new();
        let mut deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if !self.rx_fifo_empty()? {
                self.rx_error = 0;
                self.rx_channel_ack = true;
                deadline = Instant::now() + timeout;

                let len = self.dynamic_payload_len()?;
                let mut payload = vec![0u8; len as usize];
                self.spi
                    .transaction(&mut [Operation::Write(&[cmd::R_RX_PAYLOAD]), Operation::Read(&mut payload)])
                    .map_err(|_| Error::RadioFailure("read rx payload".into()))?;
                self.clear_status()?;

                received.push(ReceivedPacket {
                    payload,
                    rx_channel: self.rx_channel(),
                    tx_channel: self.tx_channel(),
                });
            } else {
                self.rx_error += 1;
                if self.rx_error > 1 {
                    self.rx_channel_ack = false;
                }
                if self.advance_rx_channel_if_unacked() {
                    self.ce.set_low().map_err(|_| Error::RadioFailure("CE pin".into()))?;
                    self.write_register(reg::RF_CH, self.rx_channel())?;
                    self.ce.set_high().map_err(|_| Error::RadioFailure("CE pin".into()))?;
                }
            }
            sleep(Duration::from_millis(5));
        }

        self.ce.set_low().map_err(|_| Error::RadioFailure("CE pin".into()))?;

        if received.is_empty() {
            return Err(Error::Timeout);
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_set_is_the_five_fixed_channels() {
        assert_eq!(HOP_SET, [3, 23, 40, 61, 75]);
    }

    #[test]
    fn tx_power_from_str_round_trips_expected_labels() {
        use std::str::FromStr;
        assert_eq!(TxPower::from_str("min").unwrap(), TxPower::Min);
        assert_eq!(TxPower::from_str("low").unwrap(), TxPower::Low);
        assert_eq!(TxPower::from_str("high").unwrap(), TxPower::High);
        assert_eq!(TxPower::from_str("max").unwrap(), TxPower::Max);
        assert!(TxPower::from_str("medium").is_err());
    }

    #[test]
    fn tx_power_from_integer_0_to_3() {
        assert_eq!(TxPower::try_from(0).unwrap(), TxPower::Min);
        assert_eq!(TxPower::try_from(3).unwrap(), TxPower::Max);
        assert!(TxPower::try_from(4).is_err());
    }
}
