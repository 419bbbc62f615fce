//! Error taxonomy for the transport core (§7).

use thiserror::Error;

/// Errors returned by the transport core.
///
/// Per-fragment and per-transaction errors are expected in normal operation
/// (a dropped ESB packet is not exceptional) and are handled by the caller
/// per the policy in §7; they are modelled as ordinary `Err` values rather
/// than panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Serial number too short or its last 8 characters are not valid hex.
    #[error("bad serial number: {0}")]
    BadSerial(String),

    /// A payload chunk handed to `compose_fragment` exceeds the 17-byte MTU.
    #[error("payload chunk of {0} bytes exceeds the 17-byte MTU")]
    MtuExceeded(usize),

    /// Fragment too short or its trailing CRC-8 does not match.
    #[error("frame corrupt: CRC-8 mismatch or undersized frame")]
    FrameCorrupt,

    /// Reassembled payload's trailing CRC-16 (Modbus) does not match.
    #[error("payload CRC-16 mismatch")]
    CrcMismatch,

    /// Fragment `seq == i` is missing from an otherwise-addressed scratch buffer.
    #[error("missing fragment {0}")]
    MissingFragment(u8),

    /// No fragment with `seq > 0x80` (the terminal fragment) was found.
    #[error("missing terminal fragment")]
    MissingTerminal,

    /// Payload shorter than the decoder's declared fixed layout.
    #[error("payload too short for decoder: got {got} bytes, need at least {need}")]
    ShortPayload {
        /// Bytes actually available.
        got: usize,
        /// Bytes the decoder's fixed layout requires.
        need: usize,
    },

    /// Receive window elapsed with nothing received at all.
    #[error("radio receive timed out")]
    Timeout,

    /// The radio driver failed to initialize or program its registers.
    #[error("radio failure: {0}")]
    RadioFailure(String),

    /// Configuration failed validation (fatal at startup, §7).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
