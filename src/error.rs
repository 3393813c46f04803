//! Error types for the MIDI-CI engine

use thiserror::Error;

use crate::ci::codec::DecodeError;
use crate::ci::Muid;
use crate::json::JsonError;
use crate::property::PropertyError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, CiError>;

/// Errors surfaced by the engine's public API.
///
/// Transport garbage never shows up here: it is dropped (and logged) inside
/// `process_input`. These are precondition violations and failures the
/// caller can act on.
#[derive(Debug, Error)]
pub enum CiError {
    /// MUID with a byte above 0x7F
    #[error("invalid MUID {0:#010X}: every byte must be 7-bit clean")]
    InvalidMuid(u32),

    /// 28-bit MUID value out of range
    #[error("MUID value {0:#X} does not fit in 28 bits")]
    MuidOutOfRange(u32),

    /// Product instance id above the 16 byte protocol limit
    #[error("product instance id is {len} bytes (max {max})")]
    ProductInstanceIdTooLong { len: usize, max: usize },

    /// Variable-length field longer than its length prefix can express
    #[error("{field} is {len} bytes, which exceeds its {max} byte limit")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Payload byte that cannot travel in a SysEx message
    #[error("{field} contains a byte above 0x7F")]
    NotSevenBitClean { field: &'static str },

    /// Set Profile On/Off for more than one channel
    #[error("profile requests spanning {requested} channels are not supported yet")]
    UnsupportedChannelCount { requested: u16 },

    /// Operation on a remote device the initiator has not discovered
    #[error("no connection to MUID {0}")]
    UnknownConnection(Muid),

    /// Remote device did not advertise the capability
    #[error("MUID {muid} does not support {capability}")]
    CapabilityNotSupported {
        muid: Muid,
        capability: &'static str,
    },

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Json(#[from] JsonError),

    #[error(transparent)]
    Property(#[from] PropertyError),
}
