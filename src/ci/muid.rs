//! Managed Unique ID
//!
//! A MUID is stored in its wire form: a 32-bit value whose four
//! little-endian bytes are each 7-bit clean. The equivalent 28-bit number is
//! available through [`Muid::from_u28`] / [`Muid::to_u28`].

use std::fmt;

use crate::error::CiError;
use crate::midi::convert;

/// Session identifier of a MIDI-CI device
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Muid(u32);

impl Muid {
    /// Broadcast destination
    pub const BROADCAST: Muid = Muid(0x7F7F_7F7F);

    /// First MUID of the range reserved for broadcast/future use
    const RESERVED_START: u32 = 0x7F7F_7F00;

    /// Create from the wire form, rejecting bytes above 0x7F
    pub fn new(raw: u32) -> Result<Self, CiError> {
        if raw & 0x8080_8080 != 0 {
            return Err(CiError::InvalidMuid(raw));
        }
        Ok(Self(raw))
    }

    /// Create from a 28-bit number, packed 7 bits per byte
    pub fn from_u28(value: u32) -> Result<Self, CiError> {
        if value > convert::MAX_28BIT {
            return Err(CiError::MuidOutOfRange(value));
        }
        Ok(Self(u32::from_le_bytes(convert::to_28bit_bytes(value))))
    }

    /// Generate a random, non-reserved MUID
    pub fn random() -> Self {
        loop {
            let raw = rand::random::<u32>() & 0x7F7F_7F7F;
            if raw < Self::RESERVED_START {
                return Self(raw);
            }
        }
    }

    /// Read from four wire bytes
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes) & 0x7F7F_7F7F)
    }

    /// Wire bytes, least significant first
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Wire form as a 32-bit value
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Equivalent 28-bit number
    pub fn to_u28(self) -> u32 {
        convert::from_28bit_bytes(self.to_bytes())
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// True if `self` is addressed by a message sent to `destination`
    pub fn accepts(self, destination: Muid) -> bool {
        destination == self || destination.is_broadcast()
    }
}

impl TryFrom<u32> for Muid {
    type Error = CiError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl fmt::Display for Muid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

impl fmt::Debug for Muid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Muid({:#010X})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_high_bytes() {
        assert!(Muid::new(0x0000_0080).is_err());
        assert!(Muid::new(0x8000_0000).is_err());
        assert!(Muid::try_from(0x0001_2345u32).is_ok());
        assert!(matches!(
            Muid::new(0x0006_789A),
            Err(CiError::InvalidMuid(0x0006_789A))
        ));
    }

    #[test]
    fn test_28bit_form() {
        let muid = Muid::from_u28(0x6789A).unwrap();
        assert_eq!(muid.to_bytes(), [0x1A, 0x71, 0x19, 0x00]);
        assert_eq!(muid.to_u28(), 0x6789A);
        assert!(Muid::from_u28(0x1000_0000).is_err());
        assert_eq!(Muid::from_u28(0x0FFF_FFFF).unwrap(), Muid::BROADCAST);
    }

    #[test]
    fn test_random_is_valid_and_not_reserved() {
        for _ in 0..1000 {
            let muid = Muid::random();
            assert!(Muid::new(muid.raw()).is_ok());
            assert!(muid.raw() < Muid::RESERVED_START);
        }
    }

    #[test]
    fn test_accepts() {
        let me = Muid::new(0x0102_0304).unwrap();
        let other = Muid::new(0x0102_0305).unwrap();
        assert!(me.accepts(me));
        assert!(me.accepts(Muid::BROADCAST));
        assert!(!me.accepts(other));
    }
}
