//! Profile Configuration
//!
//! Observable table of `(profile id, address) -> entry` shared by both roles:
//! - the responder owns its local profiles here
//! - the initiator mirrors each remote device's profiles in its connection
//!
//! Every mutation publishes one [`ProfileEvent`] to subscribers.

mod table;

use std::fmt;
use std::str::FromStr;

use crate::error::CiError;
use crate::midi;

pub use table::{ProfileEntry, ProfileEvent, ProfileTable};

/// 5-byte profile identifier.
///
/// Standard profiles start with `0x7E` followed by bank, number, version and
/// level; manufacturer specific profiles start with a manufacturer id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId([u8; 5]);

impl ProfileId {
    pub const WIRE_LEN: usize = 5;

    /// Leading byte of standard defined profiles
    pub const STANDARD: u8 = 0x7E;

    pub fn new(bytes: [u8; 5]) -> Result<Self, CiError> {
        if !midi::is_7bit_clean(&bytes) {
            return Err(CiError::NotSevenBitClean { field: "profile id" });
        }
        Ok(Self(bytes))
    }

    /// Standard defined profile
    pub fn standard(bank: u8, number: u8, version: u8, level: u8) -> Self {
        Self([
            Self::STANDARD,
            bank & 0x7F,
            number & 0x7F,
            version & 0x7F,
            level & 0x7F,
        ])
    }

    /// Read from the start of `data`, masking to 7 bits
    pub fn read_from(data: &[u8]) -> Option<Self> {
        let bytes = data.get(..Self::WIRE_LEN)?;
        let mut id = [0u8; 5];
        for (dst, src) in id.iter_mut().zip(bytes) {
            *dst = src & 0x7F;
        }
        Some(Self(id))
    }

    pub fn bytes(&self) -> [u8; 5] {
        self.0
    }

    pub fn is_standard(&self) -> bool {
        self.0[0] == Self::STANDARD
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e)
    }
}

impl fmt::Debug for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileId({})", self)
    }
}

impl FromStr for ProfileId {
    type Err = CiError;

    /// Accepts `7E:01:02:03:04`, `7E 01 02 03 04` or `7E01020304`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.replace(':', "");
        let bytes = midi::parse_hex(&cleaned)
            .map_err(|e| CiError::InvalidConfig(format!("profile id '{}': {}", s, e)))?;
        let id: [u8; 5] = bytes.as_slice().try_into().map_err(|_| {
            CiError::InvalidConfig(format!(
                "profile id '{}' must be exactly 5 bytes, got {}",
                s,
                bytes.len()
            ))
        })?;
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_profile() {
        let id = ProfileId::standard(0x01, 0x02, 0x03, 0x04);
        assert_eq!(id.bytes(), [0x7E, 1, 2, 3, 4]);
        assert!(id.is_standard());
        assert_eq!(id.to_string(), "7E:01:02:03:04");
    }

    #[test]
    fn test_parse_profile_id() {
        let a: ProfileId = "7E:01:02:03:04".parse().unwrap();
        let b: ProfileId = "7E 01 02 03 04".parse().unwrap();
        assert_eq!(a, b);
        assert!("7E:01".parse::<ProfileId>().is_err());
        assert!("80:01:02:03:04".parse::<ProfileId>().is_err());
    }

    #[test]
    fn test_rejects_high_bytes() {
        assert!(ProfileId::new([0x00, 0x21, 0x80, 0, 0]).is_err());
        assert_eq!(
            ProfileId::read_from(&[0xFE, 1, 2, 3, 4, 9]).unwrap().bytes(),
            [0x7E, 1, 2, 3, 4]
        );
        assert!(ProfileId::read_from(&[1, 2, 3]).is_none());
    }
}
