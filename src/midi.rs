//! MIDI SysEx utilities
//!
//! Provides System Exclusive framing, 7-bit value packing and hex formatting
//! shared by the MIDI-CI codec and the traffic sniffer.

/// SysEx start byte
pub const SYSEX_START: u8 = 0xF0;

/// SysEx end byte
pub const SYSEX_END: u8 = 0xF7;

/// Wrap a SysEx payload with F0/F7 delimiters
pub fn wrap_sysex(payload: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(payload.len() + 2);
    result.push(SYSEX_START);
    result.extend_from_slice(payload);
    result.push(SYSEX_END);
    result
}

/// Strip F0/F7 delimiters if present.
///
/// Returns the payload unchanged when it is not delimited, so callers can
/// hand over either classic MIDI 1.0 SysEx or SysEx7 UMP reassembled bytes.
pub fn strip_sysex(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[SYSEX_START]).unwrap_or(data);
    data.strip_suffix(&[SYSEX_END]).unwrap_or(data)
}

/// Returns true when every byte is a valid SysEx data byte (0x00-0x7F)
pub fn is_7bit_clean(data: &[u8]) -> bool {
    data.iter().all(|b| *b < 0x80)
}

/// 7-bit-per-byte little-endian value packing
pub mod convert {
    /// Largest value a 14-bit field can hold
    pub const MAX_14BIT: u16 = 0x3FFF;

    /// Largest value a 28-bit field can hold
    pub const MAX_28BIT: u32 = 0x0FFF_FFFF;

    /// Pack a 14-bit value into two 7-bit bytes (LSB first)
    pub fn to_14bit_bytes(value: u16) -> [u8; 2] {
        [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
    }

    /// Unpack two 7-bit bytes (LSB first) into a 14-bit value
    pub fn from_14bit_bytes(lsb: u8, msb: u8) -> u16 {
        (u16::from(msb & 0x7F) << 7) | u16::from(lsb & 0x7F)
    }

    /// Pack a 28-bit value into four 7-bit bytes (LSB first)
    pub fn to_28bit_bytes(value: u32) -> [u8; 4] {
        [
            (value & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
            ((value >> 14) & 0x7F) as u8,
            ((value >> 21) & 0x7F) as u8,
        ]
    }

    /// Unpack four 7-bit bytes (LSB first) into a 28-bit value
    pub fn from_28bit_bytes(bytes: [u8; 4]) -> u32 {
        bytes
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 7) | u32::from(b & 0x7F))
    }

    /// Read a 14-bit value at `offset`, if the slice is long enough
    pub fn read_14bit(data: &[u8], offset: usize) -> Option<u16> {
        let pair = data.get(offset..offset + 2)?;
        Some(from_14bit_bytes(pair[0], pair[1]))
    }

    /// Read a 28-bit value at `offset`, if the slice is long enough
    pub fn read_28bit(data: &[u8], offset: usize) -> Option<u32> {
        let quad = data.get(offset..offset + 4)?;
        Some(from_28bit_bytes([quad[0], quad[1], quad[2], quad[3]]))
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a hex dump ("F0 7E 7F ..." or "f07e7f...") into bytes
pub fn parse_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let compact = compact.replace("0x", "").replace("0X", "");
    hex::decode(compact)
}
