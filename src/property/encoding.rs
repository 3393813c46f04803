//! Property body encodings
//!
//! - `ASCII`: body sent as-is, must already be 7-bit clean
//! - `Mcoded7`: groups of up to 7 bytes, each preceded by a control byte
//!   holding the high bits
//! - `zlib+Mcoded7`: zlib compressed, then Mcoded7 packed
//!
//! Mcoded7 decoding restores a payload byte as
//! `data[p] + ((control & (1 << p)) << 7)`. Only the first byte of each
//! group gets its high bit back; high bits at later positions are lost.
//! Data that is 7-bit clean (JSON bodies) is unaffected.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::PropertyError;
use crate::midi;

/// Body encoding negotiated through `mutualEncoding`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BodyEncoding {
    #[default]
    Ascii,
    Mcoded7,
    ZlibMcoded7,
}

impl BodyEncoding {
    pub fn name(self) -> &'static str {
        match self {
            BodyEncoding::Ascii => "ASCII",
            BodyEncoding::Mcoded7 => "Mcoded7",
            BodyEncoding::ZlibMcoded7 => "zlib+Mcoded7",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCII" => Some(BodyEncoding::Ascii),
            "Mcoded7" => Some(BodyEncoding::Mcoded7),
            "zlib+Mcoded7" => Some(BodyEncoding::ZlibMcoded7),
            _ => None,
        }
    }

    /// Encode a body for the wire
    pub fn encode(self, body: &[u8]) -> Result<Vec<u8>, PropertyError> {
        match self {
            BodyEncoding::Ascii => {
                if !midi::is_7bit_clean(body) {
                    return Err(PropertyError::BodyEncode(
                        "ASCII body contains bytes above 0x7F".to_string(),
                    ));
                }
                Ok(body.to_vec())
            }
            BodyEncoding::Mcoded7 => Ok(encode_mcoded7(body)),
            BodyEncoding::ZlibMcoded7 => Ok(encode_mcoded7(&compress(body)?)),
        }
    }

    /// Decode a body received from the wire
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>, PropertyError> {
        match self {
            BodyEncoding::Ascii => Ok(body.to_vec()),
            BodyEncoding::Mcoded7 => Ok(decode_mcoded7(body)),
            BodyEncoding::ZlibMcoded7 => decompress(&decode_mcoded7(body)),
        }
    }
}

impl fmt::Display for BodyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pack bytes into 7-bit clean Mcoded7 groups
pub fn encode_mcoded7(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len().div_ceil(7));
    for group in data.chunks(7) {
        let control = group
            .iter()
            .enumerate()
            .fold(0u8, |acc, (p, b)| acc | ((b & 0x80) >> (7 - p)));
        out.push(control);
        out.extend(group.iter().map(|b| b & 0x7F));
    }
    out
}

/// Unpack Mcoded7 groups
pub fn decode_mcoded7(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for group in data.chunks(8) {
        let Some((&control, payload)) = group.split_first() else {
            continue;
        };
        for (p, b) in payload.iter().enumerate() {
            let high = (u32::from(control & (1 << p)) << 7) as u8;
            out.push(b.wrapping_add(high));
        }
    }
    out
}

fn compress(data: &[u8]) -> Result<Vec<u8>, PropertyError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PropertyError::BodyEncode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PropertyError::BodyEncode(e.to_string()))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, PropertyError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PropertyError::BodyDecode(format!("zlib: {}", e)))?;
    Ok(out)
}
