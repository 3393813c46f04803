//! MIDI-CI binary codec
//!
//! Pure functions between [`CiMessage`] and wire bytes (SysEx delimiters
//! excluded). Encoding validates every field the wire cannot carry and fails
//! instead of emitting corrupt data. Decoding checks the Universal SysEx /
//! MIDI-CI preamble and the per-kind minimum length before reading fields;
//! optional trailing fields added by later protocol versions fall back to
//! their defaults when absent.

use thiserror::Error;

use super::message::{
    AckNak, CiMessage, DiscoveryInquiry, DiscoveryReply, EndpointReply, Header, Message,
    MidiMessageReport, ProfileInquiryReply, PropertyCapabilities, PropertyChunk,
};
use super::{address, Categories, DeviceIdentity, Muid, SubId, HEADER_LEN, SUB_ID_CI, UNIVERSAL_SYSEX};
use crate::error::CiError;
use crate::midi::{self, convert};
use crate::profile::ProfileId;

/// Why an inbound byte sequence was not turned into a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not a Universal SysEx MIDI-CI message at all
    #[error("not a MIDI-CI message")]
    NotCapabilityInquiry,

    #[error("sub-id {sub_id:#04X}: message is {actual} bytes, need at least {expected}")]
    TooShort {
        sub_id: u8,
        expected: usize,
        actual: usize,
    },

    /// Valid header, unknown or unsupported sub-id. The header is kept so the
    /// receiver can address a NAK.
    #[error("unsupported MIDI-CI sub-id {sub_id:#04X}")]
    UnsupportedSubId { header: Header, sub_id: u8 },

    #[error("sub-id {sub_id:#04X}: {reason}")]
    Malformed { sub_id: u8, reason: &'static str },
}

/// Minimum wire length of each message kind, header included
pub fn min_len(sub_id: SubId) -> usize {
    let body = match sub_id {
        SubId::Discovery | SubId::DiscoveryReply => DeviceIdentity::WIRE_LEN + 1 + 4,
        SubId::EndpointInquiry => 1,
        SubId::EndpointReply => 3,
        SubId::InvalidateMuid => 4,
        SubId::Ack => 10,
        // A bare header NAK is still understood
        SubId::Nak => 0,
        SubId::ProfileInquiry => 0,
        SubId::ProfileInquiryReply => 4,
        SubId::SetProfileOn
        | SubId::SetProfileOff
        | SubId::ProfileEnabledReport
        | SubId::ProfileDisabledReport
        | SubId::ProfileAddedReport
        | SubId::ProfileRemovedReport => ProfileId::WIRE_LEN,
        SubId::ProfileDetailsInquiry => ProfileId::WIRE_LEN + 1,
        SubId::ProfileDetailsReply => ProfileId::WIRE_LEN + 3,
        SubId::ProfileSpecificData => ProfileId::WIRE_LEN + 4,
        SubId::PropertyCapabilitiesInquiry | SubId::PropertyCapabilitiesReply => 1,
        SubId::GetPropertyData
        | SubId::GetPropertyDataReply
        | SubId::SetPropertyData
        | SubId::SetPropertyDataReply
        | SubId::SubscribeProperty
        | SubId::SubscribePropertyReply
        | SubId::PropertyNotify => 9,
        SubId::ProcessInquiryCapabilities | SubId::MidiMessageReportEnd => 0,
        SubId::ProcessInquiryCapabilitiesReply => 1,
        SubId::MidiMessageReportInquiry => 5,
        SubId::MidiMessageReportReply => 4,
    };
    HEADER_LEN + body
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a message to wire bytes
pub fn encode(msg: &CiMessage) -> Result<Vec<u8>, CiError> {
    let mut out = Vec::with_capacity(64);
    let header = &msg.header;
    out.extend_from_slice(&[
        UNIVERSAL_SYSEX,
        header.address & 0x7F,
        SUB_ID_CI,
        msg.sub_id().as_byte(),
        header.version & 0x7F,
    ]);
    out.extend_from_slice(&header.source.to_bytes());
    out.extend_from_slice(&header.destination.to_bytes());

    match &msg.message {
        Message::Discovery(d) => {
            d.identity.write_to(&mut out);
            out.push(d.categories.bits());
            push_28bit(&mut out, d.max_sysex_size, "max SysEx size")?;
            out.push(d.output_path_id & 0x7F);
        }
        Message::DiscoveryReply(d) => {
            d.identity.write_to(&mut out);
            out.push(d.categories.bits());
            push_28bit(&mut out, d.max_sysex_size, "max SysEx size")?;
            out.push(d.output_path_id & 0x7F);
            out.push(d.function_block & 0x7F);
        }
        Message::EndpointInquiry { status } => out.push(status & 0x7F),
        Message::EndpointReply(r) => {
            out.push(r.status & 0x7F);
            push_var(&mut out, &r.data, "endpoint data")?;
        }
        Message::InvalidateMuid { target } => out.extend_from_slice(&target.to_bytes()),
        Message::Ack(a) | Message::Nak(a) => {
            out.push(a.original_sub_id & 0x7F);
            out.push(a.status_code & 0x7F);
            out.push(a.status_data & 0x7F);
            out.extend(a.details.iter().map(|b| b & 0x7F));
            push_var(&mut out, &a.message, "ACK/NAK message")?;
        }
        Message::ProfileInquiry
        | Message::ProcessInquiryCapabilities
        | Message::MidiMessageReportEnd => {}
        Message::ProfileInquiryReply(r) => {
            push_profile_list(&mut out, &r.enabled)?;
            push_profile_list(&mut out, &r.disabled)?;
        }
        Message::SetProfileOn { profile, channels }
        | Message::ProfileEnabledReport { profile, channels }
        | Message::ProfileDisabledReport { profile, channels } => {
            out.extend_from_slice(&profile.bytes());
            push_14bit(&mut out, usize::from(*channels), "channel count")?;
        }
        Message::SetProfileOff { profile } => {
            out.extend_from_slice(&profile.bytes());
            out.extend_from_slice(&[0, 0]);
        }
        Message::ProfileAddedReport { profile } | Message::ProfileRemovedReport { profile } => {
            out.extend_from_slice(&profile.bytes());
        }
        Message::ProfileDetailsInquiry { profile, target } => {
            out.extend_from_slice(&profile.bytes());
            out.push(target & 0x7F);
        }
        Message::ProfileDetailsReply {
            profile,
            target,
            data,
        } => {
            out.extend_from_slice(&profile.bytes());
            out.push(target & 0x7F);
            push_var(&mut out, data, "profile details")?;
        }
        Message::ProfileSpecificData { profile, data } => {
            out.extend_from_slice(&profile.bytes());
            let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
            push_28bit(&mut out, len, "profile specific data")?;
            push_clean(&mut out, data, "profile specific data")?;
        }
        Message::PropertyCapabilitiesInquiry(c) | Message::PropertyCapabilitiesReply(c) => {
            out.push(c.max_simultaneous_requests & 0x7F);
            out.push(c.major_version & 0x7F);
            out.push(c.minor_version & 0x7F);
        }
        Message::GetPropertyData(c)
        | Message::GetPropertyDataReply(c)
        | Message::SetPropertyData(c)
        | Message::SetPropertyDataReply(c)
        | Message::SubscribeProperty(c)
        | Message::SubscribePropertyReply(c)
        | Message::PropertyNotify(c) => {
            out.push(c.request_id & 0x7F);
            push_var(&mut out, &c.header, "property header")?;
            push_14bit(&mut out, usize::from(c.num_chunks), "chunk count")?;
            push_14bit(&mut out, usize::from(c.chunk_index), "chunk index")?;
            push_var(&mut out, &c.data, "property data")?;
        }
        Message::ProcessInquiryCapabilitiesReply { features } => out.push(features & 0x7F),
        Message::MidiMessageReportInquiry(r) => {
            out.extend_from_slice(&[
                r.message_data_control & 0x7F,
                r.system_messages & 0x7F,
                0,
                r.channel_controller_messages & 0x7F,
                r.note_data_messages & 0x7F,
            ]);
        }
        Message::MidiMessageReportReply(r) => {
            out.extend_from_slice(&[
                r.system_messages & 0x7F,
                0,
                r.channel_controller_messages & 0x7F,
                r.note_data_messages & 0x7F,
            ]);
        }
    }
    Ok(out)
}

fn push_14bit(out: &mut Vec<u8>, value: usize, field: &'static str) -> Result<(), CiError> {
    let max = usize::from(convert::MAX_14BIT);
    if value > max {
        return Err(CiError::FieldTooLong {
            field,
            len: value,
            max,
        });
    }
    out.extend_from_slice(&convert::to_14bit_bytes(value as u16));
    Ok(())
}

fn push_28bit(out: &mut Vec<u8>, value: u32, field: &'static str) -> Result<(), CiError> {
    if value > convert::MAX_28BIT {
        return Err(CiError::FieldTooLong {
            field,
            len: value as usize,
            max: convert::MAX_28BIT as usize,
        });
    }
    out.extend_from_slice(&convert::to_28bit_bytes(value));
    Ok(())
}

fn push_clean(out: &mut Vec<u8>, data: &[u8], field: &'static str) -> Result<(), CiError> {
    if !midi::is_7bit_clean(data) {
        return Err(CiError::NotSevenBitClean { field });
    }
    out.extend_from_slice(data);
    Ok(())
}

/// 14-bit length prefix followed by 7-bit clean bytes
fn push_var(out: &mut Vec<u8>, data: &[u8], field: &'static str) -> Result<(), CiError> {
    push_14bit(out, data.len(), field)?;
    push_clean(out, data, field)
}

fn push_profile_list(out: &mut Vec<u8>, ids: &[ProfileId]) -> Result<(), CiError> {
    push_14bit(out, ids.len(), "profile list")?;
    for id in ids {
        out.extend_from_slice(&id.bytes());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Read the common header and raw sub-id #2
pub fn decode_header(data: &[u8]) -> Result<(Header, u8), DecodeError> {
    if data.len() < 4 || data[0] != UNIVERSAL_SYSEX || data[2] != SUB_ID_CI {
        return Err(DecodeError::NotCapabilityInquiry);
    }
    let sub_id = data[3];
    if data.len() < HEADER_LEN {
        return Err(DecodeError::TooShort {
            sub_id,
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let header = Header {
        address: data[1] & 0x7F,
        version: data[4] & 0x7F,
        source: Muid::from_bytes([data[5], data[6], data[7], data[8]]),
        destination: Muid::from_bytes([data[9], data[10], data[11], data[12]]),
    };
    Ok((header, sub_id))
}

/// Decode wire bytes into a message
pub fn decode(data: &[u8]) -> Result<CiMessage, DecodeError> {
    let (header, raw_sub_id) = decode_header(data)?;
    let sub_id = SubId::from_byte(raw_sub_id).ok_or(DecodeError::UnsupportedSubId {
        header,
        sub_id: raw_sub_id,
    })?;
    let expected = min_len(sub_id);
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            sub_id: raw_sub_id,
            expected,
            actual: data.len(),
        });
    }

    let mut r = Reader {
        data: &data[HEADER_LEN..],
        pos: 0,
        sub_id: raw_sub_id,
    };
    let message = match sub_id {
        SubId::Discovery => Message::Discovery(DiscoveryInquiry {
            identity: r.identity()?,
            categories: Categories::from_bits(r.u8()?),
            max_sysex_size: r.u28()?,
            output_path_id: r.u8_or(0),
        }),
        SubId::DiscoveryReply => Message::DiscoveryReply(DiscoveryReply {
            identity: r.identity()?,
            categories: Categories::from_bits(r.u8()?),
            max_sysex_size: r.u28()?,
            output_path_id: r.u8_or(0),
            function_block: r.u8_or(address::FUNCTION_BLOCK),
        }),
        SubId::EndpointInquiry => Message::EndpointInquiry { status: r.u8()? },
        SubId::EndpointReply => Message::EndpointReply(EndpointReply {
            status: r.u8()?,
            data: r.var()?,
        }),
        SubId::InvalidateMuid => Message::InvalidateMuid { target: r.muid()? },
        SubId::Ack => Message::Ack(r.ack_nak()?),
        SubId::Nak => {
            if r.remaining() == 0 {
                Message::Nak(AckNak::new(0, 0))
            } else {
                Message::Nak(r.ack_nak()?)
            }
        }
        SubId::ProfileInquiry => Message::ProfileInquiry,
        SubId::ProfileInquiryReply => Message::ProfileInquiryReply(ProfileInquiryReply {
            enabled: r.profile_list()?,
            disabled: r.profile_list()?,
        }),
        SubId::SetProfileOn => Message::SetProfileOn {
            profile: r.profile()?,
            channels: r.u14_or(1)?,
        },
        SubId::SetProfileOff => Message::SetProfileOff {
            profile: r.profile()?,
        },
        SubId::ProfileEnabledReport => Message::ProfileEnabledReport {
            profile: r.profile()?,
            channels: r.u14_or(1)?,
        },
        SubId::ProfileDisabledReport => Message::ProfileDisabledReport {
            profile: r.profile()?,
            channels: r.u14_or(1)?,
        },
        SubId::ProfileAddedReport => Message::ProfileAddedReport {
            profile: r.profile()?,
        },
        SubId::ProfileRemovedReport => Message::ProfileRemovedReport {
            profile: r.profile()?,
        },
        SubId::ProfileDetailsInquiry => Message::ProfileDetailsInquiry {
            profile: r.profile()?,
            target: r.u8()?,
        },
        SubId::ProfileDetailsReply => Message::ProfileDetailsReply {
            profile: r.profile()?,
            target: r.u8()?,
            data: r.var()?,
        },
        SubId::ProfileSpecificData => {
            let profile = r.profile()?;
            let len = r.u28()? as usize;
            Message::ProfileSpecificData {
                profile,
                data: r.bytes(len)?.to_vec(),
            }
        }
        SubId::PropertyCapabilitiesInquiry => {
            Message::PropertyCapabilitiesInquiry(r.property_capabilities()?)
        }
        SubId::PropertyCapabilitiesReply => {
            Message::PropertyCapabilitiesReply(r.property_capabilities()?)
        }
        SubId::GetPropertyData => Message::GetPropertyData(r.chunk()?),
        SubId::GetPropertyDataReply => Message::GetPropertyDataReply(r.chunk()?),
        SubId::SetPropertyData => Message::SetPropertyData(r.chunk()?),
        SubId::SetPropertyDataReply => Message::SetPropertyDataReply(r.chunk()?),
        SubId::SubscribeProperty => Message::SubscribeProperty(r.chunk()?),
        SubId::SubscribePropertyReply => Message::SubscribePropertyReply(r.chunk()?),
        SubId::PropertyNotify => Message::PropertyNotify(r.chunk()?),
        SubId::ProcessInquiryCapabilities => Message::ProcessInquiryCapabilities,
        SubId::ProcessInquiryCapabilitiesReply => {
            Message::ProcessInquiryCapabilitiesReply { features: r.u8()? }
        }
        SubId::MidiMessageReportInquiry => {
            let message_data_control = r.u8()?;
            let system_messages = r.u8()?;
            let _reserved = r.u8()?;
            Message::MidiMessageReportInquiry(MidiMessageReport {
                message_data_control,
                system_messages,
                channel_controller_messages: r.u8()?,
                note_data_messages: r.u8()?,
            })
        }
        SubId::MidiMessageReportReply => {
            let system_messages = r.u8()?;
            let _reserved = r.u8()?;
            Message::MidiMessageReportReply(MidiMessageReport {
                message_data_control: 0,
                system_messages,
                channel_controller_messages: r.u8()?,
                note_data_messages: r.u8()?,
            })
        }
        SubId::MidiMessageReportEnd => Message::MidiMessageReportEnd,
    };
    Ok(CiMessage { header, message })
}

/// Cursor over the message body
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    sub_id: u8,
}

impl<'a> Reader<'a> {
    fn truncated(&self) -> DecodeError {
        DecodeError::Malformed {
            sub_id: self.sub_id,
            reason: "field runs past the end of the message",
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        let slice = self.data.get(self.pos..end).ok_or_else(|| self.truncated())?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0] & 0x7F)
    }

    fn u8_or(&mut self, default: u8) -> u8 {
        self.u8().unwrap_or(default)
    }

    fn u14(&mut self) -> Result<u16, DecodeError> {
        let b = self.bytes(2)?;
        Ok(convert::from_14bit_bytes(b[0], b[1]))
    }

    fn u14_or(&mut self, default: u16) -> Result<u16, DecodeError> {
        match self.remaining() {
            0 => Ok(default),
            _ => self.u14(),
        }
    }

    fn u28(&mut self) -> Result<u32, DecodeError> {
        let b = self.bytes(4)?;
        Ok(convert::from_28bit_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn var(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = usize::from(self.u14()?);
        Ok(self.bytes(len)?.to_vec())
    }

    fn muid(&mut self) -> Result<Muid, DecodeError> {
        let b = self.bytes(4)?;
        Ok(Muid::from_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn identity(&mut self) -> Result<DeviceIdentity, DecodeError> {
        let block = self.bytes(DeviceIdentity::WIRE_LEN)?;
        DeviceIdentity::read_from(block).ok_or_else(|| self.truncated())
    }

    fn profile(&mut self) -> Result<ProfileId, DecodeError> {
        let block = self.bytes(ProfileId::WIRE_LEN)?;
        ProfileId::read_from(block).ok_or_else(|| self.truncated())
    }

    fn profile_list(&mut self) -> Result<Vec<ProfileId>, DecodeError> {
        let count = usize::from(self.u14()?);
        (0..count).map(|_| self.profile()).collect()
    }

    fn ack_nak(&mut self) -> Result<AckNak, DecodeError> {
        let original_sub_id = self.u8()?;
        let status_code = self.u8()?;
        let status_data = self.u8()?;
        let mut details = [0u8; 5];
        details.copy_from_slice(self.bytes(5)?);
        let message = if self.remaining() >= 2 {
            self.var()?
        } else {
            Vec::new()
        };
        Ok(AckNak {
            original_sub_id,
            status_code,
            status_data,
            details,
            message,
        })
    }

    fn property_capabilities(&mut self) -> Result<PropertyCapabilities, DecodeError> {
        Ok(PropertyCapabilities {
            max_simultaneous_requests: self.u8()?,
            major_version: self.u8_or(0),
            minor_version: self.u8_or(0),
        })
    }

    fn chunk(&mut self) -> Result<PropertyChunk, DecodeError> {
        let request_id = self.u8()?;
        let header = self.var()?;
        let num_chunks = self.u14()?;
        let chunk_index = self.u14()?;
        let data = self.var()?;
        Ok(PropertyChunk {
            request_id,
            header,
            num_chunks,
            chunk_index,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{nak, CI_VERSION, DEFAULT_MAX_SYSEX_SIZE};
    use proptest::prelude::*;

    fn initiator() -> Muid {
        Muid::from_u28(0x12345).unwrap()
    }

    fn responder() -> Muid {
        Muid::from_u28(0x6789A).unwrap()
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new([0x00, 0x21, 0x1D], 0x0102, 0x0304, [1, 0, 0, 0])
    }

    fn round_trip(message: Message) {
        let msg = CiMessage::new(address::FUNCTION_BLOCK, initiator(), responder(), message);
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_discovery_layout() {
        let msg = CiMessage::new(
            address::FUNCTION_BLOCK,
            initiator(),
            Muid::BROADCAST,
            Message::Discovery(DiscoveryInquiry {
                identity: identity(),
                categories: Categories::PROFILE_CONFIGURATION | Categories::PROPERTY_EXCHANGE,
                max_sysex_size: DEFAULT_MAX_SYSEX_SIZE,
                output_path_id: 0,
            }),
        );
        let bytes = encode(&msg).unwrap();
        assert_eq!(
            &bytes[..13],
            &[0x7E, 0x7F, 0x0D, 0x70, CI_VERSION, 0x45, 0x46, 0x04, 0x00, 0x7F, 0x7F, 0x7F, 0x7F]
        );
        assert_eq!(bytes.len(), 30);
        assert_eq!(bytes[24], 0x0C);
        // 4096 as 28-bit
        assert_eq!(&bytes[25..29], &[0x00, 0x20, 0x00, 0x00]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_discovery_v1_defaults() {
        // 29 byte discovery without the output path id
        let mut bytes = vec![0x7E, 0x7F, 0x0D, 0x70, 0x01];
        bytes.extend_from_slice(&initiator().to_bytes());
        bytes.extend_from_slice(&Muid::BROADCAST.to_bytes());
        identity().write_to(&mut bytes);
        bytes.push(0x04);
        bytes.extend_from_slice(&[0x00, 0x20, 0x00, 0x00]);
        assert_eq!(bytes.len(), 29);

        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.header.version, 1);
        match msg.message {
            Message::Discovery(d) => {
                assert_eq!(d.output_path_id, 0);
                assert_eq!(d.max_sysex_size, 4096);
            }
            other => panic!("unexpected {:?}", other),
        }

        let reply_bytes = {
            let mut b = bytes.clone();
            b[3] = 0x71;
            b
        };
        match decode(&reply_bytes).unwrap().message {
            Message::DiscoveryReply(r) => assert_eq!(r.function_block, 0x7F),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_foreign_and_short_messages() {
        assert_eq!(decode(&[]), Err(DecodeError::NotCapabilityInquiry));
        assert_eq!(
            decode(&[0x7E, 0x7F, 0x06, 0x01]),
            Err(DecodeError::NotCapabilityInquiry)
        );
        assert!(matches!(
            decode(&[0x7E, 0x7F, 0x0D, 0x70, 0x02, 0, 0]),
            Err(DecodeError::TooShort { expected: 13, .. })
        ));

        let msg = CiMessage::new(
            0x7F,
            initiator(),
            responder(),
            Message::InvalidateMuid { target: responder() },
        );
        let bytes = encode(&msg).unwrap();
        assert!(matches!(
            decode(&bytes[..15]),
            Err(DecodeError::TooShort {
                sub_id: 0x7E,
                expected: 17,
                actual: 15
            })
        ));
    }

    #[test]
    fn test_unsupported_sub_id_keeps_header() {
        let mut bytes = vec![0x7E, 0x05, 0x0D, 0x10, 0x02];
        bytes.extend_from_slice(&initiator().to_bytes());
        bytes.extend_from_slice(&responder().to_bytes());
        match decode(&bytes) {
            Err(DecodeError::UnsupportedSubId { header, sub_id }) => {
                assert_eq!(sub_id, 0x10);
                assert_eq!(header.source, initiator());
                assert_eq!(header.destination, responder());
                assert_eq!(header.address, 0x05);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_header_only_nak() {
        let mut bytes = vec![0x7E, 0x7F, 0x0D, 0x7F, 0x02];
        bytes.extend_from_slice(&initiator().to_bytes());
        bytes.extend_from_slice(&responder().to_bytes());
        assert_eq!(decode(&bytes).unwrap().message, Message::Nak(AckNak::new(0, 0)));
    }

    #[test]
    fn test_nak_layout() {
        let nak = AckNak::new(0x10, nak::MESSAGE_NOT_SUPPORTED).with_message("no");
        let msg = CiMessage::new(0x7F, responder(), initiator(), Message::Nak(nak));
        let bytes = encode(&msg).unwrap();
        assert_eq!(&bytes[13..16], &[0x10, 0x01, 0x00]);
        assert_eq!(&bytes[21..], &[0x02, 0x00, b'n', b'o']);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_property_chunk_layout() {
        let chunk = PropertyChunk {
            request_id: 3,
            header: br#"{"resource":"DeviceInfo"}"#.to_vec(),
            num_chunks: 2,
            chunk_index: 1,
            data: b"abc".to_vec(),
        };
        let msg = CiMessage::new(
            0x7F,
            initiator(),
            responder(),
            Message::GetPropertyDataReply(chunk.clone()),
        );
        let bytes = encode(&msg).unwrap();
        let header_len = chunk.header.len();
        assert_eq!(bytes[13], 3);
        assert_eq!(bytes[14] as usize, header_len);
        let after_header = 16 + header_len;
        assert_eq!(&bytes[after_header..after_header + 6], &[2, 0, 1, 0, 3, 0]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_property_chunk_overlong_length_is_malformed() {
        let chunk = PropertyChunk::single(1, b"{}".to_vec(), Vec::new());
        let msg = CiMessage::new(0x7F, initiator(), responder(), Message::GetPropertyData(chunk));
        let mut bytes = encode(&msg).unwrap();
        // Claim a 100 byte header
        bytes[14] = 100;
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_encode_rejects_invalid_fields() {
        let msg = CiMessage::new(
            0x7F,
            initiator(),
            responder(),
            Message::EndpointReply(EndpointReply {
                status: 0,
                data: vec![0x80],
            }),
        );
        assert!(matches!(encode(&msg), Err(CiError::NotSevenBitClean { .. })));

        let msg = CiMessage::new(
            0x7F,
            initiator(),
            responder(),
            Message::SetPropertyData(PropertyChunk::single(1, vec![b'a'; 0x4000], Vec::new())),
        );
        assert!(matches!(
            encode(&msg),
            Err(CiError::FieldTooLong { len: 0x4000, .. })
        ));
    }

    #[test]
    fn test_round_trip_every_kind() {
        let profile = ProfileId::standard(0x21, 0x00, 0x01, 0x01);
        let chunk = PropertyChunk::single(7, br#"{"resource":"X"}"#.to_vec(), b"[1,2]".to_vec());
        let report = MidiMessageReport {
            message_data_control: 0x7F,
            system_messages: 0x01,
            channel_controller_messages: 0x3F,
            note_data_messages: 0x1F,
        };
        let caps = PropertyCapabilities {
            max_simultaneous_requests: 4,
            major_version: 0,
            minor_version: 0,
        };
        let messages = vec![
            Message::DiscoveryReply(DiscoveryReply {
                identity: identity(),
                categories: Categories::PROCESS_INQUIRY,
                max_sysex_size: 512,
                output_path_id: 2,
                function_block: 0x7F,
            }),
            Message::EndpointInquiry { status: 0 },
            Message::EndpointReply(EndpointReply {
                status: 0,
                data: b"serial-1".to_vec(),
            }),
            Message::InvalidateMuid { target: initiator() },
            Message::Ack(AckNak::new(0x22, 0).with_message("ok")),
            Message::ProfileInquiry,
            Message::ProfileInquiryReply(ProfileInquiryReply {
                enabled: vec![profile],
                disabled: vec![ProfileId::standard(1, 2, 3, 4), profile],
            }),
            Message::SetProfileOn {
                profile,
                channels: 1,
            },
            Message::SetProfileOff { profile },
            Message::ProfileEnabledReport {
                profile,
                channels: 1,
            },
            Message::ProfileDisabledReport {
                profile,
                channels: 0,
            },
            Message::ProfileAddedReport { profile },
            Message::ProfileRemovedReport { profile },
            Message::ProfileDetailsInquiry {
                profile,
                target: 0x01,
            },
            Message::ProfileDetailsReply {
                profile,
                target: 0x01,
                data: vec![1, 2, 3],
            },
            Message::ProfileSpecificData {
                profile,
                data: vec![0x40; 10],
            },
            Message::PropertyCapabilitiesInquiry(caps),
            Message::PropertyCapabilitiesReply(caps),
            Message::GetPropertyData(chunk.clone()),
            Message::SetPropertyData(chunk.clone()),
            Message::SetPropertyDataReply(chunk.clone()),
            Message::SubscribeProperty(chunk.clone()),
            Message::SubscribePropertyReply(chunk.clone()),
            Message::PropertyNotify(chunk),
            Message::ProcessInquiryCapabilities,
            Message::ProcessInquiryCapabilitiesReply { features: 0x01 },
            Message::MidiMessageReportInquiry(report),
            Message::MidiMessageReportReply(MidiMessageReport {
                message_data_control: 0,
                ..report
            }),
            Message::MidiMessageReportEnd,
        ];
        for message in messages {
            round_trip(message);
        }
    }

    fn arb_muid() -> impl Strategy<Value = Muid> {
        any::<[u8; 4]>().prop_map(Muid::from_bytes)
    }

    fn arb_clean_bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..0x80, 0..max)
    }

    fn arb_profile() -> impl Strategy<Value = ProfileId> {
        any::<[u8; 5]>().prop_map(|b| ProfileId::read_from(&b).unwrap_or(ProfileId::standard(0, 0, 0, 0)))
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            (any::<[u8; 3]>(), 0u16..0x4000, 0u16..0x4000, any::<[u8; 4]>(), 0u8..0x80, 0u32..0x1000_0000)
                .prop_map(|(m, f, md, v, c, size)| Message::Discovery(DiscoveryInquiry {
                    identity: DeviceIdentity::new(m, f, md, v),
                    categories: Categories::from_bits(c),
                    max_sysex_size: size,
                    output_path_id: 0,
                })),
            (0u8..0x80, arb_clean_bytes(64))
                .prop_map(|(status, data)| Message::EndpointReply(EndpointReply { status, data })),
            arb_muid().prop_map(|target| Message::InvalidateMuid { target }),
            (prop::collection::vec(arb_profile(), 0..5), prop::collection::vec(arb_profile(), 0..5))
                .prop_map(|(enabled, disabled)| Message::ProfileInquiryReply(ProfileInquiryReply { enabled, disabled })),
            (arb_profile(), 0u16..0x4000)
                .prop_map(|(profile, channels)| Message::SetProfileOn { profile, channels }),
            (0u8..0x80, arb_clean_bytes(200), 1u16..0x4000, 1u16..0x4000, arb_clean_bytes(200))
                .prop_map(|(request_id, header, num_chunks, chunk_index, data)| {
                    Message::GetPropertyDataReply(PropertyChunk { request_id, header, num_chunks, chunk_index, data })
                }),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            message in arb_message(),
            address in 0u8..0x80,
            source in arb_muid(),
            destination in arb_muid(),
        ) {
            let msg = CiMessage::new(address, source, destination, message);
            let bytes = encode(&msg).unwrap();
            prop_assert!(midi::is_7bit_clean(&bytes));
            prop_assert_eq!(decode(&bytes).unwrap(), msg);
        }

        #[test]
        fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&data);
        }
    }
}
