//! MIDI-CI wire protocol
//!
//! Constants, sub-ids and addressing for MIDI Capability Inquiry messages,
//! plus the typed message model and its binary codec.
//!
//! Every message shares a 13 byte common header (SysEx delimiters excluded):
//!
//! ```text
//! 7E <address> 0D <sub-id #2> <version> <source MUID x4> <destination MUID x4>
//! ```

pub mod codec;
mod identity;
mod message;
mod muid;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

pub use codec::{decode, encode, DecodeError};
pub use identity::{DeviceIdentity, DeviceInfo};
pub use message::{
    AckNak, CiMessage, DiscoveryInquiry, DiscoveryReply, EndpointReply, Header, Message,
    MidiMessageReport, ProfileInquiryReply, PropertyCapabilities, PropertyChunk,
};
pub use muid::Muid;

/// Universal Non-Real Time SysEx id
pub const UNIVERSAL_SYSEX: u8 = 0x7E;

/// Sub-id #1 for MIDI-CI
pub const SUB_ID_CI: u8 = 0x0D;

/// Message format version written by this engine (MIDI-CI 1.2)
pub const CI_VERSION: u8 = 0x02;

/// Length of the common header
pub const HEADER_LEN: usize = 13;

/// Default receivable maximum SysEx size advertised in Discovery
pub const DEFAULT_MAX_SYSEX_SIZE: u32 = 4096;

/// Maximum product instance id length in an Endpoint reply
pub const MAX_PRODUCT_INSTANCE_ID_LEN: usize = 16;

/// Endpoint Inquiry status asking for the product instance id
pub const ENDPOINT_STATUS_PRODUCT_INSTANCE_ID: u8 = 0x00;

/// Property Exchange version implemented (Common Rules 1.1)
pub const PROPERTY_EXCHANGE_MAJOR_VERSION: u8 = 0;
pub const PROPERTY_EXCHANGE_MINOR_VERSION: u8 = 0;

/// Address byte semantics (the "device id" slot of the header)
pub mod address {
    /// Whole UMP group
    pub const GROUP: u8 = 0x7E;
    /// Whole function block
    pub const FUNCTION_BLOCK: u8 = 0x7F;

    /// Human readable scope of an address byte
    pub fn describe(address: u8) -> String {
        match address {
            GROUP => "group".to_string(),
            FUNCTION_BLOCK => "function block".to_string(),
            channel @ 0x00..=0x0F => format!("channel {}", channel + 1),
            other => format!("address {:#04X}", other),
        }
    }
}

/// NAK status codes
pub mod nak {
    pub const OTHER: u8 = 0x00;
    pub const MESSAGE_NOT_SUPPORTED: u8 = 0x01;
    pub const VERSION_NOT_SUPPORTED: u8 = 0x02;
    pub const TARGET_NOT_IN_USE: u8 = 0x03;
    pub const PROFILE_NOT_SUPPORTED_ON_TARGET: u8 = 0x04;
    pub const TERMINATE_INQUIRY: u8 = 0x20;
    pub const CHUNKS_OUT_OF_SEQUENCE: u8 = 0x21;
    pub const RETRY_SUGGESTED: u8 = 0x40;
    pub const MALFORMED_MESSAGE: u8 = 0x41;
    pub const TIMEOUT: u8 = 0x42;
}

/// MIDI-CI sub-id #2 values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubId {
    ProfileInquiry = 0x20,
    ProfileInquiryReply = 0x21,
    SetProfileOn = 0x22,
    SetProfileOff = 0x23,
    ProfileEnabledReport = 0x24,
    ProfileDisabledReport = 0x25,
    ProfileAddedReport = 0x26,
    ProfileRemovedReport = 0x27,
    ProfileDetailsInquiry = 0x28,
    ProfileDetailsReply = 0x29,
    ProfileSpecificData = 0x2F,
    PropertyCapabilitiesInquiry = 0x30,
    PropertyCapabilitiesReply = 0x31,
    GetPropertyData = 0x34,
    GetPropertyDataReply = 0x35,
    SetPropertyData = 0x36,
    SetPropertyDataReply = 0x37,
    SubscribeProperty = 0x38,
    SubscribePropertyReply = 0x39,
    PropertyNotify = 0x3F,
    ProcessInquiryCapabilities = 0x40,
    ProcessInquiryCapabilitiesReply = 0x41,
    MidiMessageReportInquiry = 0x42,
    MidiMessageReportReply = 0x43,
    MidiMessageReportEnd = 0x44,
    Discovery = 0x70,
    DiscoveryReply = 0x71,
    EndpointInquiry = 0x72,
    EndpointReply = 0x73,
    Ack = 0x7D,
    InvalidateMuid = 0x7E,
    Nak = 0x7F,
}

impl SubId {
    /// Map a raw sub-id #2 byte, `None` for anything this engine does not speak
    pub fn from_byte(value: u8) -> Option<Self> {
        let sub_id = match value {
            0x20 => SubId::ProfileInquiry,
            0x21 => SubId::ProfileInquiryReply,
            0x22 => SubId::SetProfileOn,
            0x23 => SubId::SetProfileOff,
            0x24 => SubId::ProfileEnabledReport,
            0x25 => SubId::ProfileDisabledReport,
            0x26 => SubId::ProfileAddedReport,
            0x27 => SubId::ProfileRemovedReport,
            0x28 => SubId::ProfileDetailsInquiry,
            0x29 => SubId::ProfileDetailsReply,
            0x2F => SubId::ProfileSpecificData,
            0x30 => SubId::PropertyCapabilitiesInquiry,
            0x31 => SubId::PropertyCapabilitiesReply,
            0x34 => SubId::GetPropertyData,
            0x35 => SubId::GetPropertyDataReply,
            0x36 => SubId::SetPropertyData,
            0x37 => SubId::SetPropertyDataReply,
            0x38 => SubId::SubscribeProperty,
            0x39 => SubId::SubscribePropertyReply,
            0x3F => SubId::PropertyNotify,
            0x40 => SubId::ProcessInquiryCapabilities,
            0x41 => SubId::ProcessInquiryCapabilitiesReply,
            0x42 => SubId::MidiMessageReportInquiry,
            0x43 => SubId::MidiMessageReportReply,
            0x44 => SubId::MidiMessageReportEnd,
            0x70 => SubId::Discovery,
            0x71 => SubId::DiscoveryReply,
            0x72 => SubId::EndpointInquiry,
            0x73 => SubId::EndpointReply,
            0x7D => SubId::Ack,
            0x7E => SubId::InvalidateMuid,
            0x7F => SubId::Nak,
            _ => return None,
        };
        Some(sub_id)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Capability Inquiry category bitmap advertised in Discovery
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Categories(u8);

impl Categories {
    pub const NONE: Categories = Categories(0);
    /// Deprecated in MIDI-CI 1.2; decoded but never acted on
    pub const PROTOCOL_NEGOTIATION: Categories = Categories(0x02);
    pub const PROFILE_CONFIGURATION: Categories = Categories(0x04);
    pub const PROPERTY_EXCHANGE: Categories = Categories(0x08);
    pub const PROCESS_INQUIRY: Categories = Categories(0x10);

    pub const fn from_bits(bits: u8) -> Self {
        Categories(bits & 0x7F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Categories) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: Categories) -> Categories {
        Categories(self.0 & other.0)
    }
}

impl BitOr for Categories {
    type Output = Categories;

    fn bitor(self, rhs: Self) -> Self::Output {
        Categories(self.0 | rhs.0)
    }
}

impl BitOrAssign for Categories {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Categories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Categories::PROTOCOL_NEGOTIATION, "protocol-negotiation"),
            (Categories::PROFILE_CONFIGURATION, "profile-configuration"),
            (Categories::PROPERTY_EXCHANGE, "property-exchange"),
            (Categories::PROCESS_INQUIRY, "process-inquiry"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Categories({:#04X} [{}])", self.0, set.join(", "))
    }
}
