//! Typed MIDI-CI messages

use super::{address, Categories, DeviceIdentity, Muid, SubId, CI_VERSION};
use crate::profile::ProfileId;

/// Common header fields of every MIDI-CI message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Device id slot: channel, group (0x7E) or function block (0x7F)
    pub address: u8,
    /// Message format version
    pub version: u8,
    pub source: Muid,
    pub destination: Muid,
}

impl Header {
    pub fn new(address: u8, source: Muid, destination: Muid) -> Self {
        Self {
            address,
            version: CI_VERSION,
            source,
            destination,
        }
    }

    /// Header for a reply: same address, source and destination swapped
    pub fn reply_to(&self, me: Muid) -> Self {
        Self::new(self.address, me, self.source)
    }
}

/// Discovery inquiry body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInquiry {
    pub identity: DeviceIdentity,
    pub categories: Categories,
    pub max_sysex_size: u32,
    /// Initiator's output path id (MIDI-CI 1.2)
    pub output_path_id: u8,
}

/// Discovery reply body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub identity: DeviceIdentity,
    pub categories: Categories,
    pub max_sysex_size: u32,
    /// Echo of the inquiry's output path id
    pub output_path_id: u8,
    /// Function block the responder belongs to, 0x7F when none
    pub function_block: u8,
}

/// Endpoint reply body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReply {
    pub status: u8,
    pub data: Vec<u8>,
}

/// ACK and NAK share one body layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNak {
    /// Sub-id #2 of the message being acknowledged
    pub original_sub_id: u8,
    pub status_code: u8,
    pub status_data: u8,
    pub details: [u8; 5],
    /// Human readable text
    pub message: Vec<u8>,
}

impl AckNak {
    pub fn new(original_sub_id: u8, status_code: u8) -> Self {
        Self {
            original_sub_id,
            status_code,
            status_data: 0,
            details: [0; 5],
            message: Vec::new(),
        }
    }

    pub fn with_message(mut self, text: &str) -> Self {
        self.message = text.bytes().map(|b| b & 0x7F).collect();
        self
    }

    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

/// Profile Inquiry reply body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileInquiryReply {
    pub enabled: Vec<ProfileId>,
    pub disabled: Vec<ProfileId>,
}

/// Property Exchange capabilities, used by both inquiry and reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyCapabilities {
    pub max_simultaneous_requests: u8,
    pub major_version: u8,
    pub minor_version: u8,
}

/// One wire message of a Property Exchange transaction.
///
/// A transaction is split into `num_chunks` messages sharing `request_id`;
/// `chunk_index` is 1-based. The header travels in the first chunk only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChunk {
    pub request_id: u8,
    pub header: Vec<u8>,
    pub num_chunks: u16,
    pub chunk_index: u16,
    pub data: Vec<u8>,
}

impl PropertyChunk {
    /// Single-chunk message
    pub fn single(request_id: u8, header: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            request_id,
            header,
            num_chunks: 1,
            chunk_index: 1,
            data,
        }
    }

    pub fn is_last(&self) -> bool {
        self.chunk_index == self.num_chunks
    }
}

/// MIDI Message Report data selection (Process Inquiry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiMessageReport {
    /// 0x00 no data, 0x7F only non-default values, 0x01 full set.
    /// Not present in a reply.
    pub message_data_control: u8,
    pub system_messages: u8,
    pub channel_controller_messages: u8,
    pub note_data_messages: u8,
}

impl MidiMessageReport {
    /// Intersection of a request with what this device can report
    pub fn intersect(&self, available: &MidiMessageReport) -> MidiMessageReport {
        MidiMessageReport {
            message_data_control: self.message_data_control,
            system_messages: self.system_messages & available.system_messages,
            channel_controller_messages: self.channel_controller_messages
                & available.channel_controller_messages,
            note_data_messages: self.note_data_messages & available.note_data_messages,
        }
    }
}

/// Every message kind the codec understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Discovery(DiscoveryInquiry),
    DiscoveryReply(DiscoveryReply),
    EndpointInquiry { status: u8 },
    EndpointReply(EndpointReply),
    InvalidateMuid { target: Muid },
    Ack(AckNak),
    Nak(AckNak),

    ProfileInquiry,
    ProfileInquiryReply(ProfileInquiryReply),
    SetProfileOn { profile: ProfileId, channels: u16 },
    SetProfileOff { profile: ProfileId },
    ProfileEnabledReport { profile: ProfileId, channels: u16 },
    ProfileDisabledReport { profile: ProfileId, channels: u16 },
    ProfileAddedReport { profile: ProfileId },
    ProfileRemovedReport { profile: ProfileId },
    ProfileDetailsInquiry { profile: ProfileId, target: u8 },
    ProfileDetailsReply { profile: ProfileId, target: u8, data: Vec<u8> },
    ProfileSpecificData { profile: ProfileId, data: Vec<u8> },

    PropertyCapabilitiesInquiry(PropertyCapabilities),
    PropertyCapabilitiesReply(PropertyCapabilities),
    GetPropertyData(PropertyChunk),
    GetPropertyDataReply(PropertyChunk),
    SetPropertyData(PropertyChunk),
    SetPropertyDataReply(PropertyChunk),
    SubscribeProperty(PropertyChunk),
    SubscribePropertyReply(PropertyChunk),
    PropertyNotify(PropertyChunk),

    ProcessInquiryCapabilities,
    ProcessInquiryCapabilitiesReply { features: u8 },
    MidiMessageReportInquiry(MidiMessageReport),
    MidiMessageReportReply(MidiMessageReport),
    MidiMessageReportEnd,
}

impl Message {
    pub fn sub_id(&self) -> SubId {
        match self {
            Message::Discovery(_) => SubId::Discovery,
            Message::DiscoveryReply(_) => SubId::DiscoveryReply,
            Message::EndpointInquiry { .. } => SubId::EndpointInquiry,
            Message::EndpointReply(_) => SubId::EndpointReply,
            Message::InvalidateMuid { .. } => SubId::InvalidateMuid,
            Message::Ack(_) => SubId::Ack,
            Message::Nak(_) => SubId::Nak,
            Message::ProfileInquiry => SubId::ProfileInquiry,
            Message::ProfileInquiryReply(_) => SubId::ProfileInquiryReply,
            Message::SetProfileOn { .. } => SubId::SetProfileOn,
            Message::SetProfileOff { .. } => SubId::SetProfileOff,
            Message::ProfileEnabledReport { .. } => SubId::ProfileEnabledReport,
            Message::ProfileDisabledReport { .. } => SubId::ProfileDisabledReport,
            Message::ProfileAddedReport { .. } => SubId::ProfileAddedReport,
            Message::ProfileRemovedReport { .. } => SubId::ProfileRemovedReport,
            Message::ProfileDetailsInquiry { .. } => SubId::ProfileDetailsInquiry,
            Message::ProfileDetailsReply { .. } => SubId::ProfileDetailsReply,
            Message::ProfileSpecificData { .. } => SubId::ProfileSpecificData,
            Message::PropertyCapabilitiesInquiry(_) => SubId::PropertyCapabilitiesInquiry,
            Message::PropertyCapabilitiesReply(_) => SubId::PropertyCapabilitiesReply,
            Message::GetPropertyData(_) => SubId::GetPropertyData,
            Message::GetPropertyDataReply(_) => SubId::GetPropertyDataReply,
            Message::SetPropertyData(_) => SubId::SetPropertyData,
            Message::SetPropertyDataReply(_) => SubId::SetPropertyDataReply,
            Message::SubscribeProperty(_) => SubId::SubscribeProperty,
            Message::SubscribePropertyReply(_) => SubId::SubscribePropertyReply,
            Message::PropertyNotify(_) => SubId::PropertyNotify,
            Message::ProcessInquiryCapabilities => SubId::ProcessInquiryCapabilities,
            Message::ProcessInquiryCapabilitiesReply { .. } => {
                SubId::ProcessInquiryCapabilitiesReply
            }
            Message::MidiMessageReportInquiry(_) => SubId::MidiMessageReportInquiry,
            Message::MidiMessageReportReply(_) => SubId::MidiMessageReportReply,
            Message::MidiMessageReportEnd => SubId::MidiMessageReportEnd,
        }
    }

    /// Property Exchange chunk carried by this message, if any
    pub fn property_chunk(&self) -> Option<&PropertyChunk> {
        match self {
            Message::GetPropertyData(chunk)
            | Message::GetPropertyDataReply(chunk)
            | Message::SetPropertyData(chunk)
            | Message::SetPropertyDataReply(chunk)
            | Message::SubscribeProperty(chunk)
            | Message::SubscribePropertyReply(chunk)
            | Message::PropertyNotify(chunk) => Some(chunk),
            _ => None,
        }
    }
}

/// Header plus body: one complete MIDI-CI message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiMessage {
    pub header: Header,
    pub message: Message,
}

impl CiMessage {
    pub fn new(address: u8, source: Muid, destination: Muid, message: Message) -> Self {
        Self {
            header: Header::new(address, source, destination),
            message,
        }
    }

    pub fn sub_id(&self) -> SubId {
        self.message.sub_id()
    }

    /// Reply to the sender of `header`
    pub fn reply(header: &Header, me: Muid, message: Message) -> Self {
        Self {
            header: header.reply_to(me),
            message,
        }
    }

    /// "Message not supported" NAK for a message with sub-id `original`.
    /// Detail bytes and text are left empty.
    pub fn not_supported(header: &Header, me: Muid, original: u8) -> Self {
        Self::reply(
            header,
            me,
            Message::Nak(AckNak::new(original, super::nak::MESSAGE_NOT_SUPPORTED)),
        )
    }

    /// One-line description for logs and the traffic sniffer
    pub fn summary(&self) -> String {
        let route = format!(
            "{} -> {} @{}",
            self.header.source,
            self.header.destination,
            address::describe(self.header.address)
        );
        let detail = match &self.message {
            Message::Discovery(d) => format!(
                "mfr={:02X?} {:?} max_sysex={}",
                d.identity.manufacturer, d.categories, d.max_sysex_size
            ),
            Message::DiscoveryReply(d) => format!(
                "mfr={:02X?} {:?} max_sysex={} fb={:#04X}",
                d.identity.manufacturer, d.categories, d.max_sysex_size, d.function_block
            ),
            Message::EndpointInquiry { status } => format!("status={}", status),
            Message::EndpointReply(r) => format!(
                "status={} data=\"{}\"",
                r.status,
                String::from_utf8_lossy(&r.data)
            ),
            Message::InvalidateMuid { target } => format!("target={}", target),
            Message::Ack(a) | Message::Nak(a) => format!(
                "for={:#04X} status={:#04X} \"{}\"",
                a.original_sub_id,
                a.status_code,
                a.message_text()
            ),
            Message::ProfileInquiryReply(r) => {
                format!("enabled={} disabled={}", r.enabled.len(), r.disabled.len())
            }
            Message::SetProfileOn { profile, channels }
            | Message::ProfileEnabledReport { profile, channels }
            | Message::ProfileDisabledReport { profile, channels } => {
                format!("{} channels={}", profile, channels)
            }
            Message::SetProfileOff { profile }
            | Message::ProfileAddedReport { profile }
            | Message::ProfileRemovedReport { profile } => profile.to_string(),
            Message::ProfileDetailsInquiry { profile, target } => {
                format!("{} target={:#04X}", profile, target)
            }
            Message::ProfileDetailsReply {
                profile,
                target,
                data,
            } => format!("{} target={:#04X} {} bytes", profile, target, data.len()),
            Message::ProfileSpecificData { profile, data } => {
                format!("{} {} bytes", profile, data.len())
            }
            Message::PropertyCapabilitiesInquiry(c) | Message::PropertyCapabilitiesReply(c) => {
                format!(
                    "max_requests={} v{}.{}",
                    c.max_simultaneous_requests, c.major_version, c.minor_version
                )
            }
            Message::GetPropertyData(c)
            | Message::GetPropertyDataReply(c)
            | Message::SetPropertyData(c)
            | Message::SetPropertyDataReply(c)
            | Message::SubscribeProperty(c)
            | Message::SubscribePropertyReply(c)
            | Message::PropertyNotify(c) => format!(
                "req={} chunk {}/{} header={} data={} bytes",
                c.request_id,
                c.chunk_index,
                c.num_chunks,
                String::from_utf8_lossy(&c.header),
                c.data.len()
            ),
            Message::ProcessInquiryCapabilitiesReply { features } => {
                format!("features={:#04X}", features)
            }
            Message::MidiMessageReportInquiry(r) | Message::MidiMessageReportReply(r) => format!(
                "system={:#04X} cc={:#04X} note={:#04X}",
                r.system_messages, r.channel_controller_messages, r.note_data_messages
            ),
            Message::ProfileInquiry
            | Message::ProcessInquiryCapabilities
            | Message::MidiMessageReportEnd => String::new(),
        };
        if detail.is_empty() {
            format!("{} {}", self.sub_id(), route)
        } else {
            format!("{} {} {}", self.sub_id(), route, detail)
        }
    }
}
