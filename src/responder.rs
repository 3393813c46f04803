//! Responder - the answering side of MIDI-CI
//!
//! Owns the local device identity, profile table and property service.
//! Every inbound message addressed to our MUID (or broadcast) is answered
//! through the send callback; anything else is dropped.

use tracing::{debug, error, info, trace, warn};

use crate::ci::{
    decode, encode, nak, AckNak, Categories, CiMessage, DecodeError, DeviceInfo, DiscoveryReply,
    EndpointReply, Header, Message, MidiMessageReport, Muid, ProfileInquiryReply,
    DEFAULT_MAX_SYSEX_SIZE, ENDPOINT_STATUS_PRODUCT_INSTANCE_ID, MAX_PRODUCT_INSTANCE_ID_LEN,
};
use crate::ci::address;
use crate::error::{CiError, Result};
use crate::json::JsonValue;
use crate::midi;
use crate::profile::{ProfileEntry, ProfileId, ProfileTable};
use crate::property::service::ServiceSettings;
use crate::property::{CommonRulesPropertyService, Outgoing, PropertyMetadata, PropertyValue};
use crate::SendFn;

/// Host hooks. Every method has a default, so hosts override only what they
/// need.
pub trait ResponderHooks: Send {
    /// Decide the outcome of a Set Profile On/Off request. The returned
    /// state is applied and reported, even when it differs from `enabled`.
    fn on_set_profile(&mut self, source: Muid, address: u8, profile: ProfileId, enabled: bool) -> bool {
        debug!(
            "{} asks to {} {} at {}",
            source,
            if enabled { "enable" } else { "disable" },
            profile,
            address::describe(address)
        );
        enabled
    }

    /// Profile details for `target`, `None` to answer with a NAK
    fn on_profile_details(&mut self, _address: u8, _profile: ProfileId, _target: u8) -> Option<Vec<u8>> {
        None
    }

    fn on_profile_specific_data(&mut self, source: Muid, address: u8, profile: ProfileId, data: &[u8]) {
        debug!(
            "{} bytes of {} data from {} at {}",
            data.len(),
            profile,
            source,
            address::describe(address)
        );
    }

    /// A MIDI Message Report was accepted with `selection`. Sending the
    /// actual MIDI messages is up to the host.
    fn on_midi_message_report(&mut self, source: Muid, address: u8, selection: &MidiMessageReport) {
        debug!(
            "{} requested a MIDI message report at {} ({:?})",
            source,
            address::describe(address),
            selection
        );
    }

    fn on_ack(&mut self, source: Muid, ack: &AckNak) {
        debug!("ACK from {} for {:#04X}", source, ack.original_sub_id);
    }

    fn on_nak(&mut self, source: Muid, nak: &AckNak) {
        warn!(
            "NAK from {} for {:#04X}: {}",
            source,
            nak.original_sub_id,
            nak.message_text()
        );
    }
}

/// Hooks with every default in place
#[derive(Debug, Default)]
pub struct DefaultResponderHooks;

impl ResponderHooks for DefaultResponderHooks {}

/// Responder settings
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Wire form MUID, random when `None`
    pub muid: Option<u32>,
    pub device_info: DeviceInfo,
    pub categories: Categories,
    pub max_sysex_size: u32,
    /// Function block reported in the Discovery reply, 0x7F for none
    pub function_block: u8,
    /// At most 16 bytes, 7-bit clean
    pub product_instance_id: Option<String>,
    /// Supported features byte of the Process Inquiry capabilities reply
    pub process_inquiry_features: u8,
    /// Data this device can include in a MIDI Message Report
    pub midi_report: MidiMessageReport,
    pub property: ServiceSettings,
}

pub struct Responder {
    muid: Muid,
    config: ResponderConfig,
    profiles: ProfileTable,
    properties: CommonRulesPropertyService,
    send: SendFn,
    hooks: Box<dyn ResponderHooks>,
}

impl Responder {
    /// Fails on a MUID that is not 7-bit clean or a product instance id the
    /// Endpoint reply cannot carry
    pub fn new(config: ResponderConfig, send: SendFn) -> Result<Self> {
        let muid = match config.muid {
            Some(raw) => Muid::new(raw)?,
            None => Muid::random(),
        };
        if muid.is_broadcast() {
            return Err(CiError::InvalidMuid(muid.raw()));
        }
        if let Some(id) = &config.product_instance_id {
            if id.len() > MAX_PRODUCT_INSTANCE_ID_LEN {
                return Err(CiError::ProductInstanceIdTooLong {
                    len: id.len(),
                    max: MAX_PRODUCT_INSTANCE_ID_LEN,
                });
            }
            if !midi::is_7bit_clean(id.as_bytes()) {
                return Err(CiError::NotSevenBitClean {
                    field: "product instance id",
                });
            }
        }
        let properties =
            CommonRulesPropertyService::new(config.device_info.clone(), config.property);
        info!("Responder MUID {}", muid);
        Ok(Self {
            muid,
            config,
            profiles: ProfileTable::new(),
            properties,
            send,
            hooks: Box::new(DefaultResponderHooks),
        })
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn ResponderHooks>) {
        self.hooks = hooks;
    }

    pub fn muid(&self) -> Muid {
        self.muid
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Direct table access. Changes made here are not reported on the wire;
    /// use [`add_profile`](Self::add_profile) and friends for that.
    pub fn profiles_mut(&mut self) -> &mut ProfileTable {
        &mut self.profiles
    }

    pub fn properties(&self) -> &CommonRulesPropertyService {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut CommonRulesPropertyService {
        &mut self.properties
    }

    // -----------------------------------------------------------------
    // Host side changes, reported to everyone
    // -----------------------------------------------------------------

    /// Add a profile and broadcast a Profile Added report (plus an Enabled
    /// report when it starts enabled)
    pub fn add_profile(&mut self, entry: ProfileEntry) -> Result<bool> {
        let (address, profile, enabled, channels) =
            (entry.address, entry.profile, entry.enabled, entry.channels);
        if !self.profiles.add(entry) {
            return Ok(false);
        }
        self.broadcast(address, Message::ProfileAddedReport { profile })?;
        if enabled {
            self.broadcast(address, Message::ProfileEnabledReport { profile, channels })?;
        }
        Ok(true)
    }

    pub fn remove_profile(&mut self, address: u8, profile: &ProfileId) -> Result<bool> {
        if self.profiles.remove_target(address, profile).is_none() {
            return Ok(false);
        }
        self.broadcast(address, Message::ProfileRemovedReport { profile: *profile })?;
        Ok(true)
    }

    /// Toggle a profile locally and broadcast the new state
    pub fn set_profile_enabled(&mut self, address: u8, profile: &ProfileId, enabled: bool) -> Result<bool> {
        if !self.profiles.set_enabled(address, profile, enabled) {
            return Ok(false);
        }
        let channels = self
            .profiles
            .get(address, profile)
            .map(|e| e.channels)
            .unwrap_or(1);
        self.report_profile_state(address, *profile, enabled, channels)?;
        Ok(true)
    }

    /// Register a host resource with its initial value
    pub fn add_property(&mut self, metadata: PropertyMetadata, initial: Option<PropertyValue>) -> Result<bool> {
        let resource = metadata.resource.clone();
        if !self.properties.add_metadata(metadata) {
            return Ok(false);
        }
        if let Some(value) = initial {
            let pushed = self.properties.set_value(&resource, None, value)?;
            self.send_outgoing(pushed)?;
        }
        Ok(true)
    }

    pub fn set_property_value(&mut self, resource: &str, res_id: Option<&str>, value: PropertyValue) -> Result<()> {
        let pushed = self.properties.set_value(resource, res_id, value)?;
        self.send_outgoing(pushed)
    }

    pub fn update_property_value(&mut self, resource: &str, res_id: Option<&str>, patch: &JsonValue) -> Result<()> {
        let pushed = self.properties.update_value(resource, res_id, patch)?;
        self.send_outgoing(pushed)
    }

    // -----------------------------------------------------------------
    // Wire side
    // -----------------------------------------------------------------

    fn send_message(&self, msg: &CiMessage) -> Result<()> {
        let bytes = encode(msg)?;
        trace!("-> {}", msg.summary());
        (self.send)(&bytes);
        Ok(())
    }

    fn reply(&self, to: &Header, message: Message) -> Result<()> {
        self.send_message(&CiMessage::reply(to, self.muid, message))
    }

    fn broadcast(&self, address: u8, message: Message) -> Result<()> {
        self.send_message(&CiMessage::new(address, self.muid, Muid::BROADCAST, message))
    }

    fn send_outgoing(&self, outgoing: Vec<Outgoing>) -> Result<()> {
        for out in outgoing {
            self.send_message(&CiMessage::new(
                address::FUNCTION_BLOCK,
                self.muid,
                out.destination,
                out.message,
            ))?;
        }
        Ok(())
    }

    fn nak(&self, to: &Header, original: u8, status: u8, text: &str) -> Result<()> {
        self.reply(to, Message::Nak(AckNak::new(original, status).with_message(text)))
    }

    fn report_profile_state(&self, address: u8, profile: ProfileId, enabled: bool, channels: u16) -> Result<()> {
        let report = if enabled {
            Message::ProfileEnabledReport { profile, channels }
        } else {
            Message::ProfileDisabledReport { profile, channels }
        };
        self.broadcast(address, report)
    }

    /// Feed one received message (SysEx delimiters excluded).
    ///
    /// Garbage and messages for other MUIDs are dropped with `Ok(())`.
    /// Requests the engine cannot honor are answered with a NAK and
    /// reported as an error.
    pub fn process_input(&mut self, bytes: &[u8]) -> Result<()> {
        let msg = match decode(bytes) {
            Ok(msg) => msg,
            Err(DecodeError::UnsupportedSubId { header, sub_id }) => {
                if self.muid.accepts(header.destination) {
                    debug!("Unsupported sub-id {:#04X} from {}", sub_id, header.source);
                    self.send_message(&CiMessage::not_supported(&header, self.muid, sub_id))?;
                }
                return Ok(());
            }
            Err(err) => {
                trace!("Ignoring input: {}", err);
                return Ok(());
            }
        };
        if !self.muid.accepts(msg.header.destination) {
            trace!("Ignoring message for {}", msg.header.destination);
            return Ok(());
        }
        trace!("<- {}", msg.summary());
        self.dispatch(&msg)
    }

    fn dispatch(&mut self, msg: &CiMessage) -> Result<()> {
        let header = &msg.header;
        let source = header.source;
        match &msg.message {
            Message::Discovery(inquiry) => {
                info!("Discovery from {}", source);
                self.reply(
                    header,
                    Message::DiscoveryReply(DiscoveryReply {
                        identity: self.config.device_info.identity,
                        categories: self.config.categories,
                        max_sysex_size: self.config.max_sysex_size,
                        output_path_id: inquiry.output_path_id,
                        function_block: self.config.function_block,
                    }),
                )
            }
            Message::EndpointInquiry { status } => {
                let data = match *status {
                    ENDPOINT_STATUS_PRODUCT_INSTANCE_ID => self
                        .config
                        .product_instance_id
                        .as_deref()
                        .unwrap_or_default()
                        .as_bytes()
                        .to_vec(),
                    _ => Vec::new(),
                };
                self.reply(
                    header,
                    Message::EndpointReply(EndpointReply {
                        status: *status,
                        data,
                    }),
                )
            }
            Message::InvalidateMuid { target } => {
                if *target == self.muid {
                    let old = self.muid;
                    self.muid = Muid::random();
                    warn!("MUID {} invalidated, now {}", old, self.muid);
                } else {
                    self.properties.forget_peer(*target);
                }
                Ok(())
            }
            Message::Ack(ack) => {
                self.hooks.on_ack(source, ack);
                Ok(())
            }
            Message::Nak(body) => {
                self.hooks.on_nak(source, body);
                Ok(())
            }

            Message::ProfileInquiry => self.on_profile_inquiry(header),
            Message::SetProfileOn { profile, channels } => {
                self.on_set_profile(header, *profile, true, *channels)
            }
            Message::SetProfileOff { profile } => self.on_set_profile(header, *profile, false, 1),
            Message::ProfileDetailsInquiry { profile, target } => {
                match self.hooks.on_profile_details(header.address, *profile, *target) {
                    Some(data) => self.reply(
                        header,
                        Message::ProfileDetailsReply {
                            profile: *profile,
                            target: *target,
                            data,
                        },
                    ),
                    None => self.nak(
                        header,
                        msg.sub_id().as_byte(),
                        nak::PROFILE_NOT_SUPPORTED_ON_TARGET,
                        "no details for this target",
                    ),
                }
            }
            Message::ProfileSpecificData { profile, data } => {
                self.hooks
                    .on_profile_specific_data(source, header.address, *profile, data);
                Ok(())
            }

            Message::PropertyCapabilitiesInquiry(requested) => {
                if !self.config.categories.contains(Categories::PROPERTY_EXCHANGE) {
                    return self.reply(header, not_supported(msg));
                }
                let negotiated = self.properties.negotiate(requested);
                debug!(
                    "{} asked for {} simultaneous requests, granted {}",
                    source, requested.max_simultaneous_requests, negotiated.max_simultaneous_requests
                );
                self.reply(header, Message::PropertyCapabilitiesReply(negotiated))
            }
            Message::GetPropertyData(_)
            | Message::SetPropertyData(_)
            | Message::SubscribeProperty(_)
            | Message::SubscribePropertyReply(_) => {
                if !self.config.categories.contains(Categories::PROPERTY_EXCHANGE) {
                    return self.reply(header, not_supported(msg));
                }
                let outgoing = self.properties.process(source, &msg.message);
                self.send_outgoing(outgoing)
            }

            Message::ProcessInquiryCapabilities => {
                if !self.config.categories.contains(Categories::PROCESS_INQUIRY) {
                    return self.reply(header, not_supported(msg));
                }
                self.reply(
                    header,
                    Message::ProcessInquiryCapabilitiesReply {
                        features: self.config.process_inquiry_features,
                    },
                )
            }
            Message::MidiMessageReportInquiry(requested) => {
                if !self.config.categories.contains(Categories::PROCESS_INQUIRY) {
                    return self.reply(header, not_supported(msg));
                }
                let selection = MidiMessageReport {
                    message_data_control: 0,
                    ..requested.intersect(&self.config.midi_report)
                };
                self.reply(header, Message::MidiMessageReportReply(selection))?;
                self.hooks
                    .on_midi_message_report(source, header.address, requested);
                self.reply(header, Message::MidiMessageReportEnd)
            }

            // Broadcast traffic from other responders
            _ if header.destination.is_broadcast() => Ok(()),
            _ => self.reply(header, not_supported(msg)),
        }
    }

    /// One reply per address. An inquiry at the function block address also
    /// covers every other address holding profiles.
    fn on_profile_inquiry(&mut self, header: &Header) -> Result<()> {
        if !self.config.categories.contains(Categories::PROFILE_CONFIGURATION) {
            return self.reply(
                header,
                Message::Nak(AckNak::new(
                    crate::ci::SubId::ProfileInquiry.as_byte(),
                    nak::MESSAGE_NOT_SUPPORTED,
                )),
            );
        }
        let mut addresses = vec![header.address];
        if header.address == address::FUNCTION_BLOCK {
            for entry in self.profiles.iter() {
                if !addresses.contains(&entry.address) {
                    addresses.push(entry.address);
                }
            }
        }
        for target in addresses {
            let reply = ProfileInquiryReply {
                enabled: self.profiles.ids_at(target, true),
                disabled: self.profiles.ids_at(target, false),
            };
            let msg = CiMessage {
                header: Header {
                    address: target,
                    ..header.reply_to(self.muid)
                },
                message: Message::ProfileInquiryReply(reply),
            };
            self.send_message(&msg)?;
        }
        Ok(())
    }

    fn on_set_profile(&mut self, header: &Header, profile: ProfileId, enabled: bool, channels: u16) -> Result<()> {
        let sub_id = if enabled {
            crate::ci::SubId::SetProfileOn
        } else {
            crate::ci::SubId::SetProfileOff
        };
        if channels > 1 {
            error!(
                "{} requested {} on {} channels; only single channel requests are supported",
                header.source, profile, channels
            );
            self.nak(
                header,
                sub_id.as_byte(),
                nak::MESSAGE_NOT_SUPPORTED,
                "multi-channel profile requests are not supported",
            )?;
            return Err(CiError::UnsupportedChannelCount {
                requested: channels,
            });
        }
        let actual = self
            .hooks
            .on_set_profile(header.source, header.address, profile, enabled);
        if actual != enabled {
            info!(
                "Profile {} request overridden: {}",
                profile,
                if actual { "enabled" } else { "disabled" }
            );
        }
        self.profiles.upsert(header.address, profile, actual, 1);
        self.report_profile_state(header.address, profile, actual, 1)
    }
}

fn not_supported(msg: &CiMessage) -> Message {
    Message::Nak(AckNak::new(msg.sub_id().as_byte(), nak::MESSAGE_NOT_SUPPORTED))
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            muid: None,
            device_info: DeviceInfo {
                identity: crate::ci::DeviceIdentity::new([0, 0, 0], 0, 0, [0, 0, 0, 0]),
                manufacturer: String::new(),
                family: String::new(),
                model: String::new(),
                version: String::new(),
                serial_number: None,
            },
            categories: Categories::PROFILE_CONFIGURATION
                | Categories::PROPERTY_EXCHANGE
                | Categories::PROCESS_INQUIRY,
            max_sysex_size: DEFAULT_MAX_SYSEX_SIZE,
            function_block: address::FUNCTION_BLOCK,
            product_instance_id: None,
            process_inquiry_features: 0x01,
            midi_report: MidiMessageReport {
                message_data_control: 0,
                system_messages: 0x07,
                channel_controller_messages: 0x3F,
                note_data_messages: 0x0F,
            },
            property: ServiceSettings::default(),
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("muid", &self.muid)
            .field("profiles", &self.profiles.len())
            .field("properties", &self.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{DiscoveryInquiry, SubId};
    use crate::profile::ProfileEntry;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn me() -> Muid {
        Muid::from_u28(0x6789A).unwrap()
    }

    fn initiator() -> Muid {
        Muid::from_u28(0x12345).unwrap()
    }

    fn piano() -> ProfileId {
        ProfileId::standard(0x21, 0x00, 0x01, 0x01)
    }

    fn responder() -> (Responder, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let config = ResponderConfig {
            muid: Some(me().raw()),
            product_instance_id: Some("unit-7".into()),
            ..ResponderConfig::default()
        };
        let send: SendFn = Arc::new(move |bytes: &[u8]| sink.lock().push(bytes.to_vec()));
        (Responder::new(config, send).unwrap(), sent)
    }

    fn input(responder: &mut Responder, destination: Muid, address: u8, message: Message) -> Result<()> {
        let msg = CiMessage::new(address, initiator(), destination, message);
        responder.process_input(&encode(&msg).unwrap())
    }

    fn take(sent: &Mutex<Vec<Vec<u8>>>) -> Vec<CiMessage> {
        sent.lock().drain(..).map(|b| decode(&b).unwrap()).collect()
    }

    #[test]
    fn test_construction_preconditions() {
        let send: SendFn = Arc::new(|_: &[u8]| {});
        let long = ResponderConfig {
            product_instance_id: Some("x".repeat(17)),
            ..ResponderConfig::default()
        };
        assert!(matches!(
            Responder::new(long, send.clone()),
            Err(CiError::ProductInstanceIdTooLong { len: 17, max: 16 })
        ));
        let bad_muid = ResponderConfig {
            muid: Some(0x0080_0000),
            ..ResponderConfig::default()
        };
        assert!(Responder::new(bad_muid, send.clone()).is_err());
        let sixteen = ResponderConfig {
            product_instance_id: Some("x".repeat(16)),
            ..ResponderConfig::default()
        };
        assert!(Responder::new(sixteen, send).is_ok());
    }

    #[test]
    fn test_discovery_reply() {
        let (mut responder, sent) = responder();
        let inquiry = DiscoveryInquiry {
            identity: crate::ci::DeviceIdentity::new([1, 2, 3], 4, 5, [6, 7, 8, 9]),
            categories: Categories::PROPERTY_EXCHANGE,
            max_sysex_size: 256,
            output_path_id: 3,
        };
        input(&mut responder, Muid::BROADCAST, 0x7F, Message::Discovery(inquiry)).unwrap();

        let replies = take(&sent);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].header.source, me());
        assert_eq!(replies[0].header.destination, initiator());
        match &replies[0].message {
            Message::DiscoveryReply(reply) => {
                assert_eq!(reply.output_path_id, 3);
                assert_eq!(reply.max_sysex_size, DEFAULT_MAX_SYSEX_SIZE);
                assert!(reply.categories.contains(Categories::PROFILE_CONFIGURATION));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_foreign_destination_is_dropped() {
        let (mut responder, sent) = responder();
        let other = Muid::from_u28(0x1).unwrap();
        input(&mut responder, other, 0x7F, Message::ProfileInquiry).unwrap();
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_endpoint_reply() {
        let (mut responder, sent) = responder();
        input(
            &mut responder,
            me(),
            0x7F,
            Message::EndpointInquiry {
                status: ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
            },
        )
        .unwrap();
        match &take(&sent)[0].message {
            Message::EndpointReply(reply) => assert_eq!(reply.data, b"unit-7".to_vec()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_profile_inquiry_covers_every_address() {
        let (mut responder, sent) = responder();
        responder.profiles_mut().add(ProfileEntry::new(piano(), 0x7F, true));
        responder.profiles_mut().add(ProfileEntry::new(piano(), 0x00, false));

        input(&mut responder, me(), 0x7F, Message::ProfileInquiry).unwrap();
        let replies = take(&sent);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].header.address, 0x7F);
        assert_eq!(replies[1].header.address, 0x00);
        match &replies[1].message {
            Message::ProfileInquiryReply(reply) => {
                assert!(reply.enabled.is_empty());
                assert_eq!(reply.disabled, vec![piano()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_set_profile_reports_hook_decision() {
        struct Refuse;
        impl ResponderHooks for Refuse {
            fn on_set_profile(&mut self, _: Muid, _: u8, _: ProfileId, _: bool) -> bool {
                false
            }
        }
        let (mut responder, sent) = responder();
        input(
            &mut responder,
            me(),
            0x00,
            Message::SetProfileOn {
                profile: piano(),
                channels: 1,
            },
        )
        .unwrap();
        assert!(responder.profiles().get(0x00, &piano()).unwrap().enabled);
        let reports = take(&sent);
        assert_eq!(reports[0].sub_id(), SubId::ProfileEnabledReport);
        assert_eq!(reports[0].header.destination, Muid::BROADCAST);

        responder.set_hooks(Box::new(Refuse));
        input(
            &mut responder,
            me(),
            0x00,
            Message::SetProfileOff { profile: piano() },
        )
        .unwrap();
        input(
            &mut responder,
            me(),
            0x00,
            Message::SetProfileOn {
                profile: piano(),
                channels: 1,
            },
        )
        .unwrap();
        let reports = take(&sent);
        assert_eq!(reports[1].sub_id(), SubId::ProfileDisabledReport);
        assert!(!responder.profiles().get(0x00, &piano()).unwrap().enabled);
    }

    #[test]
    fn test_multi_channel_request_is_refused() {
        let (mut responder, sent) = responder();
        let result = input(
            &mut responder,
            me(),
            0x00,
            Message::SetProfileOn {
                profile: piano(),
                channels: 3,
            },
        );
        assert!(matches!(
            result,
            Err(CiError::UnsupportedChannelCount { requested: 3 })
        ));
        assert!(responder.profiles().is_empty());
        let replies = take(&sent);
        assert_eq!(replies[0].sub_id(), SubId::Nak);
    }

    #[test]
    fn test_host_profile_changes_are_reported() {
        let (mut responder, sent) = responder();
        assert!(responder
            .add_profile(ProfileEntry::new(piano(), 0x7F, false))
            .unwrap());
        assert!(responder.set_profile_enabled(0x7F, &piano(), true).unwrap());
        assert!(responder.remove_profile(0x7F, &piano()).unwrap());
        let kinds: Vec<SubId> = take(&sent).iter().map(|m| m.sub_id()).collect();
        assert_eq!(
            kinds,
            vec![
                SubId::ProfileAddedReport,
                SubId::ProfileEnabledReport,
                SubId::ProfileRemovedReport
            ]
        );
    }

    #[test]
    fn test_profile_details_without_hook_is_nak() {
        let (mut responder, sent) = responder();
        input(
            &mut responder,
            me(),
            0x7F,
            Message::ProfileDetailsInquiry {
                profile: piano(),
                target: 0,
            },
        )
        .unwrap();
        match &take(&sent)[0].message {
            Message::Nak(body) => {
                assert_eq!(body.original_sub_id, SubId::ProfileDetailsInquiry.as_byte());
                assert_eq!(body.status_code, nak::PROFILE_NOT_SUPPORTED_ON_TARGET);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_capabilities_are_negotiated_down() {
        let (mut responder, sent) = responder();
        input(
            &mut responder,
            me(),
            0x7F,
            Message::PropertyCapabilitiesInquiry(crate::ci::PropertyCapabilities {
                max_simultaneous_requests: 127,
                major_version: 0,
                minor_version: 0,
            }),
        )
        .unwrap();
        match &take(&sent)[0].message {
            Message::PropertyCapabilitiesReply(caps) => {
                assert_eq!(
                    caps.max_simultaneous_requests,
                    crate::property::DEFAULT_MAX_SIMULTANEOUS_REQUESTS
                )
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_process_inquiry_and_report() {
        let (mut responder, sent) = responder();
        input(&mut responder, me(), 0x7F, Message::ProcessInquiryCapabilities).unwrap();
        input(
            &mut responder,
            me(),
            0x00,
            Message::MidiMessageReportInquiry(MidiMessageReport {
                message_data_control: 0x7F,
                system_messages: 0xFF & 0x7F,
                channel_controller_messages: 0x01,
                note_data_messages: 0x00,
            }),
        )
        .unwrap();
        let replies = take(&sent);
        assert_eq!(
            replies.iter().map(|m| m.sub_id()).collect::<Vec<_>>(),
            vec![
                SubId::ProcessInquiryCapabilitiesReply,
                SubId::MidiMessageReportReply,
                SubId::MidiMessageReportEnd
            ]
        );
        match &replies[1].message {
            Message::MidiMessageReportReply(report) => {
                assert_eq!(report.system_messages, 0x07);
                assert_eq!(report.channel_controller_messages, 0x01);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reply_kinds_addressed_to_responder_get_nak() {
        let (mut responder, sent) = responder();
        input(&mut responder, me(), 0x7F, Message::MidiMessageReportEnd).unwrap();
        match &take(&sent)[0].message {
            Message::Nak(body) => {
                assert_eq!(body.original_sub_id, SubId::MidiMessageReportEnd.as_byte())
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalidate_self() {
        let (mut responder, _) = responder();
        input(
            &mut responder,
            Muid::BROADCAST,
            0x7F,
            Message::InvalidateMuid { target: me() },
        )
        .unwrap();
        assert_ne!(responder.muid(), me());
    }
}
