//! Initiator - the requesting side of MIDI-CI
//!
//! - Discovery, then Endpoint / Profile / Property Exchange inquiries chained
//!   automatically to every discovered device
//! - One [`Connection`] per remote MUID
//! - Invalidate MUID handling (own MUID regeneration, stale connections)
//! - NAK "message not supported" for sub-ids this engine does not speak
//!
//! The initiator never performs I/O: replies come in through
//! [`Initiator::process_input`] and outbound bytes leave through the send
//! callback given at construction.

mod connection;

pub use connection::Connection;

use indexmap::IndexMap;
use tracing::{debug, info, trace, warn};

use crate::ci::{
    address, decode, encode, AckNak, Categories, CiMessage, DecodeError, DeviceIdentity,
    DiscoveryInquiry, DiscoveryReply, Message, MidiMessageReport, Muid, PropertyCapabilities,
    DEFAULT_MAX_SYSEX_SIZE, ENDPOINT_STATUS_PRODUCT_INSTANCE_ID, PROPERTY_EXCHANGE_MAJOR_VERSION,
    PROPERTY_EXCHANGE_MINOR_VERSION,
};
use crate::error::{CiError, Result};
use crate::observer::{ObserverId, ObserverList};
use crate::profile::ProfileId;
use crate::property::chunk::DEFAULT_MAX_PENDING_TRANSFERS;
use crate::property::{
    resources, BodyEncoding, PropertyClient, RequestHeader, DEFAULT_MAX_CHUNK_SIZE,
    DEFAULT_MAX_SIMULTANEOUS_REQUESTS,
};
use crate::SendFn;

/// Handshake progress of the initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    Initial,
    /// Discovery sent, waiting for replies
    DiscoverySent,
    /// At least one device answered Discovery
    Discovered,
    /// A discovered device answered a profile or property inquiry
    Established,
}

/// Events published by the initiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorEvent {
    StateChanged {
        from: InitiatorState,
        to: InitiatorState,
    },
    Discovered(Muid),
    ConnectionDropped(Muid),
    /// Our own MUID was invalidated and replaced
    MuidRegenerated {
        old: Muid,
        new: Muid,
    },
    ProductInstanceId {
        muid: Muid,
        id: String,
    },
}

/// Host hooks for messages the initiator does not act on itself.
/// Every method has a logging default.
pub trait InitiatorHooks: Send {
    fn on_ack(&mut self, source: Muid, ack: &AckNak) {
        debug!("ACK from {} for {:#04X}", source, ack.original_sub_id);
    }

    /// Default NAK handling emits nothing further; retrying is up to the host
    fn on_nak(&mut self, source: Muid, nak: &AckNak) {
        warn!(
            "NAK from {} for {:#04X}: status {:#04X} {}",
            source,
            nak.original_sub_id,
            nak.status_code,
            nak.message_text()
        );
    }

    fn on_profile_details(&mut self, source: Muid, profile: ProfileId, target: u8, data: &[u8]) {
        debug!(
            "Profile details from {} for {} target {:#04X}: {} bytes",
            source,
            profile,
            target,
            data.len()
        );
    }

    fn on_profile_specific_data(&mut self, source: Muid, profile: ProfileId, data: &[u8]) {
        debug!("{} bytes of {} data from {}", data.len(), profile, source);
    }

    fn on_midi_message_report_end(&mut self, source: Muid) {
        debug!("MIDI message report from {} complete", source);
    }
}

/// Hooks with every default in place
#[derive(Debug, Default)]
pub struct DefaultInitiatorHooks;

impl InitiatorHooks for DefaultInitiatorHooks {}

/// Initiator settings
#[derive(Debug, Clone)]
pub struct InitiatorConfig {
    /// Wire form MUID, random when `None`
    pub muid: Option<u32>,
    pub identity: DeviceIdentity,
    pub categories: Categories,
    pub max_sysex_size: u32,
    pub output_path_id: u8,
    /// Simultaneous property requests asked for in the capabilities inquiry
    pub max_simultaneous_requests: u8,
    pub max_chunk_size: usize,
    pub max_pending_transfers: usize,
    /// Request ResourceList (then DeviceInfo) after the capabilities reply
    pub auto_fetch_catalog: bool,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self {
            muid: None,
            identity: DeviceIdentity::new([0, 0, 0], 0, 0, [0, 0, 0, 0]),
            categories: Categories::PROFILE_CONFIGURATION
                | Categories::PROPERTY_EXCHANGE
                | Categories::PROCESS_INQUIRY,
            max_sysex_size: DEFAULT_MAX_SYSEX_SIZE,
            output_path_id: 0,
            max_simultaneous_requests: DEFAULT_MAX_SIMULTANEOUS_REQUESTS,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_pending_transfers: DEFAULT_MAX_PENDING_TRANSFERS,
            auto_fetch_catalog: true,
        }
    }
}

pub struct Initiator {
    muid: Muid,
    config: InitiatorConfig,
    state: InitiatorState,
    connections: IndexMap<Muid, Connection>,
    send: SendFn,
    hooks: Box<dyn InitiatorHooks>,
    observers: ObserverList<InitiatorEvent>,
}

impl Initiator {
    /// Fails if the configured MUID is not 7-bit clean
    pub fn new(config: InitiatorConfig, send: SendFn) -> Result<Self> {
        let muid = match config.muid {
            Some(raw) => Muid::new(raw)?,
            None => Muid::random(),
        };
        if muid.is_broadcast() {
            return Err(CiError::InvalidMuid(muid.raw()));
        }
        info!("Initiator MUID {}", muid);
        Ok(Self {
            muid,
            config,
            state: InitiatorState::Initial,
            connections: IndexMap::new(),
            send,
            hooks: Box::new(DefaultInitiatorHooks),
            observers: ObserverList::new(),
        })
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn InitiatorHooks>) {
        self.hooks = hooks;
    }

    pub fn muid(&self) -> Muid {
        self.muid
    }

    pub fn state(&self) -> InitiatorState {
        self.state
    }

    pub fn config(&self) -> &InitiatorConfig {
        &self.config
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection(&self, muid: Muid) -> Option<&Connection> {
        self.connections.get(&muid)
    }

    pub fn connection_mut(&mut self, muid: Muid) -> Option<&mut Connection> {
        self.connections.get_mut(&muid)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ObserverId
    where
        F: Fn(&InitiatorEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn set_state(&mut self, to: InitiatorState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!("Initiator {:?} -> {:?}", from, to);
        self.observers
            .notify(&InitiatorEvent::StateChanged { from, to });
    }

    fn emit(&self, address: u8, destination: Muid, message: Message) -> Result<()> {
        let msg = CiMessage::new(address, self.muid, destination, message);
        let bytes = encode(&msg)?;
        trace!("-> {}", msg.summary());
        (self.send)(&bytes);
        Ok(())
    }

    fn emit_all(&self, destination: Muid, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.emit(address::FUNCTION_BLOCK, destination, message)?;
        }
        Ok(())
    }

    fn require(&self, muid: Muid) -> Result<&Connection> {
        self.connections
            .get(&muid)
            .ok_or(CiError::UnknownConnection(muid))
    }

    fn require_mut(&mut self, muid: Muid) -> Result<&mut Connection> {
        self.connections
            .get_mut(&muid)
            .ok_or(CiError::UnknownConnection(muid))
    }

    fn require_capability(&self, muid: Muid, category: Categories, name: &'static str) -> Result<()> {
        if self.require(muid)?.supports(category) {
            Ok(())
        } else {
            Err(CiError::CapabilityNotSupported {
                muid,
                capability: name,
            })
        }
    }

    // -----------------------------------------------------------------
    // Outbound operations
    // -----------------------------------------------------------------

    /// Broadcast a Discovery inquiry.
    ///
    /// The state moves to `DiscoverySent` before the bytes are handed to the
    /// send callback.
    pub fn send_discovery(&mut self) -> Result<()> {
        self.set_state(InitiatorState::DiscoverySent);
        let inquiry = DiscoveryInquiry {
            identity: self.config.identity,
            categories: self.config.categories,
            max_sysex_size: self.config.max_sysex_size,
            output_path_id: self.config.output_path_id,
        };
        info!("Sending Discovery as {}", self.muid);
        self.emit(
            address::FUNCTION_BLOCK,
            Muid::BROADCAST,
            Message::Discovery(inquiry),
        )
    }

    pub fn send_endpoint_inquiry(&mut self, destination: Muid) -> Result<()> {
        self.emit(
            address::FUNCTION_BLOCK,
            destination,
            Message::EndpointInquiry {
                status: ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
            },
        )
    }

    pub fn send_profile_inquiry(&mut self, destination: Muid, address: u8) -> Result<()> {
        self.emit(address, destination, Message::ProfileInquiry)
    }

    /// Ask a remote device to enable or disable a profile. Only single
    /// channel requests are supported.
    pub fn set_profile(
        &mut self,
        destination: Muid,
        address: u8,
        profile: ProfileId,
        enabled: bool,
        channels: u16,
    ) -> Result<()> {
        self.require_capability(destination, Categories::PROFILE_CONFIGURATION, "profile configuration")?;
        if channels > 1 {
            return Err(CiError::UnsupportedChannelCount {
                requested: channels,
            });
        }
        let message = if enabled {
            Message::SetProfileOn {
                profile,
                channels: 1,
            }
        } else {
            Message::SetProfileOff { profile }
        };
        self.emit(address, destination, message)
    }

    pub fn request_profile_details(
        &mut self,
        destination: Muid,
        address: u8,
        profile: ProfileId,
        target: u8,
    ) -> Result<()> {
        self.emit(
            address,
            destination,
            Message::ProfileDetailsInquiry { profile, target },
        )
    }

    pub fn send_profile_specific_data(
        &mut self,
        destination: Muid,
        address: u8,
        profile: ProfileId,
        data: Vec<u8>,
    ) -> Result<()> {
        self.emit(
            address,
            destination,
            Message::ProfileSpecificData { profile, data },
        )
    }

    pub fn send_property_capabilities_inquiry(&mut self, destination: Muid) -> Result<()> {
        self.require_capability(destination, Categories::PROPERTY_EXCHANGE, "property exchange")?;
        let capabilities = PropertyCapabilities {
            max_simultaneous_requests: self.config.max_simultaneous_requests,
            major_version: PROPERTY_EXCHANGE_MAJOR_VERSION,
            minor_version: PROPERTY_EXCHANGE_MINOR_VERSION,
        };
        self.emit(
            address::FUNCTION_BLOCK,
            destination,
            Message::PropertyCapabilitiesInquiry(capabilities),
        )
    }

    pub fn get_property(&mut self, destination: Muid, header: RequestHeader) -> Result<()> {
        let messages = self.require_mut(destination)?.properties_mut().create_get(header)?;
        self.emit_all(destination, messages)
    }

    pub fn set_property(&mut self, destination: Muid, header: RequestHeader, body: &[u8]) -> Result<()> {
        let messages = self
            .require_mut(destination)?
            .properties_mut()
            .create_set(header, body)?;
        self.emit_all(destination, messages)
    }

    pub fn subscribe_property(
        &mut self,
        destination: Muid,
        resource: &str,
        res_id: Option<&str>,
        encoding: BodyEncoding,
    ) -> Result<()> {
        let messages = self
            .require_mut(destination)?
            .properties_mut()
            .create_subscribe(resource, res_id, encoding)?;
        self.emit_all(destination, messages)
    }

    pub fn unsubscribe_property(
        &mut self,
        destination: Muid,
        resource: &str,
        res_id: Option<&str>,
    ) -> Result<()> {
        let messages = self
            .require_mut(destination)?
            .properties_mut()
            .create_unsubscribe(resource, res_id)?;
        self.emit_all(destination, messages)
    }

    pub fn send_process_inquiry(&mut self, destination: Muid) -> Result<()> {
        self.require_capability(destination, Categories::PROCESS_INQUIRY, "process inquiry")?;
        self.emit(
            address::FUNCTION_BLOCK,
            destination,
            Message::ProcessInquiryCapabilities,
        )
    }

    pub fn request_midi_message_report(
        &mut self,
        destination: Muid,
        address: u8,
        report: MidiMessageReport,
    ) -> Result<()> {
        self.require_capability(destination, Categories::PROCESS_INQUIRY, "process inquiry")?;
        self.emit(address, destination, Message::MidiMessageReportInquiry(report))
    }

    /// Broadcast that `target` is no longer valid and drop its connection
    pub fn invalidate_muid(&mut self, target: Muid) -> Result<()> {
        self.drop_connection(target);
        self.emit(
            address::FUNCTION_BLOCK,
            Muid::BROADCAST,
            Message::InvalidateMuid { target },
        )
    }

    fn drop_connection(&mut self, muid: Muid) {
        if self.connections.shift_remove(&muid).is_some() {
            info!("Dropped connection to {}", muid);
            self.observers
                .notify(&InitiatorEvent::ConnectionDropped(muid));
            if self.connections.is_empty() && self.state != InitiatorState::Initial {
                self.set_state(InitiatorState::DiscoverySent);
            }
        }
    }

    // -----------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------

    /// Feed one received message (SysEx delimiters excluded).
    ///
    /// Garbage and messages for other MUIDs are dropped with `Ok(())`. An
    /// error means a valid message could not be fully handled, typically a
    /// follow-up request that could not be built.
    pub fn process_input(&mut self, bytes: &[u8]) -> Result<()> {
        let msg = match decode(bytes) {
            Ok(msg) => msg,
            Err(DecodeError::UnsupportedSubId { header, sub_id }) => {
                if self.muid.accepts(header.destination) {
                    debug!("Unsupported sub-id {:#04X} from {}", sub_id, header.source);
                    self.reply_not_supported(&CiMessage::not_supported(&header, self.muid, sub_id));
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
        self.dispatch(&msg).map_err(|err| {
            warn!("Handling {} from {}: {}", msg.sub_id(), msg.header.source, err);
            err
        })
    }

    fn reply_not_supported(&self, nak: &CiMessage) {
        match encode(nak) {
            Ok(bytes) => (self.send)(&bytes),
            Err(err) => warn!("Cannot encode NAK: {}", err),
        }
    }

    fn dispatch(&mut self, msg: &CiMessage) -> Result<()> {
        let source = msg.header.source;
        match &msg.message {
            Message::DiscoveryReply(reply) => {
                if msg.header.destination == self.muid {
                    self.on_discovery_reply(source, reply)?;
                }
            }
            Message::EndpointReply(reply) => {
                let id = String::from_utf8_lossy(&reply.data).into_owned();
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.set_product_instance_id(id.clone());
                    self.observers
                        .notify(&InitiatorEvent::ProductInstanceId { muid: source, id });
                }
            }
            Message::InvalidateMuid { target } => self.on_invalidate(*target),
            Message::Ack(ack) => self.hooks.on_ack(source, ack),
            Message::Nak(nak) => self.hooks.on_nak(source, nak),

            Message::ProfileInquiryReply(reply) => {
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.apply_profile_reply(msg.header.address, &reply.enabled, &reply.disabled);
                    self.set_state(InitiatorState::Established);
                }
            }
            Message::ProfileEnabledReport { profile, channels }
            | Message::ProfileDisabledReport { profile, channels } => {
                let enabled = matches!(msg.message, Message::ProfileEnabledReport { .. });
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.profiles_mut()
                        .upsert(msg.header.address, *profile, enabled, *channels);
                }
            }
            Message::ProfileAddedReport { profile } => {
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.profiles_mut()
                        .upsert(msg.header.address, *profile, false, 1);
                }
            }
            Message::ProfileRemovedReport { profile } => {
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.profiles_mut().remove_target(msg.header.address, profile);
                }
            }
            Message::ProfileDetailsReply {
                profile,
                target,
                data,
            } => self.hooks.on_profile_details(source, *profile, *target, data),
            Message::ProfileSpecificData { profile, data } => {
                self.hooks.on_profile_specific_data(source, *profile, data)
            }

            Message::PropertyCapabilitiesReply(capabilities) => {
                self.on_property_capabilities(source, capabilities)?;
            }
            Message::GetPropertyDataReply(_)
            | Message::SetPropertyDataReply(_)
            | Message::SubscribePropertyReply(_)
            | Message::SubscribeProperty(_)
            | Message::PropertyNotify(_) => {
                let follow_up = match self.connections.get_mut(&source) {
                    Some(conn) => conn.properties_mut().process(&msg.message),
                    None => {
                        debug!("Property message from unknown MUID {}", source);
                        Vec::new()
                    }
                };
                self.emit_all(source, follow_up)?;
            }

            Message::ProcessInquiryCapabilitiesReply { features } => {
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.set_process_inquiry_features(*features);
                }
            }
            Message::MidiMessageReportReply(report) => {
                if let Some(conn) = self.connections.get_mut(&source) {
                    conn.set_last_midi_report(*report);
                }
            }
            Message::MidiMessageReportEnd => self.hooks.on_midi_message_report_end(source),

            // Broadcast inquiries from other initiators are not ours to answer
            Message::Discovery(_) => {}

            other => {
                if msg.header.destination == self.muid {
                    self.reply_not_supported(&CiMessage::not_supported(
                        &msg.header,
                        self.muid,
                        other.sub_id().as_byte(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn on_discovery_reply(&mut self, source: Muid, reply: &DiscoveryReply) -> Result<()> {
        if source.is_broadcast() {
            return Ok(());
        }
        info!(
            "Discovered {} ({:?}, max SysEx {})",
            source, reply.categories, reply.max_sysex_size
        );
        let client = PropertyClient::new(source)
            .with_limits(self.config.max_chunk_size, self.config.max_pending_transfers);
        if self
            .connections
            .insert(source, Connection::new(source, reply, client))
            .is_some()
        {
            debug!("Replaced existing connection to {}", source);
        }
        if self.state != InitiatorState::Established {
            self.set_state(InitiatorState::Discovered);
        }
        self.observers.notify(&InitiatorEvent::Discovered(source));

        // Next handshake phase, without waiting for the host
        self.send_endpoint_inquiry(source)?;
        let shared = reply.categories.intersection(self.config.categories);
        if shared.contains(Categories::PROFILE_CONFIGURATION) {
            self.send_profile_inquiry(source, address::FUNCTION_BLOCK)?;
        }
        if shared.contains(Categories::PROPERTY_EXCHANGE) {
            self.send_property_capabilities_inquiry(source)?;
        }
        Ok(())
    }

    fn on_property_capabilities(&mut self, source: Muid, capabilities: &PropertyCapabilities) -> Result<()> {
        let auto_fetch = self.config.auto_fetch_catalog;
        let Some(conn) = self.connections.get_mut(&source) else {
            return Ok(());
        };
        conn.properties_mut().set_capabilities(capabilities);
        self.set_state(InitiatorState::Established);
        if auto_fetch {
            self.get_property(source, RequestHeader::new(resources::RESOURCE_LIST))?;
        }
        Ok(())
    }

    fn on_invalidate(&mut self, target: Muid) {
        if target == self.muid {
            let old = self.muid;
            self.muid = Muid::random();
            warn!("MUID {} invalidated, now {}", old, self.muid);
            let dropped: Vec<Muid> = self.connections.keys().copied().collect();
            self.connections.clear();
            for muid in dropped {
                self.observers
                    .notify(&InitiatorEvent::ConnectionDropped(muid));
            }
            self.observers
                .notify(&InitiatorEvent::MuidRegenerated { old, new: self.muid });
            self.set_state(InitiatorState::Initial);
        } else {
            self.drop_connection(target);
        }
    }
}

impl std::fmt::Debug for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initiator")
            .field("muid", &self.muid)
            .field("state", &self.state)
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}
