//! Per remote device state held by the initiator

use crate::ci::{Categories, DeviceIdentity, DiscoveryReply, MidiMessageReport, Muid};
use crate::profile::{ProfileId, ProfileTable};
use crate::property::PropertyClient;

/// One discovered remote MUID.
///
/// Created from a Discovery reply and dropped when the remote MUID is
/// invalidated. A rediscovered device gets a fresh connection.
#[derive(Debug)]
pub struct Connection {
    muid: Muid,
    identity: DeviceIdentity,
    categories: Categories,
    max_sysex_size: u32,
    function_block: u8,
    product_instance_id: Option<String>,
    profiles: ProfileTable,
    properties: PropertyClient,
    process_inquiry_features: Option<u8>,
    last_midi_report: Option<MidiMessageReport>,
}

impl Connection {
    pub(crate) fn new(muid: Muid, reply: &DiscoveryReply, properties: PropertyClient) -> Self {
        Self {
            muid,
            identity: reply.identity,
            categories: reply.categories,
            max_sysex_size: reply.max_sysex_size,
            function_block: reply.function_block,
            product_instance_id: None,
            profiles: ProfileTable::new(),
            properties,
            process_inquiry_features: None,
            last_midi_report: None,
        }
    }

    pub fn muid(&self) -> Muid {
        self.muid
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn categories(&self) -> Categories {
        self.categories
    }

    pub fn supports(&self, category: Categories) -> bool {
        self.categories.contains(category)
    }

    /// Receivable maximum SysEx size advertised by the remote device
    pub fn max_sysex_size(&self) -> u32 {
        self.max_sysex_size
    }

    pub fn function_block(&self) -> u8 {
        self.function_block
    }

    pub fn product_instance_id(&self) -> Option<&str> {
        self.product_instance_id.as_deref()
    }

    pub(crate) fn set_product_instance_id(&mut self, id: String) {
        self.product_instance_id = Some(id);
    }

    /// Mirror of the remote profile table
    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileTable {
        &mut self.profiles
    }

    /// Replace everything known at `address` with an inquiry reply
    pub(crate) fn apply_profile_reply(
        &mut self,
        address: u8,
        enabled: &[ProfileId],
        disabled: &[ProfileId],
    ) {
        self.profiles.clear_address(address);
        for id in enabled {
            self.profiles.upsert(address, *id, true, 1);
        }
        for id in disabled {
            self.profiles.upsert(address, *id, false, 1);
        }
    }

    pub fn properties(&self) -> &PropertyClient {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyClient {
        &mut self.properties
    }

    pub fn process_inquiry_features(&self) -> Option<u8> {
        self.process_inquiry_features
    }

    pub(crate) fn set_process_inquiry_features(&mut self, features: u8) {
        self.process_inquiry_features = Some(features);
    }

    /// Data selection of the latest MIDI Message Report reply
    pub fn last_midi_report(&self) -> Option<&MidiMessageReport> {
        self.last_midi_report.as_ref()
    }

    pub(crate) fn set_last_midi_report(&mut self, report: MidiMessageReport) {
        self.last_midi_report = Some(report);
    }
}
