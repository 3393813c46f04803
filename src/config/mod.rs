//! Configuration management for the MIDI-CI engine
//!
//! Loads and validates the YAML document describing the local device, its
//! Capability Inquiry limits, and the profiles / properties / channels a
//! responder starts with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::ci::{
    address, Categories, DeviceIdentity, DeviceInfo, Muid, DEFAULT_MAX_SYSEX_SIZE, HEADER_LEN,
    MAX_PRODUCT_INSTANCE_ID_LEN,
};
use crate::initiator::InitiatorConfig;
use crate::json::JsonValue;
use crate::midi;
use crate::profile::{ProfileEntry, ProfileId};
use crate::property::chunk::DEFAULT_MAX_PENDING_TRANSFERS;
use crate::property::service::ServiceSettings;
use crate::property::{
    resources, CanSet, PropertyMetadata, PropertyValue, DEFAULT_MAX_CHUNK_SIZE,
    DEFAULT_MAX_SIMULTANEOUS_REQUESTS,
};
use crate::responder::{Responder, ResponderConfig};

/// Bytes of a Property Exchange message besides the header and body
/// (request id, three 14-bit counts, header length)
const PROPERTY_MESSAGE_OVERHEAD: usize = 1 + 2 + 2 + 2 + 2;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<ProfileConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelConfig>,
}

/// Local device identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// 28-bit MUID value, random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muid: Option<u32>,
    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: [u8; 3],
    #[serde(default)]
    pub family_id: u16,
    #[serde(default)]
    pub model_id: u16,
    #[serde(default)]
    pub version_id: [u8; 4],
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_instance_id: Option<String>,
}

/// Capability Inquiry categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryName {
    ProfileConfiguration,
    PropertyExchange,
    ProcessInquiry,
}

impl CategoryName {
    fn flag(self) -> Categories {
        match self {
            CategoryName::ProfileConfiguration => Categories::PROFILE_CONFIGURATION,
            CategoryName::PropertyExchange => Categories::PROPERTY_EXCHANGE,
            CategoryName::ProcessInquiry => Categories::PROCESS_INQUIRY,
        }
    }
}

/// Protocol limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CiConfig {
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryName>,
    #[serde(default = "default_max_sysex_size")]
    pub max_sysex_size: u32,
    #[serde(default)]
    pub output_path_id: u8,
    #[serde(default = "default_function_block")]
    pub function_block: u8,
    #[serde(default = "default_max_simultaneous_requests")]
    pub max_simultaneous_requests: u8,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_max_pending_transfers")]
    pub max_pending_transfers: usize,
    #[serde(default = "default_true")]
    pub auto_fetch_catalog: bool,
    #[serde(default = "default_process_inquiry_features")]
    pub process_inquiry_features: u8,
}

/// Initial responder profile
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// Five profile id bytes
    pub id: [u8; 5],
    #[serde(default = "default_function_block")]
    pub address: u8,
    #[serde(default)]
    pub enabled: bool,
}

/// Set permission of a configured resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CanSetConfig {
    #[default]
    None,
    Full,
    Partial,
}

impl From<CanSetConfig> for CanSet {
    fn from(value: CanSetConfig) -> Self {
        match value {
            CanSetConfig::None => CanSet::None,
            CanSetConfig::Full => CanSet::Full,
            CanSetConfig::Partial => CanSet::Partial,
        }
    }
}

/// Extra responder resource
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropertyConfig {
    pub resource: String,
    #[serde(default = "default_true")]
    pub can_get: bool,
    #[serde(default)]
    pub can_set: CanSetConfig,
    #[serde(default)]
    pub can_subscribe: bool,
    #[serde(default)]
    pub require_res_id: bool,
    #[serde(default)]
    pub can_paginate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encodings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Initial value, any YAML value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// ChannelList entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub title: String,
    /// 1-based MIDI channel
    pub channel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_title: Option<String>,
}

impl EngineConfig {
    /// Load configuration from file with validation
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;
        if let Some(muid) = device.muid {
            let muid = Muid::from_u28(muid).with_context(|| format!("Invalid device MUID {:#X}", muid))?;
            if muid.is_broadcast() {
                anyhow::bail!("Device MUID cannot be the broadcast MUID");
            }
        }
        if !midi::is_7bit_clean(&device.manufacturer_id) {
            anyhow::bail!("manufacturer_id bytes must be 0-127");
        }
        if !midi::is_7bit_clean(&device.version_id) {
            anyhow::bail!("version_id bytes must be 0-127");
        }
        if device.family_id > 0x3FFF || device.model_id > 0x3FFF {
            anyhow::bail!("family_id and model_id must fit in 14 bits");
        }
        if let Some(id) = &device.product_instance_id {
            if id.len() > MAX_PRODUCT_INSTANCE_ID_LEN {
                anyhow::bail!(
                    "product_instance_id is {} bytes (max {})",
                    id.len(),
                    MAX_PRODUCT_INSTANCE_ID_LEN
                );
            }
            if !id.is_ascii() {
                anyhow::bail!("product_instance_id must be ASCII");
            }
        }

        let ci = &self.ci;
        if ci.max_simultaneous_requests == 0 || ci.max_simultaneous_requests > 0x7F {
            anyhow::bail!(
                "max_simultaneous_requests {} is invalid (must be 1-127)",
                ci.max_simultaneous_requests
            );
        }
        if ci.max_chunk_size == 0 {
            anyhow::bail!("max_chunk_size cannot be 0");
        }
        let smallest = ci.max_chunk_size + HEADER_LEN + PROPERTY_MESSAGE_OVERHEAD;
        if smallest > ci.max_sysex_size as usize {
            anyhow::bail!(
                "max_chunk_size {} does not fit in max_sysex_size {}",
                ci.max_chunk_size,
                ci.max_sysex_size
            );
        }
        if ci.max_pending_transfers == 0 {
            anyhow::bail!("max_pending_transfers cannot be 0");
        }
        if ci.output_path_id > 0x7F || ci.function_block > 0x7F || ci.process_inquiry_features > 0x7F {
            anyhow::bail!("output_path_id, function_block and process_inquiry_features must be 0-127");
        }

        let mut profile_keys = HashSet::new();
        for (idx, profile) in self.profiles.iter().enumerate() {
            ProfileId::new(profile.id).with_context(|| format!("Invalid id in profile {}", idx))?;
            if !is_profile_address(profile.address) {
                anyhow::bail!(
                    "Profile {} has invalid address {:#04X} (channel 0x00-0x0F, group 0x7E or function block 0x7F)",
                    idx,
                    profile.address
                );
            }
            if !profile_keys.insert((profile.address, profile.id)) {
                anyhow::bail!(
                    "Profile {:02X?} is listed twice at {}",
                    profile.id,
                    address::describe(profile.address)
                );
            }
        }

        let mut resource_names = HashSet::new();
        for property in &self.properties {
            if property.resource.is_empty() {
                anyhow::bail!("Property resource name cannot be empty");
            }
            if resources::is_foundational(&property.resource) {
                anyhow::bail!("'{}' is generated by the engine", property.resource);
            }
            if !resource_names.insert(property.resource.as_str()) {
                anyhow::bail!("Property '{}' is listed twice", property.resource);
            }
        }

        for channel in &self.channels {
            if channel.channel == 0 || channel.channel > 16 {
                anyhow::bail!(
                    "Channel '{}' has invalid MIDI channel {} (must be 1-16)",
                    channel.title,
                    channel.channel
                );
            }
        }

        Ok(())
    }

    pub fn categories(&self) -> Categories {
        self.ci
            .categories
            .iter()
            .fold(Categories::NONE, |acc, name| acc | name.flag())
    }

    /// Wire form MUID, `None` when a random one should be generated
    fn muid(&self) -> Result<Option<u32>> {
        match self.device.muid {
            Some(value) => Ok(Some(Muid::from_u28(value)?.raw())),
            None => Ok(None),
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.device.manufacturer_id,
            self.device.family_id,
            self.device.model_id,
            self.device.version_id,
        )
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            identity: self.identity(),
            manufacturer: self.device.manufacturer.clone(),
            family: self.device.family.clone(),
            model: self.device.model.clone(),
            version: self.device.version.clone(),
            serial_number: self.device.serial_number.clone(),
        }
    }

    /// Initiator settings. The configured MUID belongs to the responder, so
    /// the initiator always draws a random one.
    pub fn initiator_config(&self) -> InitiatorConfig {
        InitiatorConfig {
            muid: None,
            identity: self.identity(),
            categories: self.categories(),
            max_sysex_size: self.ci.max_sysex_size,
            output_path_id: self.ci.output_path_id,
            max_simultaneous_requests: self.ci.max_simultaneous_requests,
            max_chunk_size: self.ci.max_chunk_size,
            max_pending_transfers: self.ci.max_pending_transfers,
            auto_fetch_catalog: self.ci.auto_fetch_catalog,
        }
    }

    pub fn responder_config(&self) -> Result<ResponderConfig> {
        Ok(ResponderConfig {
            muid: self.muid()?,
            device_info: self.device_info(),
            categories: self.categories(),
            max_sysex_size: self.ci.max_sysex_size,
            function_block: self.ci.function_block,
            product_instance_id: self.device.product_instance_id.clone(),
            process_inquiry_features: self.ci.process_inquiry_features,
            property: ServiceSettings {
                max_simultaneous_requests: self.ci.max_simultaneous_requests,
                max_chunk_size: self.ci.max_chunk_size,
                max_pending_transfers: self.ci.max_pending_transfers,
            },
            ..ResponderConfig::default()
        })
    }

    /// Load the configured profiles, resources and channels into a responder
    pub fn populate(&self, responder: &mut Responder) -> Result<()> {
        for profile in &self.profiles {
            let entry = ProfileEntry::new(ProfileId::new(profile.id)?, profile.address, profile.enabled);
            responder.add_profile(entry)?;
        }

        for property in &self.properties {
            let mut metadata = PropertyMetadata::new(property.resource.clone());
            metadata.can_get = property.can_get;
            metadata.can_set = property.can_set.into();
            metadata.can_subscribe = property.can_subscribe;
            metadata.require_res_id = property.require_res_id;
            metadata.can_paginate = property.can_paginate;
            if let Some(encodings) = &property.encodings {
                metadata.encodings = encodings.clone();
            }
            metadata.schema = property.schema.as_ref().map(JsonValue::from);
            let initial = property
                .value
                .as_ref()
                .map(|value| PropertyValue::json(property.resource.clone(), &JsonValue::from(value)));
            responder
                .add_property(metadata, initial)
                .with_context(|| format!("Failed to register property '{}'", property.resource))?;
        }

        if !self.channels.is_empty() {
            responder.properties_mut().set_channel_list(Some(self.channel_list()));
        }
        Ok(())
    }

    /// ChannelList resource body
    pub fn channel_list(&self) -> JsonValue {
        JsonValue::Array(
            self.channels
                .iter()
                .map(|channel| {
                    let mut members = vec![
                        ("title", JsonValue::from(channel.title.as_str())),
                        ("channel", JsonValue::from(i64::from(channel.channel))),
                    ];
                    if let Some(program) = &channel.program_title {
                        members.push(("programTitle", JsonValue::from(program.as_str())));
                    }
                    JsonValue::object(members)
                })
                .collect(),
        )
    }
}

fn is_profile_address(address: u8) -> bool {
    matches!(address, 0x00..=0x0F | address::GROUP | address::FUNCTION_BLOCK)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            muid: None,
            manufacturer_id: default_manufacturer_id(),
            family_id: 0,
            model_id: 0,
            version_id: [0; 4],
            manufacturer: String::new(),
            family: String::new(),
            model: String::new(),
            version: String::new(),
            serial_number: None,
            product_instance_id: None,
        }
    }
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            max_sysex_size: default_max_sysex_size(),
            output_path_id: 0,
            function_block: default_function_block(),
            max_simultaneous_requests: default_max_simultaneous_requests(),
            max_chunk_size: default_max_chunk_size(),
            max_pending_transfers: default_max_pending_transfers(),
            auto_fetch_catalog: true,
            process_inquiry_features: default_process_inquiry_features(),
        }
    }
}

// Default value functions
/// Non-commercial / educational manufacturer id
fn default_manufacturer_id() -> [u8; 3] { [0x7D, 0x00, 0x00] }
fn default_categories() -> Vec<CategoryName> {
    vec![
        CategoryName::ProfileConfiguration,
        CategoryName::PropertyExchange,
        CategoryName::ProcessInquiry,
    ]
}
fn default_max_sysex_size() -> u32 { DEFAULT_MAX_SYSEX_SIZE }
fn default_function_block() -> u8 { address::FUNCTION_BLOCK }
fn default_max_simultaneous_requests() -> u8 { DEFAULT_MAX_SIMULTANEOUS_REQUESTS }
fn default_max_chunk_size() -> usize { DEFAULT_MAX_CHUNK_SIZE }
fn default_max_pending_transfers() -> usize { DEFAULT_MAX_PENDING_TRANSFERS }
fn default_process_inquiry_features() -> u8 { 0x01 }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
device:
  muid: 0x6789A
  manufacturer_id: [0x7D, 0x00, 0x00]
  family_id: 1
  model_id: 2
  version_id: [0, 1, 0, 0]
  manufacturer: "Test Works"
  model: "Desk Synth"
  product_instance_id: "unit-1"

ci:
  categories: [profile_configuration, property_exchange]
  max_chunk_size: 128

profiles:
  - id: [0x7E, 0x21, 0x00, 0x01, 0x01]
    address: 0x00
    enabled: true

properties:
  - resource: X-Patch
    can_set: partial
    can_subscribe: true
    value:
      name: Init
      level: 3

channels:
  - title: Lead
    channel: 1
    program_title: Saw
"#;

    #[test]
    fn test_load_from_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("midi-ci.yaml");
        fs::write(&config_path, SAMPLE)?;

        let config = EngineConfig::load(&config_path)?;
        assert_eq!(config.device.muid, Some(0x6789A));
        assert_eq!(config.ci.max_chunk_size, 128);
        assert_eq!(config.ci.max_sysex_size, DEFAULT_MAX_SYSEX_SIZE);
        assert!(!config.categories().contains(Categories::PROCESS_INQUIRY));
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.properties[0].can_set, CanSetConfig::Partial);
        Ok(())
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = EngineConfig::load("/nonexistent/midi-ci.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }

    #[test]
    fn test_empty_document_uses_defaults() -> Result<()> {
        let config = EngineConfig::from_yaml("{}")?;
        assert_eq!(config.device.manufacturer_id, [0x7D, 0x00, 0x00]);
        assert_eq!(config.ci.max_simultaneous_requests, DEFAULT_MAX_SIMULTANEOUS_REQUESTS);
        assert!(config.categories().contains(Categories::PROPERTY_EXCHANGE));
        Ok(())
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "device:\n  manufacturer_id: [0x80, 0, 0]\n",
            "device:\n  product_instance_id: \"seventeen-chars-x\"\n",
            "device:\n  muid: 0x10000000\n",
            "ci:\n  max_simultaneous_requests: 0\n",
            "ci:\n  max_sysex_size: 128\n  max_chunk_size: 512\n",
            "profiles:\n  - id: [0x7E, 1, 0, 1, 1]\n  - id: [0x7E, 1, 0, 1, 1]\n",
            "profiles:\n  - id: [0x7E, 1, 0, 1, 1]\n    address: 0x20\n",
            "properties:\n  - resource: DeviceInfo\n",
            "channels:\n  - title: X\n    channel: 17\n",
        ];
        for case in cases {
            assert!(EngineConfig::from_yaml(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_same_profile_at_two_addresses_is_fine() {
        let yaml = "profiles:\n  - id: [0x7E, 1, 0, 1, 1]\n    address: 0\n  - id: [0x7E, 1, 0, 1, 1]\n    address: 1\n";
        assert!(EngineConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_populate_responder() -> Result<()> {
        let config = EngineConfig::from_yaml(SAMPLE)?;
        let send: crate::SendFn = Arc::new(|_: &[u8]| {});
        let mut responder = Responder::new(config.responder_config()?, send)?;
        config.populate(&mut responder)?;

        assert_eq!(responder.muid(), Muid::from_u28(0x6789A)?);
        let profile = ProfileId::standard(0x21, 0x00, 0x01, 0x01);
        assert!(responder.profiles().get(0x00, &profile).unwrap().enabled);

        let value = responder.properties().value("X-Patch", None).unwrap();
        assert_eq!(value.to_json()?.get_i64("level"), Some(3));
        assert!(responder.properties().metadata(resources::CHANNEL_LIST).is_some());
        assert_eq!(
            config.channel_list().serialize(),
            r#"[{"title":"Lead","channel":1,"programTitle":"Saw"}]"#
        );
        Ok(())
    }

    #[test]
    fn test_save_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("saved.yaml");
        let config = EngineConfig::from_yaml(SAMPLE)?;
        config.save(&path)?;
        let reloaded = EngineConfig::load(&path)?;
        assert_eq!(reloaded.device.product_instance_id.as_deref(), Some("unit-1"));
        assert_eq!(reloaded.properties.len(), 1);
        Ok(())
    }
}
