//! Device identity tuple and the DeviceInfo resource

use crate::json::JsonValue;
use crate::midi::convert;

/// Manufacturer / family / model / revision tuple sent in Discovery.
///
/// Every field is kept 7-bit safe: constructors mask their inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceIdentity {
    /// SysEx manufacturer id, 3 bytes (single-byte ids use `[id, 0, 0]`)
    pub manufacturer: [u8; 3],
    /// 14-bit device family
    pub family: u16,
    /// 14-bit model number within the family
    pub model: u16,
    /// Software revision level, 4 bytes
    pub version: [u8; 4],
}

impl DeviceIdentity {
    /// Size of the identity block on the wire
    pub const WIRE_LEN: usize = 11;

    pub fn new(manufacturer: [u8; 3], family: u16, model: u16, version: [u8; 4]) -> Self {
        Self {
            manufacturer: manufacturer.map(|b| b & 0x7F),
            family: family & convert::MAX_14BIT,
            model: model & convert::MAX_14BIT,
            version: version.map(|b| b & 0x7F),
        }
    }

    /// Append the wire form
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend(self.manufacturer.iter().map(|b| b & 0x7F));
        out.extend_from_slice(&convert::to_14bit_bytes(self.family));
        out.extend_from_slice(&convert::to_14bit_bytes(self.model));
        out.extend(self.version.iter().map(|b| b & 0x7F));
    }

    /// Read the wire form from the start of `data`
    pub fn read_from(data: &[u8]) -> Option<Self> {
        let block = data.get(..Self::WIRE_LEN)?;
        Some(Self::new(
            [block[0], block[1], block[2]],
            convert::from_14bit_bytes(block[3], block[4]),
            convert::from_14bit_bytes(block[5], block[6]),
            [block[7], block[8], block[9], block[10]],
        ))
    }
}

/// Identity plus the human readable strings published as `DeviceInfo`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub identity: DeviceIdentity,
    pub manufacturer: String,
    pub family: String,
    pub model: String,
    pub version: String,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Common Rules `DeviceInfo` body
    pub fn to_json(&self) -> JsonValue {
        let id = &self.identity;
        let bytes = |values: &[u8]| {
            JsonValue::Array(values.iter().map(|b| JsonValue::from(*b)).collect())
        };
        let mut members = vec![
            ("manufacturerId", bytes(&id.manufacturer)),
            ("familyId", bytes(&convert::to_14bit_bytes(id.family))),
            ("modelId", bytes(&convert::to_14bit_bytes(id.model))),
            ("versionId", bytes(&id.version)),
            ("manufacturer", JsonValue::from(self.manufacturer.as_str())),
            ("family", JsonValue::from(self.family.as_str())),
            ("model", JsonValue::from(self.model.as_str())),
            ("version", JsonValue::from(self.version.as_str())),
        ];
        if let Some(serial) = &self.serial_number {
            members.push(("serialNumber", JsonValue::from(serial.as_str())));
        }
        JsonValue::object(members)
    }

    /// Parse a `DeviceInfo` body; missing strings default to empty
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let byte_array = |key: &str| -> Option<Vec<u8>> {
            value
                .get(key)?
                .as_array()?
                .iter()
                .map(|v| v.as_i64().map(|n| (n & 0x7F) as u8))
                .collect()
        };
        let manufacturer = byte_array("manufacturerId")?;
        let family = byte_array("familyId")?;
        let model = byte_array("modelId")?;
        let version = byte_array("versionId")?;
        if manufacturer.len() != 3 || family.len() != 2 || model.len() != 2 || version.len() != 4
        {
            return None;
        }
        let text = |key: &str| value.get_str(key).unwrap_or_default();
        Some(Self {
            identity: DeviceIdentity::new(
                [manufacturer[0], manufacturer[1], manufacturer[2]],
                convert::from_14bit_bytes(family[0], family[1]),
                convert::from_14bit_bytes(model[0], model[1]),
                [version[0], version[1], version[2], version[3]],
            ),
            manufacturer: text("manufacturer"),
            family: text("family"),
            model: text("model"),
            version: text("version"),
            serial_number: value.get_str("serialNumber"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identity() -> DeviceIdentity {
        DeviceIdentity::new([0x00, 0x21, 0x1D], 0x1234, 0x0102, [1, 2, 3, 4])
    }

    #[test]
    fn test_masks_to_7bit() {
        let identity = DeviceIdentity::new([0xFF, 0x80, 0x01], 0xFFFF, 0x4001, [0x80; 4]);
        assert_eq!(identity.manufacturer, [0x7F, 0x00, 0x01]);
        assert_eq!(identity.family, 0x3FFF);
        assert_eq!(identity.model, 0x0001);
        assert_eq!(identity.version, [0; 4]);
    }

    #[test]
    fn test_wire_round_trip() {
        let identity = sample_identity();
        let mut out = Vec::new();
        identity.write_to(&mut out);
        assert_eq!(out.len(), DeviceIdentity::WIRE_LEN);
        assert_eq!(&out[3..5], &[0x34, 0x24]);
        assert_eq!(DeviceIdentity::read_from(&out), Some(identity));
        assert_eq!(DeviceIdentity::read_from(&out[..10]), None);
    }

    #[test]
    fn test_device_info_json() {
        let info = DeviceInfo {
            identity: sample_identity(),
            manufacturer: "Acme".to_string(),
            family: "Synths".to_string(),
            model: "Model One".to_string(),
            version: "1.2.3".to_string(),
            serial_number: Some("SN-42".to_string()),
        };
        let json = info.to_json();
        assert_eq!(
            json.serialize(),
            concat!(
                r#"{"manufacturerId":[0,33,29],"familyId":[52,36],"modelId":[2,2],"#,
                r#""versionId":[1,2,3,4],"manufacturer":"Acme","family":"Synths","#,
                r#""model":"Model One","version":"1.2.3","serialNumber":"SN-42"}"#
            )
        );
        assert_eq!(DeviceInfo::from_json(&json), Some(info));
    }

    #[test]
    fn test_device_info_rejects_bad_ids() {
        let json = JsonValue::parse(r#"{"manufacturerId":[1,2],"familyId":[0,0],"modelId":[0,0],"versionId":[0,0,0,0]}"#).unwrap();
        assert_eq!(DeviceInfo::from_json(&json), None);
    }
}
