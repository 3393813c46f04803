//! Property Exchange (Common Rules)
//!
//! - Resource metadata, values and subscriptions
//! - Body encodings: ASCII, Mcoded7, zlib+Mcoded7
//! - Chunk splitting and reassembly keyed by (source MUID, request id)
//! - JSON-pointer partial updates
//! - Responder side service and initiator side client

pub mod chunk;
pub mod client;
pub mod encoding;
pub mod header;
pub mod pointer;
pub mod service;
pub mod store;

use thiserror::Error;

use crate::json::{JsonError, JsonValue};

pub use chunk::{AssembledTransfer, ChunkAssembler, ChunkOutcome};
pub use client::{PropertyClient, PropertyEvent};
pub use encoding::BodyEncoding;
pub use header::{ReplyHeader, RequestHeader, SubscriptionCommand};
pub use service::{CommonRulesPropertyService, Outgoing};
pub use store::{MemoryPropertyStore, PropertyStore};

/// Common Rules status codes
pub mod status {
    /// Carried by a Notify that cancels a transaction
    pub const TERMINATED: u16 = 144;
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const RESOURCE_UNAVAILABLE: u16 = 341;
    pub const BAD_DATA: u16 = 342;
    pub const TOO_MANY_REQUESTS: u16 = 343;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_PERMITTED: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const NOT_ALLOWED: u16 = 405;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    pub const INVALID_DATA_VERSION: u16 = 445;
    pub const INTERNAL_ERROR: u16 = 500;

    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }
}

/// Header field names
pub mod fields {
    pub const RESOURCE: &str = "resource";
    pub const RES_ID: &str = "resId";
    pub const MUTUAL_ENCODING: &str = "mutualEncoding";
    pub const STATUS: &str = "status";
    pub const MESSAGE: &str = "message";
    pub const CACHE_TIME: &str = "cacheTime";
    pub const MEDIA_TYPE: &str = "mediaType";
    pub const OFFSET: &str = "offset";
    pub const LIMIT: &str = "limit";
    pub const TOTAL_COUNT: &str = "totalCount";
    pub const SET_PARTIAL: &str = "setPartial";
    pub const COMMAND: &str = "command";
    pub const SUBSCRIBE_ID: &str = "subscribeId";
}

/// Foundational resource names
pub mod resources {
    pub const RESOURCE_LIST: &str = "ResourceList";
    pub const DEVICE_INFO: &str = "DeviceInfo";
    pub const CHANNEL_LIST: &str = "ChannelList";
    pub const JSON_SCHEMA: &str = "JSONSchema";

    /// Resources computed by the service and never writable
    pub fn is_foundational(resource: &str) -> bool {
        matches!(
            resource,
            RESOURCE_LIST | DEVICE_INFO | CHANNEL_LIST | JSON_SCHEMA
        )
    }
}

pub const MEDIA_TYPE_JSON: &str = "application/json";

/// Default maximum data bytes per chunk
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 256;

/// Default number of simultaneous requests a responder accepts
pub const DEFAULT_MAX_SIMULTANEOUS_REQUESTS: u8 = 8;

/// Who may replace a resource value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanSet {
    #[default]
    None,
    Full,
    Partial,
}

impl CanSet {
    pub fn as_str(self) -> &'static str {
        match self {
            CanSet::None => "none",
            CanSet::Full => "full",
            CanSet::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(CanSet::None),
            "full" => Some(CanSet::Full),
            "partial" => Some(CanSet::Partial),
            _ => None,
        }
    }
}

/// Catalog entry describing one resource
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMetadata {
    pub resource: String,
    pub can_get: bool,
    pub can_set: CanSet,
    pub can_subscribe: bool,
    pub require_res_id: bool,
    pub media_types: Vec<String>,
    pub encodings: Vec<String>,
    pub schema: Option<JsonValue>,
    pub can_paginate: bool,
    pub columns: Vec<JsonValue>,
    /// Generated by the service rather than supplied by the host
    pub originator_system: bool,
}

impl PropertyMetadata {
    /// Get-only JSON resource with default encodings
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            can_get: true,
            can_set: CanSet::None,
            can_subscribe: false,
            require_res_id: false,
            media_types: vec![MEDIA_TYPE_JSON.to_string()],
            encodings: vec![BodyEncoding::Ascii.name().to_string()],
            schema: None,
            can_paginate: false,
            columns: Vec::new(),
            originator_system: false,
        }
    }

    pub fn read_only_system(resource: impl Into<String>) -> Self {
        Self {
            originator_system: true,
            ..Self::new(resource)
        }
    }

    pub fn supports_encoding(&self, encoding: BodyEncoding) -> bool {
        encoding == BodyEncoding::Ascii || self.encodings.iter().any(|e| e == encoding.name())
    }

    /// ResourceList entry. Fields equal to their Common Rules default are
    /// left out.
    pub fn to_json(&self) -> JsonValue {
        let mut members: Vec<(&str, JsonValue)> = vec![("resource", self.resource.as_str().into())];
        if !self.can_get {
            members.push(("canGet", false.into()));
        }
        if self.can_set != CanSet::None {
            members.push(("canSet", self.can_set.as_str().into()));
        }
        if self.can_subscribe {
            members.push(("canSubscribe", true.into()));
        }
        if self.require_res_id {
            members.push(("requireResId", true.into()));
        }
        if self.media_types != [MEDIA_TYPE_JSON] {
            members.push(("mediaTypes", string_array(&self.media_types)));
        }
        if self.encodings != [BodyEncoding::Ascii.name()] {
            members.push(("encodings", string_array(&self.encodings)));
        }
        if let Some(schema) = &self.schema {
            members.push(("schema", schema.clone()));
        }
        if self.can_paginate {
            members.push(("canPaginate", true.into()));
        }
        if !self.columns.is_empty() {
            members.push(("columns", JsonValue::Array(self.columns.clone())));
        }
        JsonValue::object(members)
    }

    /// Parse a ResourceList entry, applying Common Rules defaults
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let resource = value.get_str("resource")?;
        let strings = |key: &str| -> Option<Vec<String>> {
            value.get(key)?.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.into_owned()))
                    .collect()
            })
        };
        let defaults = Self::new(resource.clone());
        let system = resources::is_foundational(&resource);
        Some(Self {
            can_get: value.get_bool("canGet").unwrap_or(true),
            can_set: value
                .get_str("canSet")
                .and_then(|s| CanSet::parse(&s))
                .unwrap_or_default(),
            can_subscribe: value.get_bool("canSubscribe").unwrap_or(false),
            require_res_id: value.get_bool("requireResId").unwrap_or(false),
            media_types: strings("mediaTypes").unwrap_or(defaults.media_types),
            encodings: strings("encodings").unwrap_or(defaults.encodings),
            schema: value.get("schema").cloned(),
            can_paginate: value.get_bool("canPaginate").unwrap_or(false),
            columns: value
                .get("columns")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default(),
            originator_system: system,
            resource,
        })
    }
}

fn string_array(values: &[String]) -> JsonValue {
    JsonValue::Array(values.iter().map(|s| JsonValue::from(s.as_str())).collect())
}

/// Most recent known value of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub id: String,
    pub media_type: String,
    pub body: Vec<u8>,
}

impl PropertyValue {
    pub fn json(id: impl Into<String>, value: &JsonValue) -> Self {
        Self {
            id: id.into(),
            media_type: MEDIA_TYPE_JSON.to_string(),
            body: value.to_bytes(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.media_type == MEDIA_TYPE_JSON
    }

    pub fn to_json(&self) -> Result<JsonValue, PropertyError> {
        JsonValue::parse_bytes(&self.body).map_err(PropertyError::InvalidBody)
    }
}

/// An active subscription held by a responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub resource: String,
    pub res_id: Option<String>,
    pub subscriber: crate::ci::Muid,
    pub encoding: Option<BodyEncoding>,
    pub subscribe_id: String,
}

/// Property Exchange failures. Each maps to a Common Rules status code
/// that is sent back in the reply header.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("resource '{0}' is read-only")]
    ReadOnly(String),

    #[error("resource '{0}' cannot be read")]
    NotReadable(String),

    #[error("resource '{0}' does not accept partial updates")]
    PartialNotAllowed(String),

    #[error("resource '{0}' cannot be subscribed")]
    NotSubscribable(String),

    #[error("resource '{0}' requires a resId")]
    MissingResId(String),

    #[error("no value stored for '{0}'")]
    NoValue(String),

    #[error("unknown subscription '{0}'")]
    UnknownSubscription(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("invalid JSON body: {0}")]
    InvalidBody(JsonError),

    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("body could not be decoded: {0}")]
    BodyDecode(String),

    #[error("body could not be encoded: {0}")]
    BodyEncode(String),

    #[error("expected media type {expected}, got {actual}")]
    MediaTypeMismatch { expected: String, actual: String },

    #[error("partial update path '{path}' does not resolve to an object")]
    PointerNotObject { path: String },

    #[error("invalid partial update path '{0}'")]
    InvalidPointer(String),

    #[error("chunk {index} of {total} is out of range")]
    ChunkOutOfRange { index: u16, total: u16 },

    #[error("chunk {index} received twice")]
    DuplicateChunk { index: u16 },

    #[error("transfer announced {expected} chunks, chunk says {actual}")]
    InconsistentChunkCount { expected: u16, actual: u16 },

    #[error("final chunk arrived with {missing} chunk(s) missing")]
    MissingChunks { missing: usize },

    #[error("payload needs {chunks} chunks, more than a transfer can carry")]
    PayloadTooLarge { chunks: usize },

    #[error("too many simultaneous requests (max {max})")]
    TooManyRequests { max: u8 },

    #[error("property store failure: {0}")]
    Store(String),
}

impl PropertyError {
    /// Status code reported in the reply header
    pub fn status(&self) -> u16 {
        match self {
            PropertyError::UnknownResource(_)
            | PropertyError::NoValue(_)
            | PropertyError::UnknownSubscription(_) => status::NOT_FOUND,
            PropertyError::ReadOnly(_)
            | PropertyError::NotReadable(_)
            | PropertyError::PartialNotAllowed(_)
            | PropertyError::NotSubscribable(_) => status::NOT_ALLOWED,
            PropertyError::MissingResId(_)
            | PropertyError::MalformedHeader(_)
            | PropertyError::UnsupportedEncoding(_)
            | PropertyError::InvalidPointer(_) => status::BAD_REQUEST,
            PropertyError::InvalidBody(_)
            | PropertyError::BodyDecode(_)
            | PropertyError::PointerNotObject { .. }
            | PropertyError::ChunkOutOfRange { .. }
            | PropertyError::DuplicateChunk { .. }
            | PropertyError::InconsistentChunkCount { .. }
            | PropertyError::MissingChunks { .. } => status::BAD_DATA,
            PropertyError::MediaTypeMismatch { .. } => status::UNSUPPORTED_MEDIA_TYPE,
            PropertyError::PayloadTooLarge { .. } => status::PAYLOAD_TOO_LARGE,
            PropertyError::TooManyRequests { .. } => status::TOO_MANY_REQUESTS,
            PropertyError::BodyEncode(_) | PropertyError::Store(_) => status::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_json_omits_defaults() {
        let meta = PropertyMetadata::new("X-Patch");
        assert_eq!(meta.to_json().serialize(), r#"{"resource":"X-Patch"}"#);

        let full = PropertyMetadata {
            can_set: CanSet::Partial,
            can_subscribe: true,
            can_paginate: true,
            encodings: vec!["ASCII".into(), "Mcoded7".into()],
            ..PropertyMetadata::new("X-Patch")
        };
        let json = full.to_json();
        assert_eq!(
            json.serialize(),
            r#"{"resource":"X-Patch","canSet":"partial","canSubscribe":true,"encodings":["ASCII","Mcoded7"],"canPaginate":true}"#
        );
        assert_eq!(PropertyMetadata::from_json(&json), Some(full));
    }

    #[test]
    fn test_metadata_from_json_marks_foundational() {
        let json = JsonValue::parse(r#"{"resource":"DeviceInfo"}"#).unwrap();
        let meta = PropertyMetadata::from_json(&json).unwrap();
        assert!(meta.originator_system);
        assert!(meta.can_get);
        assert_eq!(meta.can_set, CanSet::None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(PropertyError::UnknownResource("x".into()).status(), 404);
        assert_eq!(PropertyError::ReadOnly("x".into()).status(), 405);
        assert_eq!(PropertyError::MalformedHeader("x".into()).status(), 400);
        assert_eq!(PropertyError::BodyDecode("x".into()).status(), 342);
        assert_eq!(
            PropertyError::MediaTypeMismatch {
                expected: MEDIA_TYPE_JSON.into(),
                actual: "text/plain".into()
            }
            .status(),
            415
        );
        assert!(status::is_success(status::ACCEPTED));
        assert!(!status::is_success(status::BAD_DATA));
    }
}
