//! Common Rules request and reply headers

use super::{fields, BodyEncoding, PropertyError, MEDIA_TYPE_JSON};
use crate::json::JsonValue;

/// Subscription commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Start,
    End,
    /// Responder push: body is the complete new value
    Full,
    /// Responder push: body is a partial update
    Partial,
    /// Responder push: value changed, initiator should Get it
    Notify,
}

impl SubscriptionCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionCommand::Start => "start",
            SubscriptionCommand::End => "end",
            SubscriptionCommand::Full => "full",
            SubscriptionCommand::Partial => "partial",
            SubscriptionCommand::Notify => "notify",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(SubscriptionCommand::Start),
            "end" => Some(SubscriptionCommand::End),
            "full" => Some(SubscriptionCommand::Full),
            "partial" => Some(SubscriptionCommand::Partial),
            "notify" => Some(SubscriptionCommand::Notify),
            _ => None,
        }
    }
}

/// Header of a Get / Set / Subscribe request (and of responder pushed
/// subscription updates)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestHeader {
    pub resource: String,
    pub res_id: Option<String>,
    pub mutual_encoding: Option<String>,
    pub media_type: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub set_partial: bool,
    pub command: Option<SubscriptionCommand>,
    pub subscribe_id: Option<String>,
}

impl RequestHeader {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Parse header bytes. `resource` is required unless the header carries
    /// a `subscribeId` (responder pushes may omit it).
    pub fn parse(bytes: &[u8]) -> Result<Self, PropertyError> {
        let json = JsonValue::parse_bytes(bytes)
            .map_err(|e| PropertyError::MalformedHeader(e.to_string()))?;
        if json.as_object().is_none() {
            return Err(PropertyError::MalformedHeader(
                "header is not an object".to_string(),
            ));
        }
        let command = match json.get_str(fields::COMMAND) {
            Some(text) => Some(SubscriptionCommand::parse(&text).ok_or_else(|| {
                PropertyError::MalformedHeader(format!("unknown command '{}'", text))
            })?),
            None => None,
        };
        let subscribe_id = json.get_str(fields::SUBSCRIBE_ID);
        let resource = match json.get_str(fields::RESOURCE) {
            Some(resource) => resource,
            None if subscribe_id.is_some() => String::new(),
            None => {
                return Err(PropertyError::MalformedHeader(
                    "missing 'resource'".to_string(),
                ))
            }
        };
        Ok(Self {
            resource,
            res_id: json.get_str(fields::RES_ID),
            mutual_encoding: json.get_str(fields::MUTUAL_ENCODING),
            media_type: json.get_str(fields::MEDIA_TYPE),
            offset: non_negative(&json, fields::OFFSET)?,
            limit: non_negative(&json, fields::LIMIT)?,
            set_partial: json.get_bool(fields::SET_PARTIAL).unwrap_or(false),
            command,
            subscribe_id,
        })
    }

    /// Requested body encoding, ASCII when absent
    pub fn encoding(&self) -> Result<BodyEncoding, PropertyError> {
        match &self.mutual_encoding {
            None => Ok(BodyEncoding::Ascii),
            Some(name) => BodyEncoding::from_name(name)
                .ok_or_else(|| PropertyError::UnsupportedEncoding(name.clone())),
        }
    }

    /// Media type of the body, JSON when absent
    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(MEDIA_TYPE_JSON)
    }

    pub fn to_json(&self) -> JsonValue {
        let mut members: Vec<(&str, JsonValue)> = Vec::new();
        if !self.resource.is_empty() {
            members.push((fields::RESOURCE, self.resource.as_str().into()));
        }
        if let Some(res_id) = &self.res_id {
            members.push((fields::RES_ID, res_id.as_str().into()));
        }
        if let Some(command) = self.command {
            members.push((fields::COMMAND, command.as_str().into()));
        }
        if let Some(id) = &self.subscribe_id {
            members.push((fields::SUBSCRIBE_ID, id.as_str().into()));
        }
        if let Some(encoding) = &self.mutual_encoding {
            members.push((fields::MUTUAL_ENCODING, encoding.as_str().into()));
        }
        if let Some(media_type) = &self.media_type {
            members.push((fields::MEDIA_TYPE, media_type.as_str().into()));
        }
        if let Some(offset) = self.offset {
            members.push((fields::OFFSET, JsonValue::Number(offset as f64)));
        }
        if let Some(limit) = self.limit {
            members.push((fields::LIMIT, JsonValue::Number(limit as f64)));
        }
        if self.set_partial {
            members.push((fields::SET_PARTIAL, true.into()));
        }
        JsonValue::object(members)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_bytes()
    }
}

/// Header of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub status: u16,
    pub message: Option<String>,
    pub mutual_encoding: Option<String>,
    pub media_type: Option<String>,
    pub cache_time: Option<i64>,
    pub total_count: Option<usize>,
    pub subscribe_id: Option<String>,
}

impl ReplyHeader {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            message: None,
            mutual_encoding: None,
            media_type: None,
            cache_time: None,
            total_count: None,
            subscribe_id: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(super::status::OK)
    }

    /// Error reply carrying the error text as `message`
    pub fn error(err: &PropertyError) -> Self {
        Self {
            message: Some(err.to_string()),
            ..Self::new(err.status())
        }
    }

    pub fn is_success(&self) -> bool {
        super::status::is_success(self.status)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, PropertyError> {
        let json = JsonValue::parse_bytes(bytes)
            .map_err(|e| PropertyError::MalformedHeader(e.to_string()))?;
        let status = json
            .get_i64(fields::STATUS)
            .and_then(|s| u16::try_from(s).ok())
            .ok_or_else(|| PropertyError::MalformedHeader("missing 'status'".to_string()))?;
        Ok(Self {
            status,
            message: json.get_str(fields::MESSAGE),
            mutual_encoding: json.get_str(fields::MUTUAL_ENCODING),
            media_type: json.get_str(fields::MEDIA_TYPE),
            cache_time: json.get_i64(fields::CACHE_TIME),
            total_count: non_negative(&json, fields::TOTAL_COUNT)?,
            subscribe_id: json.get_str(fields::SUBSCRIBE_ID),
        })
    }

    pub fn encoding(&self) -> Result<BodyEncoding, PropertyError> {
        match &self.mutual_encoding {
            None => Ok(BodyEncoding::Ascii),
            Some(name) => BodyEncoding::from_name(name)
                .ok_or_else(|| PropertyError::UnsupportedEncoding(name.clone())),
        }
    }

    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(MEDIA_TYPE_JSON)
    }

    pub fn to_json(&self) -> JsonValue {
        let mut members: Vec<(&str, JsonValue)> =
            vec![(fields::STATUS, JsonValue::from(self.status))];
        if let Some(message) = &self.message {
            members.push((fields::MESSAGE, message.as_str().into()));
        }
        if let Some(id) = &self.subscribe_id {
            members.push((fields::SUBSCRIBE_ID, id.as_str().into()));
        }
        if let Some(encoding) = &self.mutual_encoding {
            members.push((fields::MUTUAL_ENCODING, encoding.as_str().into()));
        }
        if let Some(media_type) = &self.media_type {
            members.push((fields::MEDIA_TYPE, media_type.as_str().into()));
        }
        if let Some(cache_time) = self.cache_time {
            members.push((fields::CACHE_TIME, JsonValue::from(cache_time)));
        }
        if let Some(total) = self.total_count {
            members.push((fields::TOTAL_COUNT, JsonValue::Number(total as f64)));
        }
        JsonValue::object(members)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_bytes()
    }
}

fn non_negative(json: &JsonValue, key: &str) -> Result<Option<usize>, PropertyError> {
    match json.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                PropertyError::MalformedHeader(format!("'{}' must be a non-negative integer", key))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::status;

    #[test]
    fn test_request_header_round_trip() {
        let header = RequestHeader {
            res_id: Some("1".into()),
            mutual_encoding: Some("Mcoded7".into()),
            offset: Some(10),
            limit: Some(5),
            set_partial: true,
            ..RequestHeader::new("X-ProgramEdit")
        };
        let bytes = header.to_bytes();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"resource":"X-ProgramEdit","resId":"1","mutualEncoding":"Mcoded7","offset":10,"limit":5,"setPartial":true}"#
        );
        let parsed = RequestHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.encoding().unwrap(), BodyEncoding::Mcoded7);
        assert_eq!(parsed.media_type(), MEDIA_TYPE_JSON);
    }

    #[test]
    fn test_request_header_errors() {
        assert!(matches!(
            RequestHeader::parse(b"{\"resource\":"),
            Err(PropertyError::MalformedHeader(_))
        ));
        assert!(RequestHeader::parse(b"[]").is_err());
        assert!(RequestHeader::parse(b"{}").is_err());
        assert!(RequestHeader::parse(br#"{"resource":"X","offset":-1}"#).is_err());
        assert!(RequestHeader::parse(br#"{"resource":"X","command":"pause"}"#).is_err());

        let header = RequestHeader::parse(br#"{"resource":"X","mutualEncoding":"base64"}"#).unwrap();
        assert!(matches!(
            header.encoding(),
            Err(PropertyError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_subscription_header_without_resource() {
        let header = RequestHeader::parse(br#"{"command":"full","subscribeId":"sub1"}"#).unwrap();
        assert!(header.resource.is_empty());
        assert_eq!(header.command, Some(SubscriptionCommand::Full));
        assert_eq!(header.subscribe_id.as_deref(), Some("sub1"));
    }

    #[test]
    fn test_reply_header() {
        let header = ReplyHeader {
            total_count: Some(42),
            cache_time: Some(0),
            ..ReplyHeader::ok()
        };
        let bytes = header.to_bytes();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"status":200,"cacheTime":0,"totalCount":42}"#
        );
        assert_eq!(ReplyHeader::parse(&bytes).unwrap(), header);

        let err = ReplyHeader::error(&PropertyError::UnknownResource("Nope".into()));
        assert_eq!(err.status, status::NOT_FOUND);
        assert!(!err.is_success());
        assert_eq!(err.message.as_deref(), Some("unknown resource 'Nope'"));
        assert!(ReplyHeader::parse(b"{}").is_err());
    }
}
