//! CommonRulesPropertyService - responder side Property Exchange
//!
//! Owns the resource catalog, the foundational resources (ResourceList,
//! DeviceInfo, ChannelList, JSONSchema), host resource values through a
//! [`PropertyStore`], and active subscriptions. Every complete request
//! produces exactly one reply (possibly split into chunks); failures become
//! a status code in the reply header.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::chunk::{split_into_chunks, ChunkAssembler, ChunkOutcome, DEFAULT_MAX_PENDING_TRANSFERS};
use super::header::{ReplyHeader, RequestHeader, SubscriptionCommand};
use super::pointer::apply_partial_update;
use super::store::{MemoryPropertyStore, PropertyStore};
use super::{
    resources, BodyEncoding, PropertyError, PropertyMetadata, PropertyValue,
    SubscriptionEntry, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_SIMULTANEOUS_REQUESTS,
    MEDIA_TYPE_JSON,
};
use crate::ci::{DeviceInfo, Message, Muid, PropertyCapabilities, PropertyChunk};
use crate::json::JsonValue;
use crate::observer::{ObserverId, ObserverList};

/// A message the service wants sent, with its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub destination: Muid,
    pub message: Message,
}

/// Limits applied by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub max_simultaneous_requests: u8,
    pub max_chunk_size: usize,
    pub max_pending_transfers: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_simultaneous_requests: DEFAULT_MAX_SIMULTANEOUS_REQUESTS,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_pending_transfers: DEFAULT_MAX_PENDING_TRANSFERS,
        }
    }
}

/// Changes published by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A value was replaced or patched; `by` is the remote MUID for
    /// remote Sets, `None` for host updates
    ValueChanged {
        resource: String,
        res_id: Option<String>,
        by: Option<Muid>,
    },
    SubscriptionStarted(SubscriptionEntry),
    SubscriptionEnded(SubscriptionEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Get,
    Set,
    Subscribe,
}

impl RequestKind {
    fn reply(self, chunk: PropertyChunk) -> Message {
        match self {
            RequestKind::Get => Message::GetPropertyDataReply(chunk),
            RequestKind::Set => Message::SetPropertyDataReply(chunk),
            RequestKind::Subscribe => Message::SubscribePropertyReply(chunk),
        }
    }
}

pub struct CommonRulesPropertyService {
    device_info: DeviceInfo,
    channel_list: Option<JsonValue>,
    metadata: IndexMap<String, PropertyMetadata>,
    store: Box<dyn PropertyStore>,
    subscriptions: IndexMap<String, SubscriptionEntry>,
    next_subscribe_id: u64,
    next_request_id: u8,
    settings: ServiceSettings,
    assembler: ChunkAssembler,
    observers: ObserverList<ServiceEvent>,
}

impl CommonRulesPropertyService {
    pub fn new(device_info: DeviceInfo, settings: ServiceSettings) -> Self {
        Self {
            device_info,
            channel_list: None,
            metadata: IndexMap::new(),
            store: Box::new(MemoryPropertyStore::new()),
            subscriptions: IndexMap::new(),
            next_subscribe_id: 1,
            next_request_id: 0,
            settings,
            assembler: ChunkAssembler::new(settings.max_pending_transfers),
            observers: ObserverList::new(),
        }
    }

    /// Replace the storage backend
    pub fn with_store(mut self, store: Box<dyn PropertyStore>) -> Self {
        self.store = store;
        self
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn set_channel_list(&mut self, channels: Option<JsonValue>) {
        self.channel_list = channels;
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ObserverId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    // -----------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------

    /// Add or replace the metadata of a host resource. Foundational
    /// resource names are refused.
    pub fn add_metadata(&mut self, metadata: PropertyMetadata) -> bool {
        if resources::is_foundational(&metadata.resource) {
            warn!("Refusing to override foundational resource {}", metadata.resource);
            return false;
        }
        self.metadata.insert(metadata.resource.clone(), metadata);
        true
    }

    /// Remove a host resource, its value and its subscriptions
    pub fn remove_metadata(&mut self, resource: &str) -> Option<PropertyMetadata> {
        let removed = self.metadata.shift_remove(resource)?;
        self.store.remove(resource, None);
        self.subscriptions.retain(|_, s| s.resource != resource);
        Some(removed)
    }

    pub fn metadata(&self, resource: &str) -> Option<PropertyMetadata> {
        self.foundational_metadata(resource)
            .or_else(|| self.metadata.get(resource).cloned())
    }

    fn foundational_metadata(&self, resource: &str) -> Option<PropertyMetadata> {
        match resource {
            resources::RESOURCE_LIST | resources::DEVICE_INFO => {
                Some(PropertyMetadata::read_only_system(resource))
            }
            resources::CHANNEL_LIST if self.channel_list.is_some() => Some(PropertyMetadata {
                can_paginate: true,
                ..PropertyMetadata::read_only_system(resource)
            }),
            resources::JSON_SCHEMA if self.has_schemas() => {
                Some(PropertyMetadata::read_only_system(resource))
            }
            _ => None,
        }
    }

    fn has_schemas(&self) -> bool {
        self.metadata.values().any(|m| m.schema.is_some())
    }

    /// ResourceList body
    pub fn resource_list(&self) -> JsonValue {
        let mut entries = vec![PropertyMetadata::read_only_system(resources::DEVICE_INFO).to_json()];
        for resource in [resources::CHANNEL_LIST, resources::JSON_SCHEMA] {
            if let Some(meta) = self.foundational_metadata(resource) {
                entries.push(meta.to_json());
            }
        }
        entries.extend(self.metadata.values().map(PropertyMetadata::to_json));
        JsonValue::Array(entries)
    }

    fn schema(&self, res_id: Option<&str>) -> Result<JsonValue, PropertyError> {
        match res_id {
            Some(id) => self
                .metadata
                .get(id)
                .and_then(|m| m.schema.clone())
                .ok_or_else(|| PropertyError::UnknownResource(format!("JSONSchema/{}", id))),
            None => Ok(JsonValue::object(self.metadata.values().filter_map(|m| {
                m.schema.clone().map(|s| (m.resource.clone(), s))
            }))),
        }
    }

    /// Negotiated capabilities: never more requests than configured locally
    pub fn negotiate(&self, requested: &PropertyCapabilities) -> PropertyCapabilities {
        PropertyCapabilities {
            max_simultaneous_requests: requested
                .max_simultaneous_requests
                .min(self.settings.max_simultaneous_requests),
            major_version: crate::ci::PROPERTY_EXCHANGE_MAJOR_VERSION,
            minor_version: crate::ci::PROPERTY_EXCHANGE_MINOR_VERSION,
        }
    }

    // -----------------------------------------------------------------
    // Host access
    // -----------------------------------------------------------------

    pub fn value(&self, resource: &str, res_id: Option<&str>) -> Option<PropertyValue> {
        self.store.get(resource, res_id)
    }

    /// Replace a value from the host side and push it to subscribers
    pub fn set_value(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        value: PropertyValue,
    ) -> Result<Vec<Outgoing>, PropertyError> {
        if !self.metadata.contains_key(resource) {
            return Err(PropertyError::UnknownResource(resource.to_string()));
        }
        let body = value.body.clone();
        let media_type = value.media_type.clone();
        self.store.set(resource, res_id, value)?;
        self.observers.notify(&ServiceEvent::ValueChanged {
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
            by: None,
        });
        Ok(self.push_update(
            resource,
            res_id,
            SubscriptionCommand::Full,
            &body,
            &media_type,
            None,
        ))
    }

    /// Patch a JSON value from the host side and push the patch to
    /// subscribers
    pub fn update_value(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        patch: &JsonValue,
    ) -> Result<Vec<Outgoing>, PropertyError> {
        self.apply_patch(resource, res_id, patch)?;
        self.observers.notify(&ServiceEvent::ValueChanged {
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
            by: None,
        });
        Ok(self.push_update(
            resource,
            res_id,
            SubscriptionCommand::Partial,
            &patch.to_bytes(),
            MEDIA_TYPE_JSON,
            None,
        ))
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &SubscriptionEntry> {
        self.subscriptions.values()
    }

    /// Drop everything held for a remote MUID (invalidated or gone)
    pub fn forget_peer(&mut self, muid: Muid) {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, s| s.subscriber != muid);
        self.assembler.discard_source(muid);
        let dropped = before - self.subscriptions.len();
        if dropped > 0 {
            info!("Dropped {} subscription(s) of {}", dropped, muid);
        }
    }

    // -----------------------------------------------------------------
    // Wire side
    // -----------------------------------------------------------------

    /// Handle one inbound Property Exchange message from `source`
    pub fn process(&mut self, source: Muid, message: &Message) -> Vec<Outgoing> {
        let (kind, chunk) = match message {
            Message::GetPropertyData(chunk) => (RequestKind::Get, chunk),
            Message::SetPropertyData(chunk) => (RequestKind::Set, chunk),
            Message::SubscribeProperty(chunk) => (RequestKind::Subscribe, chunk),
            Message::SubscribePropertyReply(chunk) => {
                self.on_subscription_reply(source, chunk);
                return Vec::new();
            }
            other => {
                debug!("Property service ignoring {}", other.sub_id());
                return Vec::new();
            }
        };

        // Errors on earlier chunks are answered once, on the final chunk
        let answers = chunk.chunk_index >= chunk.num_chunks;
        let opens_transfer =
            chunk.num_chunks > 1 && !self.assembler.is_open(source, chunk.request_id);
        if opens_transfer
            && self.assembler.pending() >= usize::from(self.settings.max_simultaneous_requests)
        {
            let err = PropertyError::TooManyRequests {
                max: self.settings.max_simultaneous_requests,
            };
            debug!("Request {} from {}: {}", chunk.request_id, source, err);
            if !answers {
                return Vec::new();
            }
            return self.reply(source, kind, chunk.request_id, ReplyHeader::error(&err), &[]);
        }

        let transfer = match self.assembler.push(source, chunk) {
            Ok(ChunkOutcome::Pending) => return Vec::new(),
            Ok(ChunkOutcome::Complete(transfer)) => transfer,
            Err(err) => {
                warn!("Request {} from {}: {}", chunk.request_id, source, err);
                if !answers {
                    return Vec::new();
                }
                return self.reply(source, kind, chunk.request_id, ReplyHeader::error(&err), &[]);
            }
        };

        let request = match RequestHeader::parse(&transfer.header) {
            Ok(request) => request,
            Err(err) => {
                return self.reply(
                    source,
                    kind,
                    transfer.request_id,
                    ReplyHeader::error(&err),
                    &[],
                )
            }
        };
        debug!(
            "{:?} {} from {} (request {})",
            kind, request.resource, source, transfer.request_id
        );

        let mut notifications = Vec::new();
        let result = match kind {
            RequestKind::Get => self.handle_get(&request),
            RequestKind::Set => self
                .handle_set(source, &request, &transfer.body)
                .map(|(header, pushed)| {
                    notifications = pushed;
                    (header, Vec::new())
                }),
            RequestKind::Subscribe => self
                .handle_subscribe(source, &request)
                .map(|header| (header, Vec::new())),
        };
        let (header, body) = result.unwrap_or_else(|err| {
            debug!("{} '{}' failed: {}", err.status(), request.resource, err);
            (ReplyHeader::error(&err), Vec::new())
        });

        let mut out = self.reply(source, kind, transfer.request_id, header, &body);
        out.extend(notifications);
        out
    }

    fn reply(
        &self,
        destination: Muid,
        kind: RequestKind,
        request_id: u8,
        header: ReplyHeader,
        body: &[u8],
    ) -> Vec<Outgoing> {
        let chunks = split_into_chunks(request_id, header.to_bytes(), body, self.settings.max_chunk_size)
            .unwrap_or_else(|err| {
                vec![PropertyChunk::single(
                    request_id,
                    ReplyHeader::error(&err).to_bytes(),
                    Vec::new(),
                )]
            });
        chunks
            .into_iter()
            .map(|chunk| Outgoing {
                destination,
                message: kind.reply(chunk),
            })
            .collect()
    }

    fn handle_get(&self, request: &RequestHeader) -> Result<(ReplyHeader, Vec<u8>), PropertyError> {
        let resource = request.resource.as_str();
        let metadata = self
            .metadata(resource)
            .ok_or_else(|| PropertyError::UnknownResource(resource.to_string()))?;
        if !metadata.can_get {
            return Err(PropertyError::NotReadable(resource.to_string()));
        }
        let res_id = request.res_id.as_deref();
        if metadata.require_res_id && res_id.is_none() {
            return Err(PropertyError::MissingResId(resource.to_string()));
        }

        let value = match resource {
            resources::RESOURCE_LIST => PropertyValue::json(resource, &self.resource_list()),
            resources::DEVICE_INFO => PropertyValue::json(resource, &self.device_info.to_json()),
            resources::CHANNEL_LIST => PropertyValue::json(
                resource,
                self.channel_list
                    .as_ref()
                    .ok_or_else(|| PropertyError::UnknownResource(resource.to_string()))?,
            ),
            resources::JSON_SCHEMA => PropertyValue::json(resource, &self.schema(res_id)?),
            _ => self
                .store
                .get(resource, res_id)
                .ok_or_else(|| PropertyError::NoValue(resource.to_string()))?,
        };

        let mut reply = ReplyHeader::ok();
        let mut body = value.body;
        if metadata.can_paginate && (request.offset.is_some() || request.limit.is_some()) {
            if let Some(JsonValue::Array(items)) = JsonValue::parse_bytes(&body).ok() {
                let offset = request.offset.unwrap_or(0).min(items.len());
                let limit = request.limit.unwrap_or(items.len());
                let page: Vec<JsonValue> = items.iter().skip(offset).take(limit).cloned().collect();
                reply.total_count = Some(items.len());
                body = JsonValue::Array(page).to_bytes();
            }
        }

        let requested = request.encoding()?;
        let encoding = if metadata.supports_encoding(requested) {
            requested
        } else {
            BodyEncoding::Ascii
        };
        if encoding != BodyEncoding::Ascii {
            reply.mutual_encoding = Some(encoding.name().to_string());
        }
        if value.media_type != MEDIA_TYPE_JSON {
            reply.media_type = Some(value.media_type);
        }
        Ok((reply, encoding.encode(&body)?))
    }

    fn handle_set(
        &mut self,
        source: Muid,
        request: &RequestHeader,
        body: &[u8],
    ) -> Result<(ReplyHeader, Vec<Outgoing>), PropertyError> {
        let resource = request.resource.as_str();
        if resources::is_foundational(resource) {
            return Err(PropertyError::ReadOnly(resource.to_string()));
        }
        let metadata = self
            .metadata
            .get(resource)
            .ok_or_else(|| PropertyError::UnknownResource(resource.to_string()))?;
        if metadata.can_set == super::CanSet::None {
            return Err(PropertyError::ReadOnly(resource.to_string()));
        }
        if request.set_partial && metadata.can_set != super::CanSet::Partial {
            return Err(PropertyError::PartialNotAllowed(resource.to_string()));
        }
        if metadata.require_res_id && request.res_id.is_none() {
            return Err(PropertyError::MissingResId(resource.to_string()));
        }
        let res_id = request.res_id.as_deref();
        let decoded = request.encoding()?.decode(body)?;

        let (command, pushed_body, media_type) = if request.set_partial {
            if request.media_type() != MEDIA_TYPE_JSON {
                return Err(PropertyError::MediaTypeMismatch {
                    expected: MEDIA_TYPE_JSON.to_string(),
                    actual: request.media_type().to_string(),
                });
            }
            let patch = JsonValue::parse_bytes(&decoded).map_err(PropertyError::InvalidBody)?;
            self.apply_patch(resource, res_id, &patch)?;
            (SubscriptionCommand::Partial, patch.to_bytes(), MEDIA_TYPE_JSON.to_string())
        } else {
            let media_type = request.media_type().to_string();
            if media_type == MEDIA_TYPE_JSON {
                JsonValue::parse_bytes(&decoded).map_err(PropertyError::InvalidBody)?;
            }
            self.store.set(
                resource,
                res_id,
                PropertyValue {
                    id: resource.to_string(),
                    media_type: media_type.clone(),
                    body: decoded.clone(),
                },
            )?;
            (SubscriptionCommand::Full, decoded, media_type)
        };

        info!("{} set by {}", resource, source);
        self.observers.notify(&ServiceEvent::ValueChanged {
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
            by: Some(source),
        });
        let pushed = self.push_update(
            resource,
            res_id,
            command,
            &pushed_body,
            &media_type,
            Some(source),
        );
        Ok((ReplyHeader::ok(), pushed))
    }

    /// Apply a partial update to a stored JSON value. Both the stored value
    /// and the patch must be JSON.
    fn apply_patch(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        patch: &JsonValue,
    ) -> Result<(), PropertyError> {
        let existing = self
            .store
            .get(resource, res_id)
            .ok_or_else(|| PropertyError::NoValue(resource.to_string()))?;
        if !existing.is_json() {
            return Err(PropertyError::MediaTypeMismatch {
                expected: MEDIA_TYPE_JSON.to_string(),
                actual: existing.media_type,
            });
        }
        let updated = apply_partial_update(&existing.to_json()?, patch)?;
        self.store
            .set(resource, res_id, PropertyValue::json(resource, &updated))
    }

    fn handle_subscribe(
        &mut self,
        source: Muid,
        request: &RequestHeader,
    ) -> Result<ReplyHeader, PropertyError> {
        match request.command.unwrap_or(SubscriptionCommand::Start) {
            SubscriptionCommand::Start => {
                let resource = request.resource.as_str();
                let metadata = self
                    .metadata(resource)
                    .ok_or_else(|| PropertyError::UnknownResource(resource.to_string()))?;
                if !metadata.can_subscribe {
                    return Err(PropertyError::NotSubscribable(resource.to_string()));
                }
                let encoding = request.encoding()?;
                let subscribe_id = format!("sub{}", self.next_subscribe_id);
                self.next_subscribe_id += 1;
                let entry = SubscriptionEntry {
                    resource: resource.to_string(),
                    res_id: request.res_id.clone(),
                    subscriber: source,
                    encoding: (encoding != BodyEncoding::Ascii).then_some(encoding),
                    subscribe_id: subscribe_id.clone(),
                };
                info!("{} subscribed to {} as {}", source, resource, subscribe_id);
                self.subscriptions.insert(subscribe_id.clone(), entry.clone());
                self.observers.notify(&ServiceEvent::SubscriptionStarted(entry));
                Ok(ReplyHeader {
                    subscribe_id: Some(subscribe_id),
                    ..ReplyHeader::ok()
                })
            }
            SubscriptionCommand::End => {
                let id = request.subscribe_id.as_deref().ok_or_else(|| {
                    PropertyError::MalformedHeader("'end' requires a subscribeId".to_string())
                })?;
                match self.subscriptions.get(id) {
                    Some(entry) if entry.subscriber == source => {}
                    _ => return Err(PropertyError::UnknownSubscription(id.to_string())),
                }
                let Some(entry) = self.subscriptions.shift_remove(id) else {
                    return Err(PropertyError::UnknownSubscription(id.to_string()));
                };
                info!("{} ended subscription {}", source, id);
                self.observers.notify(&ServiceEvent::SubscriptionEnded(entry));
                Ok(ReplyHeader::ok())
            }
            other => Err(PropertyError::MalformedHeader(format!(
                "'{}' is not a request command",
                other.as_str()
            ))),
        }
    }

    fn on_subscription_reply(&self, source: Muid, chunk: &PropertyChunk) {
        match ReplyHeader::parse(&chunk.header) {
            Ok(header) if header.is_success() => {}
            Ok(header) => warn!(
                "{} rejected subscription update {} with status {}",
                source, chunk.request_id, header.status
            ),
            Err(err) => warn!("Bad subscription reply from {}: {}", source, err),
        }
    }

    fn push_update(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        command: SubscriptionCommand,
        body: &[u8],
        media_type: &str,
        exclude: Option<Muid>,
    ) -> Vec<Outgoing> {
        let targets: Vec<SubscriptionEntry> = self
            .subscriptions
            .values()
            .filter(|s| s.resource == resource && s.res_id.as_deref() == res_id)
            .filter(|s| Some(s.subscriber) != exclude)
            .cloned()
            .collect();

        let mut out = Vec::new();
        for sub in targets {
            let encoding = sub.encoding.unwrap_or_default();
            let encoded = match encoding.encode(body) {
                Ok(encoded) => encoded,
                Err(err) => {
                    warn!("Cannot push {} to {}: {}", resource, sub.subscriber, err);
                    continue;
                }
            };
            let header = RequestHeader {
                resource: resource.to_string(),
                res_id: sub.res_id.clone(),
                command: Some(command),
                subscribe_id: Some(sub.subscribe_id.clone()),
                mutual_encoding: sub.encoding.map(|e| e.name().to_string()),
                media_type: (media_type != MEDIA_TYPE_JSON).then(|| media_type.to_string()),
                ..RequestHeader::default()
            };
            let request_id = self.allocate_request_id();
            match split_into_chunks(request_id, header.to_bytes(), &encoded, self.settings.max_chunk_size) {
                Ok(chunks) => out.extend(chunks.into_iter().map(|chunk| Outgoing {
                    destination: sub.subscriber,
                    message: Message::SubscribeProperty(chunk),
                })),
                Err(err) => warn!("Cannot push {} to {}: {}", resource, sub.subscriber, err),
            }
        }
        out
    }

    fn allocate_request_id(&mut self) -> u8 {
        let id = self.next_request_id;
        self.next_request_id = (self.next_request_id + 1) & 0x7F;
        id
    }
}

impl std::fmt::Debug for CommonRulesPropertyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonRulesPropertyService")
            .field("resources", &self.metadata.keys().collect::<Vec<_>>())
            .field("subscriptions", &self.subscriptions.len())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::DeviceIdentity;
    use crate::property::{status, CanSet};

    fn requester() -> Muid {
        Muid::from_u28(0x12345).unwrap()
    }

    fn other_requester() -> Muid {
        Muid::from_u28(0x54321).unwrap()
    }

    fn service() -> CommonRulesPropertyService {
        let info = DeviceInfo {
            identity: DeviceIdentity::new([0x7D, 0, 0], 1, 2, [0, 0, 0, 1]),
            manufacturer: "Test".into(),
            family: "Family".into(),
            model: "Model".into(),
            version: "0.1".into(),
            serial_number: None,
        };
        let mut service = CommonRulesPropertyService::new(info, ServiceSettings::default());
        service.add_metadata(PropertyMetadata {
            can_set: CanSet::Partial,
            can_subscribe: true,
            encodings: vec!["ASCII".into(), "Mcoded7".into()],
            schema: Some(JsonValue::parse(r#"{"type":"object"}"#).unwrap()),
            ..PropertyMetadata::new("X-Patch")
        });
        service.add_metadata(PropertyMetadata {
            can_paginate: true,
            ..PropertyMetadata::new("X-Programs")
        });
        let patch = JsonValue::parse(r#"{"name":"Init","level":3}"#).unwrap();
        service.set_value("X-Patch", None, PropertyValue::json("X-Patch", &patch)).unwrap();
        let programs = JsonValue::parse(r#"[1,2,3,4,5]"#).unwrap();
        service
            .set_value("X-Programs", None, PropertyValue::json("X-Programs", &programs))
            .unwrap();
        service
    }

    fn request(kind: fn(PropertyChunk) -> Message, request_id: u8, header: &str, body: &[u8]) -> Message {
        kind(PropertyChunk::single(request_id, header.as_bytes().to_vec(), body.to_vec()))
    }

    fn single_reply(out: &[Outgoing]) -> (ReplyHeader, Vec<u8>) {
        let chunk = out[0].message.property_chunk().unwrap();
        (ReplyHeader::parse(&chunk.header).unwrap(), chunk.data.clone())
    }

    #[test]
    fn test_resource_list_contents() {
        let list = service().resource_list().serialize();
        assert!(list.starts_with(r#"[{"resource":"DeviceInfo"}"#));
        assert!(list.contains(r#"{"resource":"JSONSchema"}"#));
        assert!(list.contains(r#""resource":"X-Patch""#));
        assert!(!list.contains("ChannelList"));
    }

    #[test]
    fn test_get_device_info() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(Message::GetPropertyData, 1, r#"{"resource":"DeviceInfo"}"#, b""),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, requester());
        assert!(matches!(out[0].message, Message::GetPropertyDataReply(_)));
        let (header, body) = single_reply(&out);
        assert_eq!(header.status, 200);
        let info = DeviceInfo::from_json(&JsonValue::parse_bytes(&body).unwrap()).unwrap();
        assert_eq!(info.manufacturer, "Test");
    }

    #[test]
    fn test_get_unknown_resource_is_404() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(Message::GetPropertyData, 2, r#"{"resource":"Nope"}"#, b""),
        );
        let (header, body) = single_reply(&out);
        assert_eq!(header.status, status::NOT_FOUND);
        assert!(body.is_empty());
    }

    #[test]
    fn test_malformed_header_is_400() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(Message::GetPropertyData, 2, r#"{"resource":"#, b""),
        );
        assert_eq!(single_reply(&out).0.status, status::BAD_REQUEST);
    }

    #[test]
    fn test_set_read_only_is_rejected() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(Message::SetPropertyData, 3, r#"{"resource":"DeviceInfo"}"#, b"{}"),
        );
        assert!(matches!(out[0].message, Message::SetPropertyDataReply(_)));
        assert_eq!(single_reply(&out).0.status, status::NOT_ALLOWED);

        let out = service.process(
            requester(),
            &request(Message::SetPropertyData, 4, r#"{"resource":"X-Programs"}"#, b"[]"),
        );
        assert_eq!(single_reply(&out).0.status, status::NOT_ALLOWED);
    }

    #[test]
    fn test_pagination() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(
                Message::GetPropertyData,
                5,
                r#"{"resource":"X-Programs","offset":1,"limit":2}"#,
                b"",
            ),
        );
        let (header, body) = single_reply(&out);
        assert_eq!(header.total_count, Some(5));
        assert_eq!(body, b"[2,3]".to_vec());
    }

    #[test]
    fn test_get_with_mcoded7() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(
                Message::GetPropertyData,
                6,
                r#"{"resource":"X-Patch","mutualEncoding":"Mcoded7"}"#,
                b"",
            ),
        );
        let (header, body) = single_reply(&out);
        assert_eq!(header.mutual_encoding.as_deref(), Some("Mcoded7"));
        let decoded = header.encoding().unwrap().decode(&body).unwrap();
        assert_eq!(decoded, br#"{"name":"Init","level":3}"#.to_vec());

        // Resource without Mcoded7 falls back to ASCII
        let out = service.process(
            requester(),
            &request(
                Message::GetPropertyData,
                7,
                r#"{"resource":"X-Programs","mutualEncoding":"Mcoded7"}"#,
                b"",
            ),
        );
        assert_eq!(single_reply(&out).0.mutual_encoding, None);
    }

    #[test]
    fn test_json_schema() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(Message::GetPropertyData, 8, r#"{"resource":"JSONSchema","resId":"X-Patch"}"#, b""),
        );
        assert_eq!(single_reply(&out).1, br#"{"type":"object"}"#.to_vec());

        let out = service.process(
            requester(),
            &request(Message::GetPropertyData, 9, r#"{"resource":"JSONSchema"}"#, b""),
        );
        assert_eq!(single_reply(&out).1, br#"{"X-Patch":{"type":"object"}}"#.to_vec());
    }

    #[test]
    fn test_subscribe_set_and_notify_other_subscribers() {
        let mut service = service();
        for (muid, id) in [(requester(), 10), (other_requester(), 11)] {
            let out = service.process(
                muid,
                &request(Message::SubscribeProperty, id, r#"{"resource":"X-Patch","command":"start"}"#, b""),
            );
            let (header, _) = single_reply(&out);
            assert_eq!(header.status, 200);
            assert!(header.subscribe_id.is_some());
        }
        assert_eq!(service.subscriptions().count(), 2);

        let out = service.process(
            requester(),
            &request(
                Message::SetPropertyData,
                12,
                r#"{"resource":"X-Patch","setPartial":true}"#,
                br#"{"/level":7}"#,
            ),
        );
        // Reply to the setter plus one push to the other subscriber
        assert_eq!(out.len(), 2);
        assert_eq!(single_reply(&out).0.status, 200);
        assert_eq!(out[1].destination, other_requester());
        let pushed = out[1].message.property_chunk().unwrap();
        let header = RequestHeader::parse(&pushed.header).unwrap();
        assert_eq!(header.command, Some(SubscriptionCommand::Partial));
        assert_eq!(pushed.data, br#"{"/level":7}"#.to_vec());

        let stored = service.value("X-Patch", None).unwrap();
        assert_eq!(stored.body, br#"{"name":"Init","level":7}"#.to_vec());
    }

    #[test]
    fn test_partial_set_requires_partial_capability() {
        let mut service = service();
        service.add_metadata(PropertyMetadata {
            can_set: CanSet::Full,
            ..PropertyMetadata::new("X-Full")
        });
        let out = service.process(
            requester(),
            &request(
                Message::SetPropertyData,
                13,
                r#"{"resource":"X-Full","setPartial":true}"#,
                br#"{"/a":1}"#,
            ),
        );
        assert_eq!(single_reply(&out).0.status, status::NOT_ALLOWED);
    }

    #[test]
    fn test_partial_set_against_non_json_value() {
        let mut service = service();
        service
            .set_value(
                "X-Patch",
                None,
                PropertyValue {
                    id: "X-Patch".into(),
                    media_type: "application/octet-stream".into(),
                    body: vec![1, 2, 3],
                },
            )
            .unwrap();
        let out = service.process(
            requester(),
            &request(
                Message::SetPropertyData,
                14,
                r#"{"resource":"X-Patch","setPartial":true}"#,
                br#"{"/a":1}"#,
            ),
        );
        assert_eq!(single_reply(&out).0.status, status::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_end_subscription() {
        let mut service = service();
        let out = service.process(
            requester(),
            &request(Message::SubscribeProperty, 15, r#"{"resource":"X-Patch","command":"start"}"#, b""),
        );
        let id = single_reply(&out).0.subscribe_id.unwrap();

        // Another MUID cannot end it
        let header = format!(r#"{{"resource":"X-Patch","command":"end","subscribeId":"{}"}}"#, id);
        let out = service.process(other_requester(), &request(Message::SubscribeProperty, 16, &header, b""));
        assert_eq!(single_reply(&out).0.status, status::NOT_FOUND);

        let out = service.process(requester(), &request(Message::SubscribeProperty, 17, &header, b""));
        assert_eq!(single_reply(&out).0.status, 200);
        assert_eq!(service.subscriptions().count(), 0);
    }

    #[test]
    fn test_host_update_pushes_to_all_subscribers() {
        let mut service = service();
        service.process(
            requester(),
            &request(Message::SubscribeProperty, 18, r#"{"resource":"X-Patch"}"#, b""),
        );
        let out = service
            .update_value("X-Patch", None, &JsonValue::parse(r#"{"/name":"Lead"}"#).unwrap())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, requester());

        service.forget_peer(requester());
        assert_eq!(service.subscriptions().count(), 0);
    }

    #[test]
    fn test_chunked_set_is_reassembled() {
        let mut service = service();
        let body = br#"{"name":"A long patch name that spans chunks","level":1}"#;
        let chunks = split_into_chunks(20, br#"{"resource":"X-Patch"}"#.to_vec(), body, 8).unwrap();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let out = service.process(requester(), &Message::SetPropertyData(chunk));
            if i < last {
                assert!(out.is_empty());
            } else {
                assert_eq!(single_reply(&out).0.status, 200);
            }
        }
        assert_eq!(service.value("X-Patch", None).unwrap().body, body.to_vec());
    }

    fn chunked_get(request_id: u8) -> Vec<PropertyChunk> {
        split_into_chunks(
            request_id,
            br#"{"resource":"DeviceInfo"}"#.to_vec(),
            b"padding",
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_chunk_gets_a_single_reply() {
        let mut service = service();
        let chunks = chunked_get(9);
        assert_eq!(chunks.len(), 2);

        let mut replies = Vec::new();
        for chunk in [&chunks[0], &chunks[0], &chunks[1]] {
            replies.extend(service.process(requester(), &Message::GetPropertyData(chunk.clone())));
        }
        assert_eq!(replies.len(), 1);
        assert_eq!(single_reply(&replies).0.status, 200);
    }

    #[test]
    fn test_inconsistent_chunk_count_gets_a_single_reply() {
        let mut service = service();
        let chunks = chunked_get(10);
        let mut stray = chunks[0].clone();
        stray.num_chunks = 3;

        let mut replies = service.process(requester(), &Message::GetPropertyData(chunks[0].clone()));
        replies.extend(service.process(requester(), &Message::GetPropertyData(stray)));
        assert!(replies.is_empty());
        replies.extend(service.process(requester(), &Message::GetPropertyData(chunks[1].clone())));
        assert_eq!(replies.len(), 1);
        assert_eq!(single_reply(&replies).0.status, status::BAD_DATA);
    }

    #[test]
    fn test_open_transfers_are_limited() {
        let settings = ServiceSettings {
            max_simultaneous_requests: 2,
            ..ServiceSettings::default()
        };
        let mut service = CommonRulesPropertyService::new(service().device_info().clone(), settings);
        for request_id in [1, 2] {
            let out = service.process(requester(), &Message::GetPropertyData(chunked_get(request_id)[0].clone()));
            assert!(out.is_empty());
        }

        // A third transfer whose final chunk comes first is refused once
        let third = chunked_get(3);
        let out = service.process(other_requester(), &Message::GetPropertyData(third[1].clone()));
        assert_eq!(out.len(), 1);
        assert_eq!(single_reply(&out).0.status, status::TOO_MANY_REQUESTS);
        let out = service.process(other_requester(), &Message::GetPropertyData(third[0].clone()));
        assert!(out.is_empty());

        // Neither open transfer was evicted
        for request_id in [1, 2] {
            let out = service.process(requester(), &Message::GetPropertyData(chunked_get(request_id)[1].clone()));
            assert_eq!(single_reply(&out).0.status, 200);
        }

        // Single-chunk requests never hold a slot
        let out = service.process(
            requester(),
            &request(Message::GetPropertyData, 4, r#"{"resource":"DeviceInfo"}"#, b""),
        );
        assert_eq!(single_reply(&out).0.status, 200);
    }

    #[test]
    fn test_negotiate_takes_minimum() {
        let service = service();
        let requested = PropertyCapabilities {
            max_simultaneous_requests: 100,
            major_version: 0,
            minor_version: 0,
        };
        assert_eq!(
            service.negotiate(&requested).max_simultaneous_requests,
            DEFAULT_MAX_SIMULTANEOUS_REQUESTS
        );
        let requested = PropertyCapabilities {
            max_simultaneous_requests: 2,
            ..requested
        };
        assert_eq!(service.negotiate(&requested).max_simultaneous_requests, 2);
    }

    #[test]
    fn test_foundational_names_cannot_be_overridden() {
        let mut service = service();
        assert!(!service.add_metadata(PropertyMetadata::new("DeviceInfo")));
        assert!(service.remove_metadata("X-Programs").is_some());
        assert!(service.metadata("X-Programs").is_none());
    }
}
