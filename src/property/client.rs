//! PropertyClient - initiator side Property Exchange for one remote device
//!
//! Builds Get / Set / Subscribe requests, correlates replies by request id,
//! keeps the remote catalog and a value cache, and answers the responder's
//! subscription pushes.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::chunk::{split_into_chunks, ChunkAssembler, ChunkOutcome};
use super::header::{ReplyHeader, RequestHeader, SubscriptionCommand};
use super::pointer::apply_partial_update;
use super::{
    resources, status, BodyEncoding, PropertyError, PropertyMetadata, PropertyValue,
    DEFAULT_MAX_CHUNK_SIZE, MEDIA_TYPE_JSON,
};
use crate::ci::{Message, Muid, PropertyCapabilities, PropertyChunk};
use crate::json::JsonValue;
use crate::observer::{ObserverId, ObserverList};

/// Notifications published by a [`PropertyClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyEvent {
    /// A ResourceList reply replaced the catalog
    CatalogUpdated { resources: Vec<String> },
    /// The cached value of a resource changed
    ValueUpdated {
        resource: String,
        res_id: Option<String>,
        value: PropertyValue,
    },
    /// A request finished with a non-success status
    RequestFailed {
        resource: String,
        status: u16,
        message: Option<String>,
    },
    SubscriptionStarted {
        resource: String,
        subscribe_id: String,
    },
    SubscriptionEnded {
        resource: String,
        subscribe_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Get,
    Set,
    Subscribe,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    kind: RequestKind,
    header: RequestHeader,
    /// Decoded body of a Set, cached once the responder accepts it
    body: Vec<u8>,
}

/// A subscription held on the remote device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubscription {
    pub resource: String,
    pub res_id: Option<String>,
    /// Assigned by the responder; `None` until the start reply arrives
    pub subscribe_id: Option<String>,
    pub encoding: BodyEncoding,
}

type ValueKey = (String, Option<String>);

pub struct PropertyClient {
    remote: Muid,
    max_simultaneous_requests: u8,
    max_chunk_size: usize,
    catalog: IndexMap<String, PropertyMetadata>,
    values: HashMap<ValueKey, PropertyValue>,
    pending: IndexMap<u8, PendingRequest>,
    subscriptions: Vec<ClientSubscription>,
    next_request_id: u8,
    replies: ChunkAssembler,
    pushes: ChunkAssembler,
    observers: ObserverList<PropertyEvent>,
}

impl PropertyClient {
    pub fn new(remote: Muid) -> Self {
        Self {
            remote,
            // One request at a time until capabilities are negotiated
            max_simultaneous_requests: 1,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            catalog: IndexMap::new(),
            values: HashMap::new(),
            pending: IndexMap::new(),
            subscriptions: Vec::new(),
            next_request_id: 0,
            replies: ChunkAssembler::default(),
            pushes: ChunkAssembler::default(),
            observers: ObserverList::new(),
        }
    }

    pub fn with_limits(mut self, max_chunk_size: usize, max_pending_transfers: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self.replies = ChunkAssembler::new(max_pending_transfers);
        self.pushes = ChunkAssembler::new(max_pending_transfers);
        self
    }

    pub fn remote(&self) -> Muid {
        self.remote
    }

    /// Record the responder's capabilities reply
    pub fn set_capabilities(&mut self, capabilities: &PropertyCapabilities) {
        self.max_simultaneous_requests = capabilities.max_simultaneous_requests.max(1);
        debug!(
            "{} accepts {} simultaneous request(s)",
            self.remote, self.max_simultaneous_requests
        );
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ObserverId
    where
        F: Fn(&PropertyEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn catalog(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.catalog.values()
    }

    pub fn metadata(&self, resource: &str) -> Option<&PropertyMetadata> {
        self.catalog.get(resource)
    }

    /// Cached value of a resource
    pub fn value(&self, resource: &str, res_id: Option<&str>) -> Option<&PropertyValue> {
        self.values
            .get(&(resource.to_string(), res_id.map(str::to_string)))
    }

    pub fn subscriptions(&self) -> &[ClientSubscription] {
        &self.subscriptions
    }

    /// Number of requests awaiting a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // -----------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------

    pub fn create_get(&mut self, header: RequestHeader) -> Result<Vec<Message>, PropertyError> {
        self.create_request(RequestKind::Get, header, Vec::new())
    }

    /// Set a resource. `body` is the plain body; it is encoded with the
    /// header's `mutualEncoding`.
    pub fn create_set(
        &mut self,
        header: RequestHeader,
        body: &[u8],
    ) -> Result<Vec<Message>, PropertyError> {
        self.create_request(RequestKind::Set, header, body.to_vec())
    }

    pub fn create_subscribe(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        encoding: BodyEncoding,
    ) -> Result<Vec<Message>, PropertyError> {
        let header = RequestHeader {
            res_id: res_id.map(str::to_string),
            command: Some(SubscriptionCommand::Start),
            mutual_encoding: (encoding != BodyEncoding::Ascii).then(|| encoding.name().to_string()),
            ..RequestHeader::new(resource)
        };
        let messages = self.create_request(RequestKind::Subscribe, header, Vec::new())?;
        self.subscriptions.push(ClientSubscription {
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
            subscribe_id: None,
            encoding,
        });
        Ok(messages)
    }

    pub fn create_unsubscribe(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
    ) -> Result<Vec<Message>, PropertyError> {
        let subscribe_id = self
            .subscriptions
            .iter()
            .find(|s| s.resource == resource && s.res_id.as_deref() == res_id)
            .and_then(|s| s.subscribe_id.clone())
            .ok_or_else(|| PropertyError::UnknownSubscription(resource.to_string()))?;
        let header = RequestHeader {
            res_id: res_id.map(str::to_string),
            command: Some(SubscriptionCommand::End),
            subscribe_id: Some(subscribe_id),
            ..RequestHeader::new(resource)
        };
        self.create_request(RequestKind::Subscribe, header, Vec::new())
    }

    fn create_request(
        &mut self,
        kind: RequestKind,
        header: RequestHeader,
        body: Vec<u8>,
    ) -> Result<Vec<Message>, PropertyError> {
        if self.pending.len() >= usize::from(self.max_simultaneous_requests) {
            return Err(PropertyError::TooManyRequests {
                max: self.max_simultaneous_requests,
            });
        }
        let encoded = header.encoding()?.encode(&body)?;
        let request_id = self.allocate_request_id();
        let chunks = split_into_chunks(request_id, header.to_bytes(), &encoded, self.max_chunk_size)?;
        debug!(
            "{:?} {} -> {} (request {}, {} chunk(s))",
            kind,
            header.resource,
            self.remote,
            request_id,
            chunks.len()
        );
        self.pending.insert(request_id, PendingRequest { kind, header, body });
        let wrap = match kind {
            RequestKind::Get => Message::GetPropertyData,
            RequestKind::Set => Message::SetPropertyData,
            RequestKind::Subscribe => Message::SubscribeProperty,
        };
        Ok(chunks.into_iter().map(wrap).collect())
    }

    fn allocate_request_id(&mut self) -> u8 {
        for _ in 0..0x80 {
            let id = self.next_request_id;
            self.next_request_id = (self.next_request_id + 1) & 0x7F;
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
        // Unreachable while max_simultaneous_requests < 128
        self.next_request_id
    }

    // -----------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------

    /// Handle one Property Exchange message from the remote device.
    /// Returns follow-up messages to send back to it.
    pub fn process(&mut self, message: &Message) -> Vec<Message> {
        match message {
            Message::GetPropertyDataReply(chunk)
            | Message::SetPropertyDataReply(chunk)
            | Message::SubscribePropertyReply(chunk) => self.on_reply(chunk),
            Message::SubscribeProperty(chunk) => self.on_push(chunk),
            Message::PropertyNotify(chunk) => {
                self.on_notify(chunk);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_reply(&mut self, chunk: &PropertyChunk) -> Vec<Message> {
        let transfer = match self.replies.push(self.remote, chunk) {
            Ok(ChunkOutcome::Pending) => return Vec::new(),
            Ok(ChunkOutcome::Complete(transfer)) => transfer,
            Err(err) => {
                warn!("Reply {} from {}: {}", chunk.request_id, self.remote, err);
                if chunk.is_last() {
                    if let Some(request) = self.pending.shift_remove(&chunk.request_id) {
                        self.fail(&request.header.resource, err.status(), Some(err.to_string()));
                    }
                }
                return Vec::new();
            }
        };
        let Some(request) = self.pending.shift_remove(&transfer.request_id) else {
            debug!(
                "Reply {} from {} matches no pending request",
                transfer.request_id, self.remote
            );
            return Vec::new();
        };

        let header = match ReplyHeader::parse(&transfer.header) {
            Ok(header) => header,
            Err(err) => {
                self.fail(&request.header.resource, err.status(), Some(err.to_string()));
                return Vec::new();
            }
        };
        if !header.is_success() {
            if request.kind == RequestKind::Subscribe
                && request.header.command == Some(SubscriptionCommand::Start)
            {
                self.drop_subscription(&request.header.resource, request.header.res_id.as_deref());
            }
            self.fail(&request.header.resource, header.status, header.message.clone());
            return Vec::new();
        }

        match request.kind {
            RequestKind::Get => self.on_get_reply(&request.header, &header, &transfer.body),
            RequestKind::Set => {
                self.on_set_reply(&request);
                Vec::new()
            }
            RequestKind::Subscribe => {
                self.on_subscribe_reply(&request.header, &header);
                Vec::new()
            }
        }
    }

    fn on_get_reply(
        &mut self,
        request: &RequestHeader,
        reply: &ReplyHeader,
        body: &[u8],
    ) -> Vec<Message> {
        let decoded = match reply.encoding().and_then(|e| e.decode(body)) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.fail(&request.resource, err.status(), Some(err.to_string()));
                return Vec::new();
            }
        };
        let value = PropertyValue {
            id: request.resource.clone(),
            media_type: reply.media_type().to_string(),
            body: decoded,
        };

        let mut follow_up = Vec::new();
        if request.resource == resources::RESOURCE_LIST {
            match value.to_json() {
                Ok(list) => {
                    self.replace_catalog(&list);
                    if self.catalog.contains_key(resources::DEVICE_INFO)
                        && self.value(resources::DEVICE_INFO, None).is_none()
                    {
                        match self.create_get(RequestHeader::new(resources::DEVICE_INFO)) {
                            Ok(messages) => follow_up = messages,
                            Err(err) => warn!("Cannot request DeviceInfo: {}", err),
                        }
                    }
                }
                Err(err) => warn!("Bad ResourceList from {}: {}", self.remote, err),
            }
        }
        self.store(request.resource.clone(), request.res_id.clone(), value);
        follow_up
    }

    fn on_set_reply(&mut self, request: &PendingRequest) {
        let resource = request.header.resource.clone();
        let res_id = request.header.res_id.clone();
        if request.header.set_partial {
            let patched = self
                .value(&resource, res_id.as_deref())
                .filter(|v| v.is_json())
                .and_then(|v| v.to_json().ok())
                .zip(JsonValue::parse_bytes(&request.body).ok())
                .and_then(|(base, patch)| apply_partial_update(&base, &patch).ok());
            match patched {
                Some(updated) => self.store(resource.clone(), res_id, PropertyValue::json(resource, &updated)),
                None => debug!("No cached value of {} to patch", resource),
            }
        } else {
            let value = PropertyValue {
                id: resource.clone(),
                media_type: request.header.media_type().to_string(),
                body: request.body.clone(),
            };
            self.store(resource, res_id, value);
        }
    }

    fn on_subscribe_reply(&mut self, request: &RequestHeader, reply: &ReplyHeader) {
        let res_id = request.res_id.as_deref();
        match request.command {
            Some(SubscriptionCommand::End) => {
                self.drop_subscription(&request.resource, res_id);
                if let Some(id) = &request.subscribe_id {
                    self.observers.notify(&PropertyEvent::SubscriptionEnded {
                        resource: request.resource.clone(),
                        subscribe_id: id.clone(),
                    });
                }
            }
            _ => {
                let Some(id) = reply.subscribe_id.clone() else {
                    warn!("Subscription reply for {} has no subscribeId", request.resource);
                    self.drop_subscription(&request.resource, res_id);
                    return;
                };
                if let Some(sub) = self
                    .subscriptions
                    .iter_mut()
                    .find(|s| s.resource == request.resource && s.res_id.as_deref() == res_id)
                {
                    sub.subscribe_id = Some(id.clone());
                }
                info!("Subscribed to {} on {} ({})", request.resource, self.remote, id);
                self.observers.notify(&PropertyEvent::SubscriptionStarted {
                    resource: request.resource.clone(),
                    subscribe_id: id,
                });
            }
        }
    }

    /// The responder ended a transaction with a Notify
    fn on_notify(&mut self, chunk: &PropertyChunk) {
        let Some(request) = self.pending.shift_remove(&chunk.request_id) else {
            debug!(
                "Notify {} from {} matches no pending request",
                chunk.request_id, self.remote
            );
            return;
        };
        self.replies.discard(self.remote, chunk.request_id);
        if request.kind == RequestKind::Subscribe
            && request.header.command == Some(SubscriptionCommand::Start)
        {
            self.drop_subscription(&request.header.resource, request.header.res_id.as_deref());
        }
        let (code, message) = match ReplyHeader::parse(&chunk.header) {
            Ok(header) => (header.status, header.message),
            Err(_) => (status::TERMINATED, None),
        };
        info!(
            "{} ended request {} for {}",
            self.remote, chunk.request_id, request.header.resource
        );
        self.fail(&request.header.resource, code, message);
    }

    /// Responder pushed a subscription update
    fn on_push(&mut self, chunk: &PropertyChunk) -> Vec<Message> {
        let transfer = match self.pushes.push(self.remote, chunk) {
            Ok(ChunkOutcome::Pending) => return Vec::new(),
            Ok(ChunkOutcome::Complete(transfer)) => transfer,
            Err(err) if chunk.chunk_index >= chunk.num_chunks => {
                return vec![push_reply(chunk.request_id, ReplyHeader::error(&err))]
            }
            Err(err) => {
                debug!("Subscription update from {}: {}", self.remote, err);
                return Vec::new();
            }
        };
        let reply = match self.apply_push(&transfer.header, &transfer.body) {
            Ok(follow_up) => {
                let mut out = vec![push_reply(transfer.request_id, ReplyHeader::ok())];
                out.extend(follow_up);
                return out;
            }
            Err(err) => {
                warn!("Subscription update from {}: {}", self.remote, err);
                ReplyHeader::error(&err)
            }
        };
        vec![push_reply(transfer.request_id, reply)]
    }

    fn apply_push(&mut self, header: &[u8], body: &[u8]) -> Result<Vec<Message>, PropertyError> {
        let header = RequestHeader::parse(header)?;
        let sub = self
            .subscriptions
            .iter()
            .find(|s| match (&header.subscribe_id, &s.subscribe_id) {
                (Some(pushed), Some(known)) => pushed == known,
                _ => s.resource == header.resource,
            })
            .cloned()
            .ok_or_else(|| {
                PropertyError::UnknownSubscription(
                    header.subscribe_id.clone().unwrap_or_else(|| header.resource.clone()),
                )
            })?;
        let res_id = header.res_id.clone().or_else(|| sub.res_id.clone());

        match header.command {
            Some(SubscriptionCommand::Full) => {
                let value = PropertyValue {
                    id: sub.resource.clone(),
                    media_type: header.media_type().to_string(),
                    body: header.encoding()?.decode(body)?,
                };
                self.store(sub.resource, res_id, value);
                Ok(Vec::new())
            }
            Some(SubscriptionCommand::Partial) => {
                let patch = JsonValue::parse_bytes(&header.encoding()?.decode(body)?)
                    .map_err(PropertyError::InvalidBody)?;
                let base = self
                    .value(&sub.resource, res_id.as_deref())
                    .ok_or_else(|| PropertyError::NoValue(sub.resource.clone()))?;
                if base.media_type != MEDIA_TYPE_JSON {
                    return Err(PropertyError::MediaTypeMismatch {
                        expected: MEDIA_TYPE_JSON.to_string(),
                        actual: base.media_type.clone(),
                    });
                }
                let updated = apply_partial_update(&base.to_json()?, &patch)?;
                let value = PropertyValue::json(sub.resource.clone(), &updated);
                self.store(sub.resource, res_id, value);
                Ok(Vec::new())
            }
            Some(SubscriptionCommand::Notify) => self.create_get(RequestHeader {
                res_id,
                ..RequestHeader::new(sub.resource)
            }),
            Some(SubscriptionCommand::End) => {
                self.drop_subscription(&sub.resource, sub.res_id.as_deref());
                if let Some(id) = sub.subscribe_id {
                    self.observers.notify(&PropertyEvent::SubscriptionEnded {
                        resource: sub.resource,
                        subscribe_id: id,
                    });
                }
                Ok(Vec::new())
            }
            Some(SubscriptionCommand::Start) | None => Err(PropertyError::MalformedHeader(
                "subscription update without a responder command".to_string(),
            )),
        }
    }

    fn replace_catalog(&mut self, list: &JsonValue) {
        let Some(entries) = list.as_array() else {
            warn!("ResourceList from {} is not an array", self.remote);
            return;
        };
        self.catalog = entries
            .iter()
            .filter_map(PropertyMetadata::from_json)
            .map(|m| (m.resource.clone(), m))
            .collect();
        let resources: Vec<String> = self.catalog.keys().cloned().collect();
        info!("{} exposes {} resource(s)", self.remote, resources.len());
        self.observers
            .notify(&PropertyEvent::CatalogUpdated { resources });
    }

    fn store(&mut self, resource: String, res_id: Option<String>, value: PropertyValue) {
        self.observers.notify(&PropertyEvent::ValueUpdated {
            resource: resource.clone(),
            res_id: res_id.clone(),
            value: value.clone(),
        });
        self.values.insert((resource, res_id), value);
    }

    fn drop_subscription(&mut self, resource: &str, res_id: Option<&str>) {
        self.subscriptions
            .retain(|s| !(s.resource == resource && s.res_id.as_deref() == res_id));
    }

    fn fail(&self, resource: &str, status: u16, message: Option<String>) {
        warn!(
            "{} on {} failed with {} {}",
            resource,
            self.remote,
            status,
            message.as_deref().unwrap_or("")
        );
        self.observers.notify(&PropertyEvent::RequestFailed {
            resource: resource.to_string(),
            status,
            message,
        });
    }
}

fn push_reply(request_id: u8, header: ReplyHeader) -> Message {
    Message::SubscribePropertyReply(PropertyChunk::single(request_id, header.to_bytes(), Vec::new()))
}

impl std::fmt::Debug for PropertyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyClient")
            .field("remote", &self.remote)
            .field("catalog", &self.catalog.keys().collect::<Vec<_>>())
            .field("pending", &self.pending.len())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}
