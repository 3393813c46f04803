//! MIDI Capability Inquiry (MIDI-CI) engine
//!
//! Transport-independent implementation of both MIDI-CI roles:
//! - [`initiator::Initiator`] discovers devices and drives profile and
//!   property requests
//! - [`responder::Responder`] answers them from a local profile table and
//!   property service
//!
//! Engines never perform I/O. Received SysEx payloads (without F0/F7) go in
//! through `process_input`, outbound payloads leave through a [`SendFn`].

use std::sync::Arc;

pub mod ci;
pub mod config;
pub mod error;
pub mod initiator;
pub mod json;
pub mod loopback;
pub mod midi;
pub mod observer;
pub mod profile;
pub mod property;
pub mod responder;
pub mod sniffer;

pub use ci::{CiMessage, Message, Muid};
pub use error::{CiError, Result};
pub use initiator::{Initiator, InitiatorConfig};
pub use responder::{Responder, ResponderConfig};

/// Outbound transport callback, called once per complete message
pub type SendFn = Arc<dyn Fn(&[u8]) + Send + Sync>;
