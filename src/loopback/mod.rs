//! In-process loopback between an initiator and a responder
//!
//! Both engines send into a queue instead of calling each other, so a reply
//! emitted while handling a message is delivered on the next pump step
//! rather than re-entering the engine that is still on the stack.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::Result;
use crate::initiator::{Initiator, InitiatorConfig};
use crate::responder::{Responder, ResponderConfig};
use crate::SendFn;

/// Upper bound on deliveries per pump, against two engines ping-ponging
/// forever
const MAX_DELIVERIES: usize = 10_000;

/// Which way a message travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToResponder,
    ToInitiator,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToResponder => write!(f, "I->R"),
            Direction::ToInitiator => write!(f, "R->I"),
        }
    }
}

/// Observer for every message crossing the loopback
pub type TapFn = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

type Wire = Arc<Mutex<VecDeque<Vec<u8>>>>;

fn queue_sender(wire: &Wire) -> SendFn {
    let wire = wire.clone();
    Arc::new(move |bytes: &[u8]| wire.lock().push_back(bytes.to_vec()))
}

pub struct Loopback {
    initiator: Initiator,
    responder: Responder,
    to_responder: Wire,
    to_initiator: Wire,
    tap: Option<TapFn>,
}

impl Loopback {
    pub fn new(initiator: InitiatorConfig, responder: ResponderConfig) -> Result<Self> {
        let to_responder: Wire = Arc::new(Mutex::new(VecDeque::new()));
        let to_initiator: Wire = Arc::new(Mutex::new(VecDeque::new()));
        Ok(Self {
            initiator: Initiator::new(initiator, queue_sender(&to_responder))?,
            responder: Responder::new(responder, queue_sender(&to_initiator))?,
            to_responder,
            to_initiator,
            tap: None,
        })
    }

    pub fn with_tap(mut self, tap: TapFn) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn initiator(&self) -> &Initiator {
        &self.initiator
    }

    pub fn initiator_mut(&mut self) -> &mut Initiator {
        &mut self.initiator
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn responder_mut(&mut self) -> &mut Responder {
        &mut self.responder
    }

    /// Messages waiting in both directions
    pub fn pending(&self) -> usize {
        self.to_responder.lock().len() + self.to_initiator.lock().len()
    }

    /// Deliver queued messages until both directions are quiet.
    ///
    /// Returns the number of messages delivered. Stops at the first error an
    /// engine reports; messages still queued are delivered by the next call.
    pub fn pump(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while delivered < MAX_DELIVERIES {
            // Pop outside the engine call so the engine can push replies
            let next = self.to_responder.lock().pop_front();
            if let Some(bytes) = next {
                delivered += 1;
                self.deliver(Direction::ToResponder, &bytes)?;
                continue;
            }
            let next = self.to_initiator.lock().pop_front();
            match next {
                Some(bytes) => {
                    delivered += 1;
                    self.deliver(Direction::ToInitiator, &bytes)?;
                }
                None => return Ok(delivered),
            }
        }
        warn!(
            "Loopback still busy after {} deliveries, {} message(s) left queued",
            delivered,
            self.pending()
        );
        Ok(delivered)
    }

    fn deliver(&mut self, direction: Direction, bytes: &[u8]) -> Result<()> {
        trace!("{} {} bytes", direction, bytes.len());
        if let Some(tap) = &self.tap {
            tap(direction, bytes);
        }
        match direction {
            Direction::ToResponder => self.responder.process_input(bytes),
            Direction::ToInitiator => self.initiator.process_input(bytes),
        }
    }
}

impl fmt::Debug for Loopback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loopback")
            .field("initiator", &self.initiator.muid())
            .field("responder", &self.responder.muid())
            .field("pending", &self.pending())
            .finish()
    }
}
