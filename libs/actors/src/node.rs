//! Actor Wrapper (Node)
//!
//! A node owns its ordered rx table (input pins) and tx table (output pins with
//! resolved targets). Its behavior instance talks to the rest of the graph only
//! through a [`Facade`], and sees the envelope it is handling through a
//! [`Context`].

use crate::address::{ActorRef, PortTag};
use crate::behavior::{canonical_handler_name, Behavior};
use crate::correlation::Reply;
use crate::descriptor::DebugFlags;
use crate::envelope::{Envelope, Payload};
use crate::error::RuntimeError;
use crate::runtime::Shared;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Input pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPin {
    pub name: String,
    /// Declared with `=>`: accepts requests
    pub channel: bool,
}

impl RxPin {
    /// Binding names that select this pin, most specific first
    pub(crate) fn binding_candidates(&self) -> Vec<String> {
        let arrow = if self.channel { "=>" } else { "->" };
        vec![
            self.name.clone(),
            format!("{arrow} {}", self.name),
            format!("{arrow}{}", self.name),
            canonical_handler_name(&self.name),
        ]
    }
}

/// Resolved, directed wire to one destination port or scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub actor: ActorRef,
    /// Destination pin (or scope) name
    pub pin: String,
    pub port: PortTag,
    /// Replies can travel back along this wire
    pub channel: bool,
}

/// Output pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPin {
    pub name: String,
    /// Declared with `=>`: may carry requests
    pub channel: bool,
    pub targets: Vec<Target>,
}

impl TxPin {
    pub fn channel_targets(&self) -> usize {
        self.targets.iter().filter(|target| target.channel).count()
    }
}

/// Plain actor wrapper
pub struct Node {
    pub uid: String,
    pub name: String,
    pub behavior_key: Option<String>,
    pub settings: Payload,
    pub debug: DebugFlags,
    pub(crate) rx: Vec<RxPin>,
    pub(crate) tx: Vec<TxPin>,
}

impl Node {
    pub fn rx(&self) -> &[RxPin] {
        &self.rx
    }

    pub fn tx(&self) -> &[TxPin] {
        &self.tx
    }

    pub fn rx_index(&self, pin: &str) -> Option<usize> {
        self.rx.iter().position(|rx| rx.name == pin)
    }

    pub fn output(&self, pin: &str) -> Option<&TxPin> {
        self.tx.iter().find(|tx| tx.name == pin)
    }

    /// Map every rx slot to a handler of `behavior`; `None` means stub
    pub(crate) fn bind(&self, behavior: &Behavior) -> Vec<Option<usize>> {
        self.rx
            .iter()
            .map(|rx| {
                let slot = behavior.position(&rx.binding_candidates());
                if slot.is_none() {
                    warn!(
                        actor = %self.name,
                        pin = %rx.name,
                        expected = %canonical_handler_name(&rx.name),
                        "No handler for input pin; messages will be dropped"
                    );
                }
                slot
            })
            .collect()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("rx", &self.rx)
            .field("tx", &self.tx)
            .finish()
    }
}

/// Per-actor messaging facade
///
/// Cheap to clone; behaviors may keep one to send from spawned tasks.
#[derive(Clone)]
pub struct Facade {
    shared: Arc<Shared>,
    actor: ActorRef,
}

impl Facade {
    pub(crate) fn new(shared: Arc<Shared>, actor: ActorRef) -> Self {
        Self { shared, actor }
    }

    pub fn actor(&self) -> ActorRef {
        self.actor
    }

    pub fn name(&self) -> &str {
        self.shared
            .graph
            .actor(self.actor)
            .map(|actor| actor.name())
            .unwrap_or("<detached>")
    }

    pub fn uid(&self) -> &str {
        self.shared
            .graph
            .actor(self.actor)
            .map(|actor| actor.uid())
            .unwrap_or("<detached>")
    }

    fn output(&self, pin: &str) -> Option<&TxPin> {
        self.shared
            .graph
            .actor(self.actor)
            .and_then(|actor| actor.as_node())
            .and_then(|node| node.output(pin))
            .filter(|tx| !tx.targets.is_empty())
    }

    /// Fire-and-forget to every target of `pin`; returns the number of envelopes queued
    pub fn send(&self, pin: &str, payload: Payload) -> usize {
        let Some(tx) = self.output(pin) else {
            warn!(actor = %self.name(), pin, "Send on unwired pin dropped");
            self.shared.metrics.record_unwired();
            return 0;
        };

        let envelopes = tx
            .targets
            .iter()
            .map(|target| self.envelope_to(target, 0, payload.clone()))
            .collect::<Vec<_>>();
        self.shared.enqueue_all(envelopes)
    }

    /// Send to every target of `pin` and await replies from the channel-capable ones
    pub fn request(&self, pin: &str, payload: Payload, timeout: Duration) -> Reply {
        let wanted = "channel-capable";
        let Some(tx) = self.output(pin) else {
            warn!(actor = %self.name(), pin, "Request on unwired pin rejected");
            self.shared.metrics.record_request_rejected();
            return Reply::rejected(RuntimeError::unwired(self.name(), pin, wanted));
        };

        let expected = tx.channel_targets();
        if expected == 0 {
            warn!(actor = %self.name(), pin, "Request on pin without channel targets rejected");
            self.shared.metrics.record_request_rejected();
            return Reply::rejected(RuntimeError::unwired(self.name(), pin, wanted));
        }

        let (tag, reply) = self.shared.open_request(timeout, expected);
        let envelopes = tx
            .targets
            .iter()
            .map(|target| {
                let request_tag = if target.channel { tag } else { 0 };
                self.envelope_to(target, request_tag, payload.clone())
            })
            .collect::<Vec<_>>();

        if self.shared.enqueue_all(envelopes) == 0 {
            self.shared.abandon_request(tag);
        } else {
            debug!(actor = %self.name(), pin, tag, expected, "Request queued");
        }
        reply
    }

    /// Same as [`request`](Self::request) with the configured default timeout
    pub fn request_default(&self, pin: &str, payload: Payload) -> Reply {
        self.request(pin, payload, self.shared.config.default_request_timeout())
    }

    /// Address an actor by name without a declared wire
    pub fn wireless(&self, destination: &str) -> Wireless {
        Wireless {
            facade: self.clone(),
            destination: destination.to_string(),
        }
    }

    pub(crate) fn reply_to(&self, inbound: &Envelope, payload: Payload) -> bool {
        if !inbound.is_request() {
            debug!(
                actor = %self.name(),
                pin = %inbound.pin,
                "Reply ignored: inbound message is not a request"
            );
            return false;
        }

        self.shared.enqueue(inbound.answer(self.actor, payload))
    }

    pub(crate) fn reschedule(&self, inbound: &Envelope) {
        self.shared.enqueue(inbound.clone());
    }

    fn envelope_to(&self, target: &Target, request_tag: u64, payload: Payload) -> Envelope {
        Envelope {
            sender: self.actor,
            request_tag,
            destination: target.actor,
            reply_tag: 0,
            port: target.port,
            pin: target.pin.clone(),
            payload,
        }
    }
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("actor", &self.actor)
            .field("name", &self.name())
            .finish()
    }
}

/// Ad-hoc addressing of a named actor, resolved when used
#[derive(Debug, Clone)]
pub struct Wireless {
    facade: Facade,
    destination: String,
}

impl Wireless {
    fn resolve(&self, pin: &str) -> Option<Target> {
        let graph = &self.facade.shared.graph;
        let actor = graph.find_by_name(&self.destination)?;
        graph.port(actor, pin)
    }

    pub fn send(&self, pin: &str, payload: Payload) -> usize {
        let Some(target) = self.resolve(pin) else {
            warn!(
                actor = %self.facade.name(),
                destination = %self.destination,
                pin,
                "Wireless send to unknown destination dropped"
            );
            self.facade.shared.metrics.record_unwired();
            return 0;
        };

        let envelope = self.facade.envelope_to(&target, 0, payload);
        usize::from(self.facade.shared.enqueue(envelope))
    }

    pub fn request(&self, pin: &str, payload: Payload, timeout: Duration) -> Reply {
        let target = match self.resolve(pin) {
            Some(target) if target.channel => target,
            Some(_) => {
                warn!(destination = %self.destination, pin, "Wireless request to fire-and-forget pin rejected");
                self.facade.shared.metrics.record_request_rejected();
                return Reply::rejected(RuntimeError::unwired(&self.destination, pin, "channel-capable"));
            }
            None => {
                warn!(destination = %self.destination, pin, "Wireless request to unknown destination rejected");
                self.facade.shared.metrics.record_request_rejected();
                return Reply::rejected(RuntimeError::unknown_destination(&self.destination, pin));
            }
        };

        let (tag, reply) = self.facade.shared.open_request(timeout, 1);
        let envelope = self.facade.envelope_to(&target, tag, payload);
        if !self.facade.shared.enqueue(envelope) {
            self.facade.shared.abandon_request(tag);
        }
        reply
    }
}

/// Handler-side view of one delivery
pub struct Context<'a> {
    facade: &'a Facade,
    inbound: &'a Envelope,
}

impl<'a> Context<'a> {
    pub(crate) fn new(facade: &'a Facade, inbound: &'a Envelope) -> Self {
        Self { facade, inbound }
    }

    /// Envelope being handled
    pub fn message(&self) -> &Envelope {
        self.inbound
    }

    pub fn facade(&self) -> &Facade {
        self.facade
    }

    pub fn name(&self) -> &str {
        self.facade.name()
    }

    pub fn send(&self, pin: &str, payload: Payload) -> usize {
        self.facade.send(pin, payload)
    }

    pub fn request(&self, pin: &str, payload: Payload, timeout: Duration) -> Reply {
        self.facade.request(pin, payload, timeout)
    }

    /// Answer the request being handled; false if it was a plain send or the runtime stopped
    pub fn reply(&self, payload: Payload) -> bool {
        self.facade.reply_to(self.inbound, payload)
    }

    /// Put the envelope being handled back into the queue unchanged
    pub fn reschedule(&self) {
        self.facade.reschedule(self.inbound)
    }

    pub fn wireless(&self, destination: &str) -> Wireless {
        self.facade.wireless(destination)
    }
}
