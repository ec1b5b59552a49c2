//! Message Envelope
//!
//! One in-flight message. Created per send/request/reply, consumed once by the
//! scheduler, then discarded.

use crate::address::{ActorRef, PortKind, PortTag};

/// Message payload carried between actors
pub type Payload = serde_json::Value;

/// Actor message envelope for routing
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sending actor
    pub sender: ActorRef,
    /// Non-zero when the sender awaits a reply
    pub request_tag: u64,
    /// Receiving actor
    pub destination: ActorRef,
    /// Non-zero when this envelope answers an earlier request
    pub reply_tag: u64,
    /// Encoded destination port
    pub port: PortTag,
    /// Destination pin or scope name
    pub pin: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn is_request(&self) -> bool {
        self.request_tag > 0
    }

    pub fn kind(&self) -> PortKind {
        self.port.kind()
    }

    /// Build the answer to this envelope, addressed back to its sender
    pub(crate) fn answer(&self, from: ActorRef, payload: Payload) -> Envelope {
        Envelope {
            sender: from,
            request_tag: 0,
            destination: self.sender,
            reply_tag: self.request_tag,
            port: PortTag::REPLY,
            pin: self.pin.clone(),
            payload,
        }
    }
}
