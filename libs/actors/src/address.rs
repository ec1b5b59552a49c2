//! Addressing Primitives
//!
//! A resolved destination port is a single `u32`: two kind bits on top, a 30-bit
//! index into the destination's rx table (Handler) or scope table (Router) below.
//! Reply tags carry no index; they are matched against the correlation table.

use std::fmt;

const KIND_SHIFT: u32 = 30;
const INDEX_MASK: u32 = (1 << KIND_SHIFT) - 1;

/// Largest port or scope index a tag can carry
pub const MAX_PORT_INDEX: usize = INDEX_MASK as usize;

/// Delivery kind encoded in the high bits of a port tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Never resolved; envelopes carrying it are dropped
    Unbound,
    /// Direct handler slot on a node
    Handler,
    /// Answer to an earlier request
    Reply,
    /// Scope slot on a filter
    Router,
}

impl PortKind {
    fn bits(self) -> u32 {
        match self {
            PortKind::Unbound => 0,
            PortKind::Handler => 1,
            PortKind::Reply => 2,
            PortKind::Router => 3,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => PortKind::Handler,
            2 => PortKind::Reply,
            3 => PortKind::Router,
            _ => PortKind::Unbound,
        }
    }
}

/// Encoded port reference (kind + index)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortTag(u32);

impl PortTag {
    /// Tag for an unresolved port
    pub const UNBOUND: PortTag = PortTag(0);

    /// Tag recognised by kind alone; routed through the correlation table
    pub const REPLY: PortTag = PortTag(2 << KIND_SHIFT);

    /// Handler slot `index` in the destination node's rx table
    pub fn handler(index: usize) -> Self {
        Self::encode(PortKind::Handler, index)
    }

    /// Scope slot `index` in the destination filter's scope table
    pub fn router(index: usize) -> Self {
        Self::encode(PortKind::Router, index)
    }

    fn encode(kind: PortKind, index: usize) -> Self {
        debug_assert!(index <= MAX_PORT_INDEX, "port index {index} out of range");
        PortTag((kind.bits() << KIND_SHIFT) | (index as u32 & INDEX_MASK))
    }

    pub fn kind(self) -> PortKind {
        PortKind::from_bits(self.0 >> KIND_SHIFT)
    }

    pub fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    /// Raw encoded value
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PortTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortTag({:?}#{})", self.kind(), self.index())
    }
}

/// Reference to an actor slot in a wired graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorRef(pub(crate) usize);

impl ActorRef {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reply_tag_has_reply_kind() {
        assert_eq!(PortTag::REPLY.kind(), PortKind::Reply);
        assert_eq!(PortTag::UNBOUND.kind(), PortKind::Unbound);
    }

    #[test]
    fn test_handler_and_router_never_collide() {
        assert_ne!(PortTag::handler(3), PortTag::router(3));
        assert_eq!(PortTag::handler(3).index(), PortTag::router(3).index());
    }

    proptest! {
        #[test]
        fn prop_kind_and_index_survive_packing(index in 0usize..=MAX_PORT_INDEX, router in any::<bool>()) {
            let tag = if router { PortTag::router(index) } else { PortTag::handler(index) };
            prop_assert_eq!(tag.index(), index);
            prop_assert_eq!(tag.kind(), if router { PortKind::Router } else { PortKind::Handler });
        }
    }
}
