//! Wired Actor Graph
//!
//! Immutable result of the wiring phase: every actor wrapper in descriptor
//! order (nodes first, then filters) plus uid and name indexes.

use crate::address::{ActorRef, PortTag};
use crate::behavior::BehaviorFactory;
use crate::descriptor::DebugFlags;
use crate::envelope::Payload;
use crate::filter::Filter;
use crate::node::{Node, Target};
use crate::wiring::WiringReport;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Node or filter wrapper
#[derive(Debug)]
pub enum Actor {
    Node(Node),
    Filter(Filter),
}

impl Actor {
    pub fn name(&self) -> &str {
        match self {
            Actor::Node(node) => &node.name,
            Actor::Filter(filter) => &filter.name,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Actor::Node(node) => &node.uid,
            Actor::Filter(filter) => &filter.uid,
        }
    }

    pub fn behavior_key(&self) -> Option<&str> {
        match self {
            Actor::Node(node) => node.behavior_key.as_deref(),
            Actor::Filter(filter) => filter.behavior_key.as_deref(),
        }
    }

    pub fn settings(&self) -> &Payload {
        match self {
            Actor::Node(node) => &node.settings,
            Actor::Filter(filter) => &filter.settings,
        }
    }

    pub fn debug(&self) -> DebugFlags {
        match self {
            Actor::Node(node) => node.debug,
            Actor::Filter(filter) => filter.debug,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Actor::Node(node) => Some(node),
            Actor::Filter(_) => None,
        }
    }

    pub fn as_filter(&self) -> Option<&Filter> {
        match self {
            Actor::Filter(filter) => Some(filter),
            Actor::Node(_) => None,
        }
    }
}

/// Fully wired graph, ready to hand to a runtime
pub struct Graph {
    pub(crate) actors: Vec<Actor>,
    pub(crate) factories: Vec<Option<Arc<dyn BehaviorFactory>>>,
    pub(crate) by_uid: HashMap<String, ActorRef>,
    pub(crate) by_name: HashMap<String, ActorRef>,
    pub(crate) report: WiringReport,
}

impl Graph {
    pub fn actor(&self, actor: ActorRef) -> Option<&Actor> {
        self.actors.get(actor.0)
    }

    pub(crate) fn factory(&self, actor: ActorRef) -> Option<&Arc<dyn BehaviorFactory>> {
        self.factories.get(actor.0).and_then(Option::as_ref)
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<ActorRef> {
        self.by_uid.get(uid).copied()
    }

    /// First actor declared under `name`
    pub fn find_by_name(&self, name: &str) -> Option<ActorRef> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorRef, &Actor)> {
        self.actors
            .iter()
            .enumerate()
            .map(|(index, actor)| (ActorRef(index), actor))
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Problems found while wiring
    pub fn report(&self) -> &WiringReport {
        &self.report
    }

    /// Resolve a destination pin (node) or scope (filter) on `actor`
    pub fn port(&self, actor: ActorRef, pin: &str) -> Option<Target> {
        match self.actor(actor)? {
            Actor::Node(node) => {
                let index = node.rx_index(pin)?;
                Some(Target {
                    actor,
                    pin: pin.to_string(),
                    port: PortTag::handler(index),
                    channel: node.rx[index].channel,
                })
            }
            Actor::Filter(filter) => {
                let index = filter.scope_index(pin)?;
                Some(Target {
                    actor,
                    pin: pin.to_string(),
                    port: PortTag::router(index),
                    channel: true,
                })
            }
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("actors", &self.actors)
            .field("report", &self.report)
            .finish()
    }
}
