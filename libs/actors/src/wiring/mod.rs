//! Wiring Phase
//!
//! Two passes over the descriptors:
//! 1. build one wrapper per descriptor, parsing pin and scope declarations and
//!    collecting their symbolic targets;
//! 2. resolve every symbolic target against the uid index (name index when no
//!    uid is given) into a [`Target`] with an encoded port tag.
//!
//! Anything that cannot be parsed or resolved is logged, recorded in the
//! [`WiringReport`] and left out of the live tables. Duplicate uids are the only
//! fatal error.

pub mod syntax;

use crate::address::{ActorRef, MAX_PORT_INDEX};
use crate::behavior::{BehaviorFactory, BehaviorRegistry};
use crate::descriptor::{FilterDescriptor, GraphDescriptor, NodeDescriptor};
use crate::error::{Result, RuntimeError};
use crate::filter::{Filter, Scope};
use crate::graph::{Actor, Graph};
use crate::node::{Node, RxPin, Target, TxPin};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use syntax::{parse_input, parse_output, parse_scope, TargetRef};
use tracing::{debug, error, info};

/// One non-fatal wiring problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringIssue {
    pub actor: String,
    pub entry: String,
    pub reason: String,
}

impl fmt::Display for WiringIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}': {}", self.actor, self.entry, self.reason)
    }
}

/// Everything the wiring phase had to leave unbound
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WiringReport {
    issues: Vec<WiringIssue>,
}

impl WiringReport {
    fn record(&mut self, actor: &str, entry: &str, reason: impl Into<String>) {
        let issue = WiringIssue {
            actor: actor.to_string(),
            entry: entry.to_string(),
            reason: reason.into(),
        };
        error!(actor = %issue.actor, entry = %issue.entry, reason = %issue.reason, "Wiring configuration error");
        self.issues.push(issue);
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[WiringIssue] {
        &self.issues
    }
}

/// Where a resolved target goes once found
enum Slot {
    Output { tx: usize },
    Scope { scope: usize },
}

struct PendingWire {
    owner: usize,
    slot: Slot,
    entry: String,
    reference: TargetRef,
}

fn lookup_factory(
    registry: &BehaviorRegistry,
    key: Option<&str>,
    actor: &str,
    report: &mut WiringReport,
) -> Option<Arc<dyn BehaviorFactory>> {
    let key = key?;
    let factory = registry.get(key);
    if factory.is_none() {
        report.record(actor, key, "no behavior factory registered under this key");
    }
    factory
}

fn build_node(
    owner: usize,
    descriptor: &NodeDescriptor,
    pending: &mut Vec<PendingWire>,
    report: &mut WiringReport,
) -> Node {
    let mut rx: Vec<RxPin> = Vec::new();
    for decl in &descriptor.inputs {
        match parse_input(decl) {
            Ok(input) if rx.iter().any(|pin| pin.name == input.pin) => {
                report.record(&descriptor.name, decl, "duplicate input pin");
            }
            Ok(input) => rx.push(RxPin {
                name: input.pin,
                channel: input.channel,
            }),
            Err(e) => report.record(&descriptor.name, decl, e.to_string()),
        }
    }

    let mut tx: Vec<TxPin> = Vec::new();
    for decl in &descriptor.outputs {
        let output = match parse_output(decl) {
            Ok(output) => output,
            Err(e) => {
                report.record(&descriptor.name, decl, e.to_string());
                continue;
            }
        };

        let index = match tx.iter().position(|pin| pin.name == output.pin) {
            Some(index) => {
                if tx[index].channel != output.channel {
                    report.record(&descriptor.name, decl, "pin redeclared with a different arrow; first kept");
                }
                index
            }
            None => {
                tx.push(TxPin {
                    name: output.pin,
                    channel: output.channel,
                    targets: Vec::new(),
                });
                tx.len() - 1
            }
        };

        pending.extend(output.targets.into_iter().map(|reference| PendingWire {
            owner,
            slot: Slot::Output { tx: index },
            entry: decl.clone(),
            reference,
        }));
    }

    if rx.len() > MAX_PORT_INDEX {
        report.record(&descriptor.name, "inputs", "too many input pins to encode");
        rx.truncate(MAX_PORT_INDEX);
    }

    Node {
        uid: descriptor.uid.clone(),
        name: descriptor.name.clone(),
        behavior_key: descriptor.behavior.clone(),
        settings: descriptor.settings.clone(),
        debug: descriptor.debug,
        rx,
        tx,
    }
}

fn build_filter(
    owner: usize,
    descriptor: &FilterDescriptor,
    pending: &mut Vec<PendingWire>,
    report: &mut WiringReport,
) -> Filter {
    let mut scopes: Vec<Scope> = Vec::new();
    for decl in &descriptor.table {
        let parsed = match parse_scope(decl) {
            Ok(parsed) => parsed,
            Err(e) => {
                report.record(&descriptor.name, decl, e.to_string());
                continue;
            }
        };

        let index = match scopes.iter().position(|scope| scope.name == parsed.name) {
            Some(index) => index,
            None => {
                scopes.push(Scope::new(parsed.name));
                scopes.len() - 1
            }
        };

        pending.extend(parsed.targets.into_iter().map(|reference| PendingWire {
            owner,
            slot: Slot::Scope { scope: index },
            entry: decl.clone(),
            reference,
        }));
    }

    Filter {
        uid: descriptor.uid.clone(),
        name: descriptor.name.clone(),
        behavior_key: descriptor.behavior.clone(),
        settings: descriptor.settings.clone(),
        debug: descriptor.debug,
        scopes,
    }
}

impl Graph {
    /// Build and wire a graph from its descriptors
    pub fn build(descriptor: &GraphDescriptor, registry: &BehaviorRegistry) -> Result<Graph> {
        let mut report = WiringReport::default();
        let mut pending = Vec::new();
        let mut actors = Vec::with_capacity(descriptor.nodes.len() + descriptor.filters.len());
        let mut factories = Vec::with_capacity(actors.capacity());
        let mut by_uid = HashMap::new();
        let mut by_name = HashMap::new();

        let mut index = |uid: &str, name: &str, at: usize| -> Result<()> {
            if by_uid.insert(uid.to_string(), ActorRef(at)).is_some() {
                return Err(RuntimeError::configuration(
                    format!("duplicate actor uid '{uid}'"),
                    Some("uid"),
                ));
            }
            by_name.entry(name.to_string()).or_insert(ActorRef(at));
            Ok(())
        };

        for node in &descriptor.nodes {
            let at = actors.len();
            index(&node.uid, &node.name, at)?;
            factories.push(lookup_factory(registry, node.behavior.as_deref(), &node.name, &mut report));
            actors.push(Actor::Node(build_node(at, node, &mut pending, &mut report)));
        }

        for filter in &descriptor.filters {
            let at = actors.len();
            index(&filter.uid, &filter.name, at)?;
            factories.push(lookup_factory(registry, filter.behavior.as_deref(), &filter.name, &mut report));
            actors.push(Actor::Filter(build_filter(at, filter, &mut pending, &mut report)));
        }

        let mut graph = Graph {
            actors,
            factories,
            by_uid,
            by_name,
            report: WiringReport::default(),
        };

        // Second pass: resolve against the complete indexes, then install
        let mut resolved: Vec<(usize, Slot, String, Target)> = Vec::with_capacity(pending.len());
        for wire in pending {
            let owner_name = graph.actors[wire.owner].name().to_string();
            match graph.resolve(&wire.reference) {
                Ok(target) => {
                    let key = wire
                        .reference
                        .key
                        .clone()
                        .unwrap_or_else(|| wire.reference.actor.clone());
                    resolved.push((wire.owner, wire.slot, key, target));
                }
                Err(reason) => report.record(&owner_name, &wire.entry, reason),
            }
        }

        for (owner, slot, key, mut target) in resolved {
            match (&mut graph.actors[owner], slot) {
                (Actor::Node(node), Slot::Output { tx }) => {
                    let pin = &mut node.tx[tx];
                    target.channel &= pin.channel;
                    pin.targets.push(target);
                }
                (Actor::Filter(filter), Slot::Scope { scope }) => {
                    filter.scopes[scope].insert(key, target);
                }
                _ => unreachable!("wire slot always matches its owner kind"),
            }
        }

        graph.report = report;
        info!(
            actors = graph.len(),
            issues = graph.report.issues().len(),
            "Graph wired"
        );
        Ok(graph)
    }

    fn resolve(&self, reference: &TargetRef) -> std::result::Result<Target, String> {
        let actor = match &reference.uid {
            Some(uid) => self
                .find_by_uid(uid)
                .ok_or_else(|| format!("unknown actor uid '{uid}' in '{reference}'"))?,
            None => self
                .find_by_name(&reference.actor)
                .ok_or_else(|| format!("unknown actor '{}' in '{reference}'", reference.actor))?,
        };

        if let Some(found) = self.actor(actor) {
            if found.name() != reference.actor {
                debug!(
                    uid = ?reference.uid,
                    declared = %reference.actor,
                    actual = %found.name(),
                    "Target name differs from actor registered under uid"
                );
            }
        }

        self.port(actor, &reference.pin)
            .ok_or_else(|| format!("no pin or scope '{}' on '{}'", reference.pin, reference.actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PortKind;
    use crate::behavior::Behavior;

    fn ping_pong() -> GraphDescriptor {
        GraphDescriptor::new()
            .node(
                NodeDescriptor::new("X", "1")
                    .behavior("pinger")
                    .output("ping => [pong @ Y1 (2), pong @ Y2 (3)]")
                    .output("log -> sink @ Missing (99)"),
            )
            .node(NodeDescriptor::new("Y1", "2").input("=> pong"))
            .node(NodeDescriptor::new("Y2", "3").input("-> pong"))
    }

    fn registry() -> BehaviorRegistry {
        BehaviorRegistry::new().with("pinger", |_| Ok(Behavior::new()))
    }

    #[test]
    fn test_targets_resolve_with_channel_flags() {
        let graph = Graph::build(&ping_pong(), &registry()).unwrap();
        let x = graph.actor(graph.find_by_name("X").unwrap()).unwrap().as_node().unwrap();

        let ping = x.output("ping").unwrap();
        assert_eq!(ping.targets.len(), 2);
        assert_eq!(ping.targets[0].port.kind(), PortKind::Handler);
        assert!(ping.targets[0].channel);
        // Y2 declared a fire-and-forget input
        assert!(!ping.targets[1].channel);
        assert_eq!(ping.channel_targets(), 1);
    }

    #[test]
    fn test_unresolvable_target_is_reported_not_wired() {
        let graph = Graph::build(&ping_pong(), &registry()).unwrap();
        let x = graph.actor(ActorRef(0)).unwrap().as_node().unwrap();

        assert!(x.output("log").unwrap().targets.is_empty());
        assert_eq!(graph.report().issues().len(), 1);
        assert!(graph.report().issues()[0].reason.contains("99"));
    }

    #[test]
    fn test_duplicate_uid_is_fatal() {
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("A", "1"))
            .node(NodeDescriptor::new("B", "1"));
        assert!(matches!(
            Graph::build(&descriptor, &registry()),
            Err(RuntimeError::Configuration { .. })
        ));
    }

    #[test]
    fn test_filter_scopes_and_router_targets() {
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("S", "1").output("out => route @ R (9)"))
            .node(NodeDescriptor::new("A", "2").input("=> in"))
            .node(NodeDescriptor::new("B", "3").input("=> in"))
            .filter(
                FilterDescriptor::new("R", "9")
                    .scope("route : [in @ A (2), second = in @ B (3), in @ Nowhere (7)]"),
            );

        let graph = Graph::build(&descriptor, &registry()).unwrap();
        let s = graph.actor(ActorRef(0)).unwrap().as_node().unwrap();
        let out = &s.output("out").unwrap().targets[0];
        assert_eq!(out.port.kind(), PortKind::Router);
        assert!(out.channel);

        let r = graph.actor(graph.find_by_uid("9").unwrap()).unwrap().as_filter().unwrap();
        assert_eq!(r.scopes()[0].keys(), vec!["A".to_string(), "second".to_string()]);
        assert_eq!(graph.report().issues().len(), 1);
    }

    #[test]
    fn test_missing_factory_and_bad_syntax_are_reported() {
        let descriptor = GraphDescriptor::new().node(
            NodeDescriptor::new("A", "1")
                .behavior("nope")
                .input("in")
                .output("out pong @ B"),
        );

        let graph = Graph::build(&descriptor, &registry()).unwrap();
        assert_eq!(graph.report().issues().len(), 3);
        assert!(graph.factory(ActorRef(0)).is_none());
    }

    #[test]
    fn test_merged_output_declarations() {
        let descriptor = GraphDescriptor::new()
            .node(
                NodeDescriptor::new("A", "1")
                    .output("out -> in @ B (2)")
                    .output("out -> in @ C (3)"),
            )
            .node(NodeDescriptor::new("B", "2").input("-> in"))
            .node(NodeDescriptor::new("C", "3").input("-> in"));

        let graph = Graph::build(&descriptor, &registry()).unwrap();
        let a = graph.actor(ActorRef(0)).unwrap().as_node().unwrap();
        assert_eq!(a.tx().len(), 1);
        assert_eq!(a.output("out").unwrap().targets.len(), 2);
    }
}
