//! Tick-Driven Scheduler
//!
//! Owns the outbound queue, the correlation table and one behavior instance per
//! actor. Every tick swaps the outbound queue into a fixed batch and delivers it
//! by port kind; anything produced while delivering lands in the next batch.
//!
//! ```text
//!            start()                 halt()
//! Stopped ───────────► Running ───────────────► Halted
//!    ▲                 Fast ⇄ Slow  ◄───────────   │
//!    │                    │           resume()     │
//!    └──── stop() ────────┴────────────────────────┘
//! ```
//!
//! # Lock Ordering
//!
//! Handlers run while their own instance lock is held, so:
//! 1. at most one `instances` slot is locked at a time
//! 2. `outbound`, `correlation` and `control` are never held while a handler
//!    or selector runs
//! 3. the only nesting is `outbound` -> `control` when enqueueing, so `stop()`
//!    takes them one at a time

use crate::address::{ActorRef, PortKind};
use crate::behavior::{self, Behavior, BehaviorInit, Selection};
use crate::config::RuntimeConfig;
use crate::correlation::{CorrelationTable, Reply};
use crate::envelope::Envelope;
use crate::error::{Result, RuntimeError};
use crate::filter::Scope;
use crate::graph::{Actor, Graph};
use crate::metrics::{RuntimeMetrics, RuntimeStats};
use crate::node::{Context, Facade};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Halted,
}

/// Polling sub-state while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Fast,
    Slow,
}

/// What one call to [`Runtime::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Runtime is not running
    Skipped,
    /// Outbound queue was empty; `expired` requests were swept
    Idle { expired: usize },
    /// A batch of `envelopes` was delivered
    Delivered { envelopes: usize },
}

struct Control {
    state: RunState,
    pace: Pace,
    idle_ticks: u32,
}

/// Live behavior of one actor
struct Instance {
    behavior: Behavior,
    /// rx slot -> binding index; `None` is a warn-and-drop stub
    bindings: Vec<Option<usize>>,
    facade: Facade,
}

/// State shared between the runtime handle, the tick driver and every facade
pub(crate) struct Shared {
    pub(crate) runtime_id: String,
    pub(crate) graph: Graph,
    pub(crate) config: RuntimeConfig,
    pub(crate) metrics: RuntimeMetrics,
    outbound: Mutex<Vec<Envelope>>,
    correlation: Mutex<CorrelationTable>,
    next_tag: AtomicU64,
    instances: Vec<Mutex<Option<Instance>>>,
    control: Mutex<Control>,
    wake: Notify,
}

impl Shared {
    /// Queue one envelope for the next tick; false once the runtime is stopped
    pub(crate) fn enqueue(&self, envelope: Envelope) -> bool {
        self.enqueue_all(vec![envelope]) == 1
    }

    /// Queue envelopes for the next tick; returns how many were accepted
    pub(crate) fn enqueue_all(&self, envelopes: Vec<Envelope>) -> usize {
        let count = envelopes.len();
        if count == 0 {
            return 0;
        }

        // State is read under the queue lock so stop() cannot clear in between
        let mut outbound = self.outbound.lock();
        if self.state() == RunState::Stopped {
            debug!(runtime_id = %self.runtime_id, count, "Runtime stopped; envelopes discarded");
            return 0;
        }
        outbound.extend(envelopes);
        drop(outbound);

        self.metrics.record_enqueued(count);
        count
    }

    /// Allocate a tag and register a reply group of `expected` slots
    pub(crate) fn open_request(&self, timeout: Duration, expected: usize) -> (u64, Reply) {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let reply = self.correlation.lock().add_entry(tag, timeout, expected);
        self.metrics.record_request_opened();
        (tag, reply)
    }

    /// Drop a request whose envelopes were refused
    pub(crate) fn abandon_request(&self, tag: u64) {
        if self.correlation.lock().abandon(tag, "runtime stopped") {
            debug!(runtime_id = %self.runtime_id, tag, "Request abandoned before delivery");
        }
    }

    fn state(&self) -> RunState {
        self.control.lock().state
    }

    fn interval(&self) -> Duration {
        match self.control.lock().pace {
            Pace::Fast => self.config.fast_interval(),
            Pace::Slow => self.config.slow_interval(),
        }
    }

    fn tick(&self) -> TickOutcome {
        if self.state() != RunState::Running {
            return TickOutcome::Skipped;
        }

        let batch = std::mem::take(&mut *self.outbound.lock());

        // Swept every round so a graph that never idles still times out
        let expired = self.correlation.lock().sweep_expired(Instant::now());
        self.metrics.record_timeouts(expired);

        if batch.is_empty() {
            self.metrics.record_tick(true);

            let mut control = self.control.lock();
            control.idle_ticks = control.idle_ticks.saturating_add(1);
            if control.pace == Pace::Fast && control.idle_ticks >= self.config.idle_ticks_before_slow {
                control.pace = Pace::Slow;
                debug!(
                    runtime_id = %self.runtime_id,
                    idle_ticks = control.idle_ticks,
                    "Switching to slow polling"
                );
            }
            return TickOutcome::Idle { expired };
        }

        self.metrics.record_tick(false);
        {
            let mut control = self.control.lock();
            control.idle_ticks = 0;
            if control.pace == Pace::Slow {
                control.pace = Pace::Fast;
                debug!(runtime_id = %self.runtime_id, "Switching to fast polling");
            }
        }

        let envelopes = batch.len();
        for (position, envelope) in batch.into_iter().enumerate() {
            if self.state() == RunState::Stopped {
                debug!(
                    runtime_id = %self.runtime_id,
                    discarded = envelopes - position,
                    "Runtime stopped mid-tick; rest of batch discarded"
                );
                break;
            }
            self.deliver(envelope, 0);
        }
        TickOutcome::Delivered { envelopes }
    }

    fn deliver(&self, envelope: Envelope, depth: u32) {
        match envelope.kind() {
            PortKind::Handler => self.deliver_to_handler(envelope),
            PortKind::Reply => self.deliver_reply(envelope),
            PortKind::Router => self.route(envelope, depth),
            PortKind::Unbound => {
                warn!(
                    destination = %envelope.destination,
                    pin = %envelope.pin,
                    "Envelope for unbound port dropped"
                );
                self.metrics.record_dropped();
            }
        }
    }

    fn deliver_to_handler(&self, envelope: Envelope) {
        let destination = envelope.destination;
        let Some(node) = self.graph.actor(destination).and_then(Actor::as_node) else {
            warn!(destination = %destination, pin = %envelope.pin, "Handler envelope for non-node actor dropped");
            self.metrics.record_dropped();
            return;
        };

        if node.debug.verbose {
            info!(
                actor = %node.name,
                pin = %envelope.pin,
                from = %envelope.sender,
                request_tag = envelope.request_tag,
                payload = %envelope.payload,
                "Delivering message"
            );
        } else {
            trace!(actor = %node.name, pin = %envelope.pin, "Delivering message");
        }

        let Some(cell) = self.instances.get(destination.index()) else {
            self.metrics.record_dropped();
            return;
        };
        let mut guard = cell.lock();
        let Some(instance) = guard.as_mut() else {
            debug!(actor = %node.name, pin = %envelope.pin, "No live behavior; message dropped");
            self.metrics.record_dropped();
            return;
        };

        let binding = instance
            .bindings
            .get(envelope.port.index())
            .copied()
            .flatten();
        let Instance { behavior, facade, .. } = instance;
        let handler = match binding {
            Some(index) => behavior.handler_mut(index),
            None => None,
        };
        let Some(handler) = handler else {
            warn!(actor = %node.name, pin = %envelope.pin, "Message for stub handler dropped");
            self.metrics.record_dropped();
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut context = Context::new(facade, &envelope);
            handler(&mut context, &envelope.payload);
        }));

        match outcome {
            Ok(()) => self.metrics.record_delivered(),
            Err(cause) => {
                self.metrics.record_handler_panic();
                error!(
                    actor = %node.name,
                    pin = %envelope.pin,
                    cause = panic_message(&cause),
                    "Handler panicked; message discarded"
                );
            }
        }
    }

    fn deliver_reply(&self, envelope: Envelope) {
        let tag = envelope.reply_tag;
        let from = envelope.sender;
        let remaining = self.correlation.lock().fulfill_next(tag, envelope.payload);

        match remaining {
            Some(remaining) => {
                self.metrics.record_reply(true);
                trace!(tag, from = %from, remaining, "Reply matched");
            }
            None => {
                self.metrics.record_reply(false);
                debug!(tag, from = %from, "Reply without pending request dropped");
            }
        }
    }

    fn route(&self, envelope: Envelope, depth: u32) {
        let destination = envelope.destination;
        let Some(filter) = self.graph.actor(destination).and_then(Actor::as_filter) else {
            warn!(destination = %destination, pin = %envelope.pin, "Router envelope for non-filter actor dropped");
            self.metrics.record_dropped();
            return;
        };
        let Some(scope) = filter.scope(envelope.port.index()) else {
            warn!(filter = %filter.name, scope = %envelope.pin, "Unknown scope; message dropped");
            self.metrics.record_dropped();
            return;
        };
        if depth >= self.config.max_route_depth {
            error!(
                filter = %filter.name,
                scope = %scope.name,
                depth,
                "Route depth exceeded; message dropped"
            );
            self.metrics.record_dropped();
            return;
        }

        let Some(selection) = self.select(destination, &filter.name, scope, &envelope) else {
            return;
        };
        let targets = scope.select(&selection);

        if envelope.is_request() {
            self.expand_request(envelope.request_tag, Scope::channel_fan_out(&targets));
        }

        if filter.debug.verbose {
            info!(
                filter = %filter.name,
                scope = %scope.name,
                selection = ?selection,
                targets = targets.len(),
                "Routing message"
            );
        } else {
            trace!(filter = %filter.name, scope = %scope.name, targets = targets.len(), "Routing message");
        }
        self.metrics.record_delivered();

        for target in targets {
            let forwarded = Envelope {
                sender: envelope.sender,
                request_tag: if target.channel { envelope.request_tag } else { 0 },
                destination: target.actor,
                reply_tag: 0,
                port: target.port,
                pin: target.pin.clone(),
                payload: envelope.payload.clone(),
            };
            self.deliver(forwarded, depth + 1);
        }
    }

    /// Run the filter's selector; `None` means the message was discarded
    fn select(&self, filter: ActorRef, name: &str, scope: &Scope, envelope: &Envelope) -> Option<Selection> {
        let mut guard = self.instances.get(filter.index())?.lock();
        let Some(selector) = guard.as_mut().and_then(|instance| instance.behavior.selector_mut()) else {
            return Some(Selection::All);
        };

        let keys = scope.keys();
        match panic::catch_unwind(AssertUnwindSafe(|| selector(&keys, &envelope.pin, &envelope.payload))) {
            Ok(selection) => Some(selection),
            Err(cause) => {
                self.metrics.record_handler_panic();
                error!(
                    filter = %name,
                    scope = %scope.name,
                    cause = panic_message(&cause),
                    "Selector panicked; message discarded"
                );
                None
            }
        }
    }

    /// Replace the router's single slot with its channel-capable fan-out
    fn expand_request(&self, tag: u64, fan_out: usize) {
        let mut table = self.correlation.lock();
        let Some(current) = table.expected(tag) else {
            debug!(tag, "Routed request is no longer pending");
            return;
        };

        let total = current.saturating_sub(1) + fan_out;
        if total != current {
            table.adjust_expected(tag, total);
            debug!(tag, from = current, to = total, "Request fan-out adjusted");
        }
    }
}

fn panic_message(cause: &Box<dyn std::any::Any + Send>) -> &str {
    cause
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

async fn drive(shared: Arc<Shared>) {
    debug!(runtime_id = %shared.runtime_id, "Tick driver started");
    loop {
        match shared.state() {
            RunState::Stopped => break,
            RunState::Halted => {
                shared.wake.notified().await;
                continue;
            }
            RunState::Running => {}
        }

        tokio::time::sleep(shared.interval()).await;
        shared.tick();
    }
    debug!(runtime_id = %shared.runtime_id, "Tick driver exited");
}

/// Runtime for one wired graph
///
/// Independent runtimes share nothing; several graphs can run in one process.
pub struct Runtime {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(graph: Graph, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let instances = (0..graph.len()).map(|_| Mutex::new(None)).collect();
        let shared = Shared {
            runtime_id: format!("runtime-{}", Uuid::new_v4()),
            correlation: Mutex::new(CorrelationTable::new(config.request_timeout_floor())),
            graph,
            config,
            metrics: RuntimeMetrics::default(),
            outbound: Mutex::new(Vec::new()),
            next_tag: AtomicU64::new(1),
            instances,
            control: Mutex::new(Control {
                state: RunState::Stopped,
                pace: Pace::Fast,
                idle_ticks: 0,
            }),
            wake: Notify::new(),
        };

        Ok(Self {
            shared: Arc::new(shared),
            driver: Mutex::new(None),
        })
    }

    /// Construct every behavior and begin ticking
    ///
    /// With `autotick` this must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.state() != RunState::Stopped {
            warn!(runtime_id = %self.shared.runtime_id, "Runtime already started");
            return Ok(());
        }

        let handle = if self.shared.config.autotick {
            Some(Handle::try_current().map_err(|_| {
                RuntimeError::executor("autotick requires a tokio runtime; call start() from async context")
            })?)
        } else {
            None
        };

        self.shared.outbound.lock().clear();

        // Running before construction so factory sends are accepted
        {
            let mut control = self.shared.control.lock();
            control.state = RunState::Running;
            control.pace = Pace::Fast;
            control.idle_ticks = 0;
        }

        let mut live = 0;
        for (actor_ref, actor) in self.shared.graph.iter() {
            let instance = self.instantiate(actor_ref, actor);
            live += usize::from(instance.is_some());
            *self.shared.instances[actor_ref.index()].lock() = instance;
        }

        if let Some(handle) = handle {
            *self.driver.lock() = Some(handle.spawn(drive(Arc::clone(&self.shared))));
        }

        info!(
            runtime_id = %self.shared.runtime_id,
            actors = self.shared.graph.len(),
            live,
            autotick = self.shared.config.autotick,
            "Runtime started"
        );
        Ok(())
    }

    fn instantiate(&self, actor_ref: ActorRef, actor: &Actor) -> Option<Instance> {
        let Some(factory) = self.shared.graph.factory(actor_ref) else {
            if actor.behavior_key().is_some() || matches!(actor, Actor::Node(node) if !node.rx().is_empty()) {
                warn!(actor = %actor.name(), "No behavior factory; actor runs with stub handlers");
            }
            return None;
        };

        let facade = Facade::new(Arc::clone(&self.shared), actor_ref);
        let init = BehaviorInit {
            name: actor.name().to_string(),
            uid: actor.uid().to_string(),
            facade: facade.clone(),
            settings: actor.settings().clone(),
        };

        match behavior::construct(&**factory, init) {
            Ok(behavior) => {
                let bindings = match actor {
                    Actor::Node(node) => node.bind(&behavior),
                    Actor::Filter(_) => Vec::new(),
                };
                Some(Instance {
                    behavior,
                    bindings,
                    facade,
                })
            }
            Err(e) => {
                error!(
                    actor = %actor.name(),
                    error = %e,
                    "Behavior construction failed; actor runs with stub handlers"
                );
                None
            }
        }
    }

    /// Cold reset: cancel the driver, drop every behavior, empty the queues
    pub fn stop(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }

        let was = {
            let mut control = self.shared.control.lock();
            let was = control.state;
            control.state = RunState::Stopped;
            control.pace = Pace::Fast;
            control.idle_ticks = 0;
            was
        };

        // Instances hold facades; dropping them breaks the Arc cycle
        for cell in &self.shared.instances {
            cell.lock().take();
        }
        let dropped = std::mem::take(&mut *self.shared.outbound.lock()).len();
        let abandoned = self.shared.correlation.lock().clear("runtime stopped");
        self.shared.wake.notify_one();

        if was != RunState::Stopped {
            info!(
                runtime_id = %self.shared.runtime_id,
                dropped,
                abandoned,
                "Runtime stopped"
            );
        }
    }

    /// Pause ticking; queues, requests and behaviors are kept
    pub fn halt(&self) {
        let mut control = self.shared.control.lock();
        if control.state == RunState::Running {
            control.state = RunState::Halted;
            info!(runtime_id = %self.shared.runtime_id, "Runtime halted");
        } else {
            warn!(runtime_id = %self.shared.runtime_id, state = ?control.state, "Halt ignored");
        }
    }

    /// Resume ticking after [`halt`](Self::halt)
    pub fn resume(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.state != RunState::Halted {
                warn!(runtime_id = %self.shared.runtime_id, state = ?control.state, "Resume ignored");
                return;
            }
            control.state = RunState::Running;
            control.pace = Pace::Fast;
            control.idle_ticks = 0;
        }
        self.shared.wake.notify_one();
        info!(runtime_id = %self.shared.runtime_id, "Runtime resumed");
    }

    /// Run one scheduling round by hand
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    /// Tick until a round finds the outbound queue empty; returns rounds that delivered
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..max_ticks {
            match self.tick() {
                TickOutcome::Delivered { .. } => delivered += 1,
                TickOutcome::Idle { .. } | TickOutcome::Skipped => break,
            }
        }
        delivered
    }

    /// Messaging facade for injecting traffic on behalf of `actor`
    pub fn facade(&self, actor: &str) -> Option<Facade> {
        let actor_ref = self.shared.graph.find_by_name(actor)?;
        Some(Facade::new(Arc::clone(&self.shared), actor_ref))
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn pace(&self) -> Pace {
        self.shared.control.lock().pace
    }

    pub fn id(&self) -> &str {
        &self.shared.runtime_id
    }

    pub fn graph(&self) -> &Graph {
        &self.shared.graph
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Envelopes waiting for the next tick
    pub fn queued(&self) -> usize {
        self.shared.outbound.lock().len()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.correlation.lock().len()
    }

    /// Actors with a constructed behavior
    pub fn live_instances(&self) -> usize {
        self.shared
            .instances
            .iter()
            .filter(|cell| cell.lock().is_some())
            .count()
    }

    pub fn metrics(&self) -> RuntimeStats {
        self.shared.metrics.snapshot()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorRegistry;
    use crate::descriptor::{FilterDescriptor, GraphDescriptor, NodeDescriptor};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn manual(descriptor: GraphDescriptor, registry: &BehaviorRegistry) -> Runtime {
        let graph = Graph::build(&descriptor, registry).unwrap();
        Runtime::new(graph, RuntimeConfig::manual()).unwrap()
    }

    fn counting(hits: Arc<AtomicUsize>) -> BehaviorRegistry {
        BehaviorRegistry::new().with("count", move |_init: BehaviorInit| {
            let hits = Arc::clone(&hits);
            Ok(Behavior::new().on("in", move |_ctx, _payload| {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        })
    }

    #[test]
    fn test_tick_before_start_is_skipped() {
        let runtime = manual(GraphDescriptor::new(), &BehaviorRegistry::new());
        assert_eq!(runtime.tick(), TickOutcome::Skipped);
        assert_eq!(runtime.state(), RunState::Stopped);
    }

    #[test]
    fn test_messages_land_in_next_batch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = counting(Arc::clone(&hits)).with("echo", |_init: BehaviorInit| {
            Ok(Behavior::new().on("in", |ctx, payload| {
                ctx.send("out", payload.clone());
            }))
        });
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> in @ relay (2)"))
            .node(
                NodeDescriptor::new("relay", "2")
                    .behavior("echo")
                    .input("-> in")
                    .output("out -> in @ sink (3)"),
            )
            .node(NodeDescriptor::new("sink", "3").behavior("count").input("-> in"));

        let runtime = manual(descriptor, &registry);
        runtime.start().unwrap();
        assert_eq!(runtime.facade("src").unwrap().send("out", json!(1)), 1);

        assert_eq!(runtime.tick(), TickOutcome::Delivered { envelopes: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.queued(), 1);

        assert_eq!(runtime.tick(), TickOutcome::Delivered { envelopes: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.tick(), TickOutcome::Idle { expired: 0 });
    }

    #[test]
    fn test_idle_ticks_degrade_then_snap_back() {
        let hits = Arc::new(AtomicUsize::new(0));
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> in @ sink (2)"))
            .node(NodeDescriptor::new("sink", "2").behavior("count").input("-> in"));
        let graph = Graph::build(&descriptor, &counting(hits)).unwrap();
        let config = RuntimeConfig {
            idle_ticks_before_slow: 3,
            ..RuntimeConfig::manual()
        };
        let runtime = Runtime::new(graph, config).unwrap();
        runtime.start().unwrap();

        for _ in 0..2 {
            runtime.tick();
        }
        assert_eq!(runtime.pace(), Pace::Fast);
        runtime.tick();
        assert_eq!(runtime.pace(), Pace::Slow);

        runtime.facade("src").unwrap().send("out", json!(null));
        runtime.tick();
        assert_eq!(runtime.pace(), Pace::Fast);
    }

    #[test]
    fn test_halt_keeps_queue_until_resume() {
        let hits = Arc::new(AtomicUsize::new(0));
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> in @ sink (2)"))
            .node(NodeDescriptor::new("sink", "2").behavior("count").input("-> in"));
        let runtime = manual(descriptor, &counting(Arc::clone(&hits)));
        runtime.start().unwrap();

        runtime.facade("src").unwrap().send("out", json!(1));
        runtime.halt();
        assert_eq!(runtime.tick(), TickOutcome::Skipped);
        assert_eq!(runtime.queued(), 1);

        runtime.resume();
        runtime.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_panic_does_not_unwind_tick() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = counting(Arc::clone(&hits)).with("boom", |_init: BehaviorInit| {
            Ok(Behavior::new().on("in", |_ctx, _payload| panic!("handler failure")))
        });
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> [in @ bad (2), in @ good (3)]"))
            .node(NodeDescriptor::new("bad", "2").behavior("boom").input("-> in"))
            .node(NodeDescriptor::new("good", "3").behavior("count").input("-> in"));
        let runtime = manual(descriptor, &registry);
        runtime.start().unwrap();

        runtime.facade("src").unwrap().send("out", json!(1));
        runtime.tick();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.metrics().handler_panics, 1);
    }

    #[test]
    fn test_route_depth_is_bounded() {
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> loop @ spin (2)"))
            .filter(FilterDescriptor::new("spin", "2").scope("loop : [loop @ spin (2)]"));
        let graph = Graph::build(&descriptor, &BehaviorRegistry::new()).unwrap();
        let config = RuntimeConfig {
            max_route_depth: 4,
            ..RuntimeConfig::manual()
        };
        let runtime = Runtime::new(graph, config).unwrap();
        runtime.start().unwrap();

        runtime.facade("src").unwrap().send("out", json!(1));
        runtime.tick();

        let stats = runtime.metrics();
        assert_eq!(stats.envelopes_delivered, 4);
        assert_eq!(stats.envelopes_dropped, 1);
    }

    #[test]
    fn test_stop_during_tick_discards_rest_of_batch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(std::sync::Barrier::new(2));
        let gate = Arc::clone(&entered);
        let registry = counting(Arc::clone(&hits)).with("slow", move |_init: BehaviorInit| {
            let gate = Arc::clone(&gate);
            Ok(Behavior::new().on("in", move |ctx, payload| {
                gate.wait();
                std::thread::sleep(Duration::from_millis(100));
                ctx.send("out", payload.clone());
            }))
        });
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> [in @ slow (2), in @ sink (3)]"))
            .node(
                NodeDescriptor::new("slow", "2")
                    .behavior("slow")
                    .input("-> in")
                    .output("out -> in @ sink (3)"),
            )
            .node(NodeDescriptor::new("sink", "3").behavior("count").input("-> in"));
        let runtime = manual(descriptor, &registry);
        runtime.start().unwrap();
        assert_eq!(runtime.facade("src").unwrap().send("out", json!(1)), 2);

        std::thread::scope(|scope| {
            let ticker = scope.spawn(|| runtime.tick());
            entered.wait();
            runtime.stop();
            assert_eq!(ticker.join().unwrap(), TickOutcome::Delivered { envelopes: 2 });
        });

        assert_eq!(runtime.state(), RunState::Stopped);
        assert_eq!(runtime.queued(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.metrics().envelopes_delivered, 1);
    }

    #[test]
    fn test_sends_after_stop_are_refused() {
        let hits = Arc::new(AtomicUsize::new(0));
        let descriptor = GraphDescriptor::new()
            .node(NodeDescriptor::new("src", "1").output("out -> in @ sink (2)"))
            .node(NodeDescriptor::new("sink", "2").behavior("count").input("-> in"));
        let runtime = manual(descriptor, &counting(hits));
        runtime.start().unwrap();
        let facade = runtime.facade("src").unwrap();
        runtime.stop();

        assert_eq!(facade.send("out", json!(1)), 0);
        assert_eq!(facade.wireless("sink").send("in", json!(1)), 0);
        assert_eq!(runtime.queued(), 0);
        assert_eq!(runtime.pending_requests(), 0);
    }

    #[test]
    fn test_autotick_without_executor_fails() {
        let graph = Graph::build(&GraphDescriptor::new(), &BehaviorRegistry::new()).unwrap();
        let runtime = Runtime::new(graph, RuntimeConfig::default()).unwrap();
        assert!(matches!(runtime.start(), Err(RuntimeError::Executor { .. })));
        assert_eq!(runtime.state(), RunState::Stopped);
    }
}
