//! Graph Actor Runtime
//!
//! Tick-driven runtime for compiled graphs of message-passing actors. A graph is
//! described once (nodes with input/output pins, filters with routing scopes),
//! wired into direct targets, and then driven in logical rounds: every tick
//! delivers a fixed batch and anything sent while delivering waits for the next.
//!
//! # Architecture
//!
//! ```text
//! GraphDescriptor ──► Graph::build ──► Graph ──► Runtime::new ──► start()
//!  (JSON / TOML)       (two-pass        │
//!                       wiring)         ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Runtime                                                      │
//! │                                                              │
//! │  outbound ──tick──► batch ──┬─ Handler ─► Behavior handler   │
//! │     ▲                       ├─ Router ──► selector ─► fan-out│
//! │     │                       └─ Reply ───► CorrelationTable   │
//! │     │                                         │              │
//! │  Facade::send / request / reply               ▼              │
//! │                                         Reply (slot group)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use graph_actors::{
//!     Behavior, BehaviorInit, BehaviorRegistry, Graph, GraphDescriptor, NodeDescriptor,
//!     Runtime, RuntimeConfig,
//! };
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn demo() -> graph_actors::Result<()> {
//! let registry = BehaviorRegistry::new().with("answer", |_init: BehaviorInit| {
//!     Ok(Behavior::new().on("ping", |ctx, _payload| {
//!         ctx.reply(json!(42));
//!     }))
//! });
//!
//! let descriptor = GraphDescriptor::new()
//!     .node(NodeDescriptor::new("X", "1").output("ping => ping @ Y (2)"))
//!     .node(NodeDescriptor::new("Y", "2").behavior("answer").input("=> ping"));
//!
//! let runtime = Runtime::new(Graph::build(&descriptor, &registry)?, RuntimeConfig::default())?;
//! runtime.start()?;
//!
//! let x = runtime.facade("X").expect("declared above");
//! let answer = x.request("ping", json!({"n": 1}), Duration::from_millis(50)).first().await?;
//! assert_eq!(answer, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod behavior;
pub mod config;
pub mod correlation;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod graph;
pub mod metrics;
pub mod node;
pub mod runtime;
pub mod wiring;

pub use address::{ActorRef, PortKind, PortTag};
pub use behavior::{
    canonical_handler_name, Behavior, BehaviorFactory, BehaviorInit, BehaviorRegistry, Handler,
    Selection, Selector,
};
pub use config::RuntimeConfig;
pub use correlation::{CorrelationTable, Reply, ReplyResult};
pub use descriptor::{DebugFlags, FilterDescriptor, GraphDescriptor, NodeDescriptor};
pub use envelope::{Envelope, Payload};
pub use error::{Result, RuntimeError};
pub use filter::{Filter, Scope};
pub use graph::{Actor, Graph};
pub use metrics::{RuntimeMetrics, RuntimeStats};
pub use node::{Context, Facade, Node, RxPin, Target, TxPin, Wireless};
pub use runtime::{Pace, RunState, Runtime, TickOutcome};
pub use wiring::{WiringIssue, WiringReport};
