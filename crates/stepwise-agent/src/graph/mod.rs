//! Step graph execution engine.
//!
//! A graph is a set of named nodes: one entry, any number of steps, and one or
//! more terminations. Every non-termination node has exactly one outgoing
//! edge, either static or chosen at run time by a router from a fixed set of
//! candidates.
//!
//! `GraphBuilder` validates the topology when it is built. `StepGraph::run`
//! walks it from the entry node, feeding each step the state produced by the
//! previous one, and returns a frozen `Run` once a termination is reached.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;
pub mod run;

pub use builder::{GraphBuilder, DEFAULT_MAX_STEPS};
pub use edge::{Edge, RouterFn};
pub use executor::{RunOptions, StepGraph};
pub use node::{FnStep, Node, NodeKind, Step, ENTRY};
pub use run::{Run, Snapshot};
