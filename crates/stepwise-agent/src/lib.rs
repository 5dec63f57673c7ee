pub mod agent_loop;
pub mod graph;
pub mod run_log;
pub mod session;

pub use agent_loop::{build_loop_graph, Agent, AgentState};
pub use graph::{
    Edge, FnStep, GraphBuilder, Node, NodeKind, Run, RunOptions, Snapshot, Step, StepGraph, ENTRY,
};
pub use run_log::RunLogger;
pub use session::SessionMemory;
