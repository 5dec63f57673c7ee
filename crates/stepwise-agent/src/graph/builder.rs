use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::event::EventBus;

use super::edge::Edge;
use super::executor::StepGraph;
use super::node::{FnStep, Node, NodeKind, Step, ENTRY};

/// Default cap on step visits per run.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Mutable construction surface for a [`StepGraph`].
///
/// The entry node is registered up front. Registration and connection check
/// names eagerly; [`GraphBuilder::build`] checks the whole-graph invariants.
pub struct GraphBuilder<S> {
    nodes: HashMap<String, Node<S>>,
    /// Registration order, used for deterministic validation messages.
    order: Vec<String>,
    edges: HashMap<String, Edge<S>>,
    max_steps: usize,
    deadline: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl<S> Default for GraphBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> GraphBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let mut builder = Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            max_steps: DEFAULT_MAX_STEPS,
            deadline: None,
            event_bus: None,
        };
        builder.order.push(ENTRY.to_string());
        builder.nodes.insert(ENTRY.to_string(), Node::entry());
        builder
    }

    fn register(&mut self, node: Node<S>) -> Result<&mut Self> {
        if node.name.trim().is_empty() {
            return Err(StepwiseError::Topology("node name must not be empty".into()));
        }
        if self.nodes.contains_key(&node.name) {
            return Err(StepwiseError::Topology(format!(
                "node '{}' is already registered",
                node.name
            )));
        }
        self.order.push(node.name.clone());
        self.nodes.insert(node.name.clone(), node);
        Ok(self)
    }

    /// Register a step node.
    pub fn add_step(&mut self, name: impl Into<String>, step: impl Step<S>) -> Result<&mut Self> {
        self.register(Node::step(name, step))
    }

    /// Register a step node from an async closure.
    pub fn add_step_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<&mut Self>
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
    {
        self.register(Node::step(name, FnStep::new(f)))
    }

    /// Register a termination node.
    pub fn add_termination(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.register(Node::termination(name))
    }

    fn check_source(&self, source: &str) -> Result<()> {
        let node = self.nodes.get(source).ok_or_else(|| {
            StepwiseError::Topology(format!("edge source '{}' is not a registered node", source))
        })?;
        if node.kind.is_termination() {
            return Err(StepwiseError::Topology(format!(
                "termination node '{}' cannot have outgoing edges",
                source
            )));
        }
        if self.edges.contains_key(source) {
            return Err(StepwiseError::Topology(format!(
                "node '{}' already has an outgoing edge",
                source
            )));
        }
        Ok(())
    }

    fn check_destination(&self, source: &str, destination: &str) -> Result<()> {
        if !self.nodes.contains_key(destination) {
            return Err(StepwiseError::Topology(format!(
                "edge '{}' -> '{}' targets an unregistered node",
                source, destination
            )));
        }
        if destination == ENTRY {
            return Err(StepwiseError::Topology(format!(
                "edge '{}' -> entry: the entry node cannot have incoming edges",
                source
            )));
        }
        Ok(())
    }

    /// Connect `source` to a fixed `destination`.
    pub fn connect(&mut self, source: &str, destination: &str) -> Result<&mut Self> {
        self.check_source(source)?;
        self.check_destination(source, destination)?;
        self.edges
            .insert(source.to_string(), Edge::Static(destination.to_string()));
        Ok(self)
    }

    /// Connect `source` to whichever of `destinations` the router picks.
    pub fn connect_conditional<R, N>(
        &mut self,
        source: &str,
        destinations: &[&str],
        router: R,
    ) -> Result<&mut Self>
    where
        R: Fn(&S) -> N + Send + Sync + 'static,
        N: Into<String>,
    {
        self.check_source(source)?;
        if destinations.is_empty() {
            return Err(StepwiseError::Topology(format!(
                "conditional edge from '{}' declares no destinations",
                source
            )));
        }
        let mut candidates: Vec<String> = Vec::with_capacity(destinations.len());
        for dest in destinations {
            self.check_destination(source, dest)?;
            if !candidates.iter().any(|c| c == dest) {
                candidates.push(dest.to_string());
            }
        }
        self.edges.insert(
            source.to_string(),
            Edge::Conditional {
                candidates,
                router: Arc::new(move |state: &S| router(state).into()),
            },
        );
        Ok(self)
    }

    /// Cap on step visits per run.
    pub fn max_steps(&mut self, max_steps: usize) -> &mut Self {
        self.max_steps = max_steps;
        self
    }

    /// Wall-clock budget per run.
    pub fn deadline(&mut self, deadline: Duration) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Publish run lifecycle events on `bus`.
    pub fn event_bus(&mut self, bus: Arc<EventBus>) -> &mut Self {
        self.event_bus = Some(bus);
        self
    }

    /// Validate the topology and freeze it into an executable graph.
    pub fn build(self) -> Result<StepGraph<S>> {
        if self.max_steps == 0 {
            return Err(StepwiseError::Topology("max_steps must be at least 1".into()));
        }

        for name in &self.order {
            let node = &self.nodes[name];
            match node.kind {
                NodeKind::Termination => {}
                NodeKind::Entry | NodeKind::Step(_) => {
                    if !self.edges.contains_key(name) {
                        return Err(StepwiseError::Topology(format!(
                            "{} node '{}' has no outgoing edge",
                            node.kind.label(),
                            name
                        )));
                    }
                }
            }
        }

        let reachable = self.reachable_from_entry();
        for name in &self.order {
            if !reachable.contains(name.as_str()) && !self.nodes[name].kind.is_termination() {
                return Err(StepwiseError::Topology(format!(
                    "node '{}' is not reachable from the entry node",
                    name
                )));
            }
        }

        Ok(StepGraph::new(
            self.nodes,
            self.edges,
            self.max_steps,
            self.deadline,
            self.event_bus,
        ))
    }

    fn reachable_from_entry(&self) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(ENTRY);
        queue.push_back(ENTRY);

        while let Some(name) = queue.pop_front() {
            if let Some(edge) = self.edges.get(name) {
                for dest in edge.destinations() {
                    if seen.insert(dest.as_str()) {
                        queue.push_back(dest.as_str());
                    }
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(builder: &mut GraphBuilder<i32>, name: &str) {
        builder
            .add_step_fn(name, |x: i32| async move { Ok(x) })
            .unwrap();
    }

    fn topology_message(result: Result<StepGraph<i32>>) -> String {
        match result {
            Err(StepwiseError::Topology(msg)) => msg,
            Err(other) => panic!("expected topology error, got {other}"),
            Ok(_) => panic!("expected topology error, graph built"),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        let err = b.add_termination("s1").map(|_| ()).unwrap_err();
        assert!(matches!(err, StepwiseError::Topology(ref m) if m.contains("already registered")));
    }

    #[test]
    fn test_entry_name_reserved() {
        let mut b = GraphBuilder::<i32>::new();
        assert!(b.add_termination(ENTRY).is_err());
    }

    #[test]
    fn test_connect_unknown_nodes_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        assert!(b.connect("ghost", "s1").is_err());
        assert!(b.connect("s1", "ghost").is_err());
    }

    #[test]
    fn test_connect_into_entry_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        let err = b.connect("s1", ENTRY).map(|_| ()).unwrap_err();
        assert!(err.to_string().contains("incoming"));
    }

    #[test]
    fn test_termination_cannot_have_edges() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        b.add_termination("end").unwrap();
        assert!(b.connect("end", "s1").is_err());
    }

    #[test]
    fn test_second_outgoing_edge_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        b.add_termination("end").unwrap();
        b.connect("s1", "end").unwrap();
        assert!(b.connect_conditional("s1", &["end"], |_| "end").is_err());
    }

    #[test]
    fn test_empty_candidate_set_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        let err = b
            .connect_conditional("s1", &[], |_| "end")
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("no destinations"));
    }

    #[test]
    fn test_step_without_edge_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        b.connect(ENTRY, "s1").unwrap();
        let msg = topology_message(b.build());
        assert!(msg.contains("'s1' has no outgoing edge"));
    }

    #[test]
    fn test_entry_without_edge_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        b.add_termination("end").unwrap();
        let msg = topology_message(b.build());
        assert!(msg.contains("entry node '__entry__'"));
    }

    #[test]
    fn test_unreachable_step_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        identity(&mut b, "orphan");
        b.add_termination("end").unwrap();
        b.connect(ENTRY, "s1").unwrap();
        b.connect("s1", "end").unwrap();
        b.connect("orphan", "end").unwrap();
        let msg = topology_message(b.build());
        assert!(msg.contains("'orphan' is not reachable"));
    }

    #[test]
    fn test_unreachable_termination_allowed() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "s1");
        b.add_termination("end").unwrap();
        b.add_termination("spare").unwrap();
        b.connect(ENTRY, "s1").unwrap();
        b.connect("s1", "end").unwrap();
        assert!(b.build().is_ok());
    }

    #[test]
    fn test_conditional_targets_count_as_reachable() {
        let mut b = GraphBuilder::<i32>::new();
        identity(&mut b, "m");
        identity(&mut b, "t");
        b.add_termination("end").unwrap();
        b.connect(ENTRY, "m").unwrap();
        b.connect_conditional("m", &["t", "end"], |_| "end").unwrap();
        b.connect("t", "m").unwrap();
        let graph = b.build().unwrap();
        assert_eq!(graph.successors("m"), vec!["t", "end"]);
    }

    #[test]
    fn test_zero_max_steps_rejected() {
        let mut b = GraphBuilder::<i32>::new();
        b.add_termination("end").unwrap();
        b.connect(ENTRY, "end").unwrap();
        b.max_steps(0);
        assert!(b.build().is_err());
    }
}
