use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::event::EventBus;
use stepwise_core::types::GraphEvent;

use super::edge::Edge;
use super::node::{Node, NodeKind, ENTRY};
use super::run::{Run, RunTrace};

/// Per-invocation overrides for [`StepGraph::run_with`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the graph's step-visit cap.
    pub max_steps: Option<usize>,
    /// Overrides the graph's wall-clock budget.
    pub deadline: Option<Duration>,
    /// Cooperative cancellation, checked between and during steps.
    pub cancel: Option<CancellationToken>,
    /// Label carried on the run's `RunStarted` event.
    pub tag: Option<String>,
}

impl RunOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// A validated, immutable step graph.
///
/// Execution starts at the entry node and follows one edge per transition
/// until a termination node is reached. Each step receives the state produced
/// by the previous one. The graph holds no per-run data, so one instance can
/// serve concurrent runs.
pub struct StepGraph<S> {
    nodes: HashMap<String, Node<S>>,
    edges: HashMap<String, Edge<S>>,
    max_steps: usize,
    deadline: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl<S> StepGraph<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        nodes: HashMap<String, Node<S>>,
        edges: HashMap<String, Edge<S>>,
        max_steps: usize,
        deadline: Option<Duration>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            nodes,
            edges,
            max_steps,
            deadline,
            event_bus,
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Names of every registered node, sorted.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names of the termination nodes, sorted.
    pub fn terminations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .nodes
            .values()
            .filter(|n| n.kind.is_termination())
            .map(|n| n.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Possible next nodes after `name`, in declaration order.
    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|e| e.destinations().iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Execute from the entry node with the graph's own limits.
    pub async fn run(&self, initial: S) -> Result<Run<S>> {
        self.run_with(initial, RunOptions::default()).await
    }

    /// Execute from the entry node.
    ///
    /// Returns a complete [`Run`] or an error; a partial trace is never
    /// returned.
    pub async fn run_with(&self, initial: S, options: RunOptions) -> Result<Run<S>> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        self.publish(GraphEvent::RunStarted {
            run_id: run_id.clone(),
            tag: options.tag.clone(),
        });

        let result = self.drive(&run_id, initial, &options, start).await;

        match &result {
            Ok(run) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    terminal = %run.terminal(),
                    steps = run.steps(),
                    elapsed_ms,
                    "Run completed"
                );
                self.publish(GraphEvent::RunCompleted {
                    run_id,
                    terminal: run.terminal().to_string(),
                    steps: run.steps(),
                    elapsed_ms,
                });
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Run failed");
                self.publish(GraphEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn drive(
        &self,
        run_id: &str,
        initial: S,
        options: &RunOptions,
        start: Instant,
    ) -> Result<Run<S>> {
        let max_steps = options.max_steps.unwrap_or(self.max_steps);
        let budget = options.deadline.or(self.deadline);
        let deadline = budget.map(|d| tokio::time::Instant::from_std(start + d));
        let cancel = options.cancel.clone().unwrap_or_default();

        let mut trace = RunTrace::new(run_id);
        let mut state = initial;
        let mut current = ENTRY.to_string();
        let mut visits = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(StepwiseError::Cancelled);
            }
            if let (Some(deadline), Some(budget)) = (deadline, budget) {
                if tokio::time::Instant::now() >= deadline {
                    return Err(StepwiseError::DeadlineExceeded(budget.as_millis() as u64));
                }
            }

            let node = self.nodes.get(&current).ok_or_else(|| {
                StepwiseError::Topology(format!("node '{}' not found in graph", current))
            })?;

            match &node.kind {
                NodeKind::Termination => {
                    debug!(run_id, terminal = %current, "Reached termination");
                    return Ok(trace.freeze(&current, state));
                }
                NodeKind::Entry => {}
                NodeKind::Step(step) => {
                    visits += 1;
                    if visits > max_steps {
                        warn!(run_id, node = %current, max_steps, "Step limit exceeded");
                        return Err(StepwiseError::ExecutionLimitExceeded(max_steps));
                    }

                    debug!(run_id, node = %current, visit = visits, "Executing step");
                    let step_start = Instant::now();
                    let fut = step.run(state);
                    let outcome = match deadline {
                        Some(at) => tokio::select! {
                            _ = cancel.cancelled() => Err(StepwiseError::Cancelled),
                            r = tokio::time::timeout_at(at, fut) => match r {
                                Ok(inner) => inner,
                                Err(_) => Err(StepwiseError::DeadlineExceeded(
                                    budget.map(|b| b.as_millis() as u64).unwrap_or_default(),
                                )),
                            },
                        },
                        None => tokio::select! {
                            _ = cancel.cancelled() => Err(StepwiseError::Cancelled),
                            r = fut => r,
                        },
                    };
                    state = outcome.map_err(|e| e.in_step(&current))?;

                    let elapsed_ms = step_start.elapsed().as_millis() as u64;
                    trace.record(&current, state.clone());
                    self.publish(GraphEvent::StepCompleted {
                        run_id: run_id.to_string(),
                        node: current.clone(),
                        visit: visits,
                        elapsed_ms,
                    });
                }
            }

            let edge = self.edges.get(&current).ok_or_else(|| {
                StepwiseError::Topology(format!("node '{}' has no outgoing edge", current))
            })?;
            current = edge.resolve(&current, &state)?;
        }
    }

    fn publish(&self, event: GraphEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
