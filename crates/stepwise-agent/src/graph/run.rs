use chrono::{DateTime, Utc};
use serde::Serialize;

/// State captured right after a node finished.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<S> {
    pub node: String,
    pub state: S,
    pub recorded_at: DateTime<Utc>,
}

/// Frozen execution trace of one graph run.
///
/// A `Run` only exists once a termination node was reached, so every value of
/// this type is complete. Snapshots are ordered by visit: one per step visit,
/// then one for the termination node when at least one step ran.
#[derive(Debug, Clone, Serialize)]
pub struct Run<S> {
    run_id: String,
    terminal: String,
    snapshots: Vec<Snapshot<S>>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl<S> Run<S> {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Name of the termination node the run ended at.
    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    /// State of the last snapshot; `None` when no step ran.
    pub fn final_state(&self) -> Option<&S> {
        self.snapshots.last().map(|s| &s.state)
    }

    pub fn snapshots(&self) -> &[Snapshot<S>] {
        &self.snapshots
    }

    /// Node names in visit order, including the terminal snapshot.
    pub fn path(&self) -> Vec<&str> {
        self.snapshots.iter().map(|s| s.node.as_str()).collect()
    }

    /// Number of step visits (excludes the terminal snapshot).
    pub fn steps(&self) -> usize {
        self.snapshots.len().saturating_sub(1)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// Trace under construction. Never escapes the executor.
pub(crate) struct RunTrace<S> {
    run_id: String,
    snapshots: Vec<Snapshot<S>>,
    started_at: DateTime<Utc>,
}

impl<S> RunTrace<S> {
    pub(crate) fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            snapshots: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub(crate) fn record(&mut self, node: &str, state: S) {
        self.snapshots.push(Snapshot {
            node: node.to_string(),
            state,
            recorded_at: Utc::now(),
        });
    }

    /// Close the trace at `terminal`, capturing `state` if any step ran.
    pub(crate) fn freeze(mut self, terminal: &str, state: S) -> Run<S> {
        if !self.snapshots.is_empty() {
            self.record(terminal, state);
        }
        Run {
            run_id: self.run_id,
            terminal: terminal.to_string(),
            snapshots: self.snapshots,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_step_run_has_no_state() {
        let run = RunTrace::new("r0").freeze("end", 7);
        assert!(run.final_state().is_none());
        assert!(run.snapshots().is_empty());
        assert_eq!(run.steps(), 0);
        assert_eq!(run.terminal(), "end");
    }

    #[test]
    fn test_terminal_snapshot_appended() {
        let mut trace = RunTrace::new("r1");
        trace.record("a", 1);
        trace.record("b", 2);

        let run = trace.freeze("done", 2);
        assert_eq!(run.snapshots().len(), 3);
        assert_eq!(run.path(), vec!["a", "b", "done"]);
        assert_eq!(run.steps(), 2);
        assert_eq!(run.final_state(), Some(&2));
        assert_eq!(run.run_id(), "r1");
        assert!(run.finished_at() >= run.started_at());
    }

    #[test]
    fn test_run_serializes_snapshots() {
        let mut trace = RunTrace::new("r2");
        trace.record("only", "x".to_string());
        let run = trace.freeze("end", "x".to_string());
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["snapshots"][0]["node"], "only");
        assert_eq!(json["snapshots"][1]["state"], "x");
        assert_eq!(json["terminal"], "end");
    }
}
