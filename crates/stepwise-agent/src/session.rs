use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::graph::Run;

/// In-process store of completed runs, keyed by session id.
///
/// Each session holds its runs oldest first. Runs are only ever appended;
/// `reset` is the one way to drop them.
pub struct SessionMemory<S> {
    sessions: Mutex<HashMap<String, Vec<Arc<Run<S>>>>>,
}

impl<S> SessionMemory<S> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Arc<Run<S>>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure `id` exists. Existing runs are left alone.
    pub fn create_session(&self, id: &str) {
        self.lock().entry(id.to_string()).or_default();
    }

    /// Append `run` to `id`, creating the session if needed.
    pub fn add(&self, id: &str, run: Arc<Run<S>>) {
        let mut sessions = self.lock();
        let runs = sessions.entry(id.to_string()).or_default();
        runs.push(run);
        debug!(session_id = %id, runs = runs.len(), "Run recorded");
    }

    /// Most recent run, if any.
    pub fn last(&self, id: &str) -> Option<Arc<Run<S>>> {
        self.lock().get(id).and_then(|runs| runs.last().cloned())
    }

    /// Every run of `id`, oldest first. Unknown sessions yield an empty list.
    pub fn all(&self, id: &str) -> Vec<Arc<Run<S>>> {
        self.lock().get(id).cloned().unwrap_or_default()
    }

    /// Drop every run of `id`. The session stays registered.
    pub fn reset(&self, id: &str) {
        let mut sessions = self.lock();
        let runs = sessions.entry(id.to_string()).or_default();
        let dropped = runs.len();
        runs.clear();
        debug!(session_id = %id, dropped, "Session reset");
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Known session ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<S> Default for SessionMemory<S> {
    fn default() -> Self {
        Self::new()
    }
}
