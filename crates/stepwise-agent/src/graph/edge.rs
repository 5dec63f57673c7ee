use std::fmt;
use std::sync::Arc;

use stepwise_core::error::{Result, StepwiseError};

/// A routing function that inspects state and returns a target node name.
pub type RouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// The single outgoing edge of a non-termination node.
pub enum Edge<S> {
    /// Always go to the named node.
    Static(String),
    /// Ask the router, then accept its answer only if it is a declared candidate.
    Conditional {
        candidates: Vec<String>,
        router: RouterFn<S>,
    },
}

impl<S> Clone for Edge<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(to) => Self::Static(to.clone()),
            Self::Conditional { candidates, router } => Self::Conditional {
                candidates: candidates.clone(),
                router: Arc::clone(router),
            },
        }
    }
}

impl<S> fmt::Debug for Edge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(to) => f.debug_tuple("Static").field(to).finish(),
            Self::Conditional { candidates, .. } => f
                .debug_struct("Conditional")
                .field("candidates", candidates)
                .finish_non_exhaustive(),
        }
    }
}

impl<S> Edge<S> {
    /// Every node this edge can lead to.
    pub fn destinations(&self) -> &[String] {
        match self {
            Self::Static(to) => std::slice::from_ref(to),
            Self::Conditional { candidates, .. } => candidates,
        }
    }

    /// Pick the next node for `state`, leaving `source`.
    pub fn resolve(&self, source: &str, state: &S) -> Result<String> {
        match self {
            Self::Static(to) => Ok(to.clone()),
            Self::Conditional { candidates, router } => {
                let chosen = router(state);
                if candidates.iter().any(|c| *c == chosen) {
                    Ok(chosen)
                } else {
                    Err(StepwiseError::Routing {
                        node: source.to_string(),
                        chosen,
                        candidates: candidates.clone(),
                    })
                }
            }
        }
    }
}
