use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use stepwise_core::error::Result;

/// Name of the single entry node every graph starts from.
pub const ENTRY: &str = "__entry__";

/// A state transform. Receives the current state by value and returns the
/// full replacement state; fields it does not mean to change must be carried
/// over untouched.
pub trait Step<S>: Send + Sync + 'static {
    fn run(&self, state: S) -> BoxFuture<'_, Result<S>>;
}

/// Adapts an async closure into a [`Step`].
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<S, F, Fut> Step<S> for FnStep<F>
where
    S: Send + 'static,
    F: Fn(S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
{
    fn run(&self, state: S) -> BoxFuture<'_, Result<S>> {
        Box::pin((self.f)(state))
    }
}

/// What a registered node does when the engine reaches it.
pub enum NodeKind<S> {
    Entry,
    Step(Arc<dyn Step<S>>),
    Termination,
}

impl<S> Clone for NodeKind<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Entry => Self::Entry,
            Self::Step(step) => Self::Step(Arc::clone(step)),
            Self::Termination => Self::Termination,
        }
    }
}

impl<S> fmt::Debug for NodeKind<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl<S> NodeKind<S> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Step(_) => "step",
            Self::Termination => "termination",
        }
    }

    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Termination)
    }
}

/// A named node in the step graph.
#[derive(Debug, Clone)]
pub struct Node<S> {
    pub name: String,
    pub kind: NodeKind<S>,
}

impl<S> Node<S> {
    pub fn entry() -> Self {
        Self {
            name: ENTRY.to_string(),
            kind: NodeKind::Entry,
        }
    }

    pub fn step(name: impl Into<String>, step: impl Step<S>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Step(Arc::new(step)),
        }
    }

    pub fn termination(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_step_runs_closure() {
        let step = FnStep::new(|x: i32| async move { Ok(x + 1) });
        assert_eq!(step.run(41).await.unwrap(), 42);
    }

    #[test]
    fn test_node_constructors() {
        let entry: Node<i32> = Node::entry();
        assert_eq!(entry.name, ENTRY);
        assert_eq!(entry.kind.label(), "entry");

        let step = Node::step("inc", FnStep::new(|x: i32| async move { Ok(x) }));
        assert_eq!(step.kind.label(), "step");
        assert!(!step.kind.is_termination());

        let end: Node<i32> = Node::termination("end");
        assert!(end.kind.is_termination());
        assert_eq!(format!("{:?}", end.kind), "termination");
    }
}
