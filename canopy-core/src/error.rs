//! Error types shared by the reactive runtime and the reconciler.

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error produced by user code (component render functions,
/// fallible observers, host backends).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A computation read itself, directly or through other derived values.
    #[error("dependency cycle detected: {}", format_chain(.chain))]
    Cycle { chain: Vec<NodeId> },

    /// A derived value was read after disposal and never produced a value.
    #[error("node {id} was disposed before it produced a value")]
    Disposed { id: NodeId },

    /// Two siblings in a keyed child list share a key.
    #[error("duplicate key `{key}` among siblings")]
    DuplicateKey { key: String },

    #[error("host adapter failed: {0}")]
    Host(#[from] HostError),

    /// A component render function or observer body returned an error.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] BoxError),

    /// Observers kept re-triggering each other.
    #[error("observers did not settle after {limit} flush passes")]
    FlushLimit { limit: usize },
}

/// Failures reported by a [`HostAdapter`](crate::render::HostAdapter).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host node `{0}` does not exist")]
    MissingNode(String),

    #[error(transparent)]
    Backend(BoxError),
}

fn format_chain(chain: &[NodeId]) -> String {
    chain
        .iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl Error {
    /// Wraps any user error as an evaluation failure.
    pub fn evaluation(err: impl Into<BoxError>) -> Self {
        Self::Evaluation(err.into())
    }
}
