//! Errors from runner setup.

use btcsim_types::NodeIndex;
use thiserror::Error;

/// Errors returned by runner methods that take node indices from callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("Unknown node {node} in a population of {population}")]
    UnknownNode { node: NodeIndex, population: usize },

    #[error("Node {0} cannot link to itself")]
    SelfLink(NodeIndex),

    /// One of the endpoints has no free slot, or the pair is already linked.
    #[error("Link {from} -> {to} refused")]
    LinkRefused { from: NodeIndex, to: NodeIndex },
}
