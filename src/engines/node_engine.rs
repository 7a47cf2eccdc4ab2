use crate::{errors::SolverResult, graph::edge_state::EdgeState, graph::factor_graph::NodeId};

/// Computes the outgoing messages of one node.
///
/// Engines read incoming messages from the shared edge arena and write only their own outgoing
/// side of each sibling edge. Edge positions are indices into the node's sibling list.
pub trait NodeEngine: Send {
    type Belief;

    fn node(&self) -> NodeId;
    fn siblings(&self) -> &[usize];

    // Recomputes every outgoing message
    fn update(&mut self, edges: &mut [EdgeState]) -> SolverResult<()>;

    // Recomputes the outgoing message at sibling `position`
    fn update_edge(&mut self, position: usize, edges: &mut [EdgeState]) -> SolverResult<()>;

    fn belief(&self, edges: &[EdgeState]) -> SolverResult<Self::Belief>;
}
