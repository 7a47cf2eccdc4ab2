use std::fmt::Display;

use thiserror::Error;

use crate::{graph::factor_graph::NodeId, tables::table_wrapper::TableError};

// Where a certain (single non-zero entry) input to a variable came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertaintySource {
    Prior,
    Edge(usize), // sibling position of the incoming edge
}

impl Display for CertaintySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertaintySource::Prior => write!(f, "prior"),
            CertaintySource::Edge(position) => write!(f, "edge {}", position),
        }
    }
}

/// Failures raised while initializing or running the sum-product engine.
///
/// None of these are recoverable for the current solve: re-running the same update on the
/// same inputs reproduces the same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("{node}: outgoing message on edge {edge:?} has zero total mass")]
    ZeroMass { node: NodeId, edge: Option<usize> },

    #[error(
        "variable {variable}: conflicting certain values, {first_source} asserts {first_value} \
         but {second_source} asserts {second_value}"
    )]
    ConflictingCertainty {
        variable: usize,
        first_source: CertaintySource,
        first_value: usize,
        second_source: CertaintySource,
        second_value: usize,
    },

    #[error("factor {factor}: malformed table: {source}")]
    MalformedTable {
        factor: usize,
        #[source]
        source: TableError,
    },

    #[error("factor {factor}: optimized plan deviates from table engine on edge {edge} by {deviation:e}")]
    PlanMismatch {
        factor: usize,
        edge: usize,
        deviation: f64,
    },

    #[error("{node}: invalid model: {reason}")]
    InvalidModel { node: NodeId, reason: String },

    #[error("{node}: invalid options: {reason}")]
    InvalidOptions { node: NodeId, reason: String },

    #[error("{0} does not exist")]
    NoSuchNode(NodeId),

    #[error("{node} has no edge at position {position}")]
    NoSuchEdge { node: NodeId, position: usize },
}

pub type SolverResult<T> = Result<T, SolverError>;
