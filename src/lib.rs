pub mod errors;

pub mod message {
    pub mod discrete_message;
}

pub mod tables {
    pub mod dense_table;
    pub mod sparse_table;
    pub mod support;
    pub mod table_wrapper;
}

pub mod graph {
    pub mod edge_state;
    pub mod factor_graph;
    pub mod options;
}

pub mod engines {
    pub mod factor_engine;
    pub mod kbest;
    pub mod node_engine;
    pub mod registry;
    pub mod table_factor_engine;
    pub mod variable_engine;
}

pub mod plan {
    pub mod compiler;
    pub mod costs;
    pub mod update_plan;
}

pub mod alg {
    pub mod bethe;
    pub mod schedule;
    pub mod solver;
}

pub mod io {
    pub mod uai;
}

pub use alg::{
    bethe::{bethe_free_energy, factor_weight_derivatives, BetheFreeEnergy},
    schedule::{Schedule, ScheduleEntry},
    solver::{Belief, SolveSummary, SumProductSolver},
};
pub use engines::{
    factor_engine::UpdateStrategy,
    node_engine::NodeEngine,
    registry::{EngineRegistry, FactorContext},
};
pub use errors::{SolverError, SolverResult};
pub use graph::{
    factor_graph::{FactorGraph, NodeId},
    options::{NodeOptions, ScheduleKind, SolverOptions, UpdateApproach},
};
pub use io::uai::{read_uai, read_uai_file, UaiError};
pub use tables::{
    sparse_table::SparseTable,
    table_wrapper::{TableError, TableRepresentation, TableWrapper},
};
