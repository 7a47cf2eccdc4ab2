use std::time::Duration;

use crate::{
    errors::{SolverError, SolverResult},
    graph::factor_graph::NodeId,
};

// How a factor's update-all is carried out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateApproach {
    Normal,    // always scan the table
    Optimized, // always replay the cheapest compiled plan
    Automatic, // whichever the cost model estimates to be cheaper
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleKind {
    Flooding,
    TreeOrFlooding,
}

/// Graph-wide solver settings.
///
/// Damping, the update approach, the sparse threshold and the maximum message size can be
/// overridden per node with [`NodeOptions`]; everything else applies to the whole solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOptions {
    damping: f64,
    update_approach: UpdateApproach,
    sparse_threshold: f64,
    execution_time_scaling: f64,
    memory_scaling: f64,
    max_message_size: Option<usize>,
    verify_optimized_plans: bool,
    schedule: ScheduleKind,
    max_iterations: usize,
    time_max: Duration,
    tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            damping: 0.,
            update_approach: UpdateApproach::Automatic,
            sparse_threshold: 1.,
            execution_time_scaling: 1.,
            memory_scaling: 1.,
            max_message_size: None,
            verify_optimized_plans: false,
            schedule: ScheduleKind::TreeOrFlooding,
            max_iterations: 100,
            time_max: Duration::new(20 * 60, 0), // 20 minutes
            tolerance: 1e-9,
        }
    }
}

impl SolverOptions {
    pub fn set_damping(&mut self, value: f64) -> &mut Self {
        self.damping = value;
        self
    }

    pub fn set_update_approach(&mut self, value: UpdateApproach) -> &mut Self {
        self.update_approach = value;
        self
    }

    pub fn set_sparse_threshold(&mut self, value: f64) -> &mut Self {
        self.sparse_threshold = value;
        self
    }

    pub fn set_execution_time_scaling(&mut self, value: f64) -> &mut Self {
        self.execution_time_scaling = value;
        self
    }

    pub fn set_memory_scaling(&mut self, value: f64) -> &mut Self {
        self.memory_scaling = value;
        self
    }

    pub fn set_max_message_size(&mut self, value: Option<usize>) -> &mut Self {
        self.max_message_size = value;
        self
    }

    pub fn set_verify_optimized_plans(&mut self, value: bool) -> &mut Self {
        self.verify_optimized_plans = value;
        self
    }

    pub fn set_schedule(&mut self, value: ScheduleKind) -> &mut Self {
        self.schedule = value;
        self
    }

    pub fn set_max_iterations(&mut self, value: usize) -> &mut Self {
        self.max_iterations = value;
        self
    }

    pub fn set_time_max(&mut self, value: Duration) -> &mut Self {
        self.time_max = value;
        self
    }

    pub fn set_tolerance(&mut self, value: f64) -> &mut Self {
        self.tolerance = value;
        self
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn update_approach(&self) -> UpdateApproach {
        self.update_approach
    }

    pub fn sparse_threshold(&self) -> f64 {
        self.sparse_threshold
    }

    pub fn execution_time_scaling(&self) -> f64 {
        self.execution_time_scaling
    }

    pub fn memory_scaling(&self) -> f64 {
        self.memory_scaling
    }

    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    pub fn verify_optimized_plans(&self) -> bool {
        self.verify_optimized_plans
    }

    pub fn schedule(&self) -> ScheduleKind {
        self.schedule
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn time_max(&self) -> Duration {
        self.time_max
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }
}

// Per-node overrides; unset fields fall back to the graph-wide value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeOptions {
    damping: Option<f64>,
    edge_damping: Option<Vec<f64>>, // one value per sibling, wins over `damping`
    update_approach: Option<UpdateApproach>,
    sparse_threshold: Option<f64>,
    max_message_size: Option<usize>,
}

impl NodeOptions {
    pub fn set_damping(&mut self, value: f64) -> &mut Self {
        self.damping = Some(value);
        self
    }

    pub fn set_edge_damping(&mut self, values: Vec<f64>) -> &mut Self {
        self.edge_damping = Some(values);
        self
    }

    pub fn set_update_approach(&mut self, value: UpdateApproach) -> &mut Self {
        self.update_approach = Some(value);
        self
    }

    pub fn set_sparse_threshold(&mut self, value: f64) -> &mut Self {
        self.sparse_threshold = Some(value);
        self
    }

    pub fn set_max_message_size(&mut self, value: usize) -> &mut Self {
        self.max_message_size = Some(value);
        self
    }

    pub fn damping(&self) -> Option<f64> {
        self.damping
    }

    pub fn edge_damping(&self) -> Option<&[f64]> {
        self.edge_damping.as_deref()
    }

    pub fn update_approach(&self) -> Option<UpdateApproach> {
        self.update_approach
    }

    pub fn sparse_threshold(&self) -> Option<f64> {
        self.sparse_threshold
    }

    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }
}

/// Settings in effect for one node, fixed when its engine is built.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedOptions {
    pub damping: Vec<f64>, // by sibling position
    pub update_approach: UpdateApproach,
    pub sparse_threshold: f64,
    pub execution_time_scaling: f64,
    pub memory_scaling: f64,
    pub max_message_size: Option<usize>,
    pub verify_optimized_plans: bool,
}

impl ResolvedOptions {
    // Resolves the options of a node with `degree` siblings: per-edge > per-node > graph-wide
    pub fn resolve(
        node: NodeId,
        degree: usize,
        global: &SolverOptions,
        local: Option<&NodeOptions>,
    ) -> SolverResult<Self> {
        let invalid = |reason: String| SolverError::InvalidOptions { node, reason };

        let scalar_damping = local.and_then(NodeOptions::damping).unwrap_or(global.damping);
        let damping = match local.and_then(NodeOptions::edge_damping) {
            Some(values) if values.len() != degree => {
                return Err(invalid(format!(
                    "{} per-edge damping values for {} edges",
                    values.len(),
                    degree
                )))
            }
            Some(values) => values.to_vec(),
            None => vec![scalar_damping; degree],
        };
        if let Some(value) = damping.iter().find(|value| !(0. ..=1.).contains(*value)) {
            return Err(invalid(format!("damping {} is outside [0, 1]", value)));
        }

        let sparse_threshold = local
            .and_then(NodeOptions::sparse_threshold)
            .unwrap_or(global.sparse_threshold);
        if !(0. ..=1.).contains(&sparse_threshold) {
            return Err(invalid(format!(
                "sparse threshold {} is outside [0, 1]",
                sparse_threshold
            )));
        }

        let max_message_size = local
            .and_then(NodeOptions::max_message_size)
            .or(global.max_message_size);
        if max_message_size == Some(0) {
            return Err(invalid("maximum message size must be positive".to_string()));
        }

        for (name, value) in [
            ("execution time", global.execution_time_scaling),
            ("memory", global.memory_scaling),
        ] {
            if !(value.is_finite() && value >= 0.) {
                return Err(invalid(format!("{} scaling {} is invalid", name, value)));
            }
        }

        Ok(ResolvedOptions {
            damping,
            update_approach: local
                .and_then(NodeOptions::update_approach)
                .unwrap_or(global.update_approach),
            sparse_threshold,
            execution_time_scaling: global.execution_time_scaling,
            memory_scaling: global.memory_scaling,
            max_message_size,
            verify_optimized_plans: global.verify_optimized_plans,
        })
    }
}
