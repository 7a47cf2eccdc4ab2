use std::collections::HashMap;

use log::{debug, info};

use crate::{
    graph::options::{ResolvedOptions, UpdateApproach},
    plan::{
        costs::Costs,
        update_plan::{AuxTable, Kernel, PlanStep, UpdatePlan},
    },
    tables::{
        support::Support,
        table_wrapper::{TableRepresentation, TableWrapper},
    },
};

// Builds update plans for one factor table. Supports of the auxiliary tables depend only on
// which dimensions remain, so they are computed once and shared between candidate plans.
pub struct PlanCompiler<'a> {
    table: &'a TableWrapper,
    domain_sizes: Vec<usize>,
    sparse_threshold: f64,
    factor_representation: TableRepresentation,
    supports: HashMap<Vec<usize>, Support>,
}

// Plan under construction for one dimension order
struct PlanSkeleton {
    tables: Vec<AuxTable>,
    steps: Vec<PlanStep>,
    costs: Costs,
}

impl<'a> PlanCompiler<'a> {
    pub fn new(table: &'a TableWrapper, sparse_threshold: f64, density_hint: Option<f64>) -> Self {
        let domain_sizes = table.dims().to_vec();
        let factor_density = density_hint.unwrap_or_else(|| table.density());
        let factor_representation = representation_for(factor_density, sparse_threshold);

        let mut supports = HashMap::new();
        supports.insert((0..domain_sizes.len()).collect(), Support::of_table(table));

        PlanCompiler {
            table,
            domain_sizes,
            sparse_threshold,
            factor_representation,
            supports,
        }
    }

    pub fn factor_representation(&self) -> TableRepresentation {
        self.factor_representation
    }

    pub fn naive_costs(&self) -> Costs {
        Costs::naive(self.table.nnz(), &self.domain_sizes)
    }

    // Dimension orders tried by the optimizer: neighbor order, domain size descending and
    // domain size ascending (stable, so equal sizes keep neighbor order), without repeats
    pub fn candidate_orders(&self) -> Vec<Vec<usize>> {
        let identity: Vec<usize> = (0..self.domain_sizes.len()).collect();
        let mut descending = identity.clone();
        descending.sort_by(|a, b| self.domain_sizes[*b].cmp(&self.domain_sizes[*a]));
        let mut ascending = identity.clone();
        ascending.sort_by_key(|dim| self.domain_sizes[*dim]);

        let mut orders = vec![identity];
        for order in [descending, ascending] {
            if !orders.contains(&order) {
                orders.push(order);
            }
        }
        orders
    }

    // Estimates the cost of the plan for `order` without allocating its buffers
    pub fn estimate(&mut self, order: &[usize]) -> Costs {
        self.skeleton(order).costs
    }

    pub fn build(&mut self, order: &[usize]) -> UpdatePlan {
        let skeleton = self.skeleton(order);
        let factor_values = match self.factor_representation {
            TableRepresentation::Sparse => self
                .table
                .support_entries()
                .into_iter()
                .map(|(_, weight)| weight)
                .collect(),
            TableRepresentation::Dense => self.table.to_dense().values().to_vec(),
        };
        UpdatePlan::new(
            skeleton.tables,
            skeleton.steps,
            factor_values,
            &self.domain_sizes,
        )
    }

    // Returns the cheapest candidate order and its weighted cost (the first one wins ties)
    pub fn best_order(&mut self, options: &ResolvedOptions) -> (Vec<usize>, Costs) {
        let mut best: Option<(Vec<usize>, Costs, f64)> = None;
        for order in self.candidate_orders() {
            let costs = self.estimate(&order);
            let weighted = costs.weighted(options.execution_time_scaling, options.memory_scaling);
            debug!(
                "Candidate order {:?}: time {:.1}, memory {:.1}, weighted {:.1}",
                order,
                costs.execution_time(),
                costs.memory(),
                weighted
            );
            if best.as_ref().map_or(true, |(_, _, cost)| weighted < *cost) {
                best = Some((order, costs, weighted));
            }
        }
        match best {
            Some((order, costs, _)) => (order, costs),
            // there is always at least the neighbor order
            None => (Vec::new(), Costs::default()),
        }
    }

    fn skeleton(&mut self, order: &[usize]) -> PlanSkeleton {
        let all_dims: Vec<usize> = (0..self.domain_sizes.len()).collect();
        let len = match self.factor_representation {
            TableRepresentation::Sparse => self.support(&all_dims).len(),
            TableRepresentation::Dense => self.table.dense_size(),
        };
        let mut skeleton = PlanSkeleton {
            tables: vec![AuxTable {
                dims: all_dims,
                representation: self.factor_representation,
                len,
            }],
            steps: Vec::new(),
            costs: Costs::default(),
        };
        self.decompose(&mut skeleton, 0, order);
        skeleton
    }

    // Emits the steps that turn the table in `slot`, whose dimensions are exactly `group`, into
    // the messages to every edge in `group`
    fn decompose(&mut self, skeleton: &mut PlanSkeleton, slot: usize, group: &[usize]) {
        if let [edge] = group {
            let table = &skeleton.tables[slot];
            let scatter = match table.representation {
                TableRepresentation::Dense => None,
                TableRepresentation::Sparse => {
                    Some(self.support(&table.dims).joint_indices().to_vec())
                }
            };
            skeleton
                .costs
                .add_output(self.domain_sizes[*edge]);
            skeleton
                .costs
                .add_memory(scatter.as_ref().map_or(0, Vec::len));
            skeleton.steps.push(PlanStep::Output {
                source: slot,
                edge: *edge,
                scatter,
            });
            return;
        }

        let (left, right) = group.split_at(group.len() / 2);
        let folded = self.fold(skeleton, slot, right);
        self.decompose(skeleton, folded, left);
        let folded = self.fold(skeleton, slot, left);
        self.decompose(skeleton, folded, right);
    }

    // Sums every dimension of `dims` out of the table in `slot`, largest domain first
    fn fold(&mut self, skeleton: &mut PlanSkeleton, slot: usize, dims: &[usize]) -> usize {
        let mut dims = dims.to_vec();
        dims.sort_by(|a, b| {
            self.domain_sizes[*b]
                .cmp(&self.domain_sizes[*a])
                .then(a.cmp(b))
        });
        dims.into_iter()
            .fold(slot, |current, dim| self.marginalize(skeleton, current, dim))
    }

    // Adds the step summing factor dimension `dim` out of `source` and returns the new slot
    fn marginalize(&mut self, skeleton: &mut PlanSkeleton, source: usize, dim: usize) -> usize {
        let source_table = skeleton.tables[source].clone();
        let position = source_table
            .dims
            .iter()
            .position(|d| *d == dim)
            .unwrap_or_default();
        let mut destination_dims = source_table.dims.clone();
        destination_dims.remove(position);

        if !self.supports.contains_key(&destination_dims) {
            let projected = self.support(&source_table.dims).project(position);
            self.supports.insert(destination_dims.clone(), projected);
        }
        let source_support = self.support(&source_table.dims);
        let destination_support = self.support(&destination_dims);
        let destination_representation =
            representation_for(destination_support.density(), self.sparse_threshold);

        let kernel = match (source_table.representation, destination_representation) {
            (TableRepresentation::Dense, TableRepresentation::Dense) => {
                let dims = source_support.dims();
                let kernel = Kernel::Strided {
                    outer: dims[..position].iter().product(),
                    dim_size: dims[position],
                    stride: dims[position + 1..].iter().product(),
                };
                skeleton
                    .costs
                    .add_dense_marginalization(source_support.dense_size());
                kernel
            }
            (source_representation, _) => {
                let joints = source_support.joint_indices();
                let source_positions = match source_representation {
                    TableRepresentation::Sparse => None,
                    TableRepresentation::Dense => Some(joints.to_vec()),
                };
                let mut destination_positions = Vec::with_capacity(joints.len());
                let mut message_indices = Vec::with_capacity(joints.len());
                for joint in joints.iter() {
                    let projected = source_support.project_index(*joint, position);
                    let destination_position = match destination_representation {
                        TableRepresentation::Dense => Some(projected),
                        TableRepresentation::Sparse => destination_support.position_of(projected),
                    };
                    // projections of the source support always lie in the destination support
                    if let Some(destination_position) = destination_position {
                        destination_positions.push(destination_position);
                        message_indices.push(source_support.index_along(*joint, position));
                    }
                }
                let kernel = Kernel::Mapped {
                    source_positions,
                    destination_positions,
                    message_indices,
                };
                skeleton.costs.add_sparse_marginalization(joints.len());
                skeleton.costs.add_memory(kernel.mapping_size());
                kernel
            }
        };

        let len = match destination_representation {
            TableRepresentation::Sparse => destination_support.len(),
            TableRepresentation::Dense => destination_support.dense_size(),
        };
        skeleton.costs.add_memory(len);
        skeleton.tables.push(AuxTable {
            dims: destination_dims,
            representation: destination_representation,
            len,
        });
        let destination = skeleton.tables.len() - 1;
        skeleton.steps.push(PlanStep::Marginalization {
            source,
            destination,
            dim,
            source_representation: source_table.representation,
            destination_representation,
            kernel,
        });
        destination
    }

    // Supports are inserted before they are looked up
    fn support(&self, dims: &[usize]) -> &Support {
        &self.supports[dims]
    }
}

fn representation_for(density: f64, sparse_threshold: f64) -> TableRepresentation {
    if density < sparse_threshold {
        TableRepresentation::Sparse
    } else {
        TableRepresentation::Dense
    }
}

/// Chooses how a factor runs its update-all.
///
/// Returns the cheapest compiled plan, or None when the factor should keep scanning its table
/// (the update approach is `Normal`, or `Automatic` found the scan cheaper).
pub fn optimize(
    factor: usize,
    table: &TableWrapper,
    density_hint: Option<f64>,
    options: &ResolvedOptions,
) -> Option<UpdatePlan> {
    if options.update_approach == UpdateApproach::Normal {
        return None;
    }

    let mut compiler = PlanCompiler::new(table, options.sparse_threshold, density_hint);
    let (order, costs) = compiler.best_order(options);
    let naive = compiler.naive_costs();
    let plan_cost = costs.weighted(options.execution_time_scaling, options.memory_scaling);
    let naive_cost = naive.weighted(options.execution_time_scaling, options.memory_scaling);

    if options.update_approach == UpdateApproach::Automatic && naive_cost <= plan_cost {
        info!(
            "Factor {}: keeping table scan (cost {:.1}, best plan {:.1})",
            factor, naive_cost, plan_cost
        );
        return None;
    }

    let plan = compiler.build(&order);
    info!(
        "Factor {}: compiled plan for order {:?} with {} steps and {} auxiliary tables \
         (cost {:.1}, table scan {:.1})",
        factor,
        order,
        plan.steps().len(),
        plan.aux_table_count(),
        plan_cost,
        naive_cost
    );
    Some(plan)
}
