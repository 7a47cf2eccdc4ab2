use log::debug;
use ndarray::ArrayD;

use crate::{
    engines::{
        kbest::KBestMarginalizer,
        node_engine::NodeEngine,
        registry::{EngineRegistry, FactorContext},
        table_factor_engine::{FactorMarginalizer, TableMarginalizer},
    },
    errors::{SolverError, SolverResult},
    graph::{
        edge_state::EdgeState,
        factor_graph::{FactorGraph, NodeId},
        options::ResolvedOptions,
    },
    message::discrete_message::normalize,
    plan::update_plan::UpdatePlan,
    tables::sparse_table::SparseTable,
};

// Largest relative deviation tolerated between a plan's output and the table scan
const PLAN_TOLERANCE: f64 = 1e-9;

// How a factor computes its update-all
pub enum UpdateStrategy {
    Naive,
    Optimized(UpdatePlan),
    KBest(KBestMarginalizer),
}

// Sum-product update of a table factor. Single-edge updates of exact strategies always scan the
// table; compiled plans only run the update-all.
pub struct FactorEngine {
    factor: usize,
    siblings: Vec<usize>,
    damping: Vec<f64>,
    verify: bool,
    engine_name: String,
    naive: TableMarginalizer,
    strategy: UpdateStrategy,
    normalized: Vec<Vec<f64>>,
    energies: Vec<f64>,
}

impl FactorEngine {
    pub fn new(
        graph: &FactorGraph,
        factor: usize,
        options: &ResolvedOptions,
        registry: &EngineRegistry,
    ) -> SolverResult<Self> {
        graph.validate_factor(factor)?;
        let node = graph.factor(factor)?;
        let domain_sizes = graph.domain_sizes(factor)?;
        let entries = node.table().to_sparse();

        let context = FactorContext {
            factor,
            table: node.table(),
            entries: &entries,
            domain_sizes: &domain_sizes,
            density_hint: node.density_hint(),
            options,
        };
        let (engine_name, strategy) = registry.resolve(&context)?;
        debug!(
            "Factor {}: {} engine over {} non-zero entries",
            factor,
            engine_name,
            entries.len()
        );

        Ok(FactorEngine {
            factor,
            siblings: node.siblings().to_vec(),
            damping: options.damping.clone(),
            verify: options.verify_optimized_plans,
            engine_name,
            naive: TableMarginalizer::new(&entries),
            strategy,
            normalized: domain_sizes.iter().map(|size| vec![0.; *size]).collect(),
            energies: vec![0.; domain_sizes.len()],
        })
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn strategy(&self) -> &UpdateStrategy {
        &self.strategy
    }

    pub fn has_plan(&self) -> bool {
        matches!(self.strategy, UpdateStrategy::Optimized(_))
    }

    // Non-zero entries of the factor table, aligned with the factor belief
    pub fn entries(&self) -> &SparseTable {
        self.naive.table()
    }

    pub fn belief_array(&self, edges: &[EdgeState]) -> SolverResult<ArrayD<f64>> {
        Ok(self.belief(edges)?.to_dense().to_array())
    }

    fn incoming<'a>(&self, edges: &'a [EdgeState]) -> Vec<&'a [f64]> {
        self.siblings
            .iter()
            .map(|edge| edges[*edge].variable_to_factor().as_slice())
            .collect()
    }

    // Normalizes a computed message into the scratch buffer of its edge
    fn stage(&mut self, position: usize, computed: &[f64]) -> SolverResult<()> {
        let staged = &mut self.normalized[position];
        staged.copy_from_slice(computed);
        self.energies[position] = normalize(staged).ok_or(SolverError::ZeroMass {
            node: NodeId::Factor(self.factor),
            edge: Some(position),
        })?;
        Ok(())
    }

    fn commit(&self, position: usize, edges: &mut [EdgeState]) {
        edges[self.siblings[position]].commit_factor_to_variable(
            &self.normalized[position],
            self.energies[position],
            self.damping[position],
        );
    }
}

// Largest deviation of `actual` from `expected`, relative to the largest expected value
fn relative_deviation(actual: &[f64], expected: &[f64]) -> f64 {
    let scale = expected.iter().fold(0f64, |max, value| max.max(value.abs()));
    let deviation = actual
        .iter()
        .zip(expected.iter())
        .fold(0f64, |max, (a, e)| max.max((a - e).abs()));
    if scale > 0. {
        deviation / scale
    } else {
        deviation
    }
}

impl NodeEngine for FactorEngine {
    type Belief = SparseTable;

    fn node(&self) -> NodeId {
        NodeId::Factor(self.factor)
    }

    fn siblings(&self) -> &[usize] {
        &self.siblings
    }

    fn update(&mut self, edges: &mut [EdgeState]) -> SolverResult<()> {
        let incoming = self.incoming(edges);
        let outputs = match &mut self.strategy {
            UpdateStrategy::Naive => self.naive.marginalize_all(&incoming).to_vec(),
            UpdateStrategy::KBest(marginalizer) => marginalizer.marginalize_all(&incoming).to_vec(),
            UpdateStrategy::Optimized(plan) => {
                let outputs = plan.execute(&incoming).to_vec();
                if self.verify {
                    let expected = self.naive.marginalize_all(&incoming);
                    for (edge, (actual, expected)) in outputs.iter().zip(expected).enumerate() {
                        let deviation = relative_deviation(actual, expected);
                        if deviation > PLAN_TOLERANCE {
                            return Err(SolverError::PlanMismatch {
                                factor: self.factor,
                                edge,
                                deviation,
                            });
                        }
                    }
                }
                outputs
            }
        };

        for (position, computed) in outputs.iter().enumerate() {
            self.stage(position, computed)?;
        }
        for position in 0..self.siblings.len() {
            self.commit(position, edges);
        }
        Ok(())
    }

    fn update_edge(&mut self, position: usize, edges: &mut [EdgeState]) -> SolverResult<()> {
        if position >= self.siblings.len() {
            return Err(SolverError::NoSuchEdge {
                node: self.node(),
                position,
            });
        }
        let incoming = self.incoming(edges);
        let computed = match &mut self.strategy {
            UpdateStrategy::KBest(marginalizer) => {
                marginalizer.marginalize_edge(position, &incoming).to_vec()
            }
            UpdateStrategy::Naive | UpdateStrategy::Optimized(_) => {
                self.naive.marginalize_edge(position, &incoming).to_vec()
            }
        };
        self.stage(position, &computed)?;
        self.commit(position, edges);
        Ok(())
    }

    fn belief(&self, edges: &[EdgeState]) -> SolverResult<SparseTable> {
        let mut weights = self.naive.entry_beliefs(&self.incoming(edges));
        normalize(&mut weights).ok_or(SolverError::ZeroMass {
            node: self.node(),
            edge: None,
        })?;
        Ok(self.naive.table().with_weights(weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::options::{SolverOptions, UpdateApproach},
        plan::update_plan::{AuxTable, Kernel, PlanStep},
        tables::table_wrapper::{TableRepresentation, TableWrapper},
    };

    // Factor 0 over two binary variables with the table {(0,0):2, (0,1):1, (1,0):1, (1,1):2}
    fn construct_pair() -> (FactorGraph, Vec<EdgeState>) {
        let mut graph = FactorGraph::new();
        let a = graph.add_variable(2);
        let b = graph.add_variable(2);
        let table = TableWrapper::sparse(
            vec![2, 2],
            vec![
                (vec![0, 0], 2.),
                (vec![0, 1], 1.),
                (vec![1, 0], 1.),
                (vec![1, 1], 2.),
            ],
        )
        .unwrap();
        graph.add_factor(vec![a, b], table).unwrap();
        (graph, vec![EdgeState::new(2), EdgeState::new(2)])
    }

    fn engine(graph: &FactorGraph, options: &SolverOptions) -> FactorEngine {
        let local = graph.factor(0).unwrap().options();
        let resolved = ResolvedOptions::resolve(NodeId::Factor(0), 2, options, local).unwrap();
        FactorEngine::new(graph, 0, &resolved, &EngineRegistry::default()).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn concrete_scenario_for_every_approach() {
        for approach in [
            UpdateApproach::Normal,
            UpdateApproach::Optimized,
            UpdateApproach::Automatic,
        ] {
            let (graph, mut edges) = construct_pair();
            let mut options = SolverOptions::default();
            options.set_update_approach(approach).set_verify_optimized_plans(true);
            let mut engine = engine(&graph, &options);
            match approach {
                UpdateApproach::Normal => assert!(!engine.has_plan()),
                UpdateApproach::Optimized => assert!(engine.has_plan()),
                UpdateApproach::Automatic => {}
            }

            engine.update(&mut edges).unwrap();
            assert_close(edges[1].factor_to_variable().as_slice(), &[0.5, 0.5]);

            edges[0].commit_variable_to_factor(&[1., 0.], 0., 0.);
            engine.update(&mut edges).unwrap();
            assert_close(edges[1].factor_to_variable().as_slice(), &[2. / 3., 1. / 3.]);
            // unnormalized sum was 3
            assert!((edges[1].factor_to_variable().normalization_energy() + 3f64.ln()).abs() < 1e-9);

            engine.update_edge(1, &mut edges).unwrap();
            assert_close(edges[1].factor_to_variable().as_slice(), &[2. / 3., 1. / 3.]);
        }
    }

    // Folds dimension 1 correctly for edge 0, then reuses that table for edge 1 as well
    fn plan_with_wrong_output() -> UpdatePlan {
        let tables = vec![
            AuxTable {
                dims: vec![0, 1],
                representation: TableRepresentation::Dense,
                len: 4,
            },
            AuxTable {
                dims: vec![0],
                representation: TableRepresentation::Dense,
                len: 2,
            },
        ];
        let steps = vec![
            PlanStep::Marginalization {
                source: 0,
                destination: 1,
                dim: 1,
                source_representation: TableRepresentation::Dense,
                destination_representation: TableRepresentation::Dense,
                kernel: Kernel::Strided {
                    outer: 2,
                    dim_size: 2,
                    stride: 1,
                },
            },
            PlanStep::Output {
                source: 1,
                edge: 0,
                scatter: None,
            },
            PlanStep::Output {
                source: 1,
                edge: 1,
                scatter: None,
            },
        ];
        UpdatePlan::new(tables, steps, vec![2., 1., 1., 2.], &[2, 2])
    }

    #[test]
    fn verification_rejects_deviating_plan() {
        let (graph, mut edges) = construct_pair();
        let mut registry = EngineRegistry::default();
        registry.register("wrong-output", |_| true, |_| {
            Ok(UpdateStrategy::Optimized(plan_with_wrong_output()))
        });
        let mut options = SolverOptions::default();
        options.set_verify_optimized_plans(true);
        let resolved = ResolvedOptions::resolve(NodeId::Factor(0), 2, &options, None).unwrap();
        let mut engine = FactorEngine::new(&graph, 0, &resolved, &registry).unwrap();
        assert_eq!(engine.engine_name(), "wrong-output");
        assert!(engine.has_plan());

        // with uniform inputs both marginals are [1.5, 1.5] and the plan happens to agree
        engine.update(&mut edges).unwrap();

        edges[0].commit_variable_to_factor(&[1., 0.], 0., 0.);
        let before: Vec<Vec<f64>> = edges
            .iter()
            .map(|edge| edge.factor_to_variable().as_slice().to_vec())
            .collect();
        match engine.update(&mut edges) {
            Err(SolverError::PlanMismatch {
                factor: 0,
                edge: 1,
                deviation,
            }) => assert!((deviation - 0.25).abs() < 1e-12),
            other => panic!("expected a plan mismatch, got {:?}", other),
        }
        // nothing was committed
        for (edge, previous) in edges.iter().zip(before.iter()) {
            assert_eq!(edge.factor_to_variable().as_slice(), previous.as_slice());
        }

        // without verification the plan output goes through unchecked
        options.set_verify_optimized_plans(false);
        let resolved = ResolvedOptions::resolve(NodeId::Factor(0), 2, &options, None).unwrap();
        let mut engine = FactorEngine::new(&graph, 0, &resolved, &registry).unwrap();
        engine.update(&mut edges).unwrap();
        assert_close(edges[1].factor_to_variable().as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn zero_mass_is_an_error() {
        let mut graph = FactorGraph::new();
        let a = graph.add_variable(2);
        let b = graph.add_variable(2);
        let table = TableWrapper::sparse(vec![2, 2], vec![(vec![0, 1], 1.)]).unwrap();
        graph.add_factor(vec![a, b], table).unwrap();
        let mut edges = vec![EdgeState::new(2), EdgeState::new(2)];
        let mut engine = engine(&graph, &SolverOptions::default());

        edges[0].commit_variable_to_factor(&[0., 1.], 0., 0.);
        assert_eq!(
            engine.update_edge(1, &mut edges),
            Err(SolverError::ZeroMass {
                node: NodeId::Factor(0),
                edge: Some(1)
            })
        );
        assert!(engine.update(&mut edges).is_err());
        assert!(engine.update_edge(0, &mut edges).is_ok());
    }

    #[test]
    fn damping_extremes() {
        let (mut graph, mut edges) = construct_pair();
        edges[0].commit_variable_to_factor(&[1., 0.], 0., 0.);

        let mut undamped = engine(&graph, &SolverOptions::default());
        let mut reference = edges.clone();
        undamped.update(&mut reference).unwrap();

        let mut options = crate::graph::options::NodeOptions::default();
        options.set_edge_damping(vec![0., 1.]);
        graph.set_options(NodeId::Factor(0), options).unwrap();
        let mut damped = engine(&graph, &SolverOptions::default());
        damped.update(&mut edges).unwrap();

        // no damping on edge 0 gives the undamped message, full damping on edge 1 keeps uniform
        assert_eq!(
            edges[0].factor_to_variable().as_slice(),
            reference[0].factor_to_variable().as_slice()
        );
        assert_eq!(edges[1].factor_to_variable().as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn belief_is_aligned_with_entries() {
        let (graph, mut edges) = construct_pair();
        edges[0].commit_variable_to_factor(&[0.25, 0.75], 0., 0.);
        let engine = engine(&graph, &SolverOptions::default());
        let belief = engine.belief(&edges).unwrap();
        // weights times incoming: [0.5, 0.25, 0.75, 1.5] * 0.5, normalized by 1.5
        assert_close(belief.weights(), &[0.5 / 3., 0.25 / 3., 0.75 / 3., 1.5 / 3.]);
        assert_eq!(belief.entry(3).0, &[1, 1]);

        let array = engine.belief_array(&edges).unwrap();
        assert!((array[ndarray::IxDyn(&[1, 0])] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn kbest_strategy_for_large_domains() {
        let (graph, mut edges) = construct_pair();
        let mut options = SolverOptions::default();
        options.set_max_message_size(Some(1));
        let mut engine = engine(&graph, &options);
        assert_eq!(engine.engine_name(), "k-best");

        edges[0].commit_variable_to_factor(&[0.4, 0.6], 0., 0.);
        engine.update_edge(1, &mut edges).unwrap();
        // only index 1 of the first variable is considered: row (1, .) = [1, 2]
        assert_close(edges[1].factor_to_variable().as_slice(), &[1. / 3., 2. / 3.]);
    }
}
