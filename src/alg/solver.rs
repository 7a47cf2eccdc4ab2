use std::time::{Duration, Instant};

use log::{debug, info};
use ndarray::{Array1, ArrayD};

use crate::{
    alg::schedule::{Schedule, ScheduleEntry},
    engines::{
        factor_engine::FactorEngine, node_engine::NodeEngine, registry::EngineRegistry,
        variable_engine::VariableEngine,
    },
    errors::{SolverError, SolverResult},
    graph::{
        edge_state::EdgeState,
        factor_graph::{FactorGraph, NodeId},
        options::{NodeOptions, ResolvedOptions, SolverOptions},
    },
    tables::{sparse_table::SparseTable, table_wrapper::TableWrapper},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Belief {
    Variable(Array1<f64>),
    Factor(SparseTable),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveSummary {
    pub iterations: usize,
    pub converged: bool,
    pub last_change: f64, // largest change of a variable belief in the last iteration
    pub elapsed: Duration,
}

/// Loopy belief propagation over a [`FactorGraph`].
///
/// The solver owns the graph, one engine per node and the arena of edge states the engines
/// exchange messages through. Engines are built when the solver is created and rebuilt by
/// [`SumProductSolver::initialize`] whenever a node's table, prior or options change.
pub struct SumProductSolver {
    graph: FactorGraph,
    options: SolverOptions,
    registry: EngineRegistry,
    edges: Vec<EdgeState>,
    variables: Vec<VariableEngine>,
    factors: Vec<FactorEngine>,
    schedule: Schedule,
}

impl SumProductSolver {
    pub fn new(graph: FactorGraph, options: SolverOptions) -> SolverResult<Self> {
        SumProductSolver::with_registry(graph, options, EngineRegistry::default())
    }

    pub fn with_registry(
        graph: FactorGraph,
        options: SolverOptions,
        registry: EngineRegistry,
    ) -> SolverResult<Self> {
        let schedule = Schedule::new(&graph, options.schedule());
        let mut solver = SumProductSolver {
            graph,
            options,
            registry,
            edges: Vec::new(),
            variables: Vec::new(),
            factors: Vec::new(),
            schedule,
        };
        solver.initialize_all()?;
        Ok(solver)
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn edges(&self) -> &[EdgeState] {
        &self.edges
    }

    pub fn variable_engine(&self, variable: usize) -> SolverResult<&VariableEngine> {
        self.variables
            .get(variable)
            .ok_or(SolverError::NoSuchNode(NodeId::Variable(variable)))
    }

    pub fn factor_engine(&self, factor: usize) -> SolverResult<&FactorEngine> {
        self.factors
            .get(factor)
            .ok_or(SolverError::NoSuchNode(NodeId::Factor(factor)))
    }

    fn build_variable(&self, variable: usize) -> SolverResult<VariableEngine> {
        let node = self.graph.variable(variable)?;
        let options = ResolvedOptions::resolve(
            NodeId::Variable(variable),
            node.degree(),
            &self.options,
            node.options(),
        )?;
        VariableEngine::new(&self.graph, variable, &options)
    }

    fn build_factor(&self, factor: usize) -> SolverResult<FactorEngine> {
        let node = self.graph.factor(factor)?;
        let options = ResolvedOptions::resolve(
            NodeId::Factor(factor),
            node.degree(),
            &self.options,
            node.options(),
        )?;
        FactorEngine::new(&self.graph, factor, &options, &self.registry)
    }

    // Rebuilds every engine and resets every message to uniform
    pub fn initialize_all(&mut self) -> SolverResult<()> {
        let time_start = Instant::now();
        self.edges = (0..self.graph.edge_count())
            .map(|edge| {
                let variable = self.graph.edge(edge).variable;
                EdgeState::new(self.graph.variables()[variable].domain_size())
            })
            .collect();
        self.variables = (0..self.graph.variable_count())
            .map(|variable| self.build_variable(variable))
            .collect::<SolverResult<_>>()?;
        self.factors = (0..self.graph.factor_count())
            .map(|factor| self.build_factor(factor))
            .collect::<SolverResult<_>>()?;
        info!(
            "Initialized {} variables, {} factors ({} with compiled plans) and {} edges. \
             Elapsed time {:?}.",
            self.variables.len(),
            self.factors.len(),
            self.factors.iter().filter(|engine| engine.has_plan()).count(),
            self.edges.len(),
            time_start.elapsed()
        );
        Ok(())
    }

    // Rebuilds the engine of one node and resets its outgoing messages to uniform
    pub fn initialize(&mut self, node: NodeId) -> SolverResult<()> {
        match node {
            NodeId::Variable(variable) => {
                let engine = self.build_variable(variable)?;
                for edge in engine.siblings() {
                    self.edges[*edge].reset_variable_to_factor();
                }
                self.variables[variable] = engine;
            }
            NodeId::Factor(factor) => {
                let engine = self.build_factor(factor)?;
                for edge in engine.siblings() {
                    self.edges[*edge].reset_factor_to_variable();
                }
                self.factors[factor] = engine;
            }
        }
        debug!("Reinitialized {}", node);
        Ok(())
    }

    pub fn update(&mut self, node: NodeId) -> SolverResult<()> {
        match node {
            NodeId::Variable(variable) => self
                .variables
                .get_mut(variable)
                .ok_or(SolverError::NoSuchNode(node))?
                .update(&mut self.edges),
            NodeId::Factor(factor) => self
                .factors
                .get_mut(factor)
                .ok_or(SolverError::NoSuchNode(node))?
                .update(&mut self.edges),
        }
    }

    pub fn update_edge(&mut self, node: NodeId, position: usize) -> SolverResult<()> {
        match node {
            NodeId::Variable(variable) => self
                .variables
                .get_mut(variable)
                .ok_or(SolverError::NoSuchNode(node))?
                .update_edge(position, &mut self.edges),
            NodeId::Factor(factor) => self
                .factors
                .get_mut(factor)
                .ok_or(SolverError::NoSuchNode(node))?
                .update_edge(position, &mut self.edges),
        }
    }

    pub fn belief(&self, node: NodeId) -> SolverResult<Belief> {
        Ok(match node {
            NodeId::Variable(variable) => Belief::Variable(self.variable_belief(variable)?),
            NodeId::Factor(factor) => Belief::Factor(self.factor_belief(factor)?),
        })
    }

    pub fn variable_belief(&self, variable: usize) -> SolverResult<Array1<f64>> {
        self.variable_engine(variable)?.belief(&self.edges)
    }

    pub fn factor_belief(&self, factor: usize) -> SolverResult<SparseTable> {
        self.factor_engine(factor)?.belief(&self.edges)
    }

    pub fn factor_belief_array(&self, factor: usize) -> SolverResult<ArrayD<f64>> {
        self.factor_engine(factor)?.belief_array(&self.edges)
    }

    pub fn set_factor_table(&mut self, factor: usize, table: TableWrapper) -> SolverResult<()> {
        let previous = self.graph.factor(factor)?.table().clone();
        self.graph.set_factor_table(factor, table)?;
        if let Err(error) = self.initialize(NodeId::Factor(factor)) {
            // keep the last table the engine was built from
            self.graph.set_factor_table(factor, previous)?;
            return Err(error);
        }
        Ok(())
    }

    pub fn set_prior(&mut self, variable: usize, prior: Option<Vec<f64>>) -> SolverResult<()> {
        let previous = self.graph.variable(variable)?.prior().map(<[f64]>::to_vec);
        self.assign_prior(variable, prior)?;
        if let Err(error) = self.initialize(NodeId::Variable(variable)) {
            self.assign_prior(variable, previous)?;
            return Err(error);
        }
        Ok(())
    }

    fn assign_prior(&mut self, variable: usize, prior: Option<Vec<f64>>) -> SolverResult<()> {
        match prior {
            Some(prior) => self.graph.set_prior(variable, prior),
            None => self.graph.clear_prior(variable),
        }
    }

    pub fn fix_value(&mut self, variable: usize, value: Option<usize>) -> SolverResult<()> {
        let previous = self.graph.variable(variable)?.fixed_value();
        self.graph.fix_value(variable, value)?;
        if let Err(error) = self.initialize(NodeId::Variable(variable)) {
            self.graph.fix_value(variable, previous)?;
            return Err(error);
        }
        Ok(())
    }

    pub fn set_node_options(&mut self, node: NodeId, options: NodeOptions) -> SolverResult<()> {
        let previous = self.graph.node_options(node)?.cloned();
        self.graph.set_options(node, options)?;
        if let Err(error) = self.initialize(node) {
            match previous {
                Some(previous) => self.graph.set_options(node, previous)?,
                None => self.graph.clear_options(node)?,
            }
            return Err(error);
        }
        Ok(())
    }

    // Runs the schedule once
    pub fn iterate(&mut self) -> SolverResult<()> {
        for entry in self.schedule.entries() {
            match *entry {
                ScheduleEntry::Node(NodeId::Variable(variable)) => {
                    self.variables[variable].update(&mut self.edges)?
                }
                ScheduleEntry::Node(NodeId::Factor(factor)) => {
                    self.factors[factor].update(&mut self.edges)?
                }
                ScheduleEntry::Edge {
                    node: NodeId::Variable(variable),
                    position,
                } => self.variables[variable].update_edge(position, &mut self.edges)?,
                ScheduleEntry::Edge {
                    node: NodeId::Factor(factor),
                    position,
                } => self.factors[factor].update_edge(position, &mut self.edges)?,
            }
        }
        Ok(())
    }

    fn variable_beliefs(&self) -> SolverResult<Vec<Array1<f64>>> {
        (0..self.variables.len())
            .map(|variable| self.variable_belief(variable))
            .collect()
    }

    // Iterates until no variable belief changes by more than the tolerance, or a limit is hit
    pub fn solve(&mut self) -> SolverResult<SolveSummary> {
        let time_start = Instant::now();
        let mut previous = self.variable_beliefs()?;
        let mut summary = SolveSummary {
            iterations: 0,
            converged: false,
            last_change: f64::INFINITY,
            elapsed: Duration::ZERO,
        };

        while summary.iterations < self.options.max_iterations() {
            self.iterate()?;
            summary.iterations += 1;

            let current = self.variable_beliefs()?;
            summary.last_change = previous
                .iter()
                .zip(current.iter())
                .flat_map(|(old, new)| old.iter().zip(new.iter()))
                .fold(0f64, |max, (old, new)| max.max((old - new).abs()));
            previous = current;

            let elapsed_time = time_start.elapsed();
            info!(
                "Iteration {}. Elapsed time {:?}. Largest belief change {:e}.",
                summary.iterations, elapsed_time, summary.last_change
            );

            if summary.last_change <= self.options.tolerance() {
                summary.converged = true;
                info!("Beliefs changed less than the tolerance. Stopping.");
                break;
            } else if elapsed_time >= self.options.time_max() {
                info!("Time limit reached. Interrupting.");
                break;
            }
        }
        if !summary.converged && summary.iterations == self.options.max_iterations() {
            info!("Maximum number of iterations reached. Interrupting.");
        }

        summary.elapsed = time_start.elapsed();
        info!(
            "Sum-product finished after {} iterations. Elapsed time {:?}.",
            summary.iterations, summary.elapsed
        );
        Ok(summary)
    }
}
