use std::fmt::Display;

use log::debug;
use petgraph::{
    algo::is_cyclic_undirected,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    errors::{SolverError, SolverResult},
    graph::options::NodeOptions,
    tables::table_wrapper::TableWrapper,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Variable(usize),
    Factor(usize),
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Variable(index) => write!(f, "variable {}", index),
            NodeId::Factor(index) => write!(f, "factor {}", index),
        }
    }
}

// Endpoints of an edge, with the edge's position in each endpoint's sibling list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEnds {
    pub factor: usize,
    pub variable: usize,
    pub factor_position: usize,
    pub variable_position: usize,
}

// Edges go from factors to variables; edge indices double as indices into the edge-state arena
pub type FactorGraphStructure = DiGraph<NodeId, EdgeEnds, usize>;

#[derive(Clone, Debug)]
pub struct VariableNode {
    domain_size: usize,
    prior: Option<Vec<f64>>,
    fixed_value: Option<usize>,
    siblings: Vec<usize>, // edge indices, in the order factors were attached
    options: Option<NodeOptions>,
    graph_node: NodeIndex<usize>,
}

impl VariableNode {
    pub fn domain_size(&self) -> usize {
        self.domain_size
    }

    pub fn prior(&self) -> Option<&[f64]> {
        self.prior.as_deref()
    }

    pub fn fixed_value(&self) -> Option<usize> {
        self.fixed_value
    }

    pub fn siblings(&self) -> &[usize] {
        &self.siblings
    }

    pub fn degree(&self) -> usize {
        self.siblings.len()
    }

    pub fn options(&self) -> Option<&NodeOptions> {
        self.options.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct FactorNode {
    neighbors: Vec<usize>, // variable indices, in table dimension order
    table: TableWrapper,
    density_hint: Option<f64>,
    siblings: Vec<usize>, // edge indices, parallel to `neighbors`
    options: Option<NodeOptions>,
}

impl FactorNode {
    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn table(&self) -> &TableWrapper {
        &self.table
    }

    pub fn density_hint(&self) -> Option<f64> {
        self.density_hint
    }

    pub fn siblings(&self) -> &[usize] {
        &self.siblings
    }

    pub fn degree(&self) -> usize {
        self.siblings.len()
    }

    pub fn options(&self) -> Option<&NodeOptions> {
        self.options.as_ref()
    }
}

/// Bipartite graph of discrete variables and table factors.
///
/// The graph only records the model; it is checked when a solver is built from it
/// (see [`FactorGraph::validate_variable`] and [`FactorGraph::validate_factor`]).
#[derive(Clone, Debug, Default)]
pub struct FactorGraph {
    variables: Vec<VariableNode>,
    factors: Vec<FactorNode>,
    graph: FactorGraphStructure,
}

impl FactorGraph {
    pub fn new() -> Self {
        FactorGraph::default()
    }

    // Adds a variable with the given domain size and returns its index
    pub fn add_variable(&mut self, domain_size: usize) -> usize {
        let index = self.variables.len();
        let graph_node = self.graph.add_node(NodeId::Variable(index));
        self.variables.push(VariableNode {
            domain_size,
            prior: None,
            fixed_value: None,
            siblings: Vec::new(),
            options: None,
            graph_node,
        });
        index
    }

    // Adds a factor over `neighbors` (in table dimension order) and returns its index
    pub fn add_factor(&mut self, neighbors: Vec<usize>, table: TableWrapper) -> SolverResult<usize> {
        if let Some(missing) = neighbors.iter().find(|v| **v >= self.variables.len()) {
            return Err(SolverError::NoSuchNode(NodeId::Variable(*missing)));
        }

        let index = self.factors.len();
        let graph_node = self.graph.add_node(NodeId::Factor(index));
        let mut siblings = Vec::with_capacity(neighbors.len());
        for (factor_position, variable) in neighbors.iter().enumerate() {
            let variable_node = &mut self.variables[*variable];
            let ends = EdgeEnds {
                factor: index,
                variable: *variable,
                factor_position,
                variable_position: variable_node.siblings.len(),
            };
            let edge = self
                .graph
                .add_edge(graph_node, variable_node.graph_node, ends)
                .index();
            variable_node.siblings.push(edge);
            siblings.push(edge);
        }
        debug!(
            "Added factor {} over variables {:?} with {} non-zero entries",
            index,
            neighbors,
            table.nnz()
        );

        self.factors.push(FactorNode {
            neighbors,
            table,
            density_hint: None,
            siblings,
            options: None,
        });
        Ok(index)
    }

    pub fn set_prior(&mut self, variable: usize, prior: Vec<f64>) -> SolverResult<()> {
        self.variable_mut(variable)?.prior = Some(prior);
        Ok(())
    }

    pub fn clear_prior(&mut self, variable: usize) -> SolverResult<()> {
        self.variable_mut(variable)?.prior = None;
        Ok(())
    }

    pub fn fix_value(&mut self, variable: usize, value: Option<usize>) -> SolverResult<()> {
        self.variable_mut(variable)?.fixed_value = value;
        Ok(())
    }

    pub fn set_factor_table(&mut self, factor: usize, table: TableWrapper) -> SolverResult<()> {
        self.factor_mut(factor)?.table = table;
        Ok(())
    }

    // Declares the expected density of a factor's table, used instead of measuring it when
    // choosing the plan representation of the table itself
    pub fn set_density_hint(&mut self, factor: usize, density: Option<f64>) -> SolverResult<()> {
        self.factor_mut(factor)?.density_hint = density;
        Ok(())
    }

    pub fn set_options(&mut self, node: NodeId, options: NodeOptions) -> SolverResult<()> {
        match node {
            NodeId::Variable(index) => self.variable_mut(index)?.options = Some(options),
            NodeId::Factor(index) => self.factor_mut(index)?.options = Some(options),
        }
        Ok(())
    }

    pub fn clear_options(&mut self, node: NodeId) -> SolverResult<()> {
        match node {
            NodeId::Variable(index) => self.variable_mut(index)?.options = None,
            NodeId::Factor(index) => self.factor_mut(index)?.options = None,
        }
        Ok(())
    }

    pub fn variable(&self, index: usize) -> SolverResult<&VariableNode> {
        self.variables
            .get(index)
            .ok_or(SolverError::NoSuchNode(NodeId::Variable(index)))
    }

    pub fn factor(&self, index: usize) -> SolverResult<&FactorNode> {
        self.factors
            .get(index)
            .ok_or(SolverError::NoSuchNode(NodeId::Factor(index)))
    }

    fn variable_mut(&mut self, index: usize) -> SolverResult<&mut VariableNode> {
        self.variables
            .get_mut(index)
            .ok_or(SolverError::NoSuchNode(NodeId::Variable(index)))
    }

    fn factor_mut(&mut self, index: usize) -> SolverResult<&mut FactorNode> {
        self.factors
            .get_mut(index)
            .ok_or(SolverError::NoSuchNode(NodeId::Factor(index)))
    }

    pub fn variables(&self) -> &[VariableNode] {
        &self.variables
    }

    pub fn factors(&self) -> &[FactorNode] {
        &self.factors
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn factor_count(&self) -> usize {
        self.factors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn edge(&self, edge: usize) -> &EdgeEnds {
        &self.graph.raw_edges()[edge].weight
    }

    pub fn structure(&self) -> &FactorGraphStructure {
        &self.graph
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.variables.len())
            .map(NodeId::Variable)
            .chain((0..self.factors.len()).map(NodeId::Factor))
    }

    pub fn siblings(&self, node: NodeId) -> SolverResult<&[usize]> {
        match node {
            NodeId::Variable(index) => Ok(self.variable(index)?.siblings()),
            NodeId::Factor(index) => Ok(self.factor(index)?.siblings()),
        }
    }

    pub fn node_options(&self, node: NodeId) -> SolverResult<Option<&NodeOptions>> {
        match node {
            NodeId::Variable(index) => Ok(self.variable(index)?.options()),
            NodeId::Factor(index) => Ok(self.factor(index)?.options()),
        }
    }

    // Domain sizes of a factor's neighbors, in table dimension order
    pub fn domain_sizes(&self, factor: usize) -> SolverResult<Vec<usize>> {
        Ok(self
            .factor(factor)?
            .neighbors
            .iter()
            .map(|variable| self.variables[*variable].domain_size)
            .collect())
    }

    // Whether the graph (viewed as undirected) contains no cycles
    pub fn is_forest(&self) -> bool {
        !is_cyclic_undirected(&self.graph)
    }

    pub fn validate_variable(&self, index: usize) -> SolverResult<()> {
        let node = NodeId::Variable(index);
        let variable = self.variable(index)?;
        let invalid = |reason: String| SolverError::InvalidModel { node, reason };

        if variable.domain_size == 0 {
            return Err(invalid("domain size is zero".to_string()));
        }
        if let Some(prior) = variable.prior.as_ref() {
            if prior.len() != variable.domain_size {
                return Err(invalid(format!(
                    "prior has {} weights for domain size {}",
                    prior.len(),
                    variable.domain_size
                )));
            }
            if let Some(weight) = prior.iter().find(|w| !(w.is_finite() && **w >= 0.)) {
                return Err(invalid(format!("prior has invalid weight {}", weight)));
            }
        }
        if let Some(value) = variable.fixed_value {
            if value >= variable.domain_size {
                return Err(invalid(format!(
                    "fixed value {} is outside domain of size {}",
                    value, variable.domain_size
                )));
            }
        }
        Ok(())
    }

    pub fn validate_factor(&self, index: usize) -> SolverResult<()> {
        let factor = self.factor(index)?;
        let mut seen = factor.neighbors.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != factor.neighbors.len() {
            return Err(SolverError::InvalidModel {
                node: NodeId::Factor(index),
                reason: format!("repeated neighbor in {:?}", factor.neighbors),
            });
        }
        if let Some(density) = factor.density_hint {
            if !(0. ..=1.).contains(&density) {
                return Err(SolverError::InvalidModel {
                    node: NodeId::Factor(index),
                    reason: format!("density hint {} is outside [0, 1]", density),
                });
            }
        }
        factor
            .table
            .validate_against(&self.domain_sizes(index)?)
            .map_err(|source| SolverError::MalformedTable {
                factor: index,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::table_wrapper::TableError;

    fn construct_chain() -> FactorGraph {
        let mut graph = FactorGraph::new();
        let a = graph.add_variable(2);
        let b = graph.add_variable(3);
        let c = graph.add_variable(2);
        graph
            .add_factor(vec![a, b], TableWrapper::dense(vec![2, 3], vec![1.; 6]).unwrap())
            .unwrap();
        graph
            .add_factor(vec![b, c], TableWrapper::dense(vec![3, 2], vec![1.; 6]).unwrap())
            .unwrap();
        graph
    }

    #[test]
    fn siblings_follow_attachment_order() {
        let graph = construct_chain();
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.variable(1).unwrap().siblings(), &[1, 2]);
        assert_eq!(graph.factor(1).unwrap().siblings(), &[2, 3]);
        assert_eq!(
            *graph.edge(2),
            EdgeEnds {
                factor: 1,
                variable: 1,
                factor_position: 0,
                variable_position: 1
            }
        );
        assert_eq!(graph.domain_sizes(1).unwrap(), vec![3, 2]);
    }

    #[test]
    fn forest_detection() {
        let mut graph = construct_chain();
        assert!(graph.is_forest());
        graph
            .add_factor(vec![0, 2], TableWrapper::dense(vec![2, 2], vec![1.; 4]).unwrap())
            .unwrap();
        assert!(!graph.is_forest());
    }

    #[test]
    fn unknown_nodes_are_reported() {
        let mut graph = construct_chain();
        assert_eq!(
            graph.add_factor(vec![7], TableWrapper::dense(vec![2], vec![1.; 2]).unwrap()),
            Err(SolverError::NoSuchNode(NodeId::Variable(7)))
        );
        assert!(graph.set_prior(5, vec![1.]).is_err());
    }

    #[test]
    fn validation() {
        let mut graph = construct_chain();
        graph.set_prior(0, vec![1., -1.]).unwrap();
        assert!(matches!(
            graph.validate_variable(0),
            Err(SolverError::InvalidModel { .. })
        ));
        graph.set_prior(0, vec![1., 2.]).unwrap();
        graph.fix_value(0, Some(2)).unwrap();
        assert!(graph.validate_variable(0).is_err());
        graph.fix_value(0, Some(1)).unwrap();
        assert!(graph.validate_variable(0).is_ok());

        graph
            .set_factor_table(0, TableWrapper::dense(vec![3, 2], vec![1.; 6]).unwrap())
            .unwrap();
        assert_eq!(
            graph.validate_factor(0),
            Err(SolverError::MalformedTable {
                factor: 0,
                source: TableError::DomainMismatch {
                    expected: vec![2, 3],
                    actual: vec![3, 2]
                }
            })
        );
    }
}
