use ndarray::Array1;

use crate::{
    engines::node_engine::NodeEngine,
    errors::{CertaintySource, SolverError, SolverResult},
    graph::{
        edge_state::EdgeState,
        factor_graph::{FactorGraph, NodeId},
        options::ResolvedOptions,
    },
    message::discrete_message::{certain_index, floored_ln, normalize},
};

// Sum-product update of a variable node: the message to a factor is the product of the prior and
// the messages from every other factor, computed in the log domain
pub struct VariableEngine {
    variable: usize,
    domain_size: usize,
    siblings: Vec<usize>,
    prior: Option<Vec<f64>>,
    fixed_value: Option<usize>,
    damping: Vec<f64>,
    log_totals: Vec<f64>,
    zero_counts: Vec<usize>,
    outputs: Vec<Vec<f64>>,
    energies: Vec<f64>,
}

impl VariableEngine {
    pub fn new(graph: &FactorGraph, variable: usize, options: &ResolvedOptions) -> SolverResult<Self> {
        graph.validate_variable(variable)?;
        let node = graph.variable(variable)?;
        let domain_size = node.domain_size();
        let degree = node.degree();

        Ok(VariableEngine {
            variable,
            domain_size,
            siblings: node.siblings().to_vec(),
            prior: node.prior().map(<[f64]>::to_vec),
            fixed_value: node.fixed_value(),
            damping: options.damping.clone(),
            log_totals: vec![0.; domain_size],
            zero_counts: vec![0; domain_size],
            outputs: vec![vec![0.; domain_size]; degree],
            energies: vec![0.; degree],
        })
    }

    pub fn domain_size(&self) -> usize {
        self.domain_size
    }

    pub fn fixed_value(&self) -> Option<usize> {
        self.fixed_value
    }

    pub fn prior(&self) -> Option<&[f64]> {
        self.prior.as_deref()
    }

    fn incoming<'a>(&self, edges: &'a [EdgeState], position: usize) -> &'a [f64] {
        edges[self.siblings[position]].factor_to_variable().as_slice()
    }

    // Collects the prior and incoming messages that put all weight on a single index
    fn certain_inputs(&self, edges: &[EdgeState]) -> Vec<(CertaintySource, usize)> {
        let mut certain = Vec::new();
        if let Some(index) = self
            .prior
            .as_ref()
            .and_then(|prior| certain_index(prior.iter().copied()))
        {
            certain.push((CertaintySource::Prior, index));
        }
        for position in 0..self.siblings.len() {
            if let Some(index) = edges[self.siblings[position]]
                .factor_to_variable()
                .certain_index()
            {
                certain.push((CertaintySource::Edge(position), index));
            }
        }
        certain
    }

    fn check_certainty(
        &self,
        certain: &[(CertaintySource, usize)],
        excluded: Option<usize>,
    ) -> SolverResult<()> {
        let mut included = certain
            .iter()
            .filter(|(source, _)| excluded.map_or(true, |e| *source != CertaintySource::Edge(e)));
        if let Some((first_source, first_value)) = included.next() {
            if let Some((second_source, second_value)) =
                included.find(|(_, value)| value != first_value)
            {
                return Err(SolverError::ConflictingCertainty {
                    variable: self.variable,
                    first_source: *first_source,
                    first_value: *first_value,
                    second_source: *second_source,
                    second_value: *second_value,
                });
            }
        }
        Ok(())
    }

    // Fills `log_totals` and `zero_counts` with the combined prior and incoming messages,
    // skipping the sibling at `excluded`
    fn accumulate(&mut self, edges: &[EdgeState], excluded: Option<usize>) {
        match self.prior.as_ref() {
            Some(prior) => {
                for ((total, zeros), weight) in self
                    .log_totals
                    .iter_mut()
                    .zip(self.zero_counts.iter_mut())
                    .zip(prior.iter())
                {
                    *total = floored_ln(*weight);
                    *zeros = (*weight == 0.) as usize;
                }
            }
            None => {
                self.log_totals.fill(0.);
                self.zero_counts.fill(0);
            }
        }

        for position in 0..self.siblings.len() {
            if Some(position) == excluded {
                continue;
            }
            let incoming = edges[self.siblings[position]].factor_to_variable().as_slice();
            for ((total, zeros), weight) in self
                .log_totals
                .iter_mut()
                .zip(self.zero_counts.iter_mut())
                .zip(incoming.iter())
            {
                *total += floored_ln(*weight);
                *zeros += (*weight == 0.) as usize;
            }
        }
    }

    fn write_fixed(&self, edges: &mut [EdgeState], value: usize, position: usize) {
        let mut delta = vec![0.; self.domain_size];
        delta[value] = 1.;
        edges[self.siblings[position]].commit_variable_to_factor(&delta, 0., 0.);
    }
}

// Turns log weights into normalized weights in place and returns the normalization energy,
// or None when every index has a zero factor
fn exponentiate(values: &mut [f64], has_zero: impl Fn(usize) -> bool) -> Option<f64> {
    if (0..values.len()).all(has_zero) {
        return None;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    for value in values.iter_mut() {
        *value = (*value - max).exp();
    }
    normalize(values).map(|energy| energy - max)
}

impl NodeEngine for VariableEngine {
    type Belief = Array1<f64>;

    fn node(&self) -> NodeId {
        NodeId::Variable(self.variable)
    }

    fn siblings(&self) -> &[usize] {
        &self.siblings
    }

    fn update(&mut self, edges: &mut [EdgeState]) -> SolverResult<()> {
        if let Some(value) = self.fixed_value {
            for position in 0..self.siblings.len() {
                self.write_fixed(edges, value, position);
            }
            return Ok(());
        }

        let certain = self.certain_inputs(edges);
        self.accumulate(edges, None);

        // Each output subtracts its own edge's contribution from the totals
        for position in 0..self.siblings.len() {
            self.check_certainty(&certain, Some(position))?;
            let incoming = self.incoming(edges, position);
            let mut output = std::mem::take(&mut self.outputs[position]);
            for (index, value) in output.iter_mut().enumerate() {
                *value = self.log_totals[index] - floored_ln(incoming[index]);
            }
            let zero_counts = &self.zero_counts;
            let energy = exponentiate(&mut output, |index| {
                zero_counts[index] > (incoming[index] == 0.) as usize
            });
            self.outputs[position] = output;
            self.energies[position] = energy.ok_or(SolverError::ZeroMass {
                node: NodeId::Variable(self.variable),
                edge: Some(position),
            })?;
        }

        for (position, edge) in self.siblings.iter().enumerate() {
            edges[*edge].commit_variable_to_factor(
                &self.outputs[position],
                self.energies[position],
                self.damping[position],
            );
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
        if let Some(value) = self.fixed_value {
            self.write_fixed(edges, value, position);
            return Ok(());
        }

        self.check_certainty(&self.certain_inputs(edges), Some(position))?;
        self.accumulate(edges, Some(position));
        let mut output = std::mem::take(&mut self.outputs[position]);
        output.copy_from_slice(&self.log_totals);
        let zero_counts = &self.zero_counts;
        let energy = exponentiate(&mut output, |index| zero_counts[index] > 0);
        self.outputs[position] = output;
        let energy = energy.ok_or(SolverError::ZeroMass {
            node: NodeId::Variable(self.variable),
            edge: Some(position),
        })?;

        edges[self.siblings[position]].commit_variable_to_factor(
            &self.outputs[position],
            energy,
            self.damping[position],
        );
        Ok(())
    }

    fn belief(&self, edges: &[EdgeState]) -> SolverResult<Array1<f64>> {
        if let Some(value) = self.fixed_value {
            let mut belief = Array1::zeros(self.domain_size);
            belief[value] = 1.;
            return Ok(belief);
        }

        self.check_certainty(&self.certain_inputs(edges), None)?;
        let mut values = self
            .prior
            .as_ref()
            .map_or_else(|| vec![0.; self.domain_size], |prior| {
                prior.iter().map(|w| floored_ln(*w)).collect()
            });
        let mut has_zero: Vec<bool> = match self.prior.as_ref() {
            Some(prior) => prior.iter().map(|w| *w == 0.).collect(),
            None => vec![false; self.domain_size],
        };
        for position in 0..self.siblings.len() {
            for (index, weight) in self.incoming(edges, position).iter().enumerate() {
                values[index] += floored_ln(*weight);
                has_zero[index] |= *weight == 0.;
            }
        }

        exponentiate(&mut values, |index| has_zero[index]).ok_or(SolverError::ZeroMass {
            node: NodeId::Variable(self.variable),
            edge: None,
        })?;
        Ok(Array1::from(values))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{graph::options::SolverOptions, tables::table_wrapper::TableWrapper};

    // Variable 0 (domain 3) attached to three unary factors
    fn construct_star(prior: Option<Vec<f64>>, fixed: Option<usize>) -> (FactorGraph, Vec<EdgeState>) {
        let mut graph = FactorGraph::new();
        let variable = graph.add_variable(3);
        for _ in 0..3 {
            graph
                .add_factor(vec![variable], TableWrapper::dense(vec![3], vec![1.; 3]).unwrap())
                .unwrap();
        }
        if let Some(prior) = prior {
            graph.set_prior(variable, prior).unwrap();
        }
        graph.fix_value(variable, fixed).unwrap();
        let edges = (0..3).map(|_| EdgeState::new(3)).collect();
        (graph, edges)
    }

    fn engine(graph: &FactorGraph, damping: f64) -> VariableEngine {
        let mut options = SolverOptions::default();
        options.set_damping(damping);
        let resolved = ResolvedOptions::resolve(NodeId::Variable(0), 3, &options, None).unwrap();
        VariableEngine::new(graph, 0, &resolved).unwrap()
    }

    fn set_incoming(edges: &mut [EdgeState], edge: usize, weights: &[f64]) {
        edges[edge].commit_factor_to_variable(weights, 0., 0.);
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn product_of_other_messages() {
        let (graph, mut edges) = construct_star(Some(vec![1., 2., 1.]), None);
        set_incoming(&mut edges, 0, &[0.5, 0.25, 0.25]);
        set_incoming(&mut edges, 1, &[0.2, 0.2, 0.6]);
        set_incoming(&mut edges, 2, &[0.1, 0.8, 0.1]);
        let mut engine = engine(&graph, 0.);

        engine.update(&mut edges).unwrap();
        // to edge 0: prior * in1 * in2 = [0.02, 0.32, 0.06]
        assert_close(edges[0].variable_to_factor().as_slice(), &[0.05, 0.8, 0.15]);
        // to edge 2: prior * in0 * in1 = [0.1, 0.1, 0.15]
        assert_close(
            edges[2].variable_to_factor().as_slice(),
            &[0.1 / 0.35, 0.1 / 0.35, 0.15 / 0.35],
        );

        let all = edges[1].variable_to_factor().clone();
        engine.update_edge(1, &mut edges).unwrap();
        assert_close(edges[1].variable_to_factor().as_slice(), all.as_slice());

        // energy reconstructs the unnormalized product: [0.02, 0.32, 0.06] sums to 0.4
        assert!((edges[0].variable_to_factor().normalization_energy() + 0.4f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn belief_includes_every_message() {
        let (graph, mut edges) = construct_star(None, None);
        set_incoming(&mut edges, 0, &[0.5, 0.5, 0.]);
        set_incoming(&mut edges, 1, &[0.25, 0.5, 0.25]);
        let engine = engine(&graph, 0.);
        let belief = engine.belief(&edges).unwrap();
        assert_close(belief.as_slice().unwrap(), &[1. / 3., 2. / 3., 0.]);
    }

    #[test]
    fn zero_mass_is_an_error() {
        let (graph, mut edges) = construct_star(None, None);
        set_incoming(&mut edges, 0, &[1., 0., 0.]);
        set_incoming(&mut edges, 1, &[0., 0.5, 0.5]);
        let mut engine = engine(&graph, 0.);
        assert_eq!(
            engine.update_edge(2, &mut edges),
            Err(SolverError::ZeroMass {
                node: NodeId::Variable(0),
                edge: Some(2)
            })
        );
        // excluding one of the two disjoint messages leaves positive mass
        assert!(engine.update_edge(0, &mut edges).is_ok());
    }

    #[test]
    fn conflicting_certainty_is_reported() {
        let (graph, mut edges) = construct_star(Some(vec![0., 0., 1.]), None);
        set_incoming(&mut edges, 1, &[1., 0., 0.]);
        let mut engine = engine(&graph, 0.);
        assert_eq!(
            engine.update(&mut edges),
            Err(SolverError::ConflictingCertainty {
                variable: 0,
                first_source: CertaintySource::Prior,
                first_value: 2,
                second_source: CertaintySource::Edge(1),
                second_value: 0
            })
        );
    }

    #[test]
    fn fixed_value_ignores_inputs_and_damping() {
        let (graph, mut edges) = construct_star(Some(vec![1., 1., 1.]), Some(1));
        set_incoming(&mut edges, 0, &[1., 0., 0.]);
        let mut engine = engine(&graph, 0.5);
        engine.update(&mut edges).unwrap();
        for edge in edges.iter() {
            assert_eq!(edge.variable_to_factor().as_slice(), &[0., 1., 0.]);
        }
        assert_eq!(engine.belief(&edges).unwrap().to_vec(), vec![0., 1., 0.]);
    }

    #[test]
    fn damping_blends_with_previous_message() {
        let (graph, mut edges) = construct_star(None, None);
        set_incoming(&mut edges, 1, &[0.2, 0.2, 0.6]);
        let mut engine = engine(&graph, 0.25);
        // previous message to edge 0 is uniform
        engine.update_edge(0, &mut edges).unwrap();
        let expected: Vec<f64> = [0.2, 0.2, 0.6]
            .iter()
            .map(|w| 0.25 / 3. + 0.75 * w)
            .collect();
        assert_close(edges[0].variable_to_factor().as_slice(), &expected);
    }

    proptest! {
        #[test]
        fn outputs_are_normalized_and_energy_reconstructs_product(
            prior in proptest::collection::vec(0.01f64..10., 3),
            incoming in proptest::collection::vec(proptest::collection::vec(0.01f64..10., 3), 3),
        ) {
            let (graph, mut edges) = construct_star(Some(prior.clone()), None);
            for (edge, weights) in incoming.iter().enumerate() {
                set_incoming(&mut edges, edge, weights);
            }
            let mut engine = engine(&graph, 0.);
            engine.update(&mut edges).unwrap();

            for output in 0..3 {
                let message = edges[output].variable_to_factor();
                prop_assert!((message.sum() - 1.).abs() < 1e-9);
                let unnormalized: f64 = (0..3)
                    .map(|index| {
                        (0..3)
                            .filter(|edge| *edge != output)
                            .map(|edge| edges[edge].factor_to_variable().as_slice()[index])
                            .product::<f64>()
                            * prior[index]
                    })
                    .sum();
                prop_assert!((message.normalization_energy() + unnormalized.ln()).abs() < 1e-9);
            }
        }
    }
}
