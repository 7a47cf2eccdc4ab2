use ndarray::Array1;

use crate::message::discrete_message::DiscreteMessage;

// Messages travelling in both directions along one (variable, factor) edge. The damping
// snapshots are allocated the first time a damped message is committed in that direction.
#[derive(Clone, Debug)]
pub struct EdgeState {
    variable_to_factor: DiscreteMessage,
    factor_to_variable: DiscreteMessage,
    variable_snapshot: Option<Array1<f64>>,
    factor_snapshot: Option<Array1<f64>>,
}

impl EdgeState {
    pub fn new(domain_size: usize) -> Self {
        EdgeState {
            variable_to_factor: DiscreteMessage::uniform(domain_size),
            factor_to_variable: DiscreteMessage::uniform(domain_size),
            variable_snapshot: None,
            factor_snapshot: None,
        }
    }

    pub fn variable_to_factor(&self) -> &DiscreteMessage {
        &self.variable_to_factor
    }

    pub fn factor_to_variable(&self) -> &DiscreteMessage {
        &self.factor_to_variable
    }

    pub fn commit_variable_to_factor(&mut self, computed: &[f64], energy: f64, damping: f64) {
        self.variable_to_factor
            .assign_damped(computed, energy, damping, &mut self.variable_snapshot);
    }

    pub fn commit_factor_to_variable(&mut self, computed: &[f64], energy: f64, damping: f64) {
        self.factor_to_variable
            .assign_damped(computed, energy, damping, &mut self.factor_snapshot);
    }

    pub fn has_snapshots(&self) -> (bool, bool) {
        (
            self.variable_snapshot.is_some(),
            self.factor_snapshot.is_some(),
        )
    }

    pub fn reset_variable_to_factor(&mut self) {
        self.variable_to_factor.set_uniform();
        self.variable_snapshot = None;
    }

    pub fn reset_factor_to_variable(&mut self) {
        self.factor_to_variable.set_uniform();
        self.factor_snapshot = None;
    }

    // Resets both messages to uniform and releases the damping buffers
    pub fn reset(&mut self) {
        self.reset_variable_to_factor();
        self.reset_factor_to_variable();
    }
}
